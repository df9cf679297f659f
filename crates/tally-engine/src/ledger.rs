use std::collections::{BTreeSet, HashMap};

use tally_source::{Direction, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct MatchKey {
    amount: u64,
    direction: Direction,
}

/// Positionally indexed ledger plus the one-way "still unmatched" subset.
///
/// The record list never changes after construction. Only the matcher mutates
/// the unmatched subset, and positions only ever leave it.
#[derive(Debug, Clone)]
pub struct LedgerIndex {
    records: Vec<Record>,
    unmatched: BTreeSet<usize>,
    /// Unmatched positions grouped by (amount, direction), ascending.
    candidates: HashMap<MatchKey, BTreeSet<usize>>,
}

impl LedgerIndex {
    /// `records[i].position` must equal `i` (the reader guarantees this).
    pub fn new(records: Vec<Record>) -> Self {
        let mut candidates: HashMap<MatchKey, BTreeSet<usize>> = HashMap::new();
        for (pos, r) in records.iter().enumerate() {
            debug_assert_eq!(r.position, pos, "ledger positions must be dense");
            // Ledger amounts are unsigned; a negative one can never equal a magnitude.
            if let Ok(amount) = u64::try_from(r.amount) {
                candidates
                    .entry(MatchKey {
                        amount,
                        direction: r.direction,
                    })
                    .or_default()
                    .insert(pos);
            }
        }

        Self {
            unmatched: (0..records.len()).collect(),
            records,
            candidates,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn unmatched_count(&self) -> usize {
        self.unmatched.len()
    }

    pub fn matched_count(&self) -> usize {
        self.records.len() - self.unmatched.len()
    }

    pub fn is_unmatched(&self, position: usize) -> bool {
        self.unmatched.contains(&position)
    }

    /// Unmatched records in ascending position order.
    pub fn unmatched_records(&self) -> impl Iterator<Item = &Record> + '_ {
        self.unmatched.iter().map(move |&p| &self.records[p])
    }

    /// Lowest unmatched position whose amount equals `amount` and whose
    /// direction equals `direction`.
    pub fn find_candidate(&self, amount: u64, direction: Direction) -> Option<usize> {
        self.candidates
            .get(&MatchKey { amount, direction })
            .and_then(|set| set.first().copied())
    }

    /// Move `position` from unmatched to matched. Returns `false` if it was
    /// already matched or out of range.
    pub fn mark_matched(&mut self, position: usize) -> bool {
        if !self.unmatched.remove(&position) {
            return false;
        }
        let r = &self.records[position];
        if let Ok(amount) = u64::try_from(r.amount) {
            let key = MatchKey {
                amount,
                direction: r.direction,
            };
            if let Some(set) = self.candidates.get_mut(&key) {
                set.remove(&position);
                if set.is_empty() {
                    self.candidates.remove(&key);
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn rec(position: usize, amount: i64, direction: Direction) -> Record {
        Record {
            position,
            external_id: format!("L{position}"),
            amount,
            direction,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap(),
            raw_timestamp: "2024-01-05T00:00:00Z".to_string(),
            raw_label: direction.as_label().to_string(),
        }
    }

    #[test]
    fn lowest_position_wins_then_next() {
        let mut idx = LedgerIndex::new(vec![
            rec(0, 50, Direction::Credit),
            rec(1, 100, Direction::Credit),
            rec(2, 100, Direction::Credit),
        ]);
        assert_eq!(idx.find_candidate(100, Direction::Credit), Some(1));
        assert!(idx.mark_matched(1));
        assert_eq!(idx.find_candidate(100, Direction::Credit), Some(2));
        assert!(idx.mark_matched(2));
        assert_eq!(idx.find_candidate(100, Direction::Credit), None);
    }

    #[test]
    fn direction_is_part_of_the_key() {
        let idx = LedgerIndex::new(vec![rec(0, 100, Direction::Credit)]);
        assert_eq!(idx.find_candidate(100, Direction::Debit), None);
    }

    #[test]
    fn matching_is_one_way_and_counts_balance() {
        let mut idx = LedgerIndex::new(vec![
            rec(0, 10, Direction::Debit),
            rec(1, 20, Direction::Debit),
        ]);
        assert!(idx.mark_matched(0));
        assert!(!idx.mark_matched(0), "already matched");
        assert!(!idx.mark_matched(9), "out of range");
        assert!(!idx.is_unmatched(0));
        assert_eq!(idx.matched_count() + idx.unmatched_count(), idx.len());
        let left: Vec<usize> = idx.unmatched_records().map(|r| r.position).collect();
        assert_eq!(left, [1]);
    }

    #[test]
    fn negative_ledger_amount_never_matches() {
        let idx = LedgerIndex::new(vec![rec(0, -100, Direction::Debit)]);
        assert_eq!(idx.find_candidate(100, Direction::Debit), None);
        assert_eq!(idx.unmatched_count(), 1);
    }
}
