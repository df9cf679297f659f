use std::collections::BTreeMap;

use tally_schemas::{ReconcileResponse, RowEntry, UnmatchedTransactions};
use tally_source::Record;

use crate::MatchOutcome;

/// Terminal output of one reconciliation run. Built once, after every task
/// has been joined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationReport {
    pub total_processed: usize,
    pub total_matched: usize,
    /// Ledger records never matched, ascending position.
    pub missing_transactions: Vec<Record>,
    /// Never-matched statement records per source, ascending position.
    /// Every requested source has an entry, possibly empty.
    pub missing_statements: BTreeMap<String, Vec<Record>>,
}

impl ReconciliationReport {
    pub fn assemble(outcome: &MatchOutcome) -> Self {
        let ledger = &outcome.ledger;
        let missing_statements = outcome
            .sources
            .iter()
            .map(|s| (s.name().to_string(), s.unmatched().cloned().collect()))
            .collect();

        Self {
            total_processed: ledger.len(),
            total_matched: ledger.matched_count(),
            missing_transactions: ledger.unmatched_records().cloned().collect(),
            missing_statements,
        }
    }

    pub fn total_unmatched(&self) -> usize {
        self.missing_transactions.len()
    }

    pub fn to_response(&self) -> ReconcileResponse {
        ReconcileResponse {
            total_transactions_proceed: self.total_processed,
            total_matched_transactions: self.total_matched,
            total_unmatched_transactions: UnmatchedTransactions {
                missing_transactions: self.missing_transactions.iter().map(row_entry).collect(),
                missing_bank_statements: self
                    .missing_statements
                    .iter()
                    .map(|(name, rows)| (name.clone(), rows.iter().map(row_entry).collect()))
                    .collect(),
            },
        }
    }
}

fn row_entry(r: &Record) -> RowEntry {
    RowEntry {
        key: r.position,
        trx_id: r.external_id.clone(),
        amount: r.amount,
        r#type: r.raw_label.clone(),
        transaction_time: r.raw_timestamp.clone(),
    }
}
