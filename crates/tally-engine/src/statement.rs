use std::collections::BTreeMap;

use tally_source::Record;

/// Per-source match state, written only by the matcher.
#[derive(Debug, Clone)]
pub struct StatementSource {
    name: String,
    /// Keyed by the statement record's own position.
    unmatched: BTreeMap<usize, Record>,
    received: usize,
    finished: bool,
}

impl StatementSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unmatched: BTreeMap::new(),
            received: 0,
            finished: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Records received so far (matched or not).
    pub fn received(&self) -> usize {
        self.received
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn unmatched(&self) -> impl Iterator<Item = &Record> + '_ {
        self.unmatched.values()
    }

    pub fn unmatched_count(&self) -> usize {
        self.unmatched.len()
    }

    pub(crate) fn note_received(&mut self) {
        self.received += 1;
    }

    pub(crate) fn record_unmatched(&mut self, record: Record) {
        self.unmatched.insert(record.position, record);
    }

    /// Drop the miss recorded under `key`, if any. The matcher passes the
    /// ledger position it just consumed.
    pub(crate) fn resolve(&mut self, key: usize) -> Option<Record> {
        self.unmatched.remove(&key)
    }

    pub(crate) fn finish(&mut self) {
        self.finished = true;
    }
}
