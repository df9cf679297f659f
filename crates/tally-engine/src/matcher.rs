use std::fmt;

use tokio::sync::mpsc;
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::{LedgerIndex, MatchEvent, SourceIdx, StatementSource};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A match event that cannot be applied. Always fatal for the run: dropping
/// the event would corrupt the report totals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchError {
    UnknownSource(SourceIdx),
    /// Records must arrive in file order with dense positions.
    OutOfOrder {
        source: String,
        expected: usize,
        got: usize,
    },
    AfterEndOfStream { source: String },
    DuplicateEndOfStream { source: String },
    /// Every producer went away before all end-of-stream events arrived.
    ChannelClosed { completed: usize, expected: usize },
}

impl fmt::Display for MatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchError::UnknownSource(idx) => write!(f, "match event for unknown source #{idx}"),
            MatchError::OutOfOrder {
                source,
                expected,
                got,
            } => write!(
                f,
                "source '{source}': expected record position {expected}, got {got}"
            ),
            MatchError::AfterEndOfStream { source } => {
                write!(f, "source '{source}': record after end-of-stream")
            }
            MatchError::DuplicateEndOfStream { source } => {
                write!(f, "source '{source}': duplicate end-of-stream")
            }
            MatchError::ChannelClosed {
                completed,
                expected,
            } => write!(
                f,
                "event channel closed after {completed} of {expected} sources finished"
            ),
        }
    }
}

impl std::error::Error for MatchError {}

// ---------------------------------------------------------------------------
// Matcher
// ---------------------------------------------------------------------------

/// What a single event did to the match state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Matched { ledger_position: usize },
    Unmatched,
    EndOfStream { remaining: usize },
}

/// Final state handed back once every source has finished.
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    pub ledger: LedgerIndex,
    pub sources: Vec<StatementSource>,
}

/// Single consumer of the match-event channel and sole writer of match state.
#[derive(Debug)]
pub struct Matcher {
    run_id: Uuid,
    ledger: LedgerIndex,
    sources: Vec<StatementSource>,
    completed: usize,
}

impl Matcher {
    pub fn new<I, S>(run_id: Uuid, ledger: LedgerIndex, source_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            run_id,
            ledger,
            sources: source_names
                .into_iter()
                .map(StatementSource::new)
                .collect(),
            completed: 0,
        }
    }

    pub fn ledger(&self) -> &LedgerIndex {
        &self.ledger
    }

    pub fn sources(&self) -> &[StatementSource] {
        &self.sources
    }

    /// True once one end-of-stream per source has been counted.
    pub fn is_complete(&self) -> bool {
        self.completed == self.sources.len()
    }

    /// Apply one event.
    ///
    /// A statement record matches the lowest-positioned unmatched ledger row
    /// with the same magnitude and the direction implied by the record's sign.
    /// A record whose type label disagrees with its sign never matches.
    /// Without a candidate it is kept as unmatched for its source.
    pub fn apply(&mut self, event: MatchEvent) -> Result<Applied, MatchError> {
        match event {
            MatchEvent::Record { source, record } => {
                let src = self
                    .sources
                    .get_mut(source)
                    .ok_or(MatchError::UnknownSource(source))?;
                if src.is_finished() {
                    return Err(MatchError::AfterEndOfStream {
                        source: src.name().to_string(),
                    });
                }
                if record.position != src.received() {
                    return Err(MatchError::OutOfOrder {
                        source: src.name().to_string(),
                        expected: src.received(),
                        got: record.position,
                    });
                }
                src.note_received();

                let direction = record.signed_direction();
                let candidate = if record.direction == direction {
                    self.ledger.find_candidate(record.magnitude(), direction)
                } else {
                    None
                };
                match candidate {
                    Some(ledger_position) => {
                        self.ledger.mark_matched(ledger_position);
                        // Stale miss recorded under the matched ledger position.
                        src.resolve(ledger_position);
                        trace!(
                            run_id = %self.run_id,
                            source = src.name(),
                            statement_position = record.position,
                            ledger_position,
                            "matched"
                        );
                        Ok(Applied::Matched { ledger_position })
                    }
                    None => {
                        trace!(
                            run_id = %self.run_id,
                            source = src.name(),
                            statement_position = record.position,
                            amount = record.amount,
                            "no ledger candidate"
                        );
                        src.record_unmatched(record);
                        Ok(Applied::Unmatched)
                    }
                }
            }
            MatchEvent::EndOfStream { source } => {
                let src = self
                    .sources
                    .get_mut(source)
                    .ok_or(MatchError::UnknownSource(source))?;
                if src.is_finished() {
                    return Err(MatchError::DuplicateEndOfStream {
                        source: src.name().to_string(),
                    });
                }
                src.finish();
                self.completed += 1;
                debug!(
                    run_id = %self.run_id,
                    source = src.name(),
                    received = src.received(),
                    unmatched = src.unmatched_count(),
                    "source finished"
                );
                Ok(Applied::EndOfStream {
                    remaining: self.sources.len() - self.completed,
                })
            }
        }
    }

    /// Drain `rx` until every source has sent its end-of-stream event.
    ///
    /// Termination is decided by the completion count alone; the channel is
    /// never expected to close first.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<MatchEvent>,
    ) -> Result<MatchOutcome, MatchError> {
        while !self.is_complete() {
            let Some(event) = rx.recv().await else {
                return Err(MatchError::ChannelClosed {
                    completed: self.completed,
                    expected: self.sources.len(),
                });
            };
            self.apply(event)?;
        }

        info!(
            run_id = %self.run_id,
            matched = self.ledger.matched_count(),
            unmatched = self.ledger.unmatched_count(),
            "matcher complete"
        );
        Ok(self.finish())
    }

    pub fn finish(self) -> MatchOutcome {
        MatchOutcome {
            ledger: self.ledger,
            sources: self.sources,
        }
    }
}
