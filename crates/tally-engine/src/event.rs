use tally_source::Record;

/// Index of a statement source in the order it was requested.
pub type SourceIdx = usize;

/// One unit of work handed from a loader to the matcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchEvent {
    Record { source: SourceIdx, record: Record },
    EndOfStream { source: SourceIdx },
}

impl MatchEvent {
    pub fn source(&self) -> SourceIdx {
        match self {
            MatchEvent::Record { source, .. } | MatchEvent::EndOfStream { source } => *source,
        }
    }
}
