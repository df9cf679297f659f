use tally_source::{RecordSource, RecordStream, SourceError};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{CancelSignal, MatchEvent, SourceIdx};

/// Why a loader stopped early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadFailure {
    /// Fatal read/parse error. The end-of-stream event was still published.
    Source(SourceError),
    /// Cancellation observed, or the matcher is gone. No end-of-stream event.
    Cancelled,
}

/// Completion report of one loader task. Travels over the task's join
/// handle, never over the match-event channel.
#[derive(Debug, Clone)]
pub struct LoaderOutcome {
    pub index: SourceIdx,
    pub path: String,
    /// Record events handed to the matcher.
    pub published: usize,
    pub result: Result<(), LoadFailure>,
}

/// Streams one statement source into the shared match-event channel.
#[derive(Debug, Clone)]
pub struct StatementLoader {
    run_id: Uuid,
    index: SourceIdx,
    source: RecordSource,
}

impl StatementLoader {
    pub fn new(run_id: Uuid, index: SourceIdx, source: RecordSource) -> Self {
        Self {
            run_id,
            index,
            source,
        }
    }

    /// Publish every in-window record, then an end-of-stream marker.
    ///
    /// Cancellation is raced against every row read and every publish. A
    /// cancelled loader returns without publishing end-of-stream; a failed
    /// one still publishes it so the matcher's count stays correct.
    pub async fn run(
        self,
        tx: mpsc::Sender<MatchEvent>,
        mut cancel: CancelSignal,
    ) -> LoaderOutcome {
        let mut published = 0usize;
        let mut result = self.stream(&tx, &mut cancel, &mut published).await;

        match &result {
            Ok(()) | Err(LoadFailure::Source(_)) => {
                let eos = MatchEvent::EndOfStream { source: self.index };
                if publish(&tx, &mut cancel, eos).await.is_err() && result.is_ok() {
                    result = Err(LoadFailure::Cancelled);
                }
            }
            Err(LoadFailure::Cancelled) => {}
        }

        match &result {
            Ok(()) => debug!(
                run_id = %self.run_id,
                source = self.source.path(),
                published,
                "loader finished"
            ),
            Err(LoadFailure::Source(e)) => warn!(
                run_id = %self.run_id,
                source = self.source.path(),
                published,
                error = %e,
                "loader failed"
            ),
            Err(LoadFailure::Cancelled) => debug!(
                run_id = %self.run_id,
                source = self.source.path(),
                published,
                "loader cancelled"
            ),
        }

        LoaderOutcome {
            index: self.index,
            path: self.source.path().to_string(),
            published,
            result,
        }
    }

    async fn stream(
        &self,
        tx: &mpsc::Sender<MatchEvent>,
        cancel: &mut CancelSignal,
        published: &mut usize,
    ) -> Result<(), LoadFailure> {
        if cancel.is_cancelled() {
            return Err(LoadFailure::Cancelled);
        }
        let mut rows = self.source.stream(1);
        let result = pump(&mut rows, self.index, tx, cancel, published).await;
        rows.close().await;
        result
    }
}

/// Forward rows until the source is exhausted, fails, or the run is cancelled.
async fn pump(
    rows: &mut RecordStream,
    source: SourceIdx,
    tx: &mpsc::Sender<MatchEvent>,
    cancel: &mut CancelSignal,
    published: &mut usize,
) -> Result<(), LoadFailure> {
    loop {
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LoadFailure::Cancelled),
            item = rows.next() => item,
        };
        let Some(item) = item else {
            return Ok(());
        };
        let record = item.map_err(LoadFailure::Source)?;
        publish(tx, cancel, MatchEvent::Record { source, record }).await?;
        *published += 1;
    }
}

/// Rendezvous with the matcher, or give up on cancellation.
async fn publish(
    tx: &mpsc::Sender<MatchEvent>,
    cancel: &mut CancelSignal,
    event: MatchEvent,
) -> Result<(), LoadFailure> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(LoadFailure::Cancelled),
        sent = tx.send(event) => sent.map_err(|_| LoadFailure::Cancelled),
    }
}
