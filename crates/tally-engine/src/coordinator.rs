use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use tally_source::{DateWindow, RecordSource, SourceError};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    cancel_pair, CancelSignal, LedgerIndex, LoadFailure, LoaderOutcome, MatchError, MatchEvent,
    Matcher, ReconciliationReport, StatementLoader,
};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a run produced no report. Every variant is terminal: there are no
/// partial reports and no retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// The same statement source was requested twice.
    DuplicateSource(String),
    LedgerUnavailable(SourceError),
    MalformedLedger(SourceError),
    /// A statement source failed; all other loaders were cancelled.
    Statement(SourceError),
    /// The caller's stop signal fired mid-run.
    Cancelled,
    TimedOut(Duration),
    Matcher(MatchError),
    /// A loader or matcher task panicked or was aborted.
    TaskFailed(String),
}

impl ReconcileError {
    fn from_ledger(e: SourceError) -> Self {
        match e {
            SourceError::Unavailable { .. } => ReconcileError::LedgerUnavailable(e),
            _ => ReconcileError::MalformedLedger(e),
        }
    }

    /// snake_case discriminator used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            ReconcileError::DuplicateSource(_) => "duplicate_source",
            ReconcileError::LedgerUnavailable(_) => "ledger_unavailable",
            ReconcileError::MalformedLedger(_) => "malformed_ledger",
            ReconcileError::Statement(e) => e.kind(),
            ReconcileError::Cancelled => "cancelled",
            ReconcileError::TimedOut(_) => "timed_out",
            ReconcileError::Matcher(_) => "malformed_event",
            ReconcileError::TaskFailed(_) => "task_failed",
        }
    }
}

impl fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileError::DuplicateSource(s) => {
                write!(f, "statement source '{s}' requested more than once")
            }
            ReconcileError::LedgerUnavailable(e) => write!(f, "ledger unavailable: {e}"),
            ReconcileError::MalformedLedger(e) => write!(f, "malformed ledger: {e}"),
            ReconcileError::Statement(e) => write!(f, "statement failed: {e}"),
            ReconcileError::Cancelled => write!(f, "reconciliation cancelled"),
            ReconcileError::TimedOut(d) => {
                write!(f, "reconciliation timed out after {}ms", d.as_millis())
            }
            ReconcileError::Matcher(e) => write!(f, "matcher failed: {e}"),
            ReconcileError::TaskFailed(msg) => write!(f, "reconciliation task failed: {msg}"),
        }
    }
}

impl std::error::Error for ReconcileError {}

// ---------------------------------------------------------------------------
// Job + Reconciler
// ---------------------------------------------------------------------------

/// Inputs of a single run.
#[derive(Debug, Clone)]
pub struct ReconcileJob {
    pub ledger: String,
    pub statements: Vec<String>,
    pub window: DateWindow,
}

/// Runs reconciliations. Holds no per-run state, so one instance can serve
/// concurrent runs.
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    timeout: Option<Duration>,
}

enum Wake {
    Joined(Option<Result<LoaderOutcome, JoinError>>),
    Deadline,
    Stop,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the run and fail with [`ReconcileError::TimedOut`] once
    /// `timeout` has elapsed since the run started.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn run(
        &self,
        run_id: Uuid,
        job: ReconcileJob,
    ) -> Result<ReconciliationReport, ReconcileError> {
        self.run_until(run_id, job, CancelSignal::never()).await
    }

    /// Like [`run`](Self::run), but `stop` aborts the run with
    /// [`ReconcileError::Cancelled`].
    pub async fn run_until(
        &self,
        run_id: Uuid,
        job: ReconcileJob,
        mut stop: CancelSignal,
    ) -> Result<ReconciliationReport, ReconcileError> {
        let deadline = self.timeout.map(|t| Instant::now() + t);

        let mut seen = BTreeSet::new();
        for s in &job.statements {
            if !seen.insert(s.as_str()) {
                return Err(ReconcileError::DuplicateSource(s.clone()));
            }
        }

        // (a) ledger, sequentially, before any matching.
        let ledger = tokio::select! {
            biased;
            _ = stop.cancelled() => return Err(ReconcileError::Cancelled),
            _ = sleep_until(deadline) => return Err(self.timed_out()),
            loaded = load_ledger(&job) => loaded?,
        };
        info!(
            run_id = %run_id,
            ledger = %job.ledger,
            ledger_records = ledger.len(),
            sources = job.statements.len(),
            "ledger loaded"
        );

        // (b) one loader per source, (c) the matcher.
        let (tx, rx) = mpsc::channel::<MatchEvent>(1);
        let (cancel, signal) = cancel_pair();
        let mut loaders = JoinSet::new();
        for (index, path) in job.statements.iter().enumerate() {
            let source = RecordSource::new(path.clone(), job.window);
            let loader = StatementLoader::new(run_id, index, source);
            loaders.spawn(loader.run(tx.clone(), signal.clone()));
        }
        drop(tx);
        let mut matcher =
            tokio::spawn(Matcher::new(run_id, ledger, job.statements.iter().cloned()).run(rx));

        // (d) join every loader. After the first failure the deadline and stop
        // signal no longer matter; we only wait for loaders to wind down.
        let mut failure: Option<ReconcileError> = None;
        loop {
            let wake = if failure.is_some() {
                Wake::Joined(loaders.join_next().await)
            } else {
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => Wake::Stop,
                    _ = sleep_until(deadline) => Wake::Deadline,
                    joined = loaders.join_next() => Wake::Joined(joined),
                }
            };

            let joined = match wake {
                Wake::Joined(Some(joined)) => joined,
                Wake::Joined(None) => break,
                Wake::Deadline => {
                    warn!(run_id = %run_id, "deadline reached; cancelling loaders");
                    failure = Some(self.timed_out());
                    cancel.cancel();
                    continue;
                }
                Wake::Stop => {
                    warn!(run_id = %run_id, "stop requested; cancelling loaders");
                    failure = Some(ReconcileError::Cancelled);
                    cancel.cancel();
                    continue;
                }
            };

            match joined {
                Ok(outcome) => match outcome.result {
                    Ok(()) => debug!(
                        run_id = %run_id,
                        source = %outcome.path,
                        published = outcome.published,
                        "loader joined"
                    ),
                    Err(LoadFailure::Source(e)) => {
                        if failure.is_none() {
                            error!(
                                run_id = %run_id,
                                error = %e,
                                "statement source failed; cancelling peers"
                            );
                            failure = Some(ReconcileError::Statement(e));
                            cancel.cancel();
                        }
                    }
                    // Either we cancelled it, or the matcher died and its
                    // own error is reported below.
                    Err(LoadFailure::Cancelled) => {}
                },
                Err(join_err) => {
                    if failure.is_none() {
                        error!(run_id = %run_id, error = %join_err, "loader task failed");
                        failure = Some(ReconcileError::TaskFailed(join_err.to_string()));
                        cancel.cancel();
                    }
                }
            }
        }

        if let Some(err) = failure {
            // Some end-of-stream markers were never sent; stop waiting on them.
            matcher.abort();
            let _ = matcher.await;
            info!(run_id = %run_id, error = %err, "reconciliation aborted");
            return Err(err);
        }

        let joined = tokio::select! {
            biased;
            _ = stop.cancelled() => {
                matcher.abort();
                let _ = matcher.await;
                return Err(ReconcileError::Cancelled);
            }
            _ = sleep_until(deadline) => {
                matcher.abort();
                let _ = matcher.await;
                return Err(self.timed_out());
            }
            joined = &mut matcher => joined,
        };
        let outcome = joined
            .map_err(|e| ReconcileError::TaskFailed(e.to_string()))?
            .map_err(ReconcileError::Matcher)?;

        // (e) report.
        let report = ReconciliationReport::assemble(&outcome);
        info!(
            run_id = %run_id,
            processed = report.total_processed,
            matched = report.total_matched,
            unmatched = report.total_unmatched(),
            "reconciliation complete"
        );
        Ok(report)
    }

    fn timed_out(&self) -> ReconcileError {
        ReconcileError::TimedOut(self.timeout.unwrap_or_default())
    }
}

async fn load_ledger(job: &ReconcileJob) -> Result<LedgerIndex, ReconcileError> {
    let source = RecordSource::new(job.ledger.clone(), job.window);
    let records = source
        .load_all()
        .await
        .map_err(ReconcileError::from_ledger)?;
    Ok(LedgerIndex::new(records))
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        // The timer wheel rounds up to the next millisecond tick.
        Some(d) if Instant::now() >= d => {}
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}
