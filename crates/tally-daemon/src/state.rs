//! Shared runtime state for tally-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. Reconciliation runs
//! themselves keep no state here beyond counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tally_config::LoadedConfig;
use tally_engine::{CancelHandle, ReconcileError, Reconciler, ReconciliationReport};
use tally_schemas::RunEvent;
use tokio::sync::{broadcast, RwLock};
use tracing::warn;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// BusMsg: SSE event bus payload
// ---------------------------------------------------------------------------

/// Messages broadcast over the internal event bus and surfaced as SSE events.
#[derive(Clone, Debug)]
pub enum BusMsg {
    Heartbeat { ts_millis: i64 },
    Run(RunEvent),
}

impl BusMsg {
    /// SSE `event:` name.
    pub fn event_name(&self) -> &'static str {
        match self {
            BusMsg::Heartbeat { .. } => "heartbeat",
            BusMsg::Run(RunEvent::RunStarted { .. }) => "run_started",
            BusMsg::Run(RunEvent::RunFinished { .. }) => "run_finished",
            BusMsg::Run(RunEvent::RunFailed { .. }) => "run_failed",
        }
    }

    /// SSE `data:` payload.
    pub fn data(&self) -> serde_json::Result<String> {
        match self {
            BusMsg::Heartbeat { ts_millis } => {
                serde_json::to_string(&serde_json::json!({ "ts_millis": ts_millis }))
            }
            BusMsg::Run(ev) => serde_json::to_string(ev),
        }
    }
}

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// StatusSnapshot
// ---------------------------------------------------------------------------

/// Returned by GET /v1/status. The `runs_*` counters are filled from
/// [`RunCounters`] when the snapshot is read.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub daemon_uptime_secs: u64,
    pub runs_in_flight: u64,
    pub runs_completed: u64,
    pub runs_failed: u64,
    pub last_run_id: Option<Uuid>,
    pub config_hash: String,
}

// ---------------------------------------------------------------------------
// RunCounters / RunGuard
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct RunCounters {
    in_flight: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl RunCounters {
    pub fn fill(&self, snap: &mut StatusSnapshot) {
        snap.runs_in_flight = self.in_flight.load(Ordering::Relaxed);
        snap.runs_completed = self.completed.load(Ordering::Relaxed);
        snap.runs_failed = self.failed.load(Ordering::Relaxed);
    }
}

/// Status and bus bookkeeping for one reconcile request.
///
/// Dropping a guard that was never finished (the client went away and the
/// handler future was dropped mid-run) counts the run as failed and
/// publishes `run_failed`.
pub struct RunGuard {
    st: Arc<AppState>,
    run_id: Uuid,
    settled: bool,
}

impl RunGuard {
    pub fn begin(st: Arc<AppState>, run_id: Uuid, sources: usize) -> Self {
        st.runs.in_flight.fetch_add(1, Ordering::Relaxed);
        st.publish(RunEvent::RunStarted { run_id, sources });
        Self {
            st,
            run_id,
            settled: false,
        }
    }

    pub fn finish(mut self, result: &Result<ReconciliationReport, ReconcileError>) {
        self.settled = true;
        match result {
            Ok(report) => {
                self.st.runs.completed.fetch_add(1, Ordering::Relaxed);
                self.st.publish(RunEvent::RunFinished {
                    run_id: self.run_id,
                    processed: report.total_processed,
                    matched: report.total_matched,
                });
            }
            Err(e) => {
                self.st.runs.failed.fetch_add(1, Ordering::Relaxed);
                self.st.publish(RunEvent::RunFailed {
                    run_id: self.run_id,
                    error: e.to_string(),
                });
            }
        }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.st.runs.in_flight.fetch_sub(1, Ordering::Relaxed);
        if !self.settled {
            warn!(run_id = %self.run_id, "reconcile/abandoned");
            self.st.runs.failed.fetch_add(1, Ordering::Relaxed);
            self.st.publish(RunEvent::RunFailed {
                run_id: self.run_id,
                error: "request dropped before the run finished".to_string(),
            });
        }
    }
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

pub struct AppState {
    /// Broadcast bus for SSE.
    pub bus: broadcast::Sender<BusMsg>,
    pub build: BuildInfo,
    pub status: Arc<RwLock<StatusSnapshot>>,
    pub runs: RunCounters,
    pub reconciler: Reconciler,
    /// Requests naming more statement sources than this are refused.
    pub max_sources: usize,
    /// Fired on graceful shutdown; in-flight runs abort with `cancelled`.
    pub shutdown: CancelHandle,
}

impl AppState {
    pub fn new(loaded: &LoadedConfig) -> Self {
        let (bus, _rx) = broadcast::channel::<BusMsg>(1024);
        let (shutdown, _signal) = tally_engine::cancel_pair();

        let initial_status = StatusSnapshot {
            daemon_uptime_secs: uptime_secs(),
            config_hash: loaded.config_hash.clone(),
            ..StatusSnapshot::default()
        };

        Self {
            bus,
            build: BuildInfo {
                service: "tally-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            status: Arc::new(RwLock::new(initial_status)),
            runs: RunCounters::default(),
            reconciler: Reconciler::new().with_timeout(loaded.config.reconcile.timeout()),
            max_sources: loaded.config.reconcile.max_sources,
            shutdown,
        }
    }

    pub fn publish(&self, ev: RunEvent) {
        // No subscribers is fine.
        let _ = self.bus.send(BusMsg::Run(ev));
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}

/// Spawn a background task that emits a heartbeat SSE every `interval`.
pub fn spawn_heartbeat(bus: broadcast::Sender<BusMsg>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ts = chrono::Utc::now().timestamp_millis();
            let _ = bus.send(BusMsg::Heartbeat { ts_millis: ts });
        }
    });
}
