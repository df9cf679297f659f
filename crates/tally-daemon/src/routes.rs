//! Axum router and all HTTP handlers for tally-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers.

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use tally_engine::ReconcileJob;
use tally_schemas::{ReconcileRequest, ReconcileResponse};
use tally_source::DateWindow;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    api_types::{ApiError, HealthResponse},
    state::{uptime_secs, AppState, BusMsg, RunGuard},
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", post(reconcile))
        .route("/v1/reconcile", post(reconcile))
        .route("/v1/health", get(health))
        .route("/v1/status", get(status_handler))
        .route("/v1/stream", get(stream))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service.to_string(),
            version: st.build.version.to_string(),
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /v1/status
// ---------------------------------------------------------------------------

pub(crate) async fn status_handler(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let mut snap = st.status.read().await.clone();
    snap.daemon_uptime_secs = uptime_secs();
    st.runs.fill(&mut snap);
    (StatusCode::OK, Json(snap))
}

// ---------------------------------------------------------------------------
// POST /v1/reconcile  (also POST /)
// ---------------------------------------------------------------------------

/// Run one reconciliation synchronously and return the full report.
pub(crate) async fn reconcile(
    State(st): State<Arc<AppState>>,
    body: Result<Json<ReconcileRequest>, JsonRejection>,
) -> Result<Json<ReconcileResponse>, ApiError> {
    let Json(req) = body.map_err(|rej| ApiError::bad_request("input_unreadable", rej.body_text()))?;
    let window = DateWindow::parse(&req.start_date, &req.end_date)?;

    if req.bank_statements_path.len() > st.max_sources {
        return Err(ApiError::bad_request(
            "too_many_sources",
            format!(
                "{} statement sources requested; at most {} allowed",
                req.bank_statements_path.len(),
                st.max_sources
            ),
        ));
    }

    let run_id = Uuid::new_v4();
    let sources = req.bank_statements_path.len();
    info!(run_id = %run_id, ledger = %req.transactions_path, sources, "reconcile/start");

    let guard = RunGuard::begin(Arc::clone(&st), run_id, sources);
    st.status.write().await.last_run_id = Some(run_id);

    let job = ReconcileJob {
        ledger: req.transactions_path,
        statements: req.bank_statements_path,
        window,
    };
    let result = st
        .reconciler
        .run_until(run_id, job, st.shutdown.signal())
        .await;
    guard.finish(&result);

    match result {
        Ok(report) => Ok(Json(report.to_response())),
        Err(e) => {
            warn!(run_id = %run_id, error = %e, "reconcile/failed");
            Err(e.into())
        }
    }
}

// ---------------------------------------------------------------------------
// GET /v1/stream  (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn stream(State(st): State<Arc<AppState>>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let rx = st.bus.subscribe();
    let events = broadcast_to_sse(rx);

    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn broadcast_to_sse(
    rx: broadcast::Receiver<BusMsg>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(m) => {
                let data = m.data().ok()?;
                Some(Ok(Event::default().event(m.event_name()).data(data)))
            }
            Err(_) => None, // lagged / closed
        }
    })
}
