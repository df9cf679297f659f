//! Daemon-local response types and the error-to-HTTP mapping.
//!
//! The reconcile request/response shapes are shared with the CLI and live in
//! `tally-schemas`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tally_engine::ReconcileError;
use tally_schemas::ErrorResponse;
use tally_source::WindowError;

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    pub version: String,
}

// ---------------------------------------------------------------------------
// ApiError
// ---------------------------------------------------------------------------

/// Any non-2xx answer. Serialized as [`ErrorResponse`].
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

impl ApiError {
    pub fn new(status: StatusCode, kind: &str, error: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorResponse {
                error: error.into(),
                kind: kind.to_string(),
            },
        }
    }

    pub fn bad_request(kind: &str, error: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, kind, error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<WindowError> for ApiError {
    fn from(e: WindowError) -> Self {
        ApiError::bad_request("invalid_date_range", e.to_string())
    }
}

/// 400: the request itself is wrong.
/// 422: a named source cannot be read or parsed.
/// 504: the configured deadline elapsed.
/// 500: anything internal.
impl From<ReconcileError> for ApiError {
    fn from(e: ReconcileError) -> Self {
        let status = match &e {
            ReconcileError::DuplicateSource(_) => StatusCode::BAD_REQUEST,
            ReconcileError::LedgerUnavailable(_)
            | ReconcileError::MalformedLedger(_)
            | ReconcileError::Statement(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ReconcileError::TimedOut(_) => StatusCode::GATEWAY_TIMEOUT,
            ReconcileError::Cancelled
            | ReconcileError::Matcher(_)
            | ReconcileError::TaskFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError::new(status, e.kind(), e.to_string())
    }
}
