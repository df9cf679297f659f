//! JSON wire types for the tally reconciliation service.
//!
//! Field names are part of the public contract with existing callers and are
//! kept verbatim (including `total_transactions_proceed`).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Reconcile request / response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileRequest {
    pub transactions_path: String,
    #[serde(default)]
    pub bank_statements_path: Vec<String>,
    /// `DD-MM-YYYY`, inclusive.
    pub start_date: String,
    /// `DD-MM-YYYY`, exclusive.
    pub end_date: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileResponse {
    pub total_transactions_proceed: usize,
    pub total_matched_transactions: usize,
    pub total_unmatched_transactions: UnmatchedTransactions,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnmatchedTransactions {
    pub missing_transactions: Vec<RowEntry>,
    /// Keyed by statement source identifier exactly as given in the request.
    pub missing_bank_statements: BTreeMap<String, Vec<RowEntry>>,
}

/// One unmatched line item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowEntry {
    /// Position of the row inside its own source (in-window rows only).
    pub key: usize,
    pub trx_id: String,
    pub amount: i64,
    #[serde(rename = "type")]
    pub r#type: String,
    pub transaction_time: String,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Body of every non-2xx response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    /// snake_case discriminator, e.g. "invalid_date_range" | "malformed_record".
    pub kind: String,
}

// ---------------------------------------------------------------------------
// Run lifecycle events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        run_id: Uuid,
        sources: usize,
    },
    RunFinished {
        run_id: Uuid,
        processed: usize,
        matched: usize,
    },
    RunFailed {
        run_id: Uuid,
        error: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_uses_original_field_names() {
        let mut missing = BTreeMap::new();
        missing.insert("bank_a.csv".to_string(), Vec::new());
        let resp = ReconcileResponse {
            total_transactions_proceed: 1,
            total_matched_transactions: 0,
            total_unmatched_transactions: UnmatchedTransactions {
                missing_transactions: vec![RowEntry {
                    key: 0,
                    trx_id: "A".to_string(),
                    amount: 100,
                    r#type: "KREDIT".to_string(),
                    transaction_time: "2024-01-05T10:00:00Z".to_string(),
                }],
                missing_bank_statements: missing,
            },
        };

        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v["total_transactions_proceed"], 1);
        let row = &v["total_unmatched_transactions"]["missing_transactions"][0];
        assert_eq!(row["type"], "KREDIT");
        assert_eq!(row["key"], 0);
        assert!(v["total_unmatched_transactions"]["missing_bank_statements"]["bank_a.csv"]
            .as_array()
            .unwrap()
            .is_empty());
    }

    #[test]
    fn request_without_statements_defaults_to_empty() {
        let req: ReconcileRequest = serde_json::from_str(
            r#"{"transactions_path":"l.csv","start_date":"01-01-2024","end_date":"31-01-2024"}"#,
        )
        .unwrap();
        assert!(req.bank_statements_path.is_empty());
    }

    #[test]
    fn run_event_is_tagged() {
        let ev = RunEvent::RunFailed {
            run_id: Uuid::nil(),
            error: "boom".to_string(),
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "run_failed");
    }
}
