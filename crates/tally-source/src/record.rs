use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Money direction of a line item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Direction {
    Credit,
    Debit,
}

impl Direction {
    /// Parse a CSV type label. `KREDIT` is the label used by the ledger exports;
    /// `CREDIT` is accepted as well.
    pub fn from_label(label: &str) -> Option<Self> {
        let l = label.trim();
        if l.eq_ignore_ascii_case("KREDIT") || l.eq_ignore_ascii_case("CREDIT") {
            Some(Direction::Credit)
        } else if l.eq_ignore_ascii_case("DEBIT") {
            Some(Direction::Debit)
        } else {
            None
        }
    }

    /// Direction implied by a signed amount: zero counts as credit.
    pub fn from_signed_amount(amount: i64) -> Self {
        if amount >= 0 {
            Direction::Credit
        } else {
            Direction::Debit
        }
    }

    pub fn as_label(&self) -> &'static str {
        match self {
            Direction::Credit => "KREDIT",
            Direction::Debit => "DEBIT",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// One parsed, in-window line item. Immutable once produced by the reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// 0-based index among the in-window records of its source.
    pub position: usize,
    pub external_id: String,
    /// Smallest currency unit. Ledger exports are unsigned; statement exports
    /// carry the direction in the sign.
    pub amount: i64,
    /// Direction from the type label column.
    pub direction: Direction,
    pub timestamp: DateTime<Utc>,
    /// Timestamp text exactly as it appeared in the file.
    pub raw_timestamp: String,
    /// Type label text exactly as it appeared in the file.
    pub raw_label: String,
}

impl Record {
    /// Direction implied by the sign of `amount` (how statement rows are read).
    pub fn signed_direction(&self) -> Direction {
        Direction::from_signed_amount(self.amount)
    }

    /// `|amount|`, without overflow on `i64::MIN`.
    pub fn magnitude(&self) -> u64 {
        self.amount.unsigned_abs()
    }
}
