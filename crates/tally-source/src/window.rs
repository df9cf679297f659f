use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

/// Day-granularity request date format (`DD-MM-YYYY`).
pub const DATE_FORMAT: &str = "%d-%m-%Y";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowError {
    /// A bound is not a valid `DD-MM-YYYY` date.
    InvalidDate { bound: &'static str, raw: String },
    /// `end` is earlier than `start`.
    Inverted { start: NaiveDate, end: NaiveDate },
}

impl fmt::Display for WindowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowError::InvalidDate { bound, raw } => {
                write!(f, "invalid {bound} '{raw}': expected DD-MM-YYYY")
            }
            WindowError::Inverted { start, end } => {
                write!(f, "end date {end} is before start date {start}")
            }
        }
    }
}

impl std::error::Error for WindowError {}

/// Half-open UTC window `[start, end)` built from two calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl DateWindow {
    /// Parse request bounds in `DD-MM-YYYY` form.
    pub fn parse(start: &str, end: &str) -> Result<Self, WindowError> {
        let start = parse_bound("start_date", start)?;
        let end = parse_bound("end_date", end)?;
        Self::from_dates(start, end)
    }

    /// Both days are taken at UTC midnight. `start == end` is a legal empty window.
    pub fn from_dates(start: NaiveDate, end: NaiveDate) -> Result<Self, WindowError> {
        if end < start {
            return Err(WindowError::Inverted { start, end });
        }
        Ok(Self {
            start: start.and_time(NaiveTime::MIN).and_utc(),
            end: end.and_time(NaiveTime::MIN).and_utc(),
        })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }
}

fn parse_bound(bound: &'static str, raw: &str) -> Result<NaiveDate, WindowError> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT).map_err(|_| WindowError::InvalidDate {
        bound,
        raw: raw.to_string(),
    })
}
