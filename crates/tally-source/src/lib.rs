//! tally-source
//!
//! Record Source Reader: turns one CSV export (ledger or bank statement) into
//! typed [`Record`]s filtered to a half-open [`DateWindow`].
//!
//! CSV layout (no quoting requirements beyond RFC 4180):
//!
//! | Column | Example                | Notes                                  |
//! |--------|------------------------|----------------------------------------|
//! | 0      | `TRX-0001`             | external id                            |
//! | 1      | `-2500`                | integer, smallest currency unit        |
//! | 2      | `KREDIT` / `DEBIT`     | type label, case-insensitive           |
//! | 3      | `2024-01-05T10:00:00Z` | RFC 3339                               |
//!
//! The first line is a header and is discarded without inspection.

mod reader;
mod record;
mod window;

pub use reader::{RecordReader, RecordSource, RecordStream, SourceError};
pub use record::{Direction, Record};
pub use window::{DateWindow, WindowError};
