use std::fmt;
use std::fs::File;
use std::io::Read;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::{DateWindow, Direction, Record};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors produced while reading one source. All of them are terminal for
/// that source: a reader never skips a bad row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// The source could not be opened or read.
    Unavailable { path: String, reason: String },
    /// The header line is absent or unreadable.
    MalformedHeader { path: String, reason: String },
    /// A data row failed to parse. `row` is the 1-based line number
    /// (the header is line 1).
    MalformedRecord {
        path: String,
        row: u64,
        field: &'static str,
        raw: String,
    },
}

impl SourceError {
    pub fn path(&self) -> &str {
        match self {
            SourceError::Unavailable { path, .. }
            | SourceError::MalformedHeader { path, .. }
            | SourceError::MalformedRecord { path, .. } => path,
        }
    }

    /// snake_case discriminator used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            SourceError::Unavailable { .. } => "source_unavailable",
            SourceError::MalformedHeader { .. } => "malformed_header",
            SourceError::MalformedRecord { .. } => "malformed_record",
        }
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::Unavailable { path, reason } => {
                write!(f, "source '{path}' unavailable: {reason}")
            }
            SourceError::MalformedHeader { path, reason } => {
                write!(f, "source '{path}': malformed header: {reason}")
            }
            SourceError::MalformedRecord {
                path,
                row,
                field,
                raw,
            } => write!(
                f,
                "source '{path}' row {row}: cannot parse field '{field}' from value '{raw}'"
            ),
        }
    }
}

impl std::error::Error for SourceError {}

// ---------------------------------------------------------------------------
// RecordSource
// ---------------------------------------------------------------------------

/// A named CSV source bound to a date window. Every call to [`open`],
/// [`load_all`], [`stream`] or [`read_from`] starts a fresh pass from the
/// first row.
///
/// [`open`]: RecordSource::open
/// [`load_all`]: RecordSource::load_all
/// [`stream`]: RecordSource::stream
/// [`read_from`]: RecordSource::read_from
#[derive(Debug, Clone)]
pub struct RecordSource {
    path: String,
    window: DateWindow,
}

impl RecordSource {
    pub fn new(path: impl Into<String>, window: DateWindow) -> Self {
        Self {
            path: path.into(),
            window,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn window(&self) -> DateWindow {
        self.window
    }

    /// Open the file for a buffered pass. Blocking; call it from a blocking
    /// context.
    pub fn open(&self) -> Result<RecordReader<File>, SourceError> {
        let file = File::open(&self.path).map_err(|e| self.unavailable(e.to_string()))?;
        self.read_from(file)
    }

    /// Read every in-window record on the blocking pool. Fails on the first
    /// bad row.
    pub async fn load_all(&self) -> Result<Vec<Record>, SourceError> {
        let source = self.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<Record>, SourceError> {
            source.open()?.collect()
        })
        .await
        .map_err(|e| self.unavailable(e.to_string()))?
    }

    /// Stream records from a reader on the blocking pool. The reader runs
    /// at most `capacity` records ahead of the consumer, so memory stays
    /// bounded whatever the file size.
    pub fn stream(&self, capacity: usize) -> RecordStream {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let source = self.clone();
        let reader = tokio::task::spawn_blocking(move || {
            let rows = match source.open() {
                Ok(rows) => rows,
                Err(e) => {
                    let _ = tx.blocking_send(Err(e));
                    return;
                }
            };
            for item in rows {
                // Consumer gone: stop reading.
                if tx.blocking_send(item).is_err() {
                    return;
                }
            }
        });
        RecordStream { rx, reader }
    }

    /// Start a pass over any byte source. Consumes the header line.
    pub fn read_from<R: Read>(&self, rdr: R) -> Result<RecordReader<R>, SourceError> {
        RecordReader::new(self.path.clone(), self.window, rdr)
    }

    fn unavailable(&self, reason: String) -> SourceError {
        SourceError::Unavailable {
            path: self.path.clone(),
            reason,
        }
    }
}

/// Records of one source, read row by row off the async runtime.
///
/// Yields at most one `Err`; the stream ends right after it.
pub struct RecordStream {
    rx: mpsc::Receiver<Result<Record, SourceError>>,
    reader: JoinHandle<()>,
}

impl RecordStream {
    pub async fn next(&mut self) -> Option<Result<Record, SourceError>> {
        self.rx.recv().await
    }

    /// Stop the reader and wait for it to exit. It finishes at most the row
    /// it is currently reading.
    pub async fn close(self) {
        let RecordStream { rx, reader } = self;
        drop(rx);
        let _ = reader.await;
    }
}

// ---------------------------------------------------------------------------
// RecordReader
// ---------------------------------------------------------------------------

/// Lazy, finite iterator of in-window [`Record`]s in file order.
///
/// Yields at most one `Err`; iteration ends right after it.
pub struct RecordReader<R> {
    path: String,
    window: DateWindow,
    csv: csv::Reader<R>,
    buf: csv::StringRecord,
    line: u64,
    next_position: usize,
    done: bool,
}

impl<R: Read> RecordReader<R> {
    fn new(path: String, window: DateWindow, rdr: R) -> Result<Self, SourceError> {
        let mut csv = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(rdr);

        let mut header = csv::StringRecord::new();
        match csv.read_record(&mut header) {
            Ok(true) => {}
            Ok(false) => {
                return Err(SourceError::MalformedHeader {
                    path,
                    reason: "source is empty".to_string(),
                })
            }
            Err(e) => {
                return Err(SourceError::MalformedHeader {
                    path,
                    reason: e.to_string(),
                })
            }
        }

        Ok(Self {
            path,
            window,
            csv,
            buf: csv::StringRecord::new(),
            line: 1,
            next_position: 0,
            done: false,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn malformed(&self, field: &'static str, raw: &str) -> SourceError {
        SourceError::MalformedRecord {
            path: self.path.clone(),
            row: self.line,
            field,
            raw: raw.to_string(),
        }
    }

    /// Parse the row currently in `buf`. Returns `Ok(None)` for out-of-window rows.
    fn parse_current(&mut self) -> Result<Option<Record>, SourceError> {
        let field = |i: usize| self.buf.get(i);

        let external_id = field(0).ok_or_else(|| self.malformed("trx_id", ""))?;
        let amount_raw = field(1).ok_or_else(|| self.malformed("amount", ""))?;
        let label_raw = field(2).ok_or_else(|| self.malformed("type", ""))?;
        let ts_raw = field(3).ok_or_else(|| self.malformed("transaction_time", ""))?;

        let amount: i64 = amount_raw
            .parse()
            .map_err(|_| self.malformed("amount", amount_raw))?;
        let direction =
            Direction::from_label(label_raw).ok_or_else(|| self.malformed("type", label_raw))?;
        let timestamp = DateTime::parse_from_rfc3339(ts_raw)
            .map_err(|_| self.malformed("transaction_time", ts_raw))?
            .with_timezone(&Utc);

        if !self.window.contains(timestamp) {
            return Ok(None);
        }

        let record = Record {
            position: self.next_position,
            external_id: external_id.to_string(),
            amount,
            direction,
            timestamp,
            raw_timestamp: ts_raw.to_string(),
            raw_label: label_raw.to_string(),
        };
        self.next_position += 1;
        Ok(Some(record))
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = Result<Record, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let more = match self.csv.read_record(&mut self.buf) {
                Ok(more) => more,
                Err(e) => {
                    self.done = true;
                    self.line += 1;
                    return Some(Err(self.malformed("row", &e.to_string())));
                }
            };
            if !more {
                self.done = true;
                break;
            }
            self.line = self
                .buf
                .position()
                .map(|p| p.line())
                .unwrap_or(self.line + 1);

            match self.parse_current() {
                Ok(Some(record)) => return Some(Ok(record)),
                Ok(None) => continue,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> RecordSource {
        RecordSource::new(
            "mem.csv",
            DateWindow::parse("01-01-2024", "31-01-2024").unwrap(),
        )
    }

    fn read_all(src: &str) -> Result<Vec<Record>, SourceError> {
        source().read_from(src.as_bytes())?.collect()
    }

    #[test]
    fn parses_rows_in_file_order_with_window_positions() {
        let csv = "\
trx_id,amount,type,transaction_time
A,100,KREDIT,2024-01-05T10:00:00Z
OLD,7,DEBIT,2023-12-30T10:00:00Z
B,250,DEBIT,2024-01-06T10:00:00+07:00
";
        let rows = read_all(csv).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].external_id, "A");
        assert_eq!(rows[0].position, 0);
        assert_eq!(rows[0].direction, Direction::Credit);
        assert_eq!(rows[1].external_id, "B");
        assert_eq!(rows[1].position, 1, "out-of-window rows do not consume positions");
        assert_eq!(rows[1].raw_timestamp, "2024-01-06T10:00:00+07:00");
    }

    #[test]
    fn header_only_source_is_empty() {
        let rows = read_all("trx_id,amount,type,transaction_time\n").unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn empty_source_is_malformed_header() {
        let err = source().read_from("".as_bytes()).err().unwrap();
        assert_eq!(err.kind(), "malformed_header");
    }

    #[test]
    fn bad_amount_aborts_instead_of_skipping() {
        let csv = "\
h1,h2,h3,h4
A,100,KREDIT,2024-01-05T10:00:00Z
B,12x,KREDIT,2024-01-05T10:00:00Z
C,300,KREDIT,2024-01-05T10:00:00Z
";
        let mut it = source().read_from(csv.as_bytes()).unwrap();
        assert!(it.next().unwrap().is_ok());
        let err = it.next().unwrap().unwrap_err();
        assert_eq!(
            err,
            SourceError::MalformedRecord {
                path: "mem.csv".to_string(),
                row: 3,
                field: "amount",
                raw: "12x".to_string(),
            }
        );
        assert!(it.next().is_none(), "reader stops after the first error");
    }

    #[test]
    fn bad_timestamp_is_malformed_even_out_of_window() {
        let csv = "h\nA,100,KREDIT,yesterday\n";
        let err = read_all(csv).unwrap_err();
        assert!(matches!(
            err,
            SourceError::MalformedRecord {
                field: "transaction_time",
                ..
            }
        ));
    }

    #[test]
    fn short_row_is_malformed() {
        let err = read_all("h\nA,100\n").unwrap_err();
        assert!(matches!(err, SourceError::MalformedRecord { field: "type", .. }));
    }

    #[test]
    fn unknown_label_is_malformed() {
        let err = read_all("h\nA,100,TRANSFER,2024-01-05T10:00:00Z\n").unwrap_err();
        assert!(matches!(err, SourceError::MalformedRecord { field: "type", .. }));
    }

    #[test]
    fn each_pass_restarts_from_the_first_row() {
        let csv = "h\nA,1,KREDIT,2024-01-05T10:00:00Z\nB,2,KREDIT,2024-01-05T10:00:00Z\n";
        let src = source();
        let first: Vec<_> = src.read_from(csv.as_bytes()).unwrap().collect();
        let second: Vec<_> = src.read_from(csv.as_bytes()).unwrap().collect();
        assert_eq!(first, second);
    }
}
