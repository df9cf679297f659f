//! tally-engine
//!
//! Concurrent reconciliation of one ledger against N bank-statement sources.
//!
//! Topology:
//! - the ledger is loaded once, sequentially, into a [`LedgerIndex`];
//! - one [`StatementLoader`] task per statement source streams records into a
//!   single shared rendezvous channel of [`MatchEvent`]s;
//! - exactly one [`Matcher`] task drains that channel and is the only writer of
//!   match state;
//! - the [`Reconciler`] joins everything and assembles a
//!   [`ReconciliationReport`].
//!
//! Loaders never close the channel. Each emits an explicit end-of-stream event
//! and the matcher stops once it has counted one per source.

mod cancel;
mod coordinator;
mod event;
mod ledger;
mod loader;
mod matcher;
mod report;
mod statement;

pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use coordinator::{ReconcileError, ReconcileJob, Reconciler};
pub use event::{MatchEvent, SourceIdx};
pub use ledger::LedgerIndex;
pub use loader::{LoadFailure, LoaderOutcome, StatementLoader};
pub use matcher::{Applied, MatchError, MatchOutcome, Matcher};
pub use report::ReconciliationReport;
pub use statement::StatementSource;
