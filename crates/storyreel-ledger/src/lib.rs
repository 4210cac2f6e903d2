//! Durable job ledger.
//!
//! The ledger is the single source of truth for a run: every work item and
//! every outstanding batch submission lives in one JSON document that is
//! rewritten atomically after each mutation. A process killed at any point
//! leaves behind either the previous or the next acknowledged state, never a
//! torn file.

pub mod document;
pub mod error;
pub mod ledger;

pub use document::{LedgerDocument, RepairReport, LEDGER_VERSION};
pub use error::{LedgerError, LedgerResult};
pub use ledger::Ledger;
