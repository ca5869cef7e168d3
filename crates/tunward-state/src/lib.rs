//! tunward-state — domain types and durable state for the tunnel supervisor.
//!
//! # Architecture
//!
//! Persistence is deliberately plain: JSON records in a data directory,
//! overwritten via atomic temp-file replace so a crash mid-write can never
//! truncate the ledger, plus one append-only text log for diagnostics
//! snapshots. A corrupt or missing ledger degrades to "usage unknown" and a
//! fresh record; it is never fatal.
//!
//! The supervisor owns all files single-process; there is no cross-process
//! locking to manage.

pub mod error;
pub mod store;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateFiles;
pub use types::*;
