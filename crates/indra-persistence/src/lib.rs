//! Durable relational store.
//!
//! SQLite-backed persistence for open positions (upsert/restore across
//! engine restarts), the append-only trade log, option-chain snapshots
//! for offline analysis, and the reconciliation/allocation audit trail.
//! `save` and `remove` are atomic per position; `restore` returns a
//! consistent snapshot and surfaces integrity-violating rows for
//! quarantine instead of silently dropping them.

pub mod error;
pub mod store;

pub use error::{PersistenceError, PersistenceResult};
pub use store::{PositionStore, QuarantinedRow};
