//! Execution plane.
//!
//! `OrderManager` owns the open-position set: it submits entries (paper
//! or live), subscribes each new position's instrument to the feed,
//! applies per-tick mark-to-market, persists continuously, and runs the
//! close flow with a fresh LTP fetch and exit-context enrichment. Exit
//! *decisions* live in the risk manager and the main loop; this crate
//! only carries them out. `Reconciler` diffs the broker's positions
//! against the book every sweep and kills orphans.

pub mod book;
pub mod error;
pub mod order_manager;
pub mod reconciler;

pub use book::{PositionBook, PositionUpdate};
pub use error::{ExecutionError, ExecutionResult};
pub use order_manager::{OrderManager, OrderManagerConfig, TradeMode};
pub use reconciler::{ReconcileSummary, Reconciler, ReconcilerConfig};
