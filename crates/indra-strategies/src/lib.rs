//! Strategy registry and runner.
//!
//! Strategies are pure functions `(snapshot) -> signals`, registered in a
//! static table at startup; config names resolve through an alias map to
//! canonical tokens. The runner invokes each enabled strategy, validates
//! the output (referenced leg must exist in the snapshot chain, entry
//! price must be positive), de-duplicates per-tick by leg keeping the
//! strongest signal, and returns a flat list.
//!
//! Strategy contract: no snapshot mutation, no network, bounded wall time.

pub mod registry;
pub mod runner;
pub mod strategies;

pub use registry::{canonical_id, resolve, StrategyFn, REGISTRY};
pub use runner::StrategyRunner;
