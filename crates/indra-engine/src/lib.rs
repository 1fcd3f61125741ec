//! Engine crate: configuration, container wiring, and the tick loop.

pub mod config;
pub mod engine;
pub mod error;

pub use config::{AppConfig, StrategySection};
pub use engine::Engine;
pub use error::{EngineError, EngineResult};
