//! Telemetry: structured logging, Prometheus metrics, and the opaque
//! notifier the engine raises operational events through.

pub mod error;
pub mod logging;
pub mod metrics;
pub mod notifier;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
pub use notifier::{LogNotifier, Notifier, Severity};
