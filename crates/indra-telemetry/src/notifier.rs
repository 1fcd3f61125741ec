//! Opaque notification fan-out.
//!
//! The engine raises operational events (trade entries/exits, circuit
//! trips, orphan kills) through this trait; delivery (Telegram, email,
//! webhooks) is wired outside the core.

use std::fmt;
use tracing::{error, info, warn};

/// Event severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Info,
    Success,
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Success => write!(f, "SUCCESS"),
            Self::Warning => write!(f, "WARNING"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Notification sink. Implementations must not block the caller for long;
/// slow transports should queue internally.
pub trait Notifier: Send + Sync {
    fn send(&self, severity: Severity, message: &str);
}

/// Default sink: routes events into the structured log.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Info | Severity::Success => info!(%severity, "{message}"),
            Severity::Warning => warn!(%severity, "{message}"),
            Severity::Critical => error!(%severity, "{message}"),
        }
    }
}
