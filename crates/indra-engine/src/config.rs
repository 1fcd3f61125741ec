//! Engine configuration.
//!
//! Loaded from a TOML file with environment-variable overrides
//! (`INDRA_` prefix, `__` as the section separator). Live order flow
//! requires both `mode = "live"` and `enable_live_trading = true`.

use crate::error::{EngineError, EngineResult};
use chrono::{NaiveTime, Weekday};
use indra_execution::TradeMode;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Broker connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerSection {
    pub base_url: String,
    pub access_token: String,
    #[serde(default = "default_max_calls_per_sec")]
    pub max_calls_per_sec: usize,
}

fn default_max_calls_per_sec() -> usize {
    10
}

/// Persistence and cache endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Shared cache tier; absent means local-only.
    #[serde(default)]
    pub redis_url: Option<String>,
}

fn default_db_path() -> String {
    "data/indra.db".to_string()
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            redis_url: None,
        }
    }
}

/// Risk limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskSection {
    #[serde(default = "default_initial_capital")]
    pub initial_capital: Decimal,
    /// Base per-trade risk percent (2 = 2%).
    #[serde(default = "default_risk_percent")]
    pub risk_percent: f64,
    #[serde(default = "default_daily_loss_percent")]
    pub daily_loss_percent: f64,
    #[serde(default = "default_min_signal_strength")]
    pub min_signal_strength: f64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_positions: usize,
    #[serde(default = "default_override_token")]
    pub breaker_override_token: String,
}

fn default_initial_capital() -> Decimal {
    Decimal::from(1_000_000)
}

fn default_risk_percent() -> f64 {
    2.0
}

fn default_daily_loss_percent() -> f64 {
    5.0
}

fn default_min_signal_strength() -> f64 {
    75.0
}

fn default_max_concurrent() -> usize {
    5
}

fn default_override_token() -> String {
    "override-me".to_string()
}

impl Default for RiskSection {
    fn default() -> Self {
        Self {
            initial_capital: default_initial_capital(),
            risk_percent: default_risk_percent(),
            daily_loss_percent: default_daily_loss_percent(),
            min_signal_strength: default_min_signal_strength(),
            max_concurrent_positions: default_max_concurrent(),
            breaker_override_token: default_override_token(),
        }
    }
}

/// Per-strategy enablement and trade-window filters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategySection {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Strength multiplier applied before fan-out.
    #[serde(default = "default_strategy_allocation")]
    pub allocation: f64,
    /// Inclusive window start, HH:MM IST.
    #[serde(default)]
    pub window_start: Option<NaiveTime>,
    /// Exclusive window end, HH:MM IST.
    #[serde(default)]
    pub window_end: Option<NaiveTime>,
    /// Allowed weekdays; empty means every trading day.
    #[serde(default)]
    pub days: Vec<Weekday>,
}

fn default_true() -> bool {
    true
}

fn default_strategy_allocation() -> f64 {
    1.0
}

impl StrategySection {
    /// Whether the strategy may trade at the given IST instant.
    pub fn allows(&self, now: chrono::DateTime<chrono_tz::Tz>) -> bool {
        use chrono::Datelike;
        if !self.days.is_empty() && !self.days.contains(&now.weekday()) {
            return false;
        }
        let t = now.time();
        if let Some(start) = self.window_start {
            if t < start {
                return false;
            }
        }
        if let Some(end) = self.window_end {
            if t >= end {
                return false;
            }
        }
        true
    }
}

/// Meta-controller settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaSection {
    #[serde(default = "default_policy_path")]
    pub policy_path: String,
}

fn default_policy_path() -> String {
    "data/policy.json".to_string()
}

impl Default for MetaSection {
    fn default() -> Self {
        Self {
            policy_path: default_policy_path(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_mode")]
    pub mode: TradeMode,
    #[serde(default)]
    pub enable_live_trading: bool,
    pub broker: BrokerSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub risk: RiskSection,
    #[serde(default)]
    pub meta: MetaSection,
    #[serde(default = "default_strategies")]
    pub strategies: Vec<StrategySection>,
}

fn default_mode() -> TradeMode {
    TradeMode::Paper
}

fn default_strategies() -> Vec<StrategySection> {
    ["vwap_deviation", "rsi_reversal", "pcr_reversal", "momentum_impulse", "iv_rank_trading"]
        .iter()
        .map(|name| StrategySection {
            name: name.to_string(),
            enabled: true,
            allocation: 1.0,
            window_start: None,
            window_end: None,
            days: Vec::new(),
        })
        .collect()
}

impl AppConfig {
    /// Load from a TOML file plus `INDRA_*` environment overrides.
    pub fn from_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix("INDRA").separator("__"))
            .build()
            .map_err(|e| EngineError::Config(e.to_string()))?;
        let app: AppConfig = settings
            .try_deserialize()
            .map_err(|e| EngineError::Config(e.to_string()))?;
        app.validate()?;
        Ok(app)
    }

    fn validate(&self) -> EngineResult<()> {
        if self.broker.access_token.trim().is_empty() {
            return Err(EngineError::Config("broker.access_token is empty".into()));
        }
        if self.broker.base_url.trim().is_empty() {
            return Err(EngineError::Config("broker.base_url is empty".into()));
        }
        if self.mode == TradeMode::Live && !self.enable_live_trading {
            return Err(EngineError::Config(
                "mode=live also requires enable_live_trading=true".into(),
            ));
        }
        Ok(())
    }

    /// Names of the enabled strategies, config order.
    pub fn enabled_strategy_names(&self) -> Vec<&str> {
        self.strategies
            .iter()
            .filter(|s| s.enabled)
            .map(|s| s.name.as_str())
            .collect()
    }

    /// Filter section for a canonical strategy id, if configured.
    pub fn strategy_section(&self, canonical_id: &str) -> Option<&StrategySection> {
        self.strategies
            .iter()
            .find(|s| indra_strategies::canonical_id(&s.name) == canonical_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::Asia::Kolkata;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_minimal_config_loads_with_defaults() {
        let file = write_config(
            r#"
            [broker]
            base_url = "https://api.upstox.com"
            access_token = "token-123"
            "#,
        );
        let config = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(config.mode, TradeMode::Paper);
        assert_eq!(config.risk.risk_percent, 2.0);
        assert_eq!(config.risk.min_signal_strength, 75.0);
        assert_eq!(config.enabled_strategy_names().len(), 5);
    }

    #[test]
    fn test_live_mode_requires_enable_flag() {
        let file = write_config(
            r#"
            mode = "live"

            [broker]
            base_url = "https://api.upstox.com"
            access_token = "token-123"
            "#,
        );
        assert!(AppConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_missing_credentials_fatal() {
        let file = write_config(
            r#"
            [broker]
            base_url = "https://api.upstox.com"
            access_token = ""
            "#,
        );
        assert!(AppConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_strategy_filter_sections() {
        let file = write_config(
            r#"
            [broker]
            base_url = "https://api.upstox.com"
            access_token = "token-123"

            [[strategies]]
            name = "RSIReversal"
            enabled = true
            allocation = 1.2
            window_start = "10:00:00"
            window_end = "14:30:00"
            days = ["Tue", "Thu"]

            [[strategies]]
            name = "pcr_reversal"
            enabled = false
            "#,
        );
        let config = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(config.enabled_strategy_names(), vec!["RSIReversal"]);

        let section = config.strategy_section("rsi_reversal").unwrap();
        assert_eq!(section.allocation, 1.2);
        // Tuesday 11:00 inside window.
        let ok = Kolkata.with_ymd_and_hms(2026, 3, 24, 11, 0, 0).unwrap();
        assert!(section.allows(ok));
        // Tuesday 09:30 before window.
        let early = Kolkata.with_ymd_and_hms(2026, 3, 24, 9, 30, 0).unwrap();
        assert!(!section.allows(early));
        // Wednesday excluded by day filter.
        let wed = Kolkata.with_ymd_and_hms(2026, 3, 25, 11, 0, 0).unwrap();
        assert!(!section.allows(wed));
    }
}
