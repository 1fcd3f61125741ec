//! Circuit breakers.
//!
//! Three latched breakers, each clearable with the configured override
//! token:
//! - daily loss beyond the configured percent of equity (auto-clears on
//!   the next trading day)
//! - critic-loss jump above 3x between consecutive online updates
//!   (manual override only)
//! - feed dead after max reconnects with degraded REST fallback
//!
//! While any breaker is open, signal validation rejects all entries.

use chrono::NaiveDate;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{error, info, warn};

/// Breaker identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Breaker {
    DailyLoss,
    CriticLoss,
    FeedDegraded,
}

impl fmt::Display for Breaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DailyLoss => write!(f, "daily_loss"),
            Self::CriticLoss => write!(f, "critic_loss"),
            Self::FeedDegraded => write!(f, "feed_degraded"),
        }
    }
}

#[derive(Debug, Default)]
struct BreakerState {
    daily_loss_day: Option<NaiveDate>,
    critic_loss: bool,
    feed_degraded: bool,
    last_critic_loss: Option<f64>,
}

/// Latched breaker set guarding `RiskManager::validate`.
pub struct CircuitBreakers {
    state: Mutex<BreakerState>,
    override_token: String,
}

impl CircuitBreakers {
    pub fn new(override_token: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(BreakerState::default()),
            override_token: override_token.into(),
        }
    }

    /// Trip the daily-loss breaker for the given trading day.
    pub fn trip_daily_loss(&self, day: NaiveDate) {
        let mut state = self.state.lock();
        if state.daily_loss_day != Some(day) {
            state.daily_loss_day = Some(day);
            error!(%day, "daily loss circuit breaker tripped");
        }
    }

    /// Record an online critic-loss observation. A jump above 3x the
    /// previous one latches the breaker.
    pub fn observe_critic_loss(&self, loss: f64) -> bool {
        let mut state = self.state.lock();
        let spiked = matches!(state.last_critic_loss, Some(prev) if prev > 0.0 && loss > prev * 3.0);
        state.last_critic_loss = Some(loss);
        if spiked && !state.critic_loss {
            state.critic_loss = true;
            error!(loss, "critic loss spike, trading paused pending manual override");
        }
        spiked
    }

    /// Latch or clear the feed-degraded breaker.
    pub fn set_feed_degraded(&self, degraded: bool) {
        let mut state = self.state.lock();
        if degraded && !state.feed_degraded {
            error!("feed dead and REST fallback degraded, trading paused");
        }
        state.feed_degraded = degraded;
    }

    /// The first open breaker, if any, as of `today`.
    /// The daily-loss latch expires when the trading day rolls over.
    pub fn active(&self, today: NaiveDate) -> Option<Breaker> {
        let state = self.state.lock();
        if state.daily_loss_day == Some(today) {
            return Some(Breaker::DailyLoss);
        }
        if state.critic_loss {
            return Some(Breaker::CriticLoss);
        }
        if state.feed_degraded {
            return Some(Breaker::FeedDegraded);
        }
        None
    }

    pub fn is_clear(&self, today: NaiveDate) -> bool {
        self.active(today).is_none()
    }

    /// Clear one breaker with the override token. Returns false on a bad
    /// token; the attempt is logged either way.
    pub fn clear_with_token(&self, breaker: Breaker, token: &str) -> bool {
        if token != self.override_token {
            warn!(%breaker, "breaker override rejected: bad token");
            return false;
        }
        let mut state = self.state.lock();
        match breaker {
            Breaker::DailyLoss => state.daily_loss_day = None,
            Breaker::CriticLoss => state.critic_loss = false,
            Breaker::FeedDegraded => state.feed_degraded = false,
        }
        info!(%breaker, "breaker cleared by override");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    #[test]
    fn test_daily_loss_expires_next_day() {
        let breakers = CircuitBreakers::new("token");
        breakers.trip_daily_loss(day(24));
        assert_eq!(breakers.active(day(24)), Some(Breaker::DailyLoss));
        // Next trading day the latch self-clears.
        assert_eq!(breakers.active(day(25)), None);
    }

    #[test]
    fn test_critic_loss_spike_latches() {
        let breakers = CircuitBreakers::new("token");
        assert!(!breakers.observe_critic_loss(1.0));
        assert!(!breakers.observe_critic_loss(2.5));
        assert!(breakers.observe_critic_loss(9.0));
        // Latched across days; only manual override clears it.
        assert_eq!(breakers.active(day(25)), Some(Breaker::CriticLoss));
        assert!(!breakers.clear_with_token(Breaker::CriticLoss, "wrong"));
        assert!(breakers.clear_with_token(Breaker::CriticLoss, "token"));
        assert!(breakers.is_clear(day(25)));
    }

    #[test]
    fn test_feed_degraded_toggles() {
        let breakers = CircuitBreakers::new("token");
        breakers.set_feed_degraded(true);
        assert_eq!(breakers.active(day(24)), Some(Breaker::FeedDegraded));
        breakers.set_feed_degraded(false);
        assert!(breakers.is_clear(day(24)));
    }

    #[test]
    fn test_breakers_reentrant() {
        let breakers = CircuitBreakers::new("token");
        breakers.trip_daily_loss(day(24));
        breakers.trip_daily_loss(day(24));
        assert!(breakers.clear_with_token(Breaker::DailyLoss, "token"));
        assert!(breakers.is_clear(day(24)));
        // Can trip again after an override.
        breakers.trip_daily_loss(day(24));
        assert_eq!(breakers.active(day(24)), Some(Breaker::DailyLoss));
    }
}
