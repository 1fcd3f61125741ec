//! Risk manager: the pre-trade gate and per-position exit oracle.

use crate::breakers::{Breaker, CircuitBreakers};
use crate::sizing::PositionSizer;
use chrono::{DateTime, NaiveDate};
use chrono_tz::Tz;
use indra_core::{
    session, Allocation, ExitReason, MetaGroup, Position, Qty, Regime, Signal,
};
use parking_lot::Mutex;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Why a signal was blocked before execution.
#[derive(Debug, Clone, PartialEq)]
pub enum RiskBlock {
    /// Meta-controller PAUSE directive in force.
    Paused,
    WeakSignal { strength: f64, min: f64 },
    BreakerOpen(Breaker),
    MaxConcurrent { open: usize, max: usize },
    GroupCapExceeded(MetaGroup),
    AllocationExhausted(MetaGroup),
    LeverageCap,
}

impl fmt::Display for RiskBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Paused => write!(f, "paused"),
            Self::WeakSignal { strength, min } => {
                write!(f, "weak_signal({strength:.0}<{min:.0})")
            }
            Self::BreakerOpen(b) => write!(f, "breaker_open({b})"),
            Self::MaxConcurrent { open, max } => write!(f, "max_concurrent({open}/{max})"),
            Self::GroupCapExceeded(g) => write!(f, "group_cap({g})"),
            Self::AllocationExhausted(g) => write!(f, "allocation_exhausted({g})"),
            Self::LeverageCap => write!(f, "leverage_cap"),
        }
    }
}

/// Risk configuration.
#[derive(Debug, Clone)]
pub struct RiskConfig {
    pub initial_capital: Decimal,
    /// Base per-trade risk fraction (0.02 = 2%).
    pub base_risk_pct: f64,
    /// Daily loss fraction of equity that trips the breaker.
    pub daily_loss_limit_pct: f64,
    pub min_signal_strength: f64,
    pub max_concurrent_positions: usize,
    pub max_positions_per_group: usize,
    /// Total entry notional allowed as a multiple of equity.
    pub leverage_cap: f64,
    /// Allocation weight below which a group takes no new entries.
    pub min_allocation_weight: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            initial_capital: Decimal::from(1_000_000),
            base_risk_pct: 0.02,
            daily_loss_limit_pct: 0.05,
            min_signal_strength: 75.0,
            max_concurrent_positions: 5,
            max_positions_per_group: 2,
            leverage_cap: 1.0,
            min_allocation_weight: 0.01,
        }
    }
}

#[derive(Debug, Clone)]
struct BookEntry {
    group: MetaGroup,
    entry_value: Decimal,
}

struct RiskState {
    entries: HashMap<String, BookEntry>,
    realized_today: Decimal,
    realized_total: Decimal,
    trading_day: NaiveDate,
    peak_equity: Decimal,
    paused: bool,
    allocation: Allocation,
}

/// Stateful risk manager.
///
/// Observes the order manager's positions through `add_position` /
/// `remove_position`; never touches broker state itself.
pub struct RiskManager {
    config: RiskConfig,
    sizer: PositionSizer,
    breakers: Arc<CircuitBreakers>,
    state: Mutex<RiskState>,
}

impl RiskManager {
    pub fn new(config: RiskConfig, breakers: Arc<CircuitBreakers>) -> Self {
        let sizer = PositionSizer::new(config.base_risk_pct);
        let peak = config.initial_capital;
        Self {
            config,
            sizer,
            breakers,
            state: Mutex::new(RiskState {
                entries: HashMap::new(),
                realized_today: Decimal::ZERO,
                realized_total: Decimal::ZERO,
                trading_day: session::now_ist().date_naive(),
                peak_equity: peak,
                paused: false,
                allocation: Allocation::uniform(),
            }),
        }
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakers> {
        &self.breakers
    }

    /// Current equity: initial capital plus cumulative realized PnL.
    pub fn equity(&self) -> Decimal {
        self.config.initial_capital + self.state.lock().realized_total
    }

    /// Entry notional currently at risk.
    pub fn at_risk(&self) -> Decimal {
        self.state
            .lock()
            .entries
            .values()
            .map(|e| e.entry_value)
            .sum()
    }

    pub fn open_positions(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn realized_today(&self) -> Decimal {
        self.state.lock().realized_today
    }

    /// Latest allocation from the meta-controller.
    pub fn set_allocation(&self, allocation: Allocation) {
        self.state.lock().allocation = allocation;
    }

    /// PAUSE directive toggle; cleared on the next meta tick.
    pub fn set_paused(&self, paused: bool) {
        let mut state = self.state.lock();
        if paused != state.paused {
            info!(paused, "risk pause directive updated");
        }
        state.paused = paused;
    }

    /// Track a freshly opened (or rehydrated) position in the book.
    pub fn add_position(&self, position: &Position) {
        let mut state = self.state.lock();
        state.entries.insert(
            position.position_id.clone(),
            BookEntry {
                group: MetaGroup::for_strategy(&position.strategy_id),
                entry_value: position.entry_value(),
            },
        );
    }

    /// Remove a closed position from the book.
    pub fn remove_position(&self, position_id: &str) {
        self.state.lock().entries.remove(position_id);
    }

    /// Rebuild the day's realized PnL after a restart.
    pub fn rehydrate_realized(&self, realized_today: Decimal) {
        let mut state = self.state.lock();
        state.realized_today = realized_today;
        state.realized_total = realized_today;
        drop(state);
        self.check_daily_loss();
    }

    /// Fold a closed trade's PnL into the day and equity tracking.
    pub fn record_realized(&self, pnl: Decimal) {
        let today = session::now_ist().date_naive();
        {
            let mut state = self.state.lock();
            if state.trading_day != today {
                state.trading_day = today;
                state.realized_today = Decimal::ZERO;
            }
            state.realized_today += pnl;
            state.realized_total += pnl;
            let equity = self.config.initial_capital + state.realized_total;
            if equity > state.peak_equity {
                state.peak_equity = equity;
            }
        }
        self.check_daily_loss();
    }

    fn check_daily_loss(&self) {
        let (realized_today, day) = {
            let state = self.state.lock();
            (state.realized_today, state.trading_day)
        };
        let limit = self.equity()
            * Decimal::from_f64(self.config.daily_loss_limit_pct).unwrap_or(Decimal::ZERO);
        if realized_today < -limit {
            self.breakers.trip_daily_loss(day);
        }
    }

    /// Size a signal for the current book and regime.
    pub fn size(&self, signal: &Signal, regime: Regime) -> Qty {
        self.sizer.size(
            signal,
            self.equity(),
            self.at_risk(),
            regime,
            signal.symbol.lot_size(),
        )
    }

    /// Pre-trade validation of one sized signal.
    pub fn validate(&self, signal: &Signal, sized: Qty) -> Result<(), RiskBlock> {
        let today = session::now_ist().date_naive();
        if let Some(breaker) = self.breakers.active(today) {
            return Err(RiskBlock::BreakerOpen(breaker));
        }

        let state = self.state.lock();
        if state.paused {
            return Err(RiskBlock::Paused);
        }
        if signal.strength < self.config.min_signal_strength {
            return Err(RiskBlock::WeakSignal {
                strength: signal.strength,
                min: self.config.min_signal_strength,
            });
        }
        if state.entries.len() >= self.config.max_concurrent_positions {
            return Err(RiskBlock::MaxConcurrent {
                open: state.entries.len(),
                max: self.config.max_concurrent_positions,
            });
        }

        let group = MetaGroup::for_strategy(&signal.strategy_id);
        let in_group = state.entries.values().filter(|e| e.group == group).count();
        if in_group >= self.config.max_positions_per_group {
            return Err(RiskBlock::GroupCapExceeded(group));
        }
        if state.allocation.weight(group) < self.config.min_allocation_weight {
            return Err(RiskBlock::AllocationExhausted(group));
        }

        let at_risk: Decimal = state.entries.values().map(|e| e.entry_value).sum();
        drop(state);
        let new_value = sized.notional(signal.entry_price);
        let cap = self.equity()
            * Decimal::from_f64(self.config.leverage_cap).unwrap_or(Decimal::ONE);
        if at_risk + new_value > cap {
            warn!(
                at_risk = %at_risk,
                new_value = %new_value,
                cap = %cap,
                "entry would breach leverage cap"
            );
            return Err(RiskBlock::LeverageCap);
        }

        Ok(())
    }

    /// Exit decision for one open position.
    ///
    /// Precedence: risk-off, stop-loss, trailing stop, staged target, EOD.
    pub fn should_exit(&self, position: &Position, now: DateTime<Tz>) -> Option<ExitReason> {
        if self.breakers.active(now.date_naive()).is_some() {
            return Some(ExitReason::RiskOff);
        }
        let price = position.current_price;
        if price <= position.stop_loss {
            return Some(ExitReason::StopLossHit);
        }
        if let Some(trailing) = position.trailing_sl {
            if price < trailing {
                return Some(ExitReason::TrailingSlHit);
            }
        }
        if price >= position.tp3 {
            return Some(ExitReason::Tp3Hit);
        }
        if now.time() >= session::EOD_EXIT {
            return Some(ExitReason::Eod);
        }
        None
    }
}
