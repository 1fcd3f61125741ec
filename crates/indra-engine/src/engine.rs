//! Engine container and main loop.
//!
//! Owns every subsystem and injects references at construction, so no
//! component imports another's singleton. Drives four timers: the 5 s
//! market tick (snapshot -> strategies -> meta fan-out -> risk -> execute,
//! with the exit pass first), the 5 min meta tick (allocation refresh),
//! the 60 s reconciliation sweep, and the 15:20 EOD flush. SIGINT/SIGTERM
//! cancel the timers, drain in-flight work, persist, and disconnect.

use crate::config::AppConfig;
use crate::error::{EngineError, EngineResult};
use chrono::NaiveDate;
use indra_broker::{BrokerClient, BrokerConfig};
use indra_cache::TieredCache;
use chrono::TimeZone;
use indra_core::{session, ExitReason, MarketContext, MetaGroup, Signal};
use indra_execution::{OrderManager, OrderManagerConfig, Reconciler, ReconcilerConfig};
use indra_feed::{FeedConfig, MarketFeed};
use indra_market::{MarketDataConfig, MarketDataManager, MarketSnapshot, SymbolSnapshot};
use indra_meta::{MetaController, MetaControllerConfig, Policy, PortfolioGreeks};
use indra_persistence::PositionStore;
use indra_risk::{Breaker, CircuitBreakers, RiskConfig, RiskManager};
use indra_strategies::StrategyRunner;
use indra_telemetry::{LogNotifier, Metrics, Notifier, Severity};
use parking_lot::Mutex;
use rust_decimal::prelude::ToPrimitive;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Market tick cadence.
const MARKET_TICK: Duration = Duration::from_secs(5);
/// Meta-controller cadence.
const META_TICK: Duration = Duration::from_secs(300);
/// Reconciliation cadence.
const RECONCILE_TICK: Duration = Duration::from_secs(60);
/// EOD/housekeeping check cadence.
const HOUSEKEEPING_TICK: Duration = Duration::from_secs(10);
/// REST health window (market ticks) for the feed-degraded breaker.
const REST_HEALTH_WINDOW: usize = 12;
/// Window for detached best-effort persists to land after the tick loop
/// stops. Tick handlers themselves complete inline before the loop exits.
const SHUTDOWN_DRAIN: Duration = Duration::from_millis(250);

/// Top-level engine container.
pub struct Engine {
    config: AppConfig,
    broker: Arc<BrokerClient>,
    feed: Arc<MarketFeed>,
    store: Arc<PositionStore>,
    market: Arc<MarketDataManager>,
    runner: StrategyRunner,
    risk: Arc<RiskManager>,
    order_manager: Arc<OrderManager>,
    reconciler: Reconciler,
    meta: Arc<MetaController>,
    metrics: Metrics,
    notifier: Arc<dyn Notifier>,
    shutdown: CancellationToken,
    eod_flushed: Mutex<Option<NaiveDate>>,
    /// Recent market-tick snapshot outcomes (true = fresh).
    rest_health: Mutex<VecDeque<bool>>,
    feed_dead: Arc<AtomicBool>,
    /// Breaker state last seen by housekeeping; transitions raise one
    /// CRITICAL notification each.
    last_breaker: Mutex<Option<Breaker>>,
}

impl Engine {
    /// Wire every subsystem. Fatal configuration problems (unreachable
    /// DB, corrupt policy artifact) surface here.
    pub async fn new(config: AppConfig) -> EngineResult<Self> {
        let broker = Arc::new(BrokerClient::new(BrokerConfig {
            base_url: config.broker.base_url.clone(),
            access_token: config.broker.access_token.clone(),
            max_calls_per_sec: config.broker.max_calls_per_sec,
        })?);

        let store = Arc::new(
            PositionStore::open(&config.storage.db_path)
                .map_err(|e| EngineError::Startup(format!("database unreachable: {e}")))?,
        );

        let policy = Policy::load(&config.meta.policy_path)?;

        let cache = Arc::new(TieredCache::connect(config.storage.redis_url.as_deref()).await);
        let feed = Arc::new(MarketFeed::new(FeedConfig::default()));

        let breakers = Arc::new(CircuitBreakers::new(config.risk.breaker_override_token.clone()));
        let risk = Arc::new(RiskManager::new(
            RiskConfig {
                initial_capital: config.risk.initial_capital,
                base_risk_pct: config.risk.risk_percent / 100.0,
                daily_loss_limit_pct: config.risk.daily_loss_percent / 100.0,
                min_signal_strength: config.risk.min_signal_strength,
                max_concurrent_positions: config.risk.max_concurrent_positions,
                ..RiskConfig::default()
            },
            breakers,
        ));

        let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
        let order_manager = Arc::new(OrderManager::new(
            OrderManagerConfig {
                mode: config.mode,
                enable_live_trading: config.enable_live_trading,
                ..OrderManagerConfig::default()
            },
            Arc::clone(&broker),
            Arc::clone(&feed),
            Arc::clone(&risk),
            Arc::clone(&store),
            Arc::clone(&notifier),
        ));

        let market = Arc::new(MarketDataManager::new(
            Arc::clone(&broker),
            Arc::clone(&feed),
            cache,
            Arc::clone(&store),
            MarketDataConfig::default(),
        ));

        let runner = StrategyRunner::from_names(config.enabled_strategy_names());
        info!(strategies = ?runner.enabled_ids(), "strategy registry resolved");

        let meta = Arc::new(MetaController::new(MetaControllerConfig::default(), policy));
        let reconciler = Reconciler::new(
            ReconcilerConfig::default(),
            Arc::clone(&broker),
            Arc::clone(&order_manager),
            Arc::clone(&store),
            Arc::clone(&notifier),
        );

        let metrics = Metrics::new()?;

        Ok(Self {
            config,
            broker,
            feed,
            store,
            market,
            runner,
            risk,
            order_manager,
            reconciler,
            meta,
            metrics,
            notifier,
            shutdown: CancellationToken::new(),
            eod_flushed: Mutex::new(None),
            rest_health: Mutex::new(VecDeque::with_capacity(REST_HEALTH_WINDOW)),
            feed_dead: Arc::new(AtomicBool::new(false)),
            last_breaker: Mutex::new(None),
        })
    }

    /// Handle used by the signal listener to request shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Startup sequence, then the tick loop. Returns on shutdown or a
    /// fatal startup failure.
    pub async fn run(&self) -> EngineResult<()> {
        indra_feed::init_crypto();

        if !self.broker.test_connection().await {
            return Err(EngineError::Startup("broker API unreachable".into()));
        }

        self.order_manager.set_model_version(self.meta.model_version());

        // Rehydrate before the first tick: open rows back into the book,
        // their instruments back onto the feed, the day's PnL back into
        // the risk state.
        let restored = self
            .order_manager
            .rehydrate()
            .await
            .map_err(|e| EngineError::Startup(format!("position rehydration failed: {e}")))?;
        let session_start = {
            let naive = session::now_ist().date_naive().and_time(session::MARKET_OPEN);
            chrono_tz::Asia::Kolkata
                .from_local_datetime(&naive)
                .single()
                .map(|dt| dt.with_timezone(&chrono::Utc))
                .unwrap_or_else(chrono::Utc::now)
        };
        let realized = self.store.realized_pnl_since(session_start)?;
        self.risk.rehydrate_realized(realized);
        self.metrics.open_positions.set(restored as i64);

        self.market.attach_feed().await;
        self.spawn_feed();

        self.notifier.send(
            Severity::Info,
            &format!(
                "engine started: mode={:?} restored={restored} equity={}",
                self.config.mode,
                self.risk.equity()
            ),
        );

        self.tick_loop().await;

        // Timers are stopped and the last tick has completed; close the
        // feed and give detached persists a moment to land.
        self.feed.disconnect();
        tokio::time::sleep(SHUTDOWN_DRAIN).await;
        self.notifier.send(Severity::Info, "engine stopped");
        info!("engine shut down cleanly");
        Ok(())
    }

    fn spawn_feed(&self) {
        let feed = Arc::clone(&self.feed);
        let broker = Arc::clone(&self.broker);
        let notifier = Arc::clone(&self.notifier);
        let feed_dead = Arc::clone(&self.feed_dead);
        tokio::spawn(async move {
            if let Err(e) = feed.run(broker).await {
                feed_dead.store(true, Ordering::SeqCst);
                notifier.send(
                    Severity::Critical,
                    &format!("market feed down, REST fallback active: {e}"),
                );
            }
        });
    }

    async fn tick_loop(&self) {
        let mut market_tick = interval(MARKET_TICK);
        market_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut meta_tick = interval(META_TICK);
        meta_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut reconcile_tick = interval(RECONCILE_TICK);
        reconcile_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut housekeeping = interval(HOUSEKEEPING_TICK);
        housekeeping.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = market_tick.tick() => self.on_market_tick().await,
                _ = meta_tick.tick() => self.on_meta_tick().await,
                _ = reconcile_tick.tick() => {
                    self.reconciler.sweep().await;
                    self.metrics.reconcile_sweeps_total.inc();
                }
                _ = housekeeping.tick() => self.on_housekeeping().await,
                _ = self.shutdown.cancelled() => {
                    info!("shutdown requested, stopping timers");
                    break;
                }
            }
        }
    }

    // ===== Market tick =====

    async fn on_market_tick(&self) {
        let now = session::now_ist();
        if !session::is_market_open_at(now) {
            return;
        }
        let started = Instant::now();
        self.metrics.market_ticks_total.inc();
        self.metrics
            .feed_connected
            .set(i64::from(self.feed.is_connected()));

        let snapshot = self.market.snapshot().await;
        self.note_rest_health(snapshot.is_fresh());

        // Exit decisions run every tick, stale or not: stops and EOD act
        // on the position's own mark, not on the snapshot.
        self.run_exit_pass(&snapshot, now).await;

        if !snapshot.is_fresh() {
            self.metrics.stale_snapshots_total.inc();
            self.metrics
                .signals_rejected_total
                .with_label_values(&["stale_snapshot"])
                .inc();
            warn!("stale snapshot, skipping strategy pass");
            return;
        }

        let mut signals = self.runner.run(&snapshot);
        self.apply_strategy_filters(&mut signals, now);
        for signal in &signals {
            self.metrics
                .signals_total
                .with_label_values(&[signal.strategy_id.as_str()])
                .inc();
        }

        let (open_total, open_per_group) = self.open_group_counts();
        let picked = self.meta.fan_out(signals, open_total, &open_per_group);

        for signal in picked {
            self.try_enter(&signal, &snapshot).await;
        }

        self.metrics
            .open_positions
            .set(self.order_manager.open_positions().len() as i64);
        self.metrics.daily_realized_pnl.set(
            self.risk
                .realized_today()
                .to_f64()
                .unwrap_or(0.0),
        );

        let elapsed = started.elapsed();
        if elapsed > MARKET_TICK {
            warn!(elapsed_ms = elapsed.as_millis() as u64, "market tick overran its interval");
        }
    }

    async fn run_exit_pass(&self, snapshot: &MarketSnapshot, now: chrono::DateTime<chrono_tz::Tz>) {
        for position in self.order_manager.open_positions() {
            if let Some(reason) = self.risk.should_exit(&position, now) {
                let context = snapshot
                    .get(position.instrument.symbol)
                    .map(|s| context_from_symbol(s, now))
                    .unwrap_or_default();
                if let Err(e) = self
                    .order_manager
                    .close(&position.position_id, reason, context)
                    .await
                {
                    error!(position_id = %position.position_id, error = %e, "exit failed");
                }
            }
        }
    }

    /// Per-strategy config filters: time window, weekday, and the
    /// configured allocation multiplier on strength.
    fn apply_strategy_filters(&self, signals: &mut Vec<Signal>, now: chrono::DateTime<chrono_tz::Tz>) {
        signals.retain_mut(|signal| {
            match self.config.strategy_section(&signal.strategy_id) {
                Some(section) => {
                    if !section.allows(now) {
                        debug!(strategy = %signal.strategy_id, "outside configured trade window");
                        return false;
                    }
                    signal.strength = (signal.strength * section.allocation).clamp(0.0, 100.0);
                    true
                }
                None => true,
            }
        });
    }

    async fn try_enter(&self, signal: &Signal, snapshot: &MarketSnapshot) {
        let Some(symbol_snap) = snapshot.get(signal.symbol) else {
            return;
        };
        let quantity = self.risk.size(signal, symbol_snap.regime);
        if !quantity.is_positive() {
            return;
        }
        match self.risk.validate(signal, quantity) {
            Ok(()) => {
                let context = entry_context(signal, symbol_snap);
                match self.order_manager.execute(signal, quantity, context).await {
                    Ok(position_id) => {
                        self.metrics
                            .orders_total
                            .with_label_values(&[
                                &format!("{:?}", self.config.mode).to_lowercase(),
                                "buy",
                            ])
                            .inc();
                        debug!(position_id = %position_id, "entry executed");
                    }
                    Err(e) => {
                        // Broker rejects do not create positions; sizing
                        // recomputes next tick.
                        warn!(strategy = %signal.strategy_id, error = %e, "entry failed");
                        self.metrics
                            .signals_rejected_total
                            .with_label_values(&["broker_reject"])
                            .inc();
                    }
                }
            }
            Err(block) => {
                debug!(strategy = %signal.strategy_id, block = %block, "risk blocked entry");
                self.metrics
                    .signals_rejected_total
                    .with_label_values(&["risk_block"])
                    .inc();
            }
        }
    }

    fn open_group_counts(&self) -> (usize, HashMap<MetaGroup, usize>) {
        let open = self.order_manager.open_positions();
        let mut per_group: HashMap<MetaGroup, usize> = HashMap::new();
        for position in &open {
            *per_group
                .entry(MetaGroup::for_strategy(&position.strategy_id))
                .or_insert(0) += 1;
        }
        (open.len(), per_group)
    }

    // ===== Meta tick =====

    async fn on_meta_tick(&self) {
        let now = session::now_ist();
        if !session::is_market_open_at(now) {
            return;
        }
        let snapshot = self.market.snapshot().await;
        if !snapshot.is_fresh() {
            warn!("meta tick skipped on stale snapshot");
            return;
        }

        let portfolio = self.portfolio_greeks();
        let allocation = self.meta.refresh(&snapshot, portfolio, now);
        self.risk.set_allocation(allocation.clone());
        self.risk.set_paused(self.meta.is_paused());
        self.metrics
            .trading_paused
            .set(i64::from(self.meta.is_paused()));
        for (group, weight) in MetaGroup::ALL.iter().zip(allocation.weights.iter()) {
            self.metrics
                .allocation_weight
                .with_label_values(&[&group.to_string()])
                .set(*weight);
        }
        if let Err(e) = self.store.record_allocation(&allocation, self.meta.model_version()) {
            warn!(error = %e, "allocation audit write failed");
        }

        // The online-training sidecar writes critic-loss rows; a >3x jump
        // between consecutive observations latches the breaker.
        match self.store.latest_critic_loss() {
            Ok(Some((_day, loss))) => {
                self.risk.breakers().observe_critic_loss(loss);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "critic loss read failed"),
        }
    }

    fn portfolio_greeks(&self) -> PortfolioGreeks {
        let mut total = PortfolioGreeks::default();
        for position in self.order_manager.open_positions() {
            let qty = position.quantity.units() as f64;
            total.delta += position.current_greeks.delta * qty;
            total.gamma += position.current_greeks.gamma * qty;
            total.vega += position.current_greeks.vega * qty;
        }
        total
    }

    // ===== Housekeeping =====

    async fn on_housekeeping(&self) {
        let now = session::now_ist();

        // EOD flush: once per trading day at 15:20.
        if now.time() >= session::EOD_EXIT && now.time() < session::MARKET_CLOSE {
            let today = now.date_naive();
            let already = *self.eod_flushed.lock() == Some(today);
            if !already && !self.order_manager.open_positions().is_empty() {
                info!("EOD flush: closing all open positions");
                let snapshot = self.market.snapshot().await;
                let context = snapshot
                    .get(indra_core::IndexSymbol::Nifty)
                    .map(|s| context_from_symbol(s, now))
                    .unwrap_or_default();
                let closed = self
                    .order_manager
                    .close_all(ExitReason::Eod, context)
                    .await;
                self.notifier
                    .send(Severity::Info, &format!("EOD flush closed {closed} positions"));
            }
            if !already {
                *self.eod_flushed.lock() = Some(today);
            }
        }

        // Feed-degraded breaker: feed dead and REST fallback failing.
        let feed_down = self.feed_dead.load(Ordering::SeqCst);
        let rest_failing = self.rest_failure_rate() > 0.5;
        self.risk
            .breakers()
            .set_feed_degraded(feed_down && rest_failing);

        // One CRITICAL notification per breaker activation.
        let active = self.risk.breakers().active(now.date_naive());
        {
            let mut last = self.last_breaker.lock();
            if active != *last {
                if let Some(breaker) = active {
                    self.notifier.send(
                        Severity::Critical,
                        &format!("circuit breaker open: {breaker}"),
                    );
                }
                *last = active;
            }
        }

        self.metrics.cache_hit_rate.set(self.market.cache_hit_rate());
    }

    fn note_rest_health(&self, fresh: bool) {
        let mut health = self.rest_health.lock();
        health.push_back(fresh);
        while health.len() > REST_HEALTH_WINDOW {
            health.pop_front();
        }
    }

    fn rest_failure_rate(&self) -> f64 {
        let health = self.rest_health.lock();
        if health.is_empty() {
            return 0.0;
        }
        let failures = health.iter().filter(|&&ok| !ok).count();
        failures as f64 / health.len() as f64
    }
}

/// Market context for a fresh entry, enriched from the signal's leg.
fn entry_context(signal: &Signal, snap: &SymbolSnapshot) -> MarketContext {
    let now = session::now_ist();
    let mut context = context_from_symbol(snap, now);
    if let Some(leg) = snap.chain.leg(signal.strike, signal.right) {
        context.iv = leg.iv;
        context.greeks = leg.greeks;
        context.oi = leg.oi;
        context.volume = leg.volume;
        if leg.bid.is_positive() && leg.ask.is_positive() {
            context.spread = Some(leg.ask - leg.bid);
        }
    }
    context
}

fn context_from_symbol(
    snap: &SymbolSnapshot,
    now: chrono::DateTime<chrono_tz::Tz>,
) -> MarketContext {
    use chrono::{Datelike, Timelike};
    MarketContext {
        spot: snap.spot,
        vix: snap.vix_proxy,
        regime: snap.regime,
        hour: now.hour(),
        day_of_week: now.weekday().num_days_from_monday(),
        days_to_expiry: session::days_to_expiry(snap.expiry, now),
        iv: 0.0,
        greeks: Default::default(),
        oi: 0,
        volume: 0,
        spread: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use chrono_tz::Asia::Kolkata;
    use indra_core::{Greeks, IndexSymbol, OptionRight, OrderSide, Price, Regime};
    use rust_decimal_macros::dec;
    use std::collections::HashMap as StdHashMap;

    fn symbol_snapshot() -> SymbolSnapshot {
        let mut chain = indra_core::OptionChain::new(
            IndexSymbol::Nifty,
            NaiveDate::from_ymd_opt(2026, 3, 26).unwrap(),
            Price::new(dec!(26100)),
        );
        chain.strikes.insert(
            Price::new(dec!(26100)),
            indra_core::StrikePair {
                call: Some(indra_core::OptionLeg {
                    strike: Price::new(dec!(26100)),
                    right: OptionRight::Call,
                    instrument_key: "NSE_FO|NIFTY26MAR2026CE26100".into(),
                    last_price: Price::new(dec!(80.35)),
                    bid: Price::new(dec!(80.0)),
                    ask: Price::new(dec!(80.7)),
                    oi: 125_000,
                    oi_change: 0,
                    volume: 50_000,
                    iv: 14.97,
                    greeks: Greeks {
                        delta: 0.55,
                        gamma: 0.002,
                        theta: -5.2,
                        vega: 12.5,
                    },
                }),
                put: None,
            },
        );
        chain.recompute_totals();
        SymbolSnapshot {
            symbol: IndexSymbol::Nifty,
            spot: Price::new(dec!(26100)),
            spot_captured_at: Utc::now(),
            atm_strike: Price::new(dec!(26100)),
            expiry: chain.expiry,
            chain,
            technicals: StdHashMap::new(),
            vix_proxy: 14.0,
            regime: Regime::Normal,
            iv_rank: 0.5,
            pcr_volume: 1.0,
            captured_at: Utc::now(),
        }
    }

    #[test]
    fn test_entry_context_enriched_from_leg() {
        let snap = symbol_snapshot();
        let signal = Signal {
            strategy_id: "rsi_reversal".into(),
            symbol: IndexSymbol::Nifty,
            right: OptionRight::Call,
            strike: Price::new(dec!(26100)),
            expiry: snap.expiry,
            side: OrderSide::Buy,
            entry_price: Price::new(dec!(80.35)),
            target: Price::new(dec!(104)),
            stop_loss: Price::new(dec!(64)),
            tp1: None,
            tp2: None,
            tp3: None,
            strength: 85.0,
            confidence: 0.85,
            greeks: Greeks::default(),
        };
        let context = entry_context(&signal, &snap);
        assert_eq!(context.oi, 125_000);
        assert!((context.iv - 14.97).abs() < 1e-9);
        assert_eq!(context.spread, Some(Price::new(dec!(0.7))));
        assert_eq!(context.spot, Price::new(dec!(26100)));
    }

    #[test]
    fn test_context_from_symbol_clock_fields() {
        let snap = symbol_snapshot();
        let now = Kolkata.with_ymd_and_hms(2026, 3, 24, 10, 30, 0).unwrap();
        let context = context_from_symbol(&snap, now);
        assert_eq!(context.hour, 10);
        assert_eq!(context.day_of_week, 1);
        assert_eq!(context.days_to_expiry, 2);
        assert_eq!(context.regime, Regime::Normal);
    }
}
