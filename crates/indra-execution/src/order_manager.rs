//! Order manager: entry, per-tick MTM, close, rehydration.

use crate::book::PositionBook;
use crate::error::{ExecutionError, ExecutionResult};
use indra_broker::BrokerClient;
use indra_core::{
    ExitReason, Instrument, MarketContext, OrderSide, Position, Price, Qty, Signal, Trade,
};
use indra_feed::MarketFeed;
use indra_persistence::PositionStore;
use indra_risk::RiskManager;
use indra_telemetry::{Notifier, Severity};
use parking_lot::RwLock;
use rand::Rng;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Execution mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeMode {
    Paper,
    Live,
}

/// Order manager configuration.
#[derive(Debug, Clone)]
pub struct OrderManagerConfig {
    pub mode: TradeMode,
    /// Second gate required for live order flow.
    pub enable_live_trading: bool,
    pub paper_fill_delay_ms: u64,
    /// Limit tolerance: BUY at reference x (1 + tol), SELL at (1 - tol).
    pub live_price_tolerance: f64,
    pub product: String,
    pub validity: String,
    pub max_order_attempts: u32,
    /// Feed resubscription batching on startup.
    pub rehydrate_batch: usize,
    pub rehydrate_batch_delay_ms: u64,
}

impl Default for OrderManagerConfig {
    fn default() -> Self {
        Self {
            mode: TradeMode::Paper,
            enable_live_trading: false,
            paper_fill_delay_ms: 50,
            live_price_tolerance: 0.02,
            product: "I".to_string(),
            validity: "DAY".to_string(),
            max_order_attempts: 3,
            rehydrate_batch: 3,
            rehydrate_batch_delay_ms: 500,
        }
    }
}

/// Owns the live position set and all order flow.
pub struct OrderManager {
    config: OrderManagerConfig,
    broker: Arc<BrokerClient>,
    feed: Arc<MarketFeed>,
    risk: Arc<RiskManager>,
    store: Arc<PositionStore>,
    notifier: Arc<dyn Notifier>,
    book: Arc<PositionBook>,
    /// Policy artifact version stamped onto trade rows.
    model_version: RwLock<String>,
}

impl OrderManager {
    pub fn new(
        config: OrderManagerConfig,
        broker: Arc<BrokerClient>,
        feed: Arc<MarketFeed>,
        risk: Arc<RiskManager>,
        store: Arc<PositionStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let book = Arc::new(PositionBook::new(Arc::clone(&store)));
        Self {
            config,
            broker,
            feed,
            risk,
            store,
            notifier,
            book,
            model_version: RwLock::new("uniform-v0".to_string()),
        }
    }

    pub fn book(&self) -> &Arc<PositionBook> {
        &self.book
    }

    pub fn mode(&self) -> TradeMode {
        self.config.mode
    }

    pub fn set_model_version(&self, version: impl Into<String>) {
        *self.model_version.write() = version.into();
    }

    pub fn open_positions(&self) -> Vec<Position> {
        self.book.open_positions()
    }

    // ===== Entry =====

    /// Execute one validated, sized signal and return the new position id.
    pub async fn execute(
        &self,
        signal: &Signal,
        quantity: Qty,
        entry_context: MarketContext,
    ) -> ExecutionResult<String> {
        let instrument = signal.instrument();
        let (fill_price, fill_qty) = match self.config.mode {
            TradeMode::Paper => self.fill_paper(signal, quantity).await?,
            TradeMode::Live => self.fill_live(signal, &instrument, quantity).await?,
        };

        let position = Position::open(
            instrument,
            fill_qty,
            fill_price,
            signal.strategy_id.clone(),
            signal.target,
            signal.stop_loss,
            (signal.tp1, signal.tp2, signal.tp3),
            signal.greeks,
            entry_context,
        );
        let position_id = position.position_id.clone();
        let instrument_key = position.instrument.key.clone();

        self.store.save(&position)?;
        self.risk.add_position(&position);
        self.book.insert(position);
        self.attach_feed(&instrument_key).await;

        info!(
            position_id = %position_id,
            instrument = %instrument_key,
            qty = fill_qty.units(),
            fill = %fill_price,
            mode = ?self.config.mode,
            "position opened"
        );
        self.notifier.send(
            Severity::Success,
            &format!(
                "TRADE_ENTRY {instrument_key} qty={} @ {fill_price} [{}]",
                fill_qty.units(),
                signal.strategy_id
            ),
        );
        Ok(position_id)
    }

    /// Paper fill: quoted mid at decision time after a simulated delay,
    /// with occasional partial fills on large orders.
    async fn fill_paper(&self, signal: &Signal, quantity: Qty) -> ExecutionResult<(Price, Qty)> {
        sleep(Duration::from_millis(self.config.paper_fill_delay_ms)).await;
        let mut rng = rand::thread_rng();
        let fill_qty = paper_fill_qty(quantity, signal.symbol.lot_size(), &mut rng);
        Ok((signal.entry_price, fill_qty))
    }

    /// Live fill: limit order with tolerance off a fresh quote, retried
    /// with exponential backoff.
    async fn fill_live(
        &self,
        signal: &Signal,
        instrument: &Instrument,
        quantity: Qty,
    ) -> ExecutionResult<(Price, Qty)> {
        if !self.config.enable_live_trading {
            return Err(ExecutionError::LiveTradingDisabled);
        }

        let reference = self.fresh_ltp(instrument).await.unwrap_or(signal.entry_price);
        let tolerance = Decimal::from_f64(1.0 + self.config.live_price_tolerance)
            .unwrap_or(Decimal::ONE);
        let limit = Price::new(reference.inner() * tolerance);

        let mut last_err = None;
        for attempt in 0..self.config.max_order_attempts {
            match self
                .broker
                .place_order(
                    &instrument.key,
                    quantity.units(),
                    OrderSide::Buy,
                    "LIMIT",
                    Some(limit),
                    &self.config.product,
                    &self.config.validity,
                )
                .await
            {
                Ok(ack) => {
                    info!(order_id = %ack.order_id, limit = %limit, "entry order placed");
                    return Ok((limit, quantity));
                }
                Err(e) => {
                    warn!(attempt, error = %e, "entry order attempt failed");
                    last_err = Some(e);
                    if attempt + 1 < self.config.max_order_attempts {
                        sleep(Duration::from_secs(1 << attempt)).await;
                    }
                }
            }
        }
        Err(ExecutionError::BrokerReject(
            last_err
                .map(|e| e.to_string())
                .unwrap_or_else(|| "order placement failed".to_string()),
        ))
    }

    async fn attach_feed(&self, instrument_key: &str) {
        self.feed.subscribe(vec![instrument_key.to_string()]).await;
        let book = Arc::clone(&self.book);
        self.feed.register_callback(
            instrument_key,
            Arc::new(move |tick| book.on_tick(&tick.instrument_key, tick.ltp)),
        );
    }

    // ===== Close =====

    /// Close one position: fetch a fresh LTP, place the exit order, and
    /// retire the position into the trade log.
    pub async fn close(
        &self,
        position_id: &str,
        reason: ExitReason,
        mut exit_context: MarketContext,
    ) -> ExecutionResult<Trade> {
        let mut position = self
            .book
            .take(position_id)
            .ok_or_else(|| ExecutionError::UnknownPosition(position_id.to_string()))?;

        // A fresh LTP prevents exit price collapsing onto a stale mark.
        let exit_price = self
            .fresh_ltp(&position.instrument)
            .await
            .unwrap_or(position.current_price);

        if self.config.mode == TradeMode::Live {
            self.place_exit_order(&position).await?;
        }

        if let Some(tick) = self.feed.last_tick(&position.instrument.key) {
            if let Some(greeks) = tick.greeks {
                exit_context.greeks = greeks;
            }
            if let Some(iv) = tick.iv {
                exit_context.iv = iv;
            }
        }
        position.close(exit_price, reason, exit_context);

        self.feed.unregister_callback(&position.instrument.key);
        self.risk.remove_position(&position.position_id);
        self.risk.record_realized(position.realized_pnl);
        self.store.remove(&position.position_id)?;

        let trade = Trade::from_closed(&position, self.model_version.read().clone(), None)?;
        self.store.record_trade(&trade)?;

        info!(
            position_id = %position.position_id,
            instrument = %position.instrument.key,
            exit = %exit_price,
            %reason,
            pnl = %position.realized_pnl,
            "position closed"
        );
        self.notifier.send(
            Severity::Info,
            &format!(
                "TRADE_EXIT {} {reason} pnl={}",
                position.instrument.key, position.realized_pnl
            ),
        );
        Ok(trade)
    }

    /// Close every open position (EOD flush, shutdown).
    pub async fn close_all(&self, reason: ExitReason, exit_context: MarketContext) -> usize {
        let open = self.book.open_positions();
        let mut closed = 0;
        for position in open {
            match self
                .close(&position.position_id, reason, exit_context.clone())
                .await
            {
                Ok(_) => closed += 1,
                Err(e) => {
                    error!(position_id = %position.position_id, error = %e, "close failed")
                }
            }
        }
        closed
    }

    async fn place_exit_order(&self, position: &Position) -> ExecutionResult<()> {
        let mut last_err = None;
        for attempt in 0..self.config.max_order_attempts {
            match self
                .broker
                .place_order(
                    &position.instrument.key,
                    position.quantity.units(),
                    OrderSide::Sell,
                    "MARKET",
                    None,
                    &self.config.product,
                    &self.config.validity,
                )
                .await
            {
                Ok(ack) => {
                    info!(order_id = %ack.order_id, "exit order placed");
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, error = %e, "exit order attempt failed");
                    last_err = Some(e);
                    if attempt + 1 < self.config.max_order_attempts {
                        sleep(Duration::from_secs(1 << attempt)).await;
                    }
                }
            }
        }
        Err(ExecutionError::BrokerReject(
            last_err
                .map(|e| e.to_string())
                .unwrap_or_else(|| "exit order failed".to_string()),
        ))
    }

    /// Freshest LTP for an instrument: feed first, then REST in live mode.
    async fn fresh_ltp(&self, instrument: &Instrument) -> Option<Price> {
        if let Some((price, _at)) = self.feed.last_price(&instrument.key) {
            return Some(price);
        }
        if self.config.mode == TradeMode::Live {
            let keys = vec![instrument.key.clone()];
            if let Ok(quotes) = self.broker.ltp(&keys).await {
                return quotes.get(&instrument.key).copied();
            }
        }
        None
    }

    // ===== Startup rehydration =====

    /// Reload OPEN positions from persistence, re-subscribe their
    /// instruments in rate-limited batches, and rebuild the risk book.
    /// Must complete before the first live tick is processed.
    pub async fn rehydrate(&self) -> ExecutionResult<usize> {
        let (positions, quarantined) = self.store.restore()?;

        for row in &quarantined {
            error!(position_id = %row.position_id, reason = %row.reason, "position quarantined");
            self.notifier.send(
                Severity::Critical,
                &format!("position {} quarantined on reload: {}", row.position_id, row.reason),
            );
        }

        let mut keys = Vec::with_capacity(positions.len());
        for mut position in positions {
            if position.instrument.key.is_empty() {
                // Older rows may predate key persistence; rebuild from parts.
                if let (Some(strike), Some(right), Some(expiry)) = (
                    position.instrument.strike,
                    position.instrument.right,
                    position.instrument.expiry,
                ) {
                    position.instrument =
                        Instrument::option(position.instrument.symbol, strike, right, expiry);
                }
            }
            keys.push(position.instrument.key.clone());
            self.risk.add_position(&position);
            self.book.insert(position);
        }

        for batch in keys.chunks(self.config.rehydrate_batch.max(1)) {
            for key in batch {
                self.attach_feed(key).await;
            }
            if batch.len() == self.config.rehydrate_batch {
                sleep(Duration::from_millis(self.config.rehydrate_batch_delay_ms)).await;
            }
        }

        let count = self.book.len();
        info!(count, quarantined = quarantined.len(), "positions rehydrated");
        Ok(count)
    }
}

/// Paper partial-fill model: orders of 100+ lots have a 10% chance of a
/// partial fill with a ratio drawn uniformly in [0.5, 0.9], rounded down
/// to a lot multiple.
pub fn paper_fill_qty(quantity: Qty, lot_size: i64, rng: &mut impl Rng) -> Qty {
    if quantity.lots(lot_size) < 100 {
        return quantity;
    }
    if rng.gen::<f64>() >= 0.10 {
        return quantity;
    }
    let ratio = rng.gen_range(0.5..0.9);
    let filled = (quantity.units() as f64 * ratio) as i64;
    let filled = Qty::new(filled).round_to_lot(lot_size);
    if filled.is_positive() {
        filled
    } else {
        Qty::new(lot_size)
    }
}
