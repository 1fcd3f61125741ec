//! Position-broker reconciliation.
//!
//! Every sweep the broker book and the engine book are matched on
//! (symbol, |quantity|). Divergences on either side are flagged with a
//! timestamped streak; once a flag has persisted beyond two consecutive
//! sweeps the position is promoted to orphan. A promoted broker orphan
//! gets an opposite-side market exit, a durable audit row, and a
//! critical alert; a promoted engine position is closed through the
//! order manager. The delay keeps very fresh fills, which legitimately
//! lag the broker's position report, from being killed spuriously.

use crate::order_manager::{OrderManager, TradeMode};
use indra_broker::{BrokerClient, BrokerPosition};
use indra_core::{ExitReason, MarketContext, OrderSide, Position, Qty};
use indra_persistence::PositionStore;
use indra_telemetry::{Notifier, Severity};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Consecutive unmatched sweeps a flag must outlive before promotion.
const PROMOTE_AFTER_SWEEPS: u32 = 2;

/// Reconciler configuration.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub product: String,
    pub validity: String,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            product: "I".to_string(),
            validity: "DAY".to_string(),
        }
    }
}

/// Outcome of one reconciliation sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub broker_positions: usize,
    pub engine_positions: usize,
    pub broker_flagged: usize,
    pub broker_orphans_killed: usize,
    pub engine_flagged: usize,
    pub engine_promoted: usize,
}

/// Periodic diff between broker-reported positions and the engine book.
pub struct Reconciler {
    config: ReconcilerConfig,
    broker: Arc<BrokerClient>,
    order_manager: Arc<OrderManager>,
    store: Arc<PositionStore>,
    notifier: Arc<dyn Notifier>,
    /// Broker match key -> consecutive sweeps without an engine match.
    broker_streaks: Mutex<HashMap<String, u32>>,
    /// Engine position id -> consecutive sweeps without a broker match.
    engine_streaks: Mutex<HashMap<String, u32>>,
}

impl Reconciler {
    pub fn new(
        config: ReconcilerConfig,
        broker: Arc<BrokerClient>,
        order_manager: Arc<OrderManager>,
        store: Arc<PositionStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            broker,
            order_manager,
            store,
            notifier,
            broker_streaks: Mutex::new(HashMap::new()),
            engine_streaks: Mutex::new(HashMap::new()),
        }
    }

    /// One sweep. Paper mode only reports; live mode kills orphans.
    pub async fn sweep(&self) -> ReconcileSummary {
        let engine_book = self.order_manager.open_positions();

        if self.order_manager.mode() == TradeMode::Paper {
            // No broker-side book exists for paper fills.
            return ReconcileSummary {
                engine_positions: engine_book.len(),
                ..ReconcileSummary::default()
            };
        }

        let broker_positions = match self.broker.positions().await {
            Ok(positions) => positions
                .into_iter()
                .filter(|p| p.quantity != 0)
                .collect::<Vec<_>>(),
            Err(e) => {
                warn!(error = %e, "broker positions unavailable, skipping sweep");
                return ReconcileSummary {
                    engine_positions: engine_book.len(),
                    ..ReconcileSummary::default()
                };
            }
        };

        let mut summary = ReconcileSummary {
            broker_positions: broker_positions.len(),
            engine_positions: engine_book.len(),
            ..ReconcileSummary::default()
        };

        let engine_keys: HashSet<String> = engine_book.iter().map(match_key_engine).collect();
        let broker_keys: HashSet<String> =
            broker_positions.iter().map(match_key_broker).collect();

        // Broker side: flag unmatched positions, kill once the flag
        // outlives the promotion window.
        let kill_list = self.advance_broker_streaks(&broker_positions, &engine_keys, &mut summary);
        for orphan in kill_list {
            if self.kill_broker_orphan(&orphan).await {
                self.broker_streaks.lock().remove(&match_key_broker(&orphan));
                summary.broker_orphans_killed += 1;
            }
        }

        // Engine side: same flag-then-promote policy, closed through the
        // order manager rather than a raw broker order.
        let promote = self.advance_engine_streaks(&engine_book, &broker_keys, &mut summary);
        for position_id in promote {
            error!(position_id = %position_id, "promoting unmatched engine position to orphan");
            self.notifier.send(
                Severity::Critical,
                &format!("engine position {position_id} unmatched at broker, closing"),
            );
            if self
                .order_manager
                .close(&position_id, ExitReason::OrphanKill, MarketContext::default())
                .await
                .is_ok()
            {
                self.engine_streaks.lock().remove(&position_id);
                summary.engine_promoted += 1;
            }
        }

        info!(
            broker = summary.broker_positions,
            engine = summary.engine_positions,
            broker_flagged = summary.broker_flagged,
            orphans_killed = summary.broker_orphans_killed,
            engine_flagged = summary.engine_flagged,
            "reconciliation sweep"
        );
        summary
    }

    fn advance_broker_streaks(
        &self,
        broker_positions: &[BrokerPosition],
        engine_keys: &HashSet<String>,
        summary: &mut ReconcileSummary,
    ) -> Vec<BrokerPosition> {
        let mut streaks = self.broker_streaks.lock();
        let mut alive = HashSet::new();
        let mut kill = Vec::new();
        for position in broker_positions {
            let key = match_key_broker(position);
            if engine_keys.contains(&key) {
                streaks.remove(&key);
                continue;
            }
            alive.insert(key.clone());
            let streak = streaks.entry(key.clone()).or_insert(0);
            *streak += 1;
            summary.broker_flagged += 1;
            warn!(
                trading_symbol = %position.trading_symbol,
                qty = position.quantity,
                streak = *streak,
                "broker position unmatched in engine book"
            );
            if *streak > PROMOTE_AFTER_SWEEPS {
                kill.push(position.clone());
            }
        }
        streaks.retain(|key, _| alive.contains(key));
        kill
    }

    fn advance_engine_streaks(
        &self,
        engine_book: &[Position],
        broker_keys: &HashSet<String>,
        summary: &mut ReconcileSummary,
    ) -> Vec<String> {
        let mut streaks = self.engine_streaks.lock();
        let mut alive = HashSet::new();
        let mut promote = Vec::new();
        for position in engine_book {
            if broker_keys.contains(&match_key_engine(position)) {
                streaks.remove(&position.position_id);
                continue;
            }
            alive.insert(position.position_id.clone());
            let streak = streaks.entry(position.position_id.clone()).or_insert(0);
            *streak += 1;
            summary.engine_flagged += 1;
            warn!(
                position_id = %position.position_id,
                instrument = %position.instrument.key,
                streak = *streak,
                "engine position unmatched at broker"
            );
            if *streak > PROMOTE_AFTER_SWEEPS {
                promote.push(position.position_id.clone());
            }
        }
        streaks.retain(|id, _| alive.contains(id));
        promote
    }

    /// Issue the opposite-side market order for a broker orphan and
    /// write the audit row.
    async fn kill_broker_orphan(&self, orphan: &BrokerPosition) -> bool {
        let side = if orphan.quantity > 0 {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        };
        let quantity = Qty::new(orphan.quantity).abs();
        let token = orphan
            .instrument_token
            .clone()
            .unwrap_or_else(|| orphan.trading_symbol.clone());

        error!(
            instrument = %token,
            qty = quantity.units(),
            %side,
            "killing broker orphan position"
        );

        match self
            .broker
            .place_order(
                &token,
                quantity.units(),
                side,
                "MARKET",
                None,
                &self.config.product,
                &self.config.validity,
            )
            .await
        {
            Ok(ack) => {
                let detail = serde_json::json!({
                    "instrument": token,
                    "trading_symbol": orphan.trading_symbol,
                    "quantity": orphan.quantity,
                    "kill_side": side.to_string(),
                    "order_id": ack.order_id,
                });
                if let Err(e) = self.store.record_orphan_kill(&detail) {
                    warn!(error = %e, "orphan kill audit write failed");
                }
                self.notifier.send(
                    Severity::Critical,
                    &format!(
                        "orphan killed: {} {} qty={}",
                        orphan.trading_symbol, side, quantity
                    ),
                );
                true
            }
            Err(e) => {
                error!(error = %e, instrument = %token, "orphan kill order failed");
                false
            }
        }
    }
}

/// Match key for an engine position: symbol code + absolute units.
fn match_key_engine(position: &Position) -> String {
    format!(
        "{}_{}",
        position.instrument.symbol.code(),
        position.quantity.abs().units()
    )
}

/// Match key for a broker position: leading symbol token + |quantity|.
fn match_key_broker(position: &BrokerPosition) -> String {
    let symbol = position
        .trading_symbol
        .split_whitespace()
        .next()
        .unwrap_or(&position.trading_symbol);
    format!("{}_{}", symbol.to_ascii_uppercase(), position.quantity.abs())
}
