//! Shared open-position book.
//!
//! One writer lock guards the position map; feed callbacks, the risk
//! loop, and the reconciler all read through it. Tick application is
//! idempotent: re-applying the same LTP changes nothing state-visible.

use indra_core::{Position, Price};
use indra_persistence::PositionStore;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;

/// Broadcast payload for observers (dashboards, daily stats).
#[derive(Debug, Clone)]
pub struct PositionUpdate {
    pub position_id: String,
    pub instrument_key: String,
    pub ltp: Price,
    pub unrealized_pnl: rust_decimal::Decimal,
}

/// Open positions indexed by id and by instrument key.
pub struct PositionBook {
    positions: RwLock<HashMap<String, Position>>,
    by_instrument: RwLock<HashMap<String, String>>,
    store: Arc<PositionStore>,
    updates: broadcast::Sender<PositionUpdate>,
}

impl PositionBook {
    pub fn new(store: Arc<PositionStore>) -> Self {
        let (updates, _) = broadcast::channel(256);
        Self {
            positions: RwLock::new(HashMap::new()),
            by_instrument: RwLock::new(HashMap::new()),
            store,
            updates,
        }
    }

    /// Subscribe to per-tick position updates.
    pub fn subscribe_updates(&self) -> broadcast::Receiver<PositionUpdate> {
        self.updates.subscribe()
    }

    pub fn insert(&self, position: Position) {
        self.by_instrument
            .write()
            .insert(position.instrument.key.clone(), position.position_id.clone());
        self.positions
            .write()
            .insert(position.position_id.clone(), position);
    }

    /// Remove and return a position by id.
    pub fn take(&self, position_id: &str) -> Option<Position> {
        let position = self.positions.write().remove(position_id)?;
        self.by_instrument.write().remove(&position.instrument.key);
        Some(position)
    }

    pub fn get(&self, position_id: &str) -> Option<Position> {
        self.positions.read().get(position_id).cloned()
    }

    pub fn get_by_instrument(&self, instrument_key: &str) -> Option<Position> {
        let id = self.by_instrument.read().get(instrument_key).cloned()?;
        self.get(&id)
    }

    pub fn len(&self) -> usize {
        self.positions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.read().is_empty()
    }

    /// Snapshot of every open position.
    pub fn open_positions(&self) -> Vec<Position> {
        self.positions.read().values().cloned().collect()
    }

    /// Apply one tick to the owning position.
    ///
    /// Updates MTM in memory, persists the price column best-effort off
    /// the hot path, and broadcasts to observers. Unknown instruments
    /// are ignored (the feed may still be streaming a just-closed leg).
    pub fn on_tick(&self, instrument_key: &str, ltp: Price) {
        let Some(position_id) = self.by_instrument.read().get(instrument_key).cloned() else {
            return;
        };
        let update = {
            let mut positions = self.positions.write();
            let Some(position) = positions.get_mut(&position_id) else {
                return;
            };
            let before = (position.current_price, position.unrealized_pnl);
            position.apply_tick(ltp);
            if (position.current_price, position.unrealized_pnl) == before {
                // Same LTP re-applied: no persistence diff, no broadcast.
                return;
            }
            PositionUpdate {
                position_id: position.position_id.clone(),
                instrument_key: instrument_key.to_string(),
                ltp,
                unrealized_pnl: position.unrealized_pnl,
            }
        };

        let store = Arc::clone(&self.store);
        let id = update.position_id.clone();
        tokio::spawn(async move {
            if let Err(e) = store.update_price(&id, ltp) {
                warn!(position_id = %id, error = %e, "tick persist failed");
            }
        });

        let _ = self.updates.send(update);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use indra_core::{
        Greeks, IndexSymbol, Instrument, MarketContext, OptionRight, Qty,
    };
    use rust_decimal_macros::dec;

    fn sample() -> Position {
        Position::open(
            Instrument::option(
                IndexSymbol::Nifty,
                Price::new(dec!(26150)),
                OptionRight::Call,
                NaiveDate::from_ymd_opt(2026, 3, 26).unwrap(),
            ),
            Qty::new(75),
            Price::new(dec!(80.35)),
            "rsi_reversal",
            Price::new(dec!(104.00)),
            Price::new(dec!(64.00)),
            (None, None, None),
            Greeks::default(),
            MarketContext::default(),
        )
    }

    fn book() -> PositionBook {
        PositionBook::new(Arc::new(PositionStore::open_in_memory().unwrap()))
    }

    #[tokio::test]
    async fn test_tick_updates_mtm() {
        let book = book();
        let pos = sample();
        let key = pos.instrument.key.clone();
        book.insert(pos);

        book.on_tick(&key, Price::new(dec!(83.40)));
        let updated = book.get_by_instrument(&key).unwrap();
        assert_eq!(updated.unrealized_pnl, dec!(228.75));
    }

    #[tokio::test]
    async fn test_duplicate_tick_is_noop() {
        let book = book();
        let pos = sample();
        let key = pos.instrument.key.clone();
        book.insert(pos);
        let mut rx = book.subscribe_updates();

        book.on_tick(&key, Price::new(dec!(83.40)));
        book.on_tick(&key, Price::new(dec!(83.40)));

        // Exactly one broadcast for two identical ticks.
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unknown_instrument_ignored() {
        let book = book();
        book.on_tick("NSE_FO|NIFTY26MAR2026CE99999", Price::new(dec!(1)));
        assert!(book.is_empty());
    }

    #[tokio::test]
    async fn test_take_unindexes_instrument() {
        let book = book();
        let pos = sample();
        let key = pos.instrument.key.clone();
        let id = pos.position_id.clone();
        book.insert(pos);

        let taken = book.take(&id).unwrap();
        assert_eq!(taken.position_id, id);
        assert!(book.get_by_instrument(&key).is_none());
    }
}
