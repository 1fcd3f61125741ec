//! SQLite position store.

use crate::error::PersistenceResult;
use chrono::{DateTime, NaiveDate, Utc};
use indra_core::{Allocation, OptionChain, Position, Price, Trade};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::path::Path;
use tracing::{info, warn};

/// A persisted row that failed integrity validation on reload.
///
/// Quarantined rows are never auto-closed; they are surfaced to the
/// caller, which removes them from the book and raises a critical alert.
#[derive(Debug, Clone)]
pub struct QuarantinedRow {
    pub position_id: String,
    pub reason: String,
}

/// Durable store for positions, trades, snapshots, and audit rows.
///
/// A single connection guarded by a mutex serializes writes; per-call
/// work is small so contention stays negligible at engine tick rates.
pub struct PositionStore {
    conn: Mutex<Connection>,
}

impl PositionStore {
    /// Open (or create) the store at the given path.
    pub fn open(path: impl AsRef<Path>) -> PersistenceResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> PersistenceResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> PersistenceResult<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS positions (
                position_id    TEXT PRIMARY KEY,
                instrument_key TEXT NOT NULL,
                status         TEXT NOT NULL,
                current_price  TEXT,
                updated_at     TEXT NOT NULL,
                data           TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_positions_status ON positions(status);

            CREATE TABLE IF NOT EXISTS trades (
                position_id    TEXT NOT NULL,
                instrument_key TEXT NOT NULL,
                strategy_id    TEXT NOT NULL,
                exit_reason    TEXT NOT NULL,
                pnl            TEXT NOT NULL,
                pnl_percent    REAL NOT NULL,
                entry_time     TEXT NOT NULL,
                exit_time      TEXT NOT NULL,
                data           TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_trades_exit_time ON trades(exit_time);

            CREATE TABLE IF NOT EXISTS option_chain_snapshots (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol      TEXT NOT NULL,
                expiry      TEXT NOT NULL,
                spot_price  TEXT NOT NULL,
                captured_at TEXT NOT NULL,
                data        TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_snapshots_symbol_time
                ON option_chain_snapshots(symbol, captured_at);

            CREATE TABLE IF NOT EXISTS iv_history (
                symbol      TEXT NOT NULL,
                day         TEXT NOT NULL,
                atm_iv      REAL NOT NULL,
                recorded_at TEXT NOT NULL,
                PRIMARY KEY (symbol, day)
            );

            CREATE TABLE IF NOT EXISTS allocation_audit (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                computed_at TEXT NOT NULL,
                weights     TEXT NOT NULL,
                note        TEXT
            );

            CREATE TABLE IF NOT EXISTS critic_loss_audit (
                day         TEXT PRIMARY KEY,
                loss        REAL NOT NULL,
                recorded_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS orphan_kills (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                killed_at   TEXT NOT NULL,
                detail      TEXT NOT NULL
            );",
        )?;
        info!("position store schema ready");
        Ok(())
    }

    // ===== Positions =====

    /// Upsert a position by id. Atomic per position.
    pub fn save(&self, position: &Position) -> PersistenceResult<()> {
        let data = serde_json::to_string(position)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO positions
                (position_id, instrument_key, status, current_price, updated_at, data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(position_id) DO UPDATE SET
                instrument_key = excluded.instrument_key,
                status         = excluded.status,
                current_price  = excluded.current_price,
                updated_at     = excluded.updated_at,
                data           = excluded.data",
            params![
                position.position_id,
                position.instrument.key,
                position.status.to_string(),
                position.current_price.to_string(),
                Utc::now().to_rfc3339(),
                data,
            ],
        )?;
        Ok(())
    }

    /// Delete an open-position row.
    pub fn remove(&self, position_id: &str) -> PersistenceResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM positions WHERE position_id = ?1",
            params![position_id],
        )?;
        Ok(())
    }

    /// Low-priority price column update between full saves.
    pub fn update_price(&self, position_id: &str, ltp: Price) -> PersistenceResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE positions SET current_price = ?2, updated_at = ?3 WHERE position_id = ?1",
            params![position_id, ltp.to_string(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Load every OPEN position.
    ///
    /// Rows that fail to parse or violate position integrity come back in
    /// the quarantine list; the persisted `current_price` column overrides
    /// the blob so restarts resume from the last observed tick.
    pub fn restore(&self) -> PersistenceResult<(Vec<Position>, Vec<QuarantinedRow>)> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT position_id, current_price, data FROM positions WHERE status = 'OPEN'",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut positions = Vec::new();
        let mut quarantined = Vec::new();
        for row in rows {
            let (position_id, current_price, data) = row?;
            match serde_json::from_str::<Position>(&data) {
                Ok(mut position) => {
                    if let Some(raw) = current_price {
                        if let Ok(price) = raw.parse::<Price>() {
                            position.apply_tick(price);
                        }
                    }
                    match position.check_integrity() {
                        Ok(()) => positions.push(position),
                        Err(e) => {
                            warn!(position_id = %position_id, error = %e, "quarantining position row");
                            quarantined.push(QuarantinedRow {
                                position_id,
                                reason: e.to_string(),
                            });
                        }
                    }
                }
                Err(e) => {
                    warn!(position_id = %position_id, error = %e, "unparseable position row");
                    quarantined.push(QuarantinedRow {
                        position_id,
                        reason: format!("unparseable row: {e}"),
                    });
                }
            }
        }
        Ok((positions, quarantined))
    }

    // ===== Trades =====

    /// Append one closed trade.
    pub fn record_trade(&self, trade: &Trade) -> PersistenceResult<()> {
        let data = serde_json::to_string(trade)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO trades
                (position_id, instrument_key, strategy_id, exit_reason,
                 pnl, pnl_percent, entry_time, exit_time, data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                trade.position_id,
                trade.instrument_key,
                trade.strategy_id,
                trade.exit_reason.to_string(),
                trade.pnl.to_string(),
                trade.pnl_percent,
                trade.entry_time.to_rfc3339(),
                trade.exit_time.to_rfc3339(),
                data,
            ],
        )?;
        Ok(())
    }

    /// Sum of realized PnL for trades exited on or after `since`.
    /// Used to rehydrate the daily-loss book after a restart.
    pub fn realized_pnl_since(
        &self,
        since: DateTime<Utc>,
    ) -> PersistenceResult<rust_decimal::Decimal> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT pnl FROM trades WHERE exit_time >= ?1")?;
        let rows = stmt.query_map(params![since.to_rfc3339()], |row| row.get::<_, String>(0))?;
        let mut total = rust_decimal::Decimal::ZERO;
        for row in rows {
            if let Ok(pnl) = row?.parse::<rust_decimal::Decimal>() {
                total += pnl;
            }
        }
        Ok(total)
    }

    // ===== Option chain snapshots =====

    /// Append a filtered chain snapshot for offline analysis.
    pub fn save_chain_snapshot(&self, chain: &OptionChain) -> PersistenceResult<()> {
        let data = serde_json::to_string(chain)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO option_chain_snapshots (symbol, expiry, spot_price, captured_at, data)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                chain.symbol.code(),
                chain.expiry.to_string(),
                chain.spot_price.to_string(),
                chain.captured_at.to_rfc3339(),
                data,
            ],
        )?;
        Ok(())
    }

    /// Prune snapshots older than the retention window.
    pub fn prune_chain_snapshots(&self, keep_days: i64) -> PersistenceResult<usize> {
        let cutoff = Utc::now() - chrono::Duration::days(keep_days);
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM option_chain_snapshots WHERE captured_at < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        Ok(deleted)
    }

    // ===== IV history =====

    /// Upsert the day's ATM IV observation for a symbol.
    pub fn save_iv_point(&self, symbol: &str, day: NaiveDate, atm_iv: f64) -> PersistenceResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO iv_history (symbol, day, atm_iv, recorded_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(symbol, day) DO UPDATE SET
                atm_iv = excluded.atm_iv, recorded_at = excluded.recorded_at",
            params![symbol, day.to_string(), atm_iv, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Trailing IV series for IV-rank, oldest first.
    pub fn iv_window(&self, symbol: &str, days: i64) -> PersistenceResult<Vec<f64>> {
        let cutoff = (Utc::now() - chrono::Duration::days(days)).date_naive();
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT atm_iv FROM iv_history WHERE symbol = ?1 AND day >= ?2 ORDER BY day ASC",
        )?;
        let rows = stmt.query_map(params![symbol, cutoff.to_string()], |row| row.get(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    // ===== Audit =====

    /// Record an allocation refresh.
    pub fn record_allocation(&self, allocation: &Allocation, note: &str) -> PersistenceResult<()> {
        let weights = serde_json::to_string(&allocation.weights)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO allocation_audit (computed_at, weights, note) VALUES (?1, ?2, ?3)",
            params![allocation.computed_at.to_rfc3339(), weights, note],
        )?;
        Ok(())
    }

    /// Record the day's critic loss (one row per day, last write wins).
    pub fn record_critic_loss(&self, day: NaiveDate, loss: f64) -> PersistenceResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO critic_loss_audit (day, loss, recorded_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(day) DO UPDATE SET
                loss = excluded.loss, recorded_at = excluded.recorded_at",
            params![day.to_string(), loss, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Most recent critic-loss observation, if any.
    ///
    /// The online-training sidecar writes these rows; the engine reads
    /// them to drive the critic-loss circuit breaker.
    pub fn latest_critic_loss(&self) -> PersistenceResult<Option<(NaiveDate, f64)>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT day, loss FROM critic_loss_audit ORDER BY day DESC LIMIT 1")?;
        let mut rows = stmt.query([])?;
        match rows.next()? {
            Some(row) => {
                let day: String = row.get(0)?;
                let loss: f64 = row.get(1)?;
                Ok(NaiveDate::parse_from_str(&day, "%Y-%m-%d")
                    .ok()
                    .map(|d| (d, loss)))
            }
            None => Ok(None),
        }
    }

    /// Durable audit row for a reconciler orphan kill.
    pub fn record_orphan_kill(&self, detail: &serde_json::Value) -> PersistenceResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO orphan_kills (killed_at, detail) VALUES (?1, ?2)",
            params![Utc::now().to_rfc3339(), detail.to_string()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indra_core::{
        Greeks, IndexSymbol, Instrument, MarketContext, OptionRight, PositionStatus, Qty,
    };
    use rust_decimal_macros::dec;

    fn sample_position(entry: rust_decimal::Decimal) -> Position {
        Position::open(
            Instrument::option(
                IndexSymbol::Nifty,
                Price::new(dec!(26150)),
                OptionRight::Call,
                NaiveDate::from_ymd_opt(2026, 3, 26).unwrap(),
            ),
            Qty::new(75),
            Price::new(entry),
            "rsi_reversal",
            Price::new(entry * dec!(1.3)),
            Price::new(entry * dec!(0.8)),
            (None, None, None),
            Greeks::default(),
            MarketContext::default(),
        )
    }

    #[test]
    fn test_save_restore_roundtrip() {
        let store = PositionStore::open_in_memory().unwrap();
        let pos = sample_position(dec!(80.35));
        store.save(&pos).unwrap();

        let (restored, quarantined) = store.restore().unwrap();
        assert!(quarantined.is_empty());
        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0].position_id, pos.position_id);
        assert_eq!(restored[0].entry_price, pos.entry_price);
    }

    #[test]
    fn test_restore_applies_persisted_price_column() {
        let store = PositionStore::open_in_memory().unwrap();
        let pos = sample_position(dec!(80.35));
        store.save(&pos).unwrap();
        store
            .update_price(&pos.position_id, Price::new(dec!(83.40)))
            .unwrap();

        let (restored, _) = store.restore().unwrap();
        assert_eq!(restored[0].current_price, Price::new(dec!(83.40)));
        // MTM is recomputed from the persisted price.
        assert_eq!(restored[0].unrealized_pnl, dec!(228.75));
    }

    #[test]
    fn test_save_is_upsert() {
        let store = PositionStore::open_in_memory().unwrap();
        let mut pos = sample_position(dec!(80.35));
        store.save(&pos).unwrap();
        pos.apply_tick(Price::new(dec!(85.00)));
        store.save(&pos).unwrap();

        let (restored, _) = store.restore().unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0].current_price, Price::new(dec!(85.00)));
    }

    #[test]
    fn test_closed_positions_not_restored() {
        let store = PositionStore::open_in_memory().unwrap();
        let mut pos = sample_position(dec!(50.70));
        pos.close(
            Price::new(dec!(39.5)),
            indra_core::ExitReason::StopLossHit,
            MarketContext::default(),
        );
        store.save(&pos).unwrap();
        assert_eq!(pos.status, PositionStatus::Closed);

        let (restored, _) = store.restore().unwrap();
        assert!(restored.is_empty());
    }

    #[test]
    fn test_integrity_violations_quarantined() {
        let store = PositionStore::open_in_memory().unwrap();
        let mut pos = sample_position(dec!(80.35));
        pos.instrument.strike = None;
        store.save(&pos).unwrap();

        let (restored, quarantined) = store.restore().unwrap();
        assert!(restored.is_empty());
        assert_eq!(quarantined.len(), 1);
        assert_eq!(quarantined[0].position_id, pos.position_id);
    }

    #[test]
    fn test_remove_deletes_row() {
        let store = PositionStore::open_in_memory().unwrap();
        let pos = sample_position(dec!(80.35));
        store.save(&pos).unwrap();
        store.remove(&pos.position_id).unwrap();
        let (restored, _) = store.restore().unwrap();
        assert!(restored.is_empty());
    }

    #[test]
    fn test_trade_recording_and_daily_pnl() {
        let store = PositionStore::open_in_memory().unwrap();
        let mut pos = sample_position(dec!(50.70));
        pos.close(
            Price::new(dec!(39.5)),
            indra_core::ExitReason::StopLossHit,
            MarketContext::default(),
        );
        let trade = Trade::from_closed(&pos, "uniform-v0", None).unwrap();
        store.record_trade(&trade).unwrap();

        let since = Utc::now() - chrono::Duration::hours(1);
        assert_eq!(store.realized_pnl_since(since).unwrap(), dec!(-840.00));
    }

    #[test]
    fn test_iv_history_window() {
        let store = PositionStore::open_in_memory().unwrap();
        let today = Utc::now().date_naive();
        store.save_iv_point("NIFTY", today, 14.5).unwrap();
        store
            .save_iv_point("NIFTY", today - chrono::Duration::days(1), 13.0)
            .unwrap();
        // Same-day upsert replaces.
        store.save_iv_point("NIFTY", today, 15.0).unwrap();

        let window = store.iv_window("NIFTY", 365).unwrap();
        assert_eq!(window, vec![13.0, 15.0]);
    }

    #[test]
    fn test_critic_loss_latest_row() {
        let store = PositionStore::open_in_memory().unwrap();
        assert!(store.latest_critic_loss().unwrap().is_none());
        let d1 = NaiveDate::from_ymd_opt(2026, 3, 23).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2026, 3, 24).unwrap();
        store.record_critic_loss(d1, 1.2).unwrap();
        store.record_critic_loss(d2, 4.1).unwrap();
        assert_eq!(store.latest_critic_loss().unwrap(), Some((d2, 4.1)));
        // Same-day rewrite wins.
        store.record_critic_loss(d2, 2.0).unwrap();
        assert_eq!(store.latest_critic_loss().unwrap(), Some((d2, 2.0)));
    }

    #[test]
    fn test_chain_snapshot_append_and_prune() {
        let store = PositionStore::open_in_memory().unwrap();
        let chain = OptionChain::new(
            IndexSymbol::Sensex,
            NaiveDate::from_ymd_opt(2026, 8, 4).unwrap(),
            Price::new(dec!(85262)),
        );
        store.save_chain_snapshot(&chain).unwrap();
        assert_eq!(store.prune_chain_snapshots(30).unwrap(), 0);
        assert_eq!(store.prune_chain_snapshots(-1).unwrap(), 1);
    }
}
