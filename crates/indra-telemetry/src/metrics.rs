//! Prometheus metrics for the trading engine.

use crate::error::TelemetryResult;
use prometheus::{
    Gauge, GaugeVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};

/// Engine-wide metric handles backed by one registry.
pub struct Metrics {
    pub registry: Registry,

    // Market data plane
    pub market_ticks_total: IntCounter,
    pub stale_snapshots_total: IntCounter,
    pub feed_connected: IntGauge,
    pub cache_hit_rate: Gauge,

    // Signals and execution
    pub signals_total: IntCounterVec,
    pub signals_rejected_total: IntCounterVec,
    pub orders_total: IntCounterVec,
    pub open_positions: IntGauge,
    pub daily_realized_pnl: Gauge,

    // Reconciliation
    pub reconcile_sweeps_total: IntCounter,
    pub orphans_killed_total: IntCounter,

    // Meta-controller
    pub allocation_weight: GaugeVec,
    pub trading_paused: IntGauge,
}

impl Metrics {
    pub fn new() -> TelemetryResult<Self> {
        let registry = Registry::new();

        let market_ticks_total =
            IntCounter::with_opts(Opts::new("indra_market_ticks_total", "Market ticks driven"))?;
        let stale_snapshots_total = IntCounter::with_opts(Opts::new(
            "indra_stale_snapshots_total",
            "Market ticks skipped on stale snapshots",
        ))?;
        let feed_connected = IntGauge::with_opts(Opts::new(
            "indra_feed_connected",
            "1 while the push feed is connected",
        ))?;
        let cache_hit_rate = Gauge::with_opts(Opts::new(
            "indra_cache_hit_rate",
            "Market data cache hit rate in [0,1]",
        ))?;

        let signals_total = IntCounterVec::new(
            Opts::new("indra_signals_total", "Signals produced by strategy"),
            &["strategy"],
        )?;
        let signals_rejected_total = IntCounterVec::new(
            Opts::new("indra_signals_rejected_total", "Signals rejected by reason"),
            &["reason"],
        )?;
        let orders_total = IntCounterVec::new(
            Opts::new("indra_orders_total", "Orders submitted by mode and side"),
            &["mode", "side"],
        )?;
        let open_positions = IntGauge::with_opts(Opts::new(
            "indra_open_positions",
            "Currently open positions",
        ))?;
        let daily_realized_pnl = Gauge::with_opts(Opts::new(
            "indra_daily_realized_pnl",
            "Realized PnL for the trading day, rupees",
        ))?;

        let reconcile_sweeps_total = IntCounter::with_opts(Opts::new(
            "indra_reconcile_sweeps_total",
            "Reconciliation sweeps run",
        ))?;
        let orphans_killed_total = IntCounter::with_opts(Opts::new(
            "indra_orphans_killed_total",
            "Broker orphan positions killed",
        ))?;

        let allocation_weight = GaugeVec::new(
            Opts::new("indra_allocation_weight", "Meta-group allocation weight"),
            &["group"],
        )?;
        let trading_paused = IntGauge::with_opts(Opts::new(
            "indra_trading_paused",
            "1 while the meta-controller PAUSE directive is active",
        ))?;

        registry.register(Box::new(market_ticks_total.clone()))?;
        registry.register(Box::new(stale_snapshots_total.clone()))?;
        registry.register(Box::new(feed_connected.clone()))?;
        registry.register(Box::new(cache_hit_rate.clone()))?;
        registry.register(Box::new(signals_total.clone()))?;
        registry.register(Box::new(signals_rejected_total.clone()))?;
        registry.register(Box::new(orders_total.clone()))?;
        registry.register(Box::new(open_positions.clone()))?;
        registry.register(Box::new(daily_realized_pnl.clone()))?;
        registry.register(Box::new(reconcile_sweeps_total.clone()))?;
        registry.register(Box::new(orphans_killed_total.clone()))?;
        registry.register(Box::new(allocation_weight.clone()))?;
        registry.register(Box::new(trading_paused.clone()))?;

        Ok(Self {
            registry,
            market_ticks_total,
            stale_snapshots_total,
            feed_connected,
            cache_hit_rate,
            signals_total,
            signals_rejected_total,
            orders_total,
            open_positions,
            daily_realized_pnl,
            reconcile_sweeps_total,
            orphans_killed_total,
            allocation_weight,
            trading_paused,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_once() {
        let metrics = Metrics::new().unwrap();
        metrics.market_ticks_total.inc();
        metrics
            .signals_rejected_total
            .with_label_values(&["stale_snapshot"])
            .inc();
        assert_eq!(metrics.market_ticks_total.get(), 1);
        // Registry gathers every family exactly once.
        let families = metrics.registry.gather();
        assert!(families.iter().any(|f| f.get_name() == "indra_market_ticks_total"));
    }
}
