//! Market data manager: feed + REST + cache fusion.

use crate::error::{MarketError, MarketResult};
use crate::filter::filter_strikes;
use crate::greeks::black_scholes_greeks;
use crate::iv_rank::iv_rank_percentile;
use crate::snapshot::{regime_for_vix, MarketSnapshot, SymbolSnapshot};
use crate::technicals::{CandleSeries, TechnicalSnapshot, Timeframe};
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use indra_broker::{BrokerClient, Candle, RawChainEntry};
use indra_cache::{CacheDomain, TieredCache};
use indra_core::{
    chain::pcr_by_volume, session, Greeks, IndexSymbol, OptionChain, OptionLeg, Price, StrikePair,
};
use indra_feed::MarketFeed;
use indra_persistence::PositionStore;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Manager configuration.
#[derive(Debug, Clone)]
pub struct MarketDataConfig {
    pub symbols: Vec<IndexSymbol>,
    /// Minimum gap between chain snapshot persists, per symbol.
    pub chain_persist_interval: Duration,
    /// Fallback expiries tried when the computed one returns empty.
    pub fallback_expiry_count: usize,
    /// Trailing window for IV rank.
    pub iv_rank_days: i64,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            symbols: vec![IndexSymbol::Nifty, IndexSymbol::Sensex],
            chain_persist_interval: Duration::from_secs(60),
            fallback_expiry_count: 3,
            iv_rank_days: 365,
        }
    }
}

/// Cached spot entry: the price plus its own capture time, so freshness
/// survives the cache round-trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedSpot {
    price: Decimal,
    captured_at: DateTime<Utc>,
}

/// Fuses the push feed, REST fallbacks, and cache into `MarketSnapshot`s.
///
/// Owns the spot and chain cache entries exclusively; other components
/// read market state only through snapshots.
pub struct MarketDataManager {
    broker: Arc<BrokerClient>,
    feed: Arc<MarketFeed>,
    cache: Arc<TieredCache>,
    store: Arc<PositionStore>,
    config: MarketDataConfig,
    candles: DashMap<(IndexSymbol, Timeframe), CandleSeries>,
    last_chain_persist: DashMap<IndexSymbol, Instant>,
    last_iv_save: DashMap<IndexSymbol, NaiveDate>,
}

impl MarketDataManager {
    /// Aggregate cache hit rate, exported as a health gauge.
    pub fn cache_hit_rate(&self) -> f64 {
        self.cache.stats.hit_rate()
    }

    pub fn new(
        broker: Arc<BrokerClient>,
        feed: Arc<MarketFeed>,
        cache: Arc<TieredCache>,
        store: Arc<PositionStore>,
        config: MarketDataConfig,
    ) -> Self {
        Self {
            broker,
            feed,
            cache,
            store,
            config,
            candles: DashMap::new(),
            last_chain_persist: DashMap::new(),
            last_iv_save: DashMap::new(),
        }
    }

    /// Subscribe the index keys and mirror their ticks into the spot cache.
    pub async fn attach_feed(&self) {
        let keys: Vec<String> = self
            .config
            .symbols
            .iter()
            .map(|s| s.index_key().to_string())
            .collect();
        self.feed.subscribe(keys).await;

        for &symbol in &self.config.symbols {
            let cache = Arc::clone(&self.cache);
            self.feed.register_callback(
                symbol.index_key(),
                Arc::new(move |tick| {
                    let cache = Arc::clone(&cache);
                    let entry = CachedSpot {
                        price: tick.ltp.inner(),
                        captured_at: tick.received_at,
                    };
                    tokio::spawn(async move {
                        cache.put(CacheDomain::Spot, symbol.code(), &entry).await;
                    });
                }),
            );
        }
        info!(symbols = self.config.symbols.len(), "index feed attached");
    }

    /// Spot price with capture time: cache, then feed, then REST.
    /// Fresh reads refill both cache tiers.
    pub async fn spot_price(&self, symbol: IndexSymbol) -> MarketResult<(Price, DateTime<Utc>)> {
        if let Some(cached) = self
            .cache
            .get::<CachedSpot>(CacheDomain::Spot, symbol.code())
            .await
        {
            return Ok((Price::new(cached.price), cached.captured_at));
        }

        if let Some((price, at)) = self.feed.last_price(symbol.index_key()) {
            if (Utc::now() - at).num_milliseconds() <= crate::snapshot::MAX_SPOT_AGE_MS {
                let entry = CachedSpot {
                    price: price.inner(),
                    captured_at: at,
                };
                self.cache.put(CacheDomain::Spot, symbol.code(), &entry).await;
                return Ok((price, at));
            }
        }

        let keys = vec![symbol.index_key().to_string()];
        let quotes = self.broker.ltp(&keys).await?;
        let price = quotes
            .get(symbol.index_key())
            .copied()
            .ok_or_else(|| MarketError::NoSpot(symbol.code().to_string()))?;
        let now = Utc::now();
        let entry = CachedSpot {
            price: price.inner(),
            captured_at: now,
        };
        self.cache.put(CacheDomain::Spot, symbol.code(), &entry).await;
        Ok((price, now))
    }

    /// Filtered option chain for the symbol's live expiry.
    ///
    /// Cache first; on a REST refresh the raw chain is converted, Greeks
    /// are backfilled where the broker left them empty, strikes are
    /// filtered, and the snapshot is handed to the persister at most once
    /// per minute per symbol.
    pub async fn option_chain(
        &self,
        symbol: IndexSymbol,
        spot: Price,
    ) -> MarketResult<OptionChain> {
        if let Some(chain) = self
            .cache
            .get::<OptionChain>(CacheDomain::Chain, symbol.code())
            .await
        {
            return Ok(chain);
        }

        let rule = session::ExpiryRule::for_symbol(symbol);
        let now = session::now_ist();
        let expiry = session::current_expiry(rule, now);
        let mut tried = vec![expiry];
        tried.extend(session::fallback_expiries(
            rule,
            expiry,
            self.config.fallback_expiry_count,
        ));

        for (i, candidate) in tried.iter().enumerate() {
            let raw = self
                .broker
                .option_chain(symbol.index_key(), *candidate)
                .await?;
            if raw.is_empty() {
                debug!(symbol = %symbol, expiry = %candidate, "empty chain, trying fallback expiry");
                continue;
            }
            if i > 0 {
                warn!(symbol = %symbol, expiry = %candidate, "using fallback expiry");
            }

            let mut chain = chain_from_raw(symbol, *candidate, spot, &raw, now);
            filter_strikes(&mut chain);
            self.cache
                .put(CacheDomain::Chain, symbol.code(), &chain)
                .await;
            self.persist_chain(symbol, &chain);
            return Ok(chain);
        }

        Err(MarketError::EmptyChain {
            symbol: symbol.code().to_string(),
            tried: tried.len(),
        })
    }

    /// Fire-and-forget snapshot persist, rate-limited per symbol.
    fn persist_chain(&self, symbol: IndexSymbol, chain: &OptionChain) {
        let due = self
            .last_chain_persist
            .get(&symbol)
            .map(|t| t.elapsed() >= self.config.chain_persist_interval)
            .unwrap_or(true);
        if !due {
            return;
        }
        self.last_chain_persist.insert(symbol, Instant::now());
        let store = Arc::clone(&self.store);
        let chain = chain.clone();
        tokio::spawn(async move {
            if let Err(e) = store.save_chain_snapshot(&chain) {
                warn!(error = %e, "chain snapshot persist failed");
            }
        });
    }

    /// Refresh candle windows for one symbol from the intraday REST API.
    /// Technicals-domain cache entries gate the call rate.
    pub async fn refresh_candles(&self, symbol: IndexSymbol) -> MarketResult<()> {
        for timeframe in Timeframe::ALL {
            let cache_key = format!("{}:{}", symbol.code(), timeframe);
            let fresh: Option<bool> = self.cache.get(CacheDomain::Technicals, &cache_key).await;
            if fresh.is_some() {
                continue;
            }

            let (unit, interval) = timeframe.api_params();
            let candles = self
                .broker
                .intraday_candles(symbol.index_key(), unit, interval)
                .await?;
            let mut bars: Vec<indra_core::Ohlc> =
                candles.iter().filter_map(candle_to_ohlc).collect();
            bars.sort_by_key(|b| b.ts);

            self.candles
                .entry((symbol, timeframe))
                .or_insert_with(|| CandleSeries::new(timeframe))
                .replace(bars);
            self.cache
                .put(CacheDomain::Technicals, &cache_key, &true)
                .await;
        }
        Ok(())
    }

    fn technicals(&self, symbol: IndexSymbol) -> HashMap<Timeframe, TechnicalSnapshot> {
        let mut out = HashMap::new();
        for timeframe in Timeframe::ALL {
            if let Some(series) = self.candles.get(&(symbol, timeframe)) {
                out.insert(timeframe, series.technicals());
            }
        }
        out
    }

    /// IV rank from the trailing stored history; records today's ATM IV
    /// once per day as a side effect.
    async fn iv_rank(&self, symbol: IndexSymbol, chain: &OptionChain) -> f64 {
        let Some(atm_iv) = chain.atm_iv() else {
            return 0.5;
        };
        let today = session::now_ist().date_naive();
        let due = self
            .last_iv_save
            .get(&symbol)
            .map(|d| *d != today)
            .unwrap_or(true);
        if due {
            self.last_iv_save.insert(symbol, today);
            if let Err(e) = self.store.save_iv_point(symbol.code(), today, atm_iv) {
                warn!(error = %e, "iv history save failed");
            }
        }
        match self.store.iv_window(symbol.code(), self.config.iv_rank_days) {
            Ok(history) => iv_rank_percentile(atm_iv, &history),
            Err(e) => {
                warn!(error = %e, "iv history read failed");
                0.5
            }
        }
    }

    /// Build the cross-symbol snapshot for this market tick.
    ///
    /// Never returns data older than the cache TTLs; a symbol whose
    /// refresh fails is simply absent, which marks the snapshot stale and
    /// keeps strategies out of that tick.
    pub async fn snapshot(&self) -> MarketSnapshot {
        let mut symbols = HashMap::new();

        for &symbol in &self.config.symbols {
            match self.build_symbol_snapshot(symbol).await {
                Ok(snap) => {
                    symbols.insert(symbol, snap);
                }
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "symbol snapshot unavailable");
                }
            }
        }

        apply_pcr_fallback(&mut symbols);
        MarketSnapshot::new(symbols)
    }

    async fn build_symbol_snapshot(&self, symbol: IndexSymbol) -> MarketResult<SymbolSnapshot> {
        let (spot, spot_at) = self.spot_price(symbol).await?;
        let chain = self.option_chain(symbol, spot).await?;
        if let Err(e) = self.refresh_candles(symbol).await {
            // Indicators degrade to the last window rather than failing the tick.
            debug!(symbol = %symbol, error = %e, "candle refresh failed");
        }
        let technicals = self.technicals(symbol);
        let vix_proxy = technicals
            .get(&Timeframe::M5)
            .map(|t| t.vix_proxy)
            .unwrap_or(0.0);
        let iv_rank = self.iv_rank(symbol, &chain).await;

        Ok(SymbolSnapshot {
            symbol,
            spot,
            spot_captured_at: spot_at,
            atm_strike: symbol.atm_strike(spot),
            expiry: chain.expiry,
            pcr_volume: pcr_by_volume(&chain),
            chain,
            technicals,
            vix_proxy,
            regime: regime_for_vix(vix_proxy),
            iv_rank,
            captured_at: Utc::now(),
        })
    }
}

/// Substitute a glitched symbol's PCR with a healthy peer's.
///
/// A chain with zero total call OI cannot produce a meaningful ratio;
/// the substitution is deliberate and logged at INFO.
pub fn apply_pcr_fallback(symbols: &mut HashMap<IndexSymbol, SymbolSnapshot>) {
    let healthy: Vec<(IndexSymbol, f64)> = symbols
        .values()
        .filter(|s| s.chain.total_call_oi > 0)
        .map(|s| (s.symbol, s.chain.pcr))
        .collect();
    let Some(&(donor, donor_pcr)) = healthy.first() else {
        return;
    };
    for snap in symbols.values_mut() {
        if snap.chain.total_call_oi == 0 {
            info!(
                symbol = %snap.symbol,
                donor = %donor,
                pcr = donor_pcr,
                "zero call OI, substituting peer PCR"
            );
            snap.chain.pcr = donor_pcr;
        }
    }
}

/// Convert a raw REST chain into the domain type, backfilling Greeks
/// where the broker quoted none.
pub fn chain_from_raw(
    symbol: IndexSymbol,
    expiry: NaiveDate,
    spot: Price,
    entries: &[RawChainEntry],
    now: DateTime<chrono_tz::Tz>,
) -> OptionChain {
    let mut chain = OptionChain::new(symbol, expiry, spot);
    let dte = session::days_to_expiry(expiry, now) as f64;

    for entry in entries {
        let strike = Price::new(entry.strike_price);
        let pair = StrikePair {
            call: entry
                .call_options
                .as_ref()
                .map(|dto| leg_from_dto(strike, indra_core::OptionRight::Call, dto, spot, dte)),
            put: entry
                .put_options
                .as_ref()
                .map(|dto| leg_from_dto(strike, indra_core::OptionRight::Put, dto, spot, dte)),
        };
        if pair.call.is_some() || pair.put.is_some() {
            chain.strikes.insert(strike, pair);
        }
    }

    chain.recompute_totals();
    chain.recompute_max_pain();
    chain
}

fn leg_from_dto(
    strike: Price,
    right: indra_core::OptionRight,
    dto: &indra_broker::OptionLegDto,
    spot: Price,
    dte: f64,
) -> OptionLeg {
    let md = &dto.market_data;
    let g = &dto.option_greeks;
    let quoted = Greeks {
        delta: g.delta,
        gamma: g.gamma,
        theta: g.theta,
        vega: g.vega,
    };
    let has_quoted = g.delta.abs() > f64::EPSILON
        || g.gamma.abs() > f64::EPSILON
        || g.vega.abs() > f64::EPSILON;
    let greeks = if has_quoted || g.iv <= 0.0 {
        quoted
    } else {
        black_scholes_greeks(
            spot.to_f64_lossy(),
            strike.to_f64_lossy(),
            dte,
            g.iv,
            right,
        )
    };

    let price = |v: f64| Price::new(Decimal::from_f64(v).unwrap_or(Decimal::ZERO));
    OptionLeg {
        strike,
        right,
        instrument_key: dto.instrument_key.clone(),
        last_price: price(md.ltp),
        bid: price(md.bid_price),
        ask: price(md.ask_price),
        oi: md.oi as i64,
        oi_change: (md.oi - md.prev_oi) as i64,
        volume: md.volume,
        iv: g.iv,
        greeks,
    }
}

fn candle_to_ohlc(candle: &Candle) -> Option<indra_core::Ohlc> {
    let ts = DateTime::parse_from_rfc3339(&candle.0)
        .ok()?
        .with_timezone(&Utc);
    let p = |v: f64| Price::new(Decimal::from_f64(v).unwrap_or(Decimal::ZERO));
    Some(indra_core::Ohlc {
        open: p(candle.1),
        high: p(candle.2),
        low: p(candle.3),
        close: p(candle.4),
        volume: candle.5,
        ts,
    })
}
