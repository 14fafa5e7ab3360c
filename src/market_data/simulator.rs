// =============================================================================
// Simulated Market Data — deterministic per-symbol fixture feed
// =============================================================================
//
// Every symbol gets a reproducible data set derived from a hash of its name:
// 120 daily bars, a 5-expiry x 9-strike IV surface with put skew, a tape of
// option prints (sometimes containing a sweep), fundamentals and upcoming
// catalysts.  Tests can replace a symbol's data, inject latency or take
// individual endpoints (or the whole feed) offline.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use parking_lot::RwLock;

use crate::errors::MarketDataError;
use crate::market_data::flow::{self, TradePrint};
use crate::market_data::MarketDataProvider;
use crate::types::{
    Catalyst, CatalystKind, Direction, Fundamentals, OrderFlowTag, PriceHistory, Quote, SurfacePoint,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Quote,
    Surface,
    Flow,
    History,
    Fundamentals,
    Catalysts,
}

/// Complete simulated data set for one symbol.
#[derive(Debug, Clone)]
pub struct SymbolData {
    pub price: f64,
    pub surface: Vec<SurfacePoint>,
    pub prints: Vec<TradePrint>,
    pub history: PriceHistory,
    pub fundamentals: Fundamentals,
    pub catalysts: Vec<Catalyst>,
}

struct Rng(u64);

impl Rng {
    fn new(seed: u64) -> Self {
        Self(seed | 1)
    }

    fn next_u64(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }

    fn uniform(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    fn normal(&mut self) -> f64 {
        (0..12).map(|_| self.uniform()).sum::<f64>() - 6.0
    }

    fn range(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.uniform()
    }
}

fn fnv1a(s: &str) -> u64 {
    s.bytes()
        .fold(0xcbf2_9ce4_8422_2325, |h, b| (h ^ b as u64).wrapping_mul(0x100_0000_01b3))
}

impl SymbolData {
    /// Reproducible data for `symbol` as of `today`.
    pub fn generate(symbol: &str, today: NaiveDate) -> Self {
        let mut rng = Rng::new(fnv1a(symbol));

        let daily_vol = rng.range(0.008, 0.03);
        let drift = rng.range(-0.002, 0.002);
        let mut price = rng.range(40.0, 450.0);

        let mut history = PriceHistory::default();
        for _ in 0..120 {
            price *= (drift + daily_vol * rng.normal()).exp();
            history.closes.push(price);
            history.highs.push(price * (1.0 + 0.5 * daily_vol * rng.uniform()));
            history.lows.push(price * (1.0 - 0.5 * daily_vol * rng.uniform()));
            history.volumes.push(1_000_000.0 * rng.range(0.8, 1.2));
        }
        if rng.uniform() < 0.3 {
            if let Some(v) = history.volumes.last_mut() {
                *v *= 3.0;
            }
        }

        let annual_vol = daily_vol * 252f64.sqrt();
        let step = if price < 100.0 { 1.0 } else { 5.0 };
        let mut surface = Vec::new();
        for days in [14i64, 35, 63, 98, 182] {
            let expiration = today + chrono::Duration::days(days);
            let t = days as f64 / 365.0;
            for i in 0..9 {
                let m = 0.8 + 0.05 * i as f64;
                let strike = ((price * m) / step).round() * step;
                let k = (strike / price).ln();
                let iv = (annual_vol * (1.0 + 0.05 * t) - 0.25 * k + 0.4 * k * k).max(0.05);
                surface.push(SurfacePoint { strike, expiration, implied_vol: iv });
            }
        }

        let venues = ["CBOE", "ISE", "PHLX", "MIAX"];
        let mut prints = Vec::new();
        let mut ts = 0i64;
        let sweep_at = if rng.uniform() < 0.4 { Some(4usize) } else { None };
        let buy_side = drift > 0.0;
        for i in 0..12 {
            let bid = 2.00;
            let ask = 2.10;
            let in_sweep = sweep_at.map_or(false, |s| (s..s + 3).contains(&i));
            ts += if in_sweep { 120 } else { 4_000 };
            let aggressive = if buy_side { ask } else { bid };
            prints.push(TradePrint {
                price: if in_sweep { aggressive } else { rng.range(bid, ask) },
                contracts: if in_sweep { rng.range(200.0, 600.0) } else { rng.range(1.0, 50.0) },
                timestamp_ms: ts,
                exchange: venues[(rng.next_u64() % venues.len() as u64) as usize].to_string(),
                bid,
                ask,
            });
            if in_sweep {
                if let Some(p) = prints.last_mut() {
                    p.exchange = venues[i % venues.len()].to_string();
                }
            }
        }

        let shares = 1.0e9;
        let fundamentals = Fundamentals {
            pe_ratio: Some(rng.range(8.0, 45.0)),
            pb_ratio: Some(rng.range(0.8, 8.0)),
            debt_to_equity: Some(rng.range(0.05, 1.8)),
            free_cash_flow: Some(price * shares * rng.range(0.01, 0.08)),
            shares_outstanding: Some(shares),
            earnings_growth: Some(rng.range(-0.05, 0.25)),
        };

        let catalysts = vec![
            Catalyst {
                kind: CatalystKind::Earnings,
                date: today + chrono::Duration::days(rng.range(3.0, 60.0) as i64),
                historical_surprise: rng.range(0.02, 0.09),
                surprise_bias: rng.range(-1.0, 1.0),
                description: format!("{symbol} quarterly earnings"),
            },
            Catalyst {
                kind: CatalystKind::Macro,
                date: today + chrono::Duration::days(rng.range(5.0, 40.0) as i64),
                historical_surprise: 0.012,
                surprise_bias: 0.0,
                description: "FOMC rate decision".to_string(),
            },
        ];

        Self {
            price,
            surface,
            prints,
            history,
            fundamentals,
            catalysts,
        }
    }
}

pub struct SimulatedMarketData {
    today: NaiveDate,
    data: RwLock<HashMap<String, SymbolData>>,
    failing: RwLock<HashSet<(String, Endpoint)>>,
    unavailable: RwLock<HashSet<String>>,
    latency_ms: AtomicU64,
    feed_down: AtomicBool,
}

impl SimulatedMarketData {
    pub fn new() -> Self {
        Self::with_date(Utc::now().date_naive())
    }

    pub fn with_date(today: NaiveDate) -> Self {
        Self {
            today,
            data: RwLock::new(HashMap::new()),
            failing: RwLock::new(HashSet::new()),
            unavailable: RwLock::new(HashSet::new()),
            latency_ms: AtomicU64::new(0),
            feed_down: AtomicBool::new(false),
        }
    }

    /// Replace the generated data for `symbol`.
    pub fn insert(&self, symbol: &str, data: SymbolData) {
        self.data.write().insert(symbol.to_string(), data);
    }

    /// Data currently served for `symbol` (generated on first use).
    pub fn symbol_data(&self, symbol: &str) -> SymbolData {
        if let Some(d) = self.data.read().get(symbol) {
            return d.clone();
        }
        let generated = SymbolData::generate(symbol, self.today);
        self.data
            .write()
            .entry(symbol.to_string())
            .or_insert(generated)
            .clone()
    }

    /// Take every endpoint offline for `symbol`.
    pub fn set_unavailable(&self, symbol: &str, down: bool) {
        let mut set = self.unavailable.write();
        if down {
            set.insert(symbol.to_string());
        } else {
            set.remove(symbol);
        }
    }

    pub fn fail_endpoint(&self, symbol: &str, endpoint: Endpoint) {
        self.failing.write().insert((symbol.to_string(), endpoint));
    }

    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms.store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn set_feed_down(&self, down: bool) {
        self.feed_down.store(down, Ordering::Relaxed);
    }

    async fn serve(&self, symbol: &str, endpoint: Endpoint) -> Result<SymbolData, MarketDataError> {
        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        let down = self.feed_down.load(Ordering::Relaxed)
            || self.unavailable.read().contains(symbol)
            || self.failing.read().contains(&(symbol.to_string(), endpoint));
        if down {
            return Err(MarketDataError::Unavailable {
                symbol: symbol.to_string(),
                reason: format!("simulated outage on {endpoint:?}"),
            });
        }
        Ok(self.symbol_data(symbol))
    }
}

impl Default for SimulatedMarketData {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketDataProvider for SimulatedMarketData {
    async fn get_quote(&self, symbol: &str) -> Result<Quote, MarketDataError> {
        let d = self.serve(symbol, Endpoint::Quote).await?;
        Ok(Quote {
            price: d.price,
            timestamp: Utc::now(),
        })
    }

    async fn get_greeks_surface(&self, symbol: &str) -> Result<Vec<SurfacePoint>, MarketDataError> {
        Ok(self.serve(symbol, Endpoint::Surface).await?.surface)
    }

    async fn get_order_flow_tags(&self, symbol: &str) -> Result<Vec<OrderFlowTag>, MarketDataError> {
        let d = self.serve(symbol, Endpoint::Flow).await?;
        let mut tags = flow::detect_sweeps(&d.prints);

        let closes = &d.history.closes;
        let bias = match closes.len() {
            n if n >= 2 && closes[n - 1] > closes[n - 2] => Direction::Bullish,
            n if n >= 2 && closes[n - 1] < closes[n - 2] => Direction::Bearish,
            _ => Direction::Neutral,
        };
        tags.extend(flow::unusual_volume(&d.history.volumes, bias));
        Ok(tags)
    }

    async fn get_price_history(&self, symbol: &str) -> Result<PriceHistory, MarketDataError> {
        Ok(self.serve(symbol, Endpoint::History).await?.history)
    }

    async fn get_fundamentals(&self, symbol: &str) -> Result<Fundamentals, MarketDataError> {
        Ok(self.serve(symbol, Endpoint::Fundamentals).await?.fundamentals)
    }

    async fn get_catalysts(&self, symbol: &str) -> Result<Vec<Catalyst>, MarketDataError> {
        Ok(self.serve(symbol, Endpoint::Catalysts).await?.catalysts)
    }

    async fn ping(&self) -> Result<(), MarketDataError> {
        if self.feed_down.load(Ordering::Relaxed) {
            return Err(MarketDataError::Unavailable {
                symbol: "*".to_string(),
                reason: "simulated feed outage".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
    }

    #[test]
    fn generation_is_reproducible() {
        let a = SymbolData::generate("NVDA", day());
        let b = SymbolData::generate("NVDA", day());
        assert_eq!(a.price, b.price);
        assert_eq!(a.history.closes, b.history.closes);
        assert_eq!(a.surface, b.surface);
        let c = SymbolData::generate("AAPL", day());
        assert_ne!(a.price, c.price);
    }

    #[test]
    fn generated_surface_has_put_skew() {
        let d = SymbolData::generate("SPY", day());
        assert_eq!(d.surface.len(), 45);
        let front = d.surface[0].expiration;
        let wing: Vec<_> = d.surface.iter().filter(|p| p.expiration == front).collect();
        assert!(wing.first().unwrap().implied_vol > wing.last().unwrap().implied_vol);
        assert_eq!(d.history.closes.len(), 120);
    }

    #[tokio::test]
    async fn outage_maps_to_unavailable() {
        let sim = SimulatedMarketData::with_date(day());
        assert!(sim.get_quote("MSFT").await.is_ok());
        sim.fail_endpoint("MSFT", Endpoint::Surface);
        assert!(sim.get_quote("MSFT").await.is_ok());
        assert!(matches!(
            sim.get_greeks_surface("MSFT").await,
            Err(MarketDataError::Unavailable { .. })
        ));
        sim.set_unavailable("MSFT", true);
        assert!(sim.get_quote("MSFT").await.is_err());
        sim.set_unavailable("MSFT", false);
        assert!(sim.get_quote("MSFT").await.is_ok());
    }

    #[tokio::test]
    async fn feed_down_fails_ping() {
        let sim = SimulatedMarketData::with_date(day());
        assert!(sim.ping().await.is_ok());
        sim.set_feed_down(true);
        assert!(sim.ping().await.is_err());
        assert!(sim.get_catalysts("QQQ").await.is_err());
    }
}
