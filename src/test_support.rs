// Shared fixtures for unit tests.

use chrono::{NaiveDate, Utc};

use crate::analyst::AnalysisContext;
use crate::types::{
    AnalystFinding, AnalystKind, Candidate, Fundamentals, PriceHistory, SurfacePoint,
};

pub fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
}

pub fn context() -> AnalysisContext {
    AnalysisContext {
        today: today(),
        risk_free_rate: 0.04,
        lookback_bars: 60,
    }
}

/// `n` daily bars ending at `end_price`, drifting by `drift` per day with a
/// deterministic wiggle of roughly 1%.
pub fn history(n: usize, end_price: f64, drift: f64) -> PriceHistory {
    let rets: Vec<f64> = (0..n).map(|i| drift + 0.01 * ((i as f64) * 1.7).sin()).collect();
    let mut closes = vec![end_price; n];
    for i in (0..n.saturating_sub(1)).rev() {
        closes[i] = closes[i + 1] / rets[i + 1].exp();
    }
    PriceHistory {
        highs: closes.iter().map(|c| c * 1.005).collect(),
        lows: closes.iter().map(|c| c * 0.995).collect(),
        volumes: vec![1_000_000.0; n],
        closes,
    }
}

pub fn surface(spot: f64, atm_iv: f64) -> Vec<SurfacePoint> {
    let mut out = Vec::new();
    for days in [14i64, 35, 63, 98] {
        let expiration = today() + chrono::Duration::days(days);
        for i in 0..9 {
            let strike = (spot * (0.8 + 0.05 * i as f64)).round();
            let k = (strike / spot).ln();
            out.push(SurfacePoint {
                strike,
                expiration,
                implied_vol: atm_iv - 0.2 * k + 0.3 * k * k,
            });
        }
    }
    out
}

pub fn candidate(symbol: &str, price: f64) -> Candidate {
    Candidate {
        symbol: symbol.to_string(),
        last_price: price,
        timestamp: Utc::now(),
        surface: surface(price, 0.25),
        order_flow: Some(Vec::new()),
        history: Some(history(120, price, 0.0)),
        fundamentals: Some(Fundamentals::default()),
        catalysts: Some(Vec::new()),
    }
}

pub fn finding(kind: AnalystKind, score: f64, confidence: f64) -> AnalystFinding {
    AnalystFinding::new(kind, score, confidence, format!("{kind} {score:+.2}"))
}

/// Deterministic xorshift64 generator for randomized property tests.
pub struct XorShift(u64);

impl XorShift {
    pub fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    pub fn next_u64(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }

    /// Uniform in [0, 1).
    pub fn unit(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    pub fn range(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.unit()
    }

    pub fn below(&mut self, n: u64) -> u64 {
        self.next_u64() % n.max(1)
    }
}
