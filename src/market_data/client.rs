// =============================================================================
// HTTP Market Data Client — JSON aggregator endpoints
// =============================================================================
//
// Endpoints (all GET, relative to the configured base URL):
//
//   /v1/quote/{symbol}        -> Quote
//   /v1/surface/{symbol}      -> [SurfaceRow], normalised to [SurfacePoint]
//   /v1/flow/{symbol}         -> [OrderFlowTag]
//   /v1/history/{symbol}      -> PriceHistory
//   /v1/fundamentals/{symbol} -> Fundamentals
//   /v1/catalysts/{symbol}    -> [Catalyst]
//   /v1/health                -> any 2xx
//
// Every transport, status or decode failure maps to `Unavailable`.
//
// Surface rows quoted only as a mid price are converted to implied vol
// against the row's underlying price; rows that cannot be solved are dropped.
// =============================================================================

use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::errors::MarketDataError;
use crate::market_data::MarketDataProvider;
use crate::pricing::{implied_volatility, OptionInputs};
use crate::types::{Catalyst, Fundamentals, OptionRight, OrderFlowTag, PriceHistory, Quote, SurfacePoint};

#[derive(Clone)]
pub struct HttpMarketDataClient {
    base_url: String,
    client: reqwest::Client,
    /// Used when solving implied vol from quoted option prices.
    risk_free_rate: f64,
}

#[derive(Debug, Clone, Deserialize)]
struct SurfaceRow {
    strike: f64,
    expiration: NaiveDate,
    #[serde(default)]
    implied_vol: Option<f64>,
    #[serde(default)]
    mid: Option<f64>,
    #[serde(default)]
    underlying: Option<f64>,
    #[serde(default)]
    right: Option<OptionRight>,
}

fn normalize_surface(rows: Vec<SurfaceRow>, today: NaiveDate, risk_free_rate: f64) -> Vec<SurfacePoint> {
    rows.into_iter()
        .filter_map(|row| {
            let implied_vol = match (row.implied_vol, row.mid, row.underlying) {
                (Some(iv), _, _) if iv.is_finite() && iv > 0.0 => iv,
                (_, Some(mid), Some(spot)) => {
                    let t = (row.expiration - today).num_days() as f64 / 365.0;
                    let right = row.right.unwrap_or(OptionRight::Call);
                    let inputs = OptionInputs::new(spot, row.strike, t, risk_free_rate, 0.3, right);
                    match implied_volatility(mid, &inputs) {
                        Ok(iv) => iv,
                        Err(e) => {
                            debug!(strike = row.strike, expiration = %row.expiration, error = %e, "dropping unsolvable surface row");
                            return None;
                        }
                    }
                }
                _ => return None,
            };
            Some(SurfacePoint {
                strike: row.strike,
                expiration: row.expiration,
                implied_vol,
            })
        })
        .collect()
}

impl HttpMarketDataClient {
    /// Build a client with a per-request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build reqwest client: {e}"))?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        debug!(base_url = %base_url, "HttpMarketDataClient initialised");
        Ok(Self {
            base_url,
            client,
            risk_free_rate: 0.0,
        })
    }

    pub fn with_risk_free_rate(mut self, rate: f64) -> Self {
        self.risk_free_rate = rate;
        self
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, symbol: &str) -> Result<T, MarketDataError> {
        let url = format!("{}{}", self.base_url, path);
        let unavailable = |reason: String| MarketDataError::Unavailable {
            symbol: symbol.to_string(),
            reason,
        };

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| unavailable(format!("GET {path} failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(unavailable(format!("GET {path} returned {status}")));
        }

        resp.json::<T>()
            .await
            .map_err(|e| unavailable(format!("GET {path} decode failed: {e}")))
    }
}

#[async_trait]
impl MarketDataProvider for HttpMarketDataClient {
    #[instrument(skip(self), name = "market_data::get_quote")]
    async fn get_quote(&self, symbol: &str) -> Result<Quote, MarketDataError> {
        self.get_json(&format!("/v1/quote/{symbol}"), symbol).await
    }

    #[instrument(skip(self), name = "market_data::get_greeks_surface")]
    async fn get_greeks_surface(&self, symbol: &str) -> Result<Vec<SurfacePoint>, MarketDataError> {
        let rows: Vec<SurfaceRow> = self.get_json(&format!("/v1/surface/{symbol}"), symbol).await?;
        Ok(normalize_surface(rows, Utc::now().date_naive(), self.risk_free_rate))
    }

    #[instrument(skip(self), name = "market_data::get_order_flow_tags")]
    async fn get_order_flow_tags(&self, symbol: &str) -> Result<Vec<OrderFlowTag>, MarketDataError> {
        self.get_json(&format!("/v1/flow/{symbol}"), symbol).await
    }

    #[instrument(skip(self), name = "market_data::get_price_history")]
    async fn get_price_history(&self, symbol: &str) -> Result<PriceHistory, MarketDataError> {
        self.get_json(&format!("/v1/history/{symbol}"), symbol).await
    }

    async fn get_fundamentals(&self, symbol: &str) -> Result<Fundamentals, MarketDataError> {
        self.get_json(&format!("/v1/fundamentals/{symbol}"), symbol).await
    }

    async fn get_catalysts(&self, symbol: &str) -> Result<Vec<Catalyst>, MarketDataError> {
        self.get_json(&format!("/v1/catalysts/{symbol}"), symbol).await
    }

    async fn ping(&self) -> Result<(), MarketDataError> {
        self.get_json::<serde_json::Value>("/v1/health", "*").await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let c = HttpMarketDataClient::new("http://localhost:9000/", Duration::from_secs(1)).unwrap();
        assert_eq!(c.base_url, "http://localhost:9000");
    }

    #[tokio::test]
    async fn unreachable_host_maps_to_unavailable() {
        // Port 9 (discard) on loopback is closed in test environments.
        let c = HttpMarketDataClient::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        match c.get_quote("AAPL").await {
            Err(MarketDataError::Unavailable { symbol, .. }) => assert_eq!(symbol, "AAPL"),
            other => panic!("expected Unavailable, got {other:?}"),
        }
    }

    fn row(strike: f64, implied_vol: Option<f64>, mid: Option<f64>) -> SurfaceRow {
        SurfaceRow {
            strike,
            expiration: NaiveDate::from_ymd_opt(2025, 3, 21).unwrap(),
            implied_vol,
            mid,
            underlying: mid.map(|_| 100.0),
            right: Some(OptionRight::Put),
        }
    }

    #[test]
    fn priced_rows_are_solved_to_implied_vol() {
        let today = NaiveDate::from_ymd_opt(2025, 1, 20).unwrap();
        let t = (NaiveDate::from_ymd_opt(2025, 3, 21).unwrap() - today).num_days() as f64 / 365.0;
        let quoted = OptionInputs::new(100.0, 95.0, t, 0.04, 0.27, OptionRight::Put);
        let mid = crate::pricing::price(&quoted).unwrap().price;

        let rows = vec![row(95.0, None, Some(mid)), row(100.0, Some(0.22), None), row(105.0, None, None)];
        let surface = normalize_surface(rows, today, 0.04);

        assert_eq!(surface.len(), 2);
        assert!((surface[0].implied_vol - 0.27).abs() < 1e-6, "{}", surface[0].implied_vol);
        assert_eq!(surface[1].implied_vol, 0.22);
    }

    #[test]
    fn price_outside_no_arbitrage_bounds_is_dropped() {
        let today = NaiveDate::from_ymd_opt(2025, 1, 20).unwrap();
        // A put worth more than its strike has no implied vol.
        let surface = normalize_surface(vec![row(95.0, None, Some(500.0))], today, 0.04);
        assert!(surface.is_empty());
    }
}
