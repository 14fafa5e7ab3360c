// =============================================================================
// Market Data boundary
// =============================================================================
//
// The pipeline never talks to a venue directly.  Everything it knows about a
// symbol arrives through `MarketDataProvider`, and every call can fail with
// `MarketDataError::Unavailable`, which callers treat as a soft abstention.
//
// Implementations:
//   - `HttpMarketDataClient` — JSON over HTTP against the aggregator service.
//   - `SimulatedMarketData`  — deterministic in-memory feed for demos/tests.
// =============================================================================

pub mod client;
pub mod flow;
pub mod simulator;

pub use client::HttpMarketDataClient;
pub use simulator::SimulatedMarketData;

use async_trait::async_trait;

use crate::errors::MarketDataError;
use crate::types::{Catalyst, Fundamentals, OrderFlowTag, PriceHistory, Quote, SurfacePoint};

#[async_trait]
pub trait MarketDataProvider: Send + Sync + 'static {
    async fn get_quote(&self, symbol: &str) -> Result<Quote, MarketDataError>;

    async fn get_greeks_surface(&self, symbol: &str) -> Result<Vec<SurfacePoint>, MarketDataError>;

    async fn get_order_flow_tags(&self, symbol: &str) -> Result<Vec<OrderFlowTag>, MarketDataError>;

    /// Daily bars, oldest first.
    async fn get_price_history(&self, symbol: &str) -> Result<PriceHistory, MarketDataError>;

    async fn get_fundamentals(&self, symbol: &str) -> Result<Fundamentals, MarketDataError>;

    async fn get_catalysts(&self, symbol: &str) -> Result<Vec<Catalyst>, MarketDataError>;

    /// Cheap connectivity check used by the watchdog's data-feed probe.
    async fn ping(&self) -> Result<(), MarketDataError>;
}
