// =============================================================================
// Error taxonomy
// =============================================================================
//
// Every variant here is soft: it is contained to one candidate (or one
// watchdog component) and turned into an abstention, a skipped signal or a
// restart.  Limit violations are not errors; the risk stage reports them as
// part of its decision.
// =============================================================================

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PricingError {
    #[error("insufficient data: need at least {required} observations, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    #[error("fit did not converge after {iterations} iterations (residual {residual:.3e})")]
    FitDidNotConverge { iterations: usize, residual: f64 },

    #[error("invalid pricing input: {0}")]
    InvalidInput(String),

    #[error("calibration cancelled")]
    Cancelled,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MarketDataError {
    #[error("market data unavailable for {symbol}: {reason}")]
    Unavailable { symbol: String, reason: String },
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AnalystError {
    #[error("data unavailable: {0}")]
    DataUnavailable(String),

    #[error("computation error: {0}")]
    ComputationError(String),
}

impl From<MarketDataError> for AnalystError {
    fn from(e: MarketDataError) -> Self {
        AnalystError::DataUnavailable(e.to_string())
    }
}

impl From<PricingError> for AnalystError {
    fn from(e: PricingError) -> Self {
        match e {
            PricingError::InsufficientData { .. } => AnalystError::DataUnavailable(e.to_string()),
            _ => AnalystError::ComputationError(e.to_string()),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TraderError {
    #[error("proposal too small: sized to {contracts} contracts ({reason})")]
    ProposalTooSmall { contracts: u32, reason: String },

    #[error("no strategy for {0}")]
    NoStrategy(String),

    #[error("cannot build legs: {0}")]
    LegConstruction(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum WatchdogError {
    #[error("component {component} failed: {reason}")]
    ComponentFailed { component: String, reason: String },
}
