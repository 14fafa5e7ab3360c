// =============================================================================
// Shared types used across the options advisory pipeline
// =============================================================================
//
// Immutable records that flow forward through the stages:
//
//   Candidate -> AnalystFinding -> DebateVerdict -> TradeProposal -> RiskDecision
//
// Every record is created once by the stage that owns it and only read
// downstream.  A resized proposal is a new revision, never a mutation.
// =============================================================================

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Enumerations
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionRight {
    Call,
    Put,
}

impl std::fmt::Display for OptionRight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Call => write!(f, "CALL"),
            Self::Put => write!(f, "PUT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// +1 for long legs, -1 for short legs.
    pub fn sign(self) -> f64 {
        match self {
            Self::Buy => 1.0,
            Self::Sell => -1.0,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Net directional view of a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Bullish,
    Bearish,
    Neutral,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bullish => write!(f, "BULLISH"),
            Self::Bearish => write!(f, "BEARISH"),
            Self::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalystKind {
    Fundamental,
    Technical,
    Sentiment,
    News,
}

impl AnalystKind {
    pub const ALL: [AnalystKind; 4] = [
        AnalystKind::Fundamental,
        AnalystKind::Technical,
        AnalystKind::Sentiment,
        AnalystKind::News,
    ];
}

impl std::fmt::Display for AnalystKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fundamental => write!(f, "fundamental"),
            Self::Technical => write!(f, "technical"),
            Self::Sentiment => write!(f, "sentiment"),
            Self::News => write!(f, "news"),
        }
    }
}

/// Discretised band of forecast annualised volatility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolRegime {
    Low,
    Normal,
    Elevated,
    Extreme,
}

impl std::fmt::Display for VolRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Normal => write!(f, "NORMAL"),
            Self::Elevated => write!(f, "ELEVATED"),
            Self::Extreme => write!(f, "EXTREME"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyType {
    CoveredCall,
    CashSecuredPut,
    IronCondor,
    CalendarSpread,
    DebitCallSpread,
    DebitPutSpread,
    CreditPutSpread,
    CreditCallSpread,
    LongStraddle,
}

impl std::fmt::Display for StrategyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::CoveredCall => "COVERED_CALL",
            Self::CashSecuredPut => "CASH_SECURED_PUT",
            Self::IronCondor => "IRON_CONDOR",
            Self::CalendarSpread => "CALENDAR_SPREAD",
            Self::DebitCallSpread => "DEBIT_CALL_SPREAD",
            Self::DebitPutSpread => "DEBIT_PUT_SPREAD",
            Self::CreditPutSpread => "CREDIT_PUT_SPREAD",
            Self::CreditCallSpread => "CREDIT_CALL_SPREAD",
            Self::LongStraddle => "LONG_STRADDLE",
        };
        write!(f, "{s}")
    }
}

// =============================================================================
// Market observations
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

/// One implied-volatility observation on the listed surface.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SurfacePoint {
    pub strike: f64,
    pub expiration: NaiveDate,
    pub implied_vol: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowType {
    Sweep,
    UnusualVolume,
}

/// Order-flow classification attached to a symbol by the data boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderFlowTag {
    #[serde(rename = "type")]
    pub flow_type: FlowType,
    pub magnitude: f64,
    /// Lee-Ready style aggressor bias, when the provider classified it.
    #[serde(default = "neutral")]
    pub bias: Direction,
}

fn neutral() -> Direction {
    Direction::Neutral
}

/// Daily close/volume history, oldest first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceHistory {
    pub closes: Vec<f64>,
    #[serde(default)]
    pub highs: Vec<f64>,
    #[serde(default)]
    pub lows: Vec<f64>,
    #[serde(default)]
    pub volumes: Vec<f64>,
}

impl PriceHistory {
    /// Log returns of the close series.
    pub fn log_returns(&self) -> Vec<f64> {
        self.closes
            .windows(2)
            .filter(|w| w[0] > 0.0 && w[1] > 0.0)
            .map(|w| (w[1] / w[0]).ln())
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Fundamentals {
    pub pe_ratio: Option<f64>,
    pub pb_ratio: Option<f64>,
    pub debt_to_equity: Option<f64>,
    /// Trailing free cash flow, absolute.
    pub free_cash_flow: Option<f64>,
    pub shares_outstanding: Option<f64>,
    /// Expected annual growth as a fraction (0.12 = 12%).
    pub earnings_growth: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalystKind {
    Earnings,
    Macro,
    Dividend,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalyst {
    pub kind: CatalystKind,
    pub date: NaiveDate,
    /// Average absolute post-event move in past occurrences, as a fraction.
    #[serde(default)]
    pub historical_surprise: f64,
    /// Historical direction of surprises: +1 beats, -1 misses.
    #[serde(default)]
    pub surprise_bias: f64,
    #[serde(default)]
    pub description: String,
}

// =============================================================================
// Pipeline records
// =============================================================================

/// A symbol under consideration for one cycle.  Immutable once built.
#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    pub symbol: String,
    pub last_price: f64,
    pub timestamp: DateTime<Utc>,
    pub surface: Vec<SurfacePoint>,
    /// `None` when the feed for that observation was unavailable.
    pub order_flow: Option<Vec<OrderFlowTag>>,
    pub history: Option<PriceHistory>,
    pub fundamentals: Option<Fundamentals>,
    pub catalysts: Option<Vec<Catalyst>>,
}

impl Candidate {
    /// Implied vol of the surface point closest to the money with the
    /// shortest listed expiry.  Falls back to `None` on an empty surface.
    pub fn atm_implied_vol(&self) -> Option<f64> {
        let nearest = self.surface.iter().map(|p| p.expiration).min()?;
        self.surface
            .iter()
            .filter(|p| p.expiration == nearest)
            .min_by(|a, b| {
                (a.strike - self.last_price)
                    .abs()
                    .total_cmp(&(b.strike - self.last_price).abs())
            })
            .map(|p| p.implied_vol)
    }

    pub fn log_returns(&self) -> Vec<f64> {
        self.history.as_ref().map(PriceHistory::log_returns).unwrap_or_default()
    }
}

/// Output of one analyzer for one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalystFinding {
    pub kind: AnalystKind,
    /// Bearish -1.0 to bullish +1.0.
    pub score: f64,
    /// [0.0, 1.0].
    pub confidence: f64,
    pub rationale: String,
}

impl AnalystFinding {
    pub fn new(kind: AnalystKind, score: f64, confidence: f64, rationale: impl Into<String>) -> Self {
        Self {
            kind,
            score: score.clamp(-1.0, 1.0),
            confidence: confidence.clamp(0.0, 1.0),
            rationale: rationale.into(),
        }
    }

    /// Zero-confidence placeholder for an analyzer that abstained.
    pub fn abstain(kind: AnalystKind, reason: impl Into<String>) -> Self {
        Self::new(kind, 0.0, 0.0, reason)
    }
}

/// A finding together with the weight it carried in the debate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedFinding {
    pub finding: AnalystFinding,
    /// |score| x confidence.
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebateVerdict {
    pub direction: Direction,
    pub conviction: f64,
    pub bull_case: Vec<String>,
    pub bear_case: Vec<String>,
    pub contributions: Vec<WeightedFinding>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionLeg {
    pub right: OptionRight,
    pub strike: f64,
    pub expiration: NaiveDate,
    pub side: Side,
    /// Contracts per unit of the strategy (the proposal's `quantity`
    /// multiplies this).
    pub ratio: u32,
    pub implied_vol: f64,
}

/// Aggregate position Greeks in share-equivalent units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GreekExposure {
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
}

impl GreekExposure {
    pub fn scaled(self, k: f64) -> Self {
        Self {
            delta: self.delta * k,
            gamma: self.gamma * k,
            theta: self.theta * k,
            vega: self.vega * k,
        }
    }
}

impl std::ops::Add for GreekExposure {
    type Output = Self;

    fn add(self, o: Self) -> Self {
        Self {
            delta: self.delta + o.delta,
            gamma: self.gamma + o.gamma,
            theta: self.theta + o.theta,
            vega: self.vega + o.vega,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeProposal {
    pub id: String,
    /// Revision counter; a resize produces revision + 1.
    pub revision: u32,
    pub symbol: String,
    pub underlying_price: f64,
    pub strategy: StrategyType,
    pub legs: Vec<OptionLeg>,
    /// Number of strategy units (contracts per leg x leg ratio).
    pub quantity: u32,
    /// Net premium per unit in dollars (positive = debit paid).
    pub entry_price: f64,
    /// Worst-case loss per unit in dollars.
    pub max_loss_per_unit: f64,
    /// Capital committed per unit in dollars (margin / debit / collateral).
    pub notional_per_unit: f64,
    /// Greeks per unit (already multiplied by the contract multiplier).
    pub unit_greeks: GreekExposure,
    pub stop_loss: f64,
    pub target: f64,
    pub created_at: DateTime<Utc>,
}

impl TradeProposal {
    pub fn notional(&self) -> f64 {
        self.notional_per_unit * self.quantity as f64
    }

    /// New immutable revision at a different size.
    pub fn resized(&self, quantity: u32) -> Self {
        Self {
            revision: self.revision + 1,
            quantity,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskOutcome {
    Approved,
    Resized,
    Rejected,
}

impl std::fmt::Display for RiskOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Approved => write!(f, "APPROVED"),
            Self::Resized => write!(f, "RESIZED"),
            Self::Rejected => write!(f, "REJECTED"),
        }
    }
}

/// Which configured limit a proposal ran into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitKind {
    PositionSize,
    PortfolioDelta,
    PortfolioVega,
    StressDrawdown,
}

impl std::fmt::Display for LimitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PositionSize => write!(f, "max_position_pct"),
            Self::PortfolioDelta => write!(f, "max_delta_pct"),
            Self::PortfolioVega => write!(f, "max_vega_pct"),
            Self::StressDrawdown => write!(f, "max_drawdown_pct"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitViolation {
    pub limit: LimitKind,
    pub observed: f64,
    pub allowed: f64,
}

impl std::fmt::Display for LimitViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} exceeded: {:.4} (limit {:.4})",
            self.limit, self.observed, self.allowed
        )
    }
}

/// Portfolio-level exposure after a decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ExposureSnapshot {
    pub delta: f64,
    pub gamma: f64,
    pub vega: f64,
    /// Worst stress-scenario loss as a fraction of account value.
    pub max_drawdown_estimate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskDecision {
    pub outcome: RiskOutcome,
    pub triggered: Vec<LimitViolation>,
    /// The proposal revision that the decision applies to (absent on reject).
    pub proposal: Option<TradeProposal>,
    pub exposure: ExposureSnapshot,
    pub decided_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finding_clamps_score_and_confidence() {
        let f = AnalystFinding::new(AnalystKind::News, 3.0, -0.2, "x");
        assert_eq!(f.score, 1.0);
        assert_eq!(f.confidence, 0.0);
    }

    #[test]
    fn order_flow_tag_bias_defaults_to_neutral() {
        let tag: OrderFlowTag =
            serde_json::from_str(r#"{ "type": "sweep", "magnitude": 2.5 }"#).unwrap();
        assert_eq!(tag.flow_type, FlowType::Sweep);
        assert_eq!(tag.bias, Direction::Neutral);
    }

    #[test]
    fn log_returns_skip_non_positive_prices() {
        let h = PriceHistory {
            closes: vec![100.0, 110.0, 0.0, 50.0],
            ..Default::default()
        };
        let r = h.log_returns();
        assert_eq!(r.len(), 1);
        assert!((r[0] - (1.1f64).ln()).abs() < 1e-12);
    }

    #[test]
    fn greek_exposure_adds_and_scales() {
        let a = GreekExposure { delta: 1.0, gamma: 2.0, theta: -3.0, vega: 4.0 };
        let b = a.scaled(2.0) + a;
        assert_eq!(b.delta, 3.0);
        assert_eq!(b.theta, -9.0);
    }
}
