// =============================================================================
// Trader Stage — strategy selection and fractional-risk sizing
// =============================================================================
//
// Pipeline per candidate:
//   1. Conviction tier from the verdict (low < 0.33 <= medium < 0.66 <= high)
//   2. Strategy from the (direction, vol regime, tier) table
//   3. Legs snapped to the listed surface, valued with BSM
//   4. Size = floor(risk budget * conviction / max loss per unit),
//      capped at floor(max position % of account / notional per unit)
//   5. Zero units is ProposalTooSmall, never a silent zero-size proposal
//
// Stop loss is half the unit max loss; the target is per template.
// =============================================================================

pub mod legs;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::TraderError;
use crate::pricing::VolContext;
use crate::runtime_config::TraderParams;
use crate::types::{Candidate, DebateVerdict, Direction, StrategyType, TradeProposal, VolRegime};
use legs::{build_legs, value_legs, LegPlan};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvictionTier {
    Low,
    Medium,
    High,
}

impl ConvictionTier {
    pub fn from_conviction(c: f64) -> Self {
        if c >= 0.66 {
            Self::High
        } else if c >= 0.33 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// Strategy lookup keyed by (direction, volatility regime, conviction tier).
pub fn select_strategy(direction: Direction, regime: VolRegime, tier: ConvictionTier) -> StrategyType {
    use ConvictionTier::*;
    use StrategyType::*;
    use VolRegime::*;

    match (direction, regime, tier) {
        // Debate only returns Neutral on a tie, always at conviction 0, which
        // sizes to zero units; these rows keep the table total.
        (Direction::Neutral, VolRegime::Low, _) => CalendarSpread,
        (Direction::Neutral, _, _) => IronCondor,

        (Direction::Bullish, VolRegime::Low, ConvictionTier::Low) => LongStraddle,
        (Direction::Bullish, VolRegime::Low, _) => DebitCallSpread,
        (Direction::Bullish, Normal, ConvictionTier::Low) => CoveredCall,
        (Direction::Bullish, Normal, Medium) => CreditPutSpread,
        (Direction::Bullish, Normal, High) => DebitCallSpread,
        (Direction::Bullish, Elevated, High) => DebitCallSpread,
        (Direction::Bullish, Elevated, _) => CreditPutSpread,
        (Direction::Bullish, Extreme, ConvictionTier::Low) => CashSecuredPut,
        (Direction::Bullish, Extreme, _) => CreditPutSpread,

        (Direction::Bearish, VolRegime::Low, ConvictionTier::Low) => LongStraddle,
        (Direction::Bearish, VolRegime::Low, _) => DebitPutSpread,
        (Direction::Bearish, Normal | Elevated, High) => DebitPutSpread,
        (Direction::Bearish, Normal | Elevated, _) => CreditCallSpread,
        (Direction::Bearish, Extreme, _) => CreditCallSpread,
    }
}

/// Whole units affordable under the risk budget and the position cap.
pub fn size_units(
    risk_budget: f64,
    conviction: f64,
    max_loss_per_unit: f64,
    position_cap: f64,
    notional_per_unit: f64,
) -> Result<u32, TraderError> {
    if !(max_loss_per_unit > 0.0 && notional_per_unit > 0.0) {
        return Err(TraderError::ProposalTooSmall {
            contracts: 0,
            reason: "non-positive unit risk".into(),
        });
    }
    let by_risk = (risk_budget * conviction.clamp(0.0, 1.0) / max_loss_per_unit).floor();
    let by_cap = (position_cap / notional_per_unit).floor();
    let units = by_risk.min(by_cap).max(0.0);

    if units < 1.0 {
        let reason = if by_cap < 1.0 {
            format!("one unit of {notional_per_unit:.0} exceeds position cap {position_cap:.0}")
        } else {
            format!(
                "risk budget {:.0} x conviction {conviction:.2} below unit max loss {max_loss_per_unit:.0}",
                risk_budget
            )
        };
        return Err(TraderError::ProposalTooSmall { contracts: 0, reason });
    }
    Ok(units.min(f64::from(u32::MAX)) as u32)
}

pub struct TraderStage {
    params: TraderParams,
    max_position_pct: f64,
    risk_free_rate: f64,
}

impl TraderStage {
    pub fn new(params: TraderParams, max_position_pct: f64, risk_free_rate: f64) -> Self {
        Self { params, max_position_pct, risk_free_rate }
    }

    pub fn params(&self) -> &TraderParams {
        &self.params
    }

    /// Build one immutable proposal for the candidate.
    pub fn propose(
        &self,
        candidate: &Candidate,
        verdict: &DebateVerdict,
        vol: Option<&VolContext>,
        today: NaiveDate,
    ) -> Result<TradeProposal, TraderError> {
        let vol = vol.ok_or_else(|| TraderError::NoStrategy(format!("{}: no volatility estimate", candidate.symbol)))?;

        let tier = ConvictionTier::from_conviction(verdict.conviction);
        let strategy = select_strategy(verdict.direction, vol.regime, tier);
        debug!(
            symbol = %candidate.symbol,
            direction = %verdict.direction,
            regime = %vol.regime,
            vrp = ?vol.variance_risk_premium(),
            ?tier,
            %strategy,
            "strategy selected"
        );

        let plan = LegPlan {
            spot: candidate.last_price,
            forecast_vol: vol.forecast_vol,
            surface: &candidate.surface,
            today,
            short_dte: self.params.short_dte,
            long_dte: self.params.long_dte,
        };
        let legs = build_legs(strategy, &plan)?;
        let unit = value_legs(
            strategy,
            &legs,
            candidate.last_price,
            today,
            self.risk_free_rate,
            self.params.contract_multiplier,
        )?;

        let quantity = size_units(
            self.params.risk_budget(),
            verdict.conviction,
            unit.max_loss,
            self.max_position_pct * self.params.account_value,
            unit.notional,
        )?;

        info!(
            symbol = %candidate.symbol,
            %strategy,
            quantity,
            max_loss = unit.max_loss * quantity as f64,
            "trade proposed"
        );

        Ok(TradeProposal {
            id: uuid::Uuid::new_v4().to_string(),
            revision: 0,
            symbol: candidate.symbol.clone(),
            underlying_price: candidate.last_price,
            strategy,
            legs,
            quantity,
            entry_price: unit.entry_price,
            max_loss_per_unit: unit.max_loss,
            notional_per_unit: unit.notional,
            unit_greeks: unit.greeks,
            stop_loss: 0.5 * unit.max_loss,
            target: unit.target,
            created_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use crate::types::OptionRight;
    use tokio_util::sync::CancellationToken;

    fn verdict(direction: Direction, conviction: f64) -> DebateVerdict {
        DebateVerdict {
            direction,
            conviction,
            bull_case: Vec::new(),
            bear_case: Vec::new(),
            contributions: Vec::new(),
        }
    }

    fn stage() -> TraderStage {
        TraderStage::new(TraderParams::default(), 0.20, 0.04)
    }

    #[test]
    fn lookup_table_examples() {
        assert_eq!(
            select_strategy(Direction::Bullish, VolRegime::Elevated, ConvictionTier::High),
            StrategyType::DebitCallSpread
        );
        assert_eq!(
            select_strategy(Direction::Neutral, VolRegime::Low, ConvictionTier::Low),
            StrategyType::CalendarSpread
        );
        assert_eq!(
            select_strategy(Direction::Neutral, VolRegime::Extreme, ConvictionTier::Medium),
            StrategyType::IronCondor
        );
        assert_eq!(
            select_strategy(Direction::Bearish, VolRegime::Extreme, ConvictionTier::High),
            StrategyType::CreditCallSpread
        );
    }

    #[test]
    fn tiers_split_at_thirds() {
        assert_eq!(ConvictionTier::from_conviction(0.0), ConvictionTier::Low);
        assert_eq!(ConvictionTier::from_conviction(0.33), ConvictionTier::Medium);
        assert_eq!(ConvictionTier::from_conviction(0.66), ConvictionTier::High);
        assert_eq!(ConvictionTier::from_conviction(1.0), ConvictionTier::High);
    }

    #[test]
    fn sizing_floors_and_caps() {
        // 2000 * 0.8 / 300 = 5.33 -> 5
        assert_eq!(size_units(2000.0, 0.8, 300.0, 20_000.0, 300.0).unwrap(), 5);
        // cap: 20000 / 8000 = 2.5 -> 2
        assert_eq!(size_units(2000.0, 1.0, 100.0, 20_000.0, 8_000.0).unwrap(), 2);
    }

    #[test]
    fn zero_units_is_too_small_not_zero() {
        assert!(matches!(
            size_units(2000.0, 0.1, 500.0, 20_000.0, 500.0),
            Err(TraderError::ProposalTooSmall { contracts: 0, .. })
        ));
        assert!(matches!(
            size_units(2000.0, 1.0, 100.0, 20_000.0, 25_000.0),
            Err(TraderError::ProposalTooSmall { .. })
        ));
        assert!(size_units(2000.0, 0.0, 100.0, 20_000.0, 100.0).is_err());
    }

    #[test]
    fn proposes_sized_strategy_for_candidate() {
        let c = test_support::candidate("AAA", 100.0);
        let today = test_support::today();
        let vol = VolContext::build(&c, today, &[0.15, 0.25, 0.40], &CancellationToken::new()).unwrap();
        let v = verdict(Direction::Bullish, 0.9);

        let p = stage().propose(&c, &v, Some(&vol), today).unwrap();
        assert_eq!(p.strategy, select_strategy(Direction::Bullish, vol.regime, ConvictionTier::High));
        assert!(p.quantity >= 1);
        assert!(p.max_loss_per_unit * p.quantity as f64 <= 2000.0 * 0.9 + 1e-9);
        assert!(p.notional() <= 0.20 * 100_000.0 + 1e-9);
        assert_eq!(p.stop_loss, 0.5 * p.max_loss_per_unit);
        assert_eq!(p.revision, 0);
    }

    #[test]
    fn bearish_debit_spread_uses_puts() {
        let c = test_support::candidate("BBB", 100.0);
        let today = test_support::today();
        let mut vol = VolContext::build(&c, today, &[0.15, 0.25, 0.40], &CancellationToken::new()).unwrap();
        vol.regime = VolRegime::Low;
        let p = stage().propose(&c, &verdict(Direction::Bearish, 0.7), Some(&vol), today).unwrap();
        assert_eq!(p.strategy, StrategyType::DebitPutSpread);
        assert!(p.legs.iter().all(|l| l.right == OptionRight::Put));
        assert!(p.unit_greeks.delta < 0.0);
    }

    #[test]
    fn neutral_tie_never_sizes() {
        let c = test_support::candidate("CCC", 100.0);
        let today = test_support::today();
        let vol = VolContext::build(&c, today, &[0.15, 0.25, 0.40], &CancellationToken::new()).unwrap();
        assert!(matches!(
            stage().propose(&c, &verdict(Direction::Neutral, 0.0), Some(&vol), today),
            Err(TraderError::ProposalTooSmall { .. })
        ));
        assert!(matches!(
            stage().propose(&c, &verdict(Direction::Bullish, 0.9), None, today),
            Err(TraderError::NoStrategy(_))
        ));
    }
}
