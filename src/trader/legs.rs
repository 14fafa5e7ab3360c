// =============================================================================
// Leg construction and per-unit valuation of strategy templates
// =============================================================================
//
// Strikes are placed from a one-sigma move over the short expiry
// (spot * vol * sqrt(T)) and then snapped to strikes actually listed on the
// surface for that expiry.  Wings that would collapse onto the body strike
// step out to the next listed strike instead.
//
// All dollar figures are per strategy unit and already include the contract
// multiplier.  `entry_price` is signed: positive = debit paid.
// =============================================================================

use chrono::NaiveDate;

use crate::errors::TraderError;
use crate::pricing::{self, OptionInputs};
use crate::types::{GreekExposure, OptionLeg, OptionRight, Side, StrategyType, SurfacePoint};

/// Distinct listed expirations strictly after `today`, ascending.
fn expirations(surface: &[SurfacePoint], today: NaiveDate) -> Vec<NaiveDate> {
    let mut out: Vec<NaiveDate> = surface.iter().map(|p| p.expiration).filter(|e| *e > today).collect();
    out.sort();
    out.dedup();
    out
}

/// Listed expiration closest to `today + dte`.
pub fn nearest_expiry(surface: &[SurfacePoint], today: NaiveDate, dte: u32) -> Option<NaiveDate> {
    let target = today + chrono::Duration::days(i64::from(dte));
    expirations(surface, today)
        .into_iter()
        .min_by_key(|e| (*e - target).num_days().abs())
}

/// Listed strikes for one expiration, ascending, with their quoted vols.
fn chain(surface: &[SurfacePoint], expiration: NaiveDate) -> Vec<(f64, f64)> {
    let mut out: Vec<(f64, f64)> = surface
        .iter()
        .filter(|p| p.expiration == expiration && p.strike > 0.0 && p.implied_vol > 0.0)
        .map(|p| (p.strike, p.implied_vol))
        .collect();
    out.sort_by(|a, b| a.0.total_cmp(&b.0));
    out.dedup_by(|a, b| a.0 == b.0);
    out
}

/// Strikes and vols for one expiry with snapping helpers.
struct Chain {
    expiration: NaiveDate,
    strikes: Vec<(f64, f64)>,
}

impl Chain {
    fn load(surface: &[SurfacePoint], expiration: NaiveDate) -> Result<Self, TraderError> {
        let strikes = chain(surface, expiration);
        if strikes.len() < 2 {
            return Err(TraderError::LegConstruction(format!(
                "fewer than two listed strikes for {expiration}"
            )));
        }
        Ok(Self { expiration, strikes })
    }

    fn nearest(&self, target: f64) -> usize {
        let mut best = 0;
        for (i, (k, _)) in self.strikes.iter().enumerate() {
            if (k - target).abs() < (self.strikes[best].0 - target).abs() {
                best = i;
            }
        }
        best
    }

    fn below(&self, idx: usize) -> Result<usize, TraderError> {
        idx.checked_sub(1)
            .ok_or_else(|| TraderError::LegConstruction(format!("no listed strike below {}", self.strikes[idx].0)))
    }

    fn above(&self, idx: usize) -> Result<usize, TraderError> {
        if idx + 1 < self.strikes.len() {
            Ok(idx + 1)
        } else {
            Err(TraderError::LegConstruction(format!("no listed strike above {}", self.strikes[idx].0)))
        }
    }

    /// Snap `target` but stay strictly below `bound_idx`.
    fn snap_below(&self, target: f64, bound_idx: usize) -> Result<usize, TraderError> {
        let i = self.nearest(target);
        if i < bound_idx { Ok(i) } else { self.below(bound_idx) }
    }

    fn snap_above(&self, target: f64, bound_idx: usize) -> Result<usize, TraderError> {
        let i = self.nearest(target);
        if i > bound_idx { Ok(i) } else { self.above(bound_idx) }
    }

    fn leg(&self, idx: usize, right: OptionRight, side: Side) -> OptionLeg {
        let (strike, iv) = self.strikes[idx];
        OptionLeg { right, strike, expiration: self.expiration, side, ratio: 1, implied_vol: iv }
    }
}

/// Everything a leg builder needs to know about the underlying.
#[derive(Debug, Clone)]
pub struct LegPlan<'a> {
    pub spot: f64,
    pub forecast_vol: f64,
    pub surface: &'a [SurfacePoint],
    pub today: NaiveDate,
    pub short_dte: u32,
    pub long_dte: u32,
}

impl LegPlan<'_> {
    fn sigma_move(&self, expiration: NaiveDate) -> f64 {
        let t = ((expiration - self.today).num_days().max(1) as f64) / 365.0;
        self.spot * self.forecast_vol.max(0.05) * t.sqrt()
    }
}

pub fn build_legs(strategy: StrategyType, plan: &LegPlan<'_>) -> Result<Vec<OptionLeg>, TraderError> {
    let short_exp = nearest_expiry(plan.surface, plan.today, plan.short_dte)
        .ok_or_else(|| TraderError::LegConstruction("no listed expirations".into()))?;
    let near = Chain::load(plan.surface, short_exp)?;
    let sigma = plan.sigma_move(short_exp);
    let spot = plan.spot;
    let atm = near.nearest(spot);

    use OptionRight::{Call, Put};
    use Side::{Buy, Sell};

    let legs = match strategy {
        StrategyType::DebitCallSpread => {
            let short = near.snap_above(spot + sigma, atm)?;
            vec![near.leg(atm, Call, Buy), near.leg(short, Call, Sell)]
        }
        StrategyType::DebitPutSpread => {
            let short = near.snap_below(spot - sigma, atm)?;
            vec![near.leg(atm, Put, Buy), near.leg(short, Put, Sell)]
        }
        StrategyType::CreditPutSpread => {
            let short = near.nearest(spot - 0.5 * sigma);
            let long = near.snap_below(spot - 1.5 * sigma, short)?;
            vec![near.leg(short, Put, Sell), near.leg(long, Put, Buy)]
        }
        StrategyType::CreditCallSpread => {
            let short = near.nearest(spot + 0.5 * sigma);
            let long = near.snap_above(spot + 1.5 * sigma, short)?;
            vec![near.leg(short, Call, Sell), near.leg(long, Call, Buy)]
        }
        StrategyType::IronCondor => {
            let short_put = near.snap_below(spot - sigma, atm)?;
            let long_put = near.snap_below(spot - 2.0 * sigma, short_put)?;
            let short_call = near.snap_above(spot + sigma, atm)?;
            let long_call = near.snap_above(spot + 2.0 * sigma, short_call)?;
            vec![
                near.leg(long_put, Put, Buy),
                near.leg(short_put, Put, Sell),
                near.leg(short_call, Call, Sell),
                near.leg(long_call, Call, Buy),
            ]
        }
        StrategyType::CalendarSpread => {
            let long_exp = nearest_expiry(plan.surface, plan.today, plan.long_dte)
                .filter(|e| *e > short_exp)
                .ok_or_else(|| TraderError::LegConstruction("no back-month expiry beyond the front month".into()))?;
            let far = Chain::load(plan.surface, long_exp)?;
            vec![near.leg(atm, Call, Sell), far.leg(far.nearest(near.strikes[atm].0), Call, Buy)]
        }
        StrategyType::LongStraddle => vec![near.leg(atm, Call, Buy), near.leg(atm, Put, Buy)],
        StrategyType::CoveredCall => vec![near.leg(near.snap_above(spot + sigma, atm)?, Call, Sell)],
        StrategyType::CashSecuredPut => vec![near.leg(near.nearest(spot - 0.5 * sigma), Put, Sell)],
    };
    Ok(legs)
}

/// Per-unit economics of a built strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitValuation {
    pub entry_price: f64,
    pub max_loss: f64,
    pub notional: f64,
    pub greeks: GreekExposure,
    /// Profit at which the position would be closed.
    pub target: f64,
}

fn width(legs: &[OptionLeg], right: OptionRight) -> f64 {
    let strikes: Vec<f64> = legs.iter().filter(|l| l.right == right).map(|l| l.strike).collect();
    let hi = strikes.iter().copied().fold(f64::MIN, f64::max);
    let lo = strikes.iter().copied().fold(f64::MAX, f64::min);
    if strikes.len() >= 2 { hi - lo } else { 0.0 }
}

pub fn value_legs(
    strategy: StrategyType,
    legs: &[OptionLeg],
    spot: f64,
    today: NaiveDate,
    risk_free_rate: f64,
    multiplier: f64,
) -> Result<UnitValuation, TraderError> {
    if legs.is_empty() {
        return Err(TraderError::LegConstruction(format!("{strategy} has no legs")));
    }
    let mut entry = 0.0;
    let mut greeks = GreekExposure::default();
    for leg in legs {
        let t = (leg.expiration - today).num_days().max(0) as f64 / 365.0;
        let inputs = OptionInputs::new(spot, leg.strike, t, risk_free_rate, leg.implied_vol, leg.right);
        let v = pricing::price(&inputs).map_err(|e| TraderError::LegConstruction(e.to_string()))?;
        let k = leg.side.sign() * f64::from(leg.ratio) * multiplier;
        entry += k * v.price;
        greeks = greeks
            + GreekExposure { delta: v.delta, gamma: v.gamma, theta: v.theta, vega: v.vega }.scaled(k);
    }

    // Covered call units carry the shares.
    if strategy == StrategyType::CoveredCall {
        entry += spot * multiplier;
        greeks.delta += multiplier;
    }

    let credit = (-entry).max(0.0);
    let (max_loss, notional, target) = match strategy {
        StrategyType::DebitCallSpread | StrategyType::DebitPutSpread => {
            let w = width(legs, legs[0].right) * multiplier;
            (entry, entry, 0.5 * (w - entry))
        }
        StrategyType::CreditPutSpread | StrategyType::CreditCallSpread => {
            let w = width(legs, legs[0].right) * multiplier;
            (w - credit, w, 0.5 * credit)
        }
        StrategyType::IronCondor => {
            let w = width(legs, OptionRight::Put).max(width(legs, OptionRight::Call)) * multiplier;
            (w - credit, w, 0.5 * credit)
        }
        StrategyType::CalendarSpread => (entry, entry, 0.5 * entry),
        StrategyType::LongStraddle => (entry, entry, entry),
        StrategyType::CoveredCall => (entry, entry, 0.5 * (legs[0].strike * multiplier - entry)),
        StrategyType::CashSecuredPut => {
            let collateral = legs[0].strike * multiplier;
            (collateral - credit, collateral, 0.5 * credit)
        }
    };

    if !(max_loss.is_finite() && max_loss > 0.0) {
        return Err(TraderError::LegConstruction(format!(
            "{strategy} has non-positive max loss {max_loss:.2}"
        )));
    }
    Ok(UnitValuation { entry_price: entry, max_loss, notional, greeks, target: target.max(0.0) })
}
