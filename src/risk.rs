// =============================================================================
// Risk Stage — portfolio limits enforced inside one critical section
// =============================================================================
//
// Checks, in order, short-circuiting on the first violation:
//   1. Position Size  — proposal notional <= max_position_pct of account.
//   2. Portfolio Delta — |sum(delta * spot)| of book + proposal within
//                        max_delta_pct of account.
//   3. Portfolio Vega  — |sum(vega per vol point)| within max_vega_pct.
//   4. Stress Drawdown — worst loss over spot -/+ shock, each with and
//                        without the vol shock, within max_drawdown_pct.
//
// Position size is a hard limit: a proposal that breaches it is rejected.
// Any other violation resizes to the largest unit count that passes every
// check, re-runs the checks once, and rejects if even one unit fails.
//
// The whole read-check-commit sequence holds the book mutex, so two
// validations never interleave and limits are never transiently exceeded.
// Positions whose legs have all expired are dropped from the book before
// every validation and exposure read.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::PricingError;
use crate::pricing::{self, OptionInputs};
use crate::runtime_config::RiskLimits;
use crate::types::{
    ExposureSnapshot, GreekExposure, LimitKind, LimitViolation, OptionLeg, RiskDecision, RiskOutcome,
    StrategyType, TradeProposal,
};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// One open position as exported by the position tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioPosition {
    pub symbol: String,
    pub underlying_price: f64,
    pub legs: Vec<OptionLeg>,
    pub quantity: u32,
    /// Stock held per unit (covered calls).
    #[serde(default)]
    pub shares_per_unit: f64,
}

impl PortfolioPosition {
    pub fn from_proposal(p: &TradeProposal, multiplier: f64) -> Self {
        Self {
            symbol: p.symbol.clone(),
            underlying_price: p.underlying_price,
            legs: p.legs.clone(),
            quantity: p.quantity,
            shares_per_unit: if p.strategy == StrategyType::CoveredCall { multiplier } else { 0.0 },
        }
    }

    /// True once every leg's expiration date has passed.
    pub fn is_expired(&self, as_of: NaiveDate) -> bool {
        self.legs.iter().all(|leg| leg.expiration < as_of)
    }
}

fn prune_expired(book: &mut Vec<PortfolioPosition>, as_of: NaiveDate) {
    let before = book.len();
    book.retain(|p| !p.is_expired(as_of));
    if book.len() < before {
        info!(removed = before - book.len(), remaining = book.len(), %as_of, "expired positions removed from book");
    }
}

/// Utilisation of a single limit for dashboard display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitUtilisation {
    pub name: String,
    pub current: f64,
    pub limit: f64,
    pub breached: bool,
}

/// Book snapshot for the operator API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioReport {
    pub account_value: f64,
    pub positions: Vec<PortfolioPosition>,
    pub exposure: ExposureSnapshot,
    pub limits: Vec<LimitUtilisation>,
}

/// Load the position-tracker export.  A missing file is an empty book.
pub fn load_positions(path: impl AsRef<Path>) -> Result<Vec<PortfolioPosition>> {
    let path = path.as_ref();
    if !path.exists() {
        info!(path = %path.display(), "no positions file, starting with an empty book");
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read positions file: {}", path.display()))?;
    let positions: Vec<PortfolioPosition> = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse positions file: {}", path.display()))?;
    info!(path = %path.display(), count = positions.len(), "portfolio rebuilt from positions file");
    Ok(positions)
}

// ---------------------------------------------------------------------------
// Valuation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct Shock {
    spot: f64,
    vol: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct Valuation {
    value: f64,
    greeks: GreekExposure,
    delta_dollars: f64,
}

/// Mark-to-model of one position under a shock.
fn value_position(
    pos: &PortfolioPosition,
    shock: Shock,
    as_of: NaiveDate,
    risk_free_rate: f64,
    multiplier: f64,
) -> Result<Valuation, PricingError> {
    let spot = pos.underlying_price * (1.0 + shock.spot);
    let qty = f64::from(pos.quantity);
    let mut out = Valuation::default();

    for leg in &pos.legs {
        let t = (leg.expiration - as_of).num_days().max(0) as f64 / 365.0;
        let inputs = OptionInputs::new(
            spot,
            leg.strike,
            t,
            risk_free_rate,
            leg.implied_vol * (1.0 + shock.vol),
            leg.right,
        );
        let v = pricing::price(&inputs)?;
        let k = leg.side.sign() * f64::from(leg.ratio) * multiplier * qty;
        out.value += k * v.price;
        out.greeks = out.greeks
            + GreekExposure { delta: v.delta, gamma: v.gamma, theta: v.theta, vega: v.vega }.scaled(k);
    }

    let shares = pos.shares_per_unit * qty;
    out.value += shares * spot;
    out.greeks.delta += shares;
    out.delta_dollars = out.greeks.delta * spot;
    Ok(out)
}

// ---------------------------------------------------------------------------
// Risk Stage
// ---------------------------------------------------------------------------

struct Evaluation {
    exposure: ExposureSnapshot,
    violation: Option<LimitViolation>,
}

pub struct RiskStage {
    limits: RiskLimits,
    account_value: f64,
    multiplier: f64,
    risk_free_rate: f64,
    book: Mutex<Vec<PortfolioPosition>>,
}

impl RiskStage {
    pub fn new(
        limits: RiskLimits,
        account_value: f64,
        multiplier: f64,
        risk_free_rate: f64,
        positions: Vec<PortfolioPosition>,
    ) -> Self {
        info!(
            account_value,
            max_position_pct = limits.max_position_pct,
            max_delta_pct = limits.max_delta_pct,
            max_vega_pct = limits.max_vega_pct,
            max_drawdown_pct = limits.max_drawdown_pct,
            positions = positions.len(),
            "RiskStage initialised"
        );
        Self {
            limits,
            account_value,
            multiplier,
            risk_free_rate,
            book: Mutex::new(positions),
        }
    }

    fn scenarios(&self) -> [Shock; 4] {
        let s = self.limits.stress_spot_shock;
        let v = self.limits.stress_vol_shock;
        [
            Shock { spot: -s, vol: 0.0 },
            Shock { spot: -s, vol: v },
            Shock { spot: s, vol: 0.0 },
            Shock { spot: s, vol: v },
        ]
    }

    /// Exposure of the given positions plus the worst stress loss.
    fn exposure_of(&self, positions: &[&PortfolioPosition], as_of: NaiveDate) -> Result<ExposureSnapshot, PricingError> {
        let base = Shock { spot: 0.0, vol: 0.0 };
        let mut snap = ExposureSnapshot::default();
        let mut base_value = 0.0;
        for pos in positions {
            let v = value_position(pos, base, as_of, self.risk_free_rate, self.multiplier)?;
            base_value += v.value;
            snap.delta += v.delta_dollars;
            snap.gamma += v.greeks.gamma;
            snap.vega += v.greeks.vega;
        }

        let mut worst_loss: f64 = 0.0;
        for shock in self.scenarios() {
            let mut shocked = 0.0;
            for pos in positions {
                shocked += value_position(pos, shock, as_of, self.risk_free_rate, self.multiplier)?.value;
            }
            worst_loss = worst_loss.max(base_value - shocked);
        }
        snap.max_drawdown_estimate = worst_loss / self.account_value;
        Ok(snap)
    }

    fn evaluate(&self, book: &[PortfolioPosition], proposal: &TradeProposal, as_of: NaiveDate) -> Evaluation {
        let candidate = PortfolioPosition::from_proposal(proposal, self.multiplier);
        let mut all: Vec<&PortfolioPosition> = book.iter().collect();
        all.push(&candidate);

        let exposure = match self.exposure_of(&all, as_of) {
            Ok(e) => e,
            Err(e) => {
                warn!(symbol = %proposal.symbol, error = %e, "stress repricing failed");
                return Evaluation {
                    exposure: ExposureSnapshot::default(),
                    violation: Some(LimitViolation {
                        limit: LimitKind::StressDrawdown,
                        observed: f64::INFINITY,
                        allowed: self.limits.max_drawdown_pct,
                    }),
                };
            }
        };

        let acct = self.account_value;
        let checks = [
            (LimitKind::PositionSize, proposal.notional() / acct, self.limits.max_position_pct),
            (LimitKind::PortfolioDelta, exposure.delta.abs() / acct, self.limits.max_delta_pct),
            (LimitKind::PortfolioVega, exposure.vega.abs() / acct, self.limits.max_vega_pct),
            (LimitKind::StressDrawdown, exposure.max_drawdown_estimate, self.limits.max_drawdown_pct),
        ];
        let violation = checks
            .into_iter()
            .find(|(_, observed, allowed)| !(observed <= allowed))
            .map(|(limit, observed, allowed)| LimitViolation { limit, observed, allowed });

        Evaluation { exposure, violation }
    }

    /// Largest unit count in [1, upper) that passes every check.  The passing
    /// set of each check is an interval in quantity, so once one unit passes
    /// a bisection finds the upper edge.
    fn largest_passing(&self, book: &[PortfolioPosition], proposal: &TradeProposal, upper: u32, as_of: NaiveDate) -> Option<u32> {
        let passes = |q: u32| self.evaluate(book, &proposal.resized(q), as_of).violation.is_none();
        if upper <= 1 || !passes(1) {
            return None;
        }
        let (mut lo, mut hi) = (1u32, upper);
        while hi - lo > 1 {
            let mid = lo + (hi - lo) / 2;
            if passes(mid) {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        Some(lo)
    }

    /// Validate and, if approved or resized, commit the proposal to the book.
    pub fn validate(&self, proposal: &TradeProposal, as_of: NaiveDate) -> RiskDecision {
        let mut book = self.book.lock();
        prune_expired(&mut book, as_of);

        let first = self.evaluate(&book, proposal, as_of);
        let Some(violation) = first.violation else {
            book.push(PortfolioPosition::from_proposal(proposal, self.multiplier));
            info!(symbol = %proposal.symbol, quantity = proposal.quantity, "proposal approved");
            return RiskDecision {
                outcome: RiskOutcome::Approved,
                triggered: Vec::new(),
                proposal: Some(proposal.clone()),
                exposure: first.exposure,
                decided_at: Utc::now(),
            };
        };

        debug!(symbol = %proposal.symbol, %violation, "limit violated");

        if violation.limit != LimitKind::PositionSize {
            if let Some(q) = self.largest_passing(&book, proposal, proposal.quantity, as_of) {
                let resized = proposal.resized(q);
                let recheck = self.evaluate(&book, &resized, as_of);
                match recheck.violation {
                    None => {
                        book.push(PortfolioPosition::from_proposal(&resized, self.multiplier));
                        info!(
                            symbol = %proposal.symbol,
                            from = proposal.quantity,
                            to = q,
                            limit = %violation.limit,
                            "proposal resized"
                        );
                        return RiskDecision {
                            outcome: RiskOutcome::Resized,
                            triggered: vec![violation],
                            proposal: Some(resized),
                            exposure: recheck.exposure,
                            decided_at: Utc::now(),
                        };
                    }
                    Some(again) => {
                        warn!(symbol = %proposal.symbol, violation = %again, "resized proposal failed re-check");
                    }
                }
            }
        }

        warn!(symbol = %proposal.symbol, %violation, "proposal rejected");
        let unchanged = self.exposure_of(&book.iter().collect::<Vec<_>>(), as_of).unwrap_or_default();
        RiskDecision {
            outcome: RiskOutcome::Rejected,
            triggered: vec![violation],
            proposal: None,
            exposure: unchanged,
            decided_at: Utc::now(),
        }
    }

    pub fn positions(&self) -> Vec<PortfolioPosition> {
        self.book.lock().clone()
    }

    /// Current book exposure.  Positions that fail to reprice are logged and
    /// reported as zero exposure.
    pub fn exposure(&self, as_of: NaiveDate) -> ExposureSnapshot {
        let mut book = self.book.lock();
        prune_expired(&mut book, as_of);
        match self.exposure_of(&book.iter().collect::<Vec<_>>(), as_of) {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "book repricing failed");
                ExposureSnapshot::default()
            }
        }
    }

    pub fn limit_report(&self, exposure: &ExposureSnapshot) -> Vec<LimitUtilisation> {
        let acct = self.account_value;
        let row = |name: &str, current: f64, limit: f64| LimitUtilisation {
            name: name.to_string(),
            current,
            limit,
            breached: current > limit,
        };
        vec![
            row("max_delta_pct", exposure.delta.abs() / acct, self.limits.max_delta_pct),
            row("max_vega_pct", exposure.vega.abs() / acct, self.limits.max_vega_pct),
            row("max_drawdown_pct", exposure.max_drawdown_estimate, self.limits.max_drawdown_pct),
        ]
    }

    /// Reads exposure first so the listed positions are already pruned.
    pub fn report(&self, as_of: NaiveDate) -> PortfolioReport {
        let exposure = self.exposure(as_of);
        PortfolioReport {
            account_value: self.account_value,
            positions: self.positions(),
            limits: self.limit_report(&exposure),
            exposure,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{self, XorShift};
    use crate::types::{OptionRight, Side};

    const MULT: f64 = 100.0;

    fn leg(right: OptionRight, side: Side, strike: f64, days: i64, iv: f64) -> OptionLeg {
        OptionLeg {
            right,
            strike,
            expiration: test_support::today() + chrono::Duration::days(days),
            side,
            ratio: 1,
            implied_vol: iv,
        }
    }

    fn proposal(symbol: &str, spot: f64, legs: Vec<OptionLeg>, quantity: u32, notional_per_unit: f64) -> TradeProposal {
        TradeProposal {
            id: format!("{symbol}-test"),
            revision: 0,
            symbol: symbol.to_string(),
            underlying_price: spot,
            strategy: StrategyType::DebitCallSpread,
            legs,
            quantity,
            entry_price: notional_per_unit,
            max_loss_per_unit: notional_per_unit,
            notional_per_unit,
            unit_greeks: GreekExposure::default(),
            stop_loss: 0.5 * notional_per_unit,
            target: notional_per_unit,
            created_at: Utc::now(),
        }
    }

    fn stage(limits: RiskLimits) -> RiskStage {
        RiskStage::new(limits, 100_000.0, MULT, 0.04, Vec::new())
    }

    fn long_call(q: u32) -> TradeProposal {
        proposal("AAA", 100.0, vec![leg(OptionRight::Call, Side::Buy, 100.0, 35, 0.25)], q, 300.0)
    }

    #[test]
    fn small_proposal_is_approved_and_committed() {
        let s = stage(RiskLimits::default());
        let d = s.validate(&long_call(2), test_support::today());
        assert_eq!(d.outcome, RiskOutcome::Approved);
        assert!(d.triggered.is_empty());
        assert_eq!(s.positions().len(), 1);
        assert!(d.exposure.delta > 0.0);
    }

    #[test]
    fn position_size_breach_is_rejected_never_resized() {
        let s = stage(RiskLimits::default());
        // 100 units x 300 = 30k > 20k cap
        let d = s.validate(&long_call(100), test_support::today());
        assert_eq!(d.outcome, RiskOutcome::Rejected);
        assert_eq!(d.triggered[0].limit, LimitKind::PositionSize);
        assert!(d.proposal.is_none());
        assert!(s.positions().is_empty());
    }

    #[test]
    fn delta_breach_is_resized_to_fit() {
        let limits = RiskLimits { max_delta_pct: 0.20, ..RiskLimits::default() };
        let s = stage(limits);
        // ~0.53 delta x 100 x $100 = ~$5.3k dollar delta per unit
        let d = s.validate(&long_call(10), test_support::today());
        assert_eq!(d.outcome, RiskOutcome::Resized);
        assert_eq!(d.triggered[0].limit, LimitKind::PortfolioDelta);
        let p = d.proposal.unwrap();
        assert!(p.quantity < 10 && p.quantity >= 1);
        assert_eq!(p.revision, 1);
        assert!(d.exposure.delta.abs() / 100_000.0 <= 0.20);
    }

    #[test]
    fn one_unit_over_a_soft_limit_is_rejected() {
        let limits = RiskLimits { max_vega_pct: 0.00001, ..RiskLimits::default() };
        let s = stage(limits);
        let d = s.validate(&long_call(3), test_support::today());
        assert_eq!(d.outcome, RiskOutcome::Rejected);
        assert_eq!(d.triggered[0].limit, LimitKind::PortfolioVega);
    }

    #[test]
    fn existing_book_counts_towards_limits() {
        let limits = RiskLimits { max_delta_pct: 0.10, ..RiskLimits::default() };
        let s = stage(limits);
        let today = test_support::today();
        assert_eq!(s.validate(&long_call(1), today).outcome, RiskOutcome::Approved);
        // The second unit pushes dollar delta past 10% only with the first held.
        let d = s.validate(&long_call(2), today);
        assert_ne!(d.outcome, RiskOutcome::Approved);
    }

    #[test]
    fn stress_loss_includes_vol_shock() {
        let s = stage(RiskLimits::default());
        // Short straddle loses on any large move.
        let p = proposal(
            "SS",
            100.0,
            vec![
                leg(OptionRight::Call, Side::Sell, 100.0, 35, 0.25),
                leg(OptionRight::Put, Side::Sell, 100.0, 35, 0.25),
            ],
            1,
            2_000.0,
        );
        let d = s.validate(&p, test_support::today());
        assert!(d.exposure.max_drawdown_estimate > 0.0);
    }

    #[test]
    fn loads_missing_positions_file_as_empty() {
        let path = std::env::temp_dir().join("options_pipeline_missing_positions.json");
        let _ = std::fs::remove_file(&path);
        assert!(load_positions(&path).unwrap().is_empty());
    }

    #[test]
    fn loads_positions_file() {
        let path = std::env::temp_dir().join(format!("options_pipeline_positions_{}.json", std::process::id()));
        let book = vec![PortfolioPosition::from_proposal(&long_call(2), MULT)];
        std::fs::write(&path, serde_json::to_string(&book).unwrap()).unwrap();
        let loaded = load_positions(&path).unwrap();
        assert_eq!(loaded, book);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn corrupt_positions_file_is_an_error() {
        let path = std::env::temp_dir().join(format!("options_pipeline_corrupt_{}.json", std::process::id()));
        std::fs::write(&path, "[{\"symbol\": \"AAA\", \"legs\": ").unwrap();
        let err = load_positions(&path).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to parse positions file"));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn expired_positions_leave_the_book() {
        let s = stage(RiskLimits::default());
        let today = test_support::today();
        let itm = proposal("AAA", 100.0, vec![leg(OptionRight::Call, Side::Buy, 90.0, 7, 0.25)], 1, 1_000.0);
        assert_eq!(s.validate(&itm, today).outcome, RiskOutcome::Approved);
        assert!(s.exposure(today).delta > 0.0);

        // Still live on its expiration day.
        assert_eq!(s.report(today + chrono::Duration::days(7)).positions.len(), 1);

        let later = today + chrono::Duration::days(365);
        let exposure = s.exposure(later);
        assert_eq!(exposure.delta, 0.0);
        assert_eq!(exposure.max_drawdown_estimate, 0.0);
        assert!(s.positions().is_empty());
        assert!(s.report(later).positions.is_empty());
    }

    fn random_limits(rng: &mut XorShift) -> RiskLimits {
        RiskLimits {
            max_position_pct: rng.range(0.01, 0.30),
            max_delta_pct: rng.range(0.01, 0.60),
            max_vega_pct: rng.range(0.0005, 0.03),
            max_drawdown_pct: rng.range(0.005, 0.15),
            stress_spot_shock: rng.range(0.05, 0.20),
            stress_vol_shock: rng.range(0.0, 0.8),
        }
    }

    fn random_proposal(rng: &mut XorShift, i: usize) -> TradeProposal {
        let spot = rng.range(20.0, 400.0);
        let right = if rng.below(2) == 0 { OptionRight::Call } else { OptionRight::Put };
        let side = if rng.below(2) == 0 { Side::Buy } else { Side::Sell };
        let legs = vec![leg(right, side, (spot * rng.range(0.8, 1.2)).round().max(1.0), rng.below(110) as i64 + 5, rng.range(0.1, 0.9))];
        let notional = rng.range(50.0, 8_000.0);
        proposal(&format!("R{i}"), spot, legs, rng.below(40) as u32 + 1, notional)
    }

    #[test]
    fn never_approves_a_limit_breach() {
        let mut rng = XorShift::new(0xC0FFEE);
        for round in 0..40 {
            let limits = random_limits(&mut rng);
            let s = stage(limits.clone());
            for i in 0..6 {
                let p = random_proposal(&mut rng, round * 10 + i);
                let d = s.validate(&p, test_support::today());
                if d.outcome == RiskOutcome::Rejected {
                    assert!(d.proposal.is_none());
                    continue;
                }
                let held = d.proposal.as_ref().unwrap();
                let e = d.exposure;
                assert!(held.notional() / 100_000.0 <= limits.max_position_pct);
                assert!(e.delta.abs() / 100_000.0 <= limits.max_delta_pct);
                assert!(e.vega.abs() / 100_000.0 <= limits.max_vega_pct);
                assert!(e.max_drawdown_estimate <= limits.max_drawdown_pct);
            }
        }
    }

    #[test]
    fn resizing_never_grows_notional() {
        let mut rng = XorShift::new(42);
        let mut resized = 0;
        for round in 0..60 {
            let s = stage(random_limits(&mut rng));
            let p = random_proposal(&mut rng, round);
            let d = s.validate(&p, test_support::today());
            if d.outcome == RiskOutcome::Resized {
                resized += 1;
                let r = d.proposal.unwrap();
                assert!(r.quantity < p.quantity);
                assert!(r.notional() <= p.notional());
            }
        }
        // Sanity check that the generator actually exercises the resize path.
        assert!(resized > 0);
    }
}
