// =============================================================================
// Fundamental Analyst — valuation ratios + two-stage DCF
// =============================================================================
//
// Ratio screen (each passing check counts equally, over the checks that have
// data):
//   P/E < 20, P/B < 2, D/E < 0.5, FCF yield > 5%, growth > 10%
//
// DCF: five years of FCF growing at the clamped growth estimate, then a
// Gordon terminal value.  Margin of safety = (intrinsic - price) / price.
//
// Score = mean of the ratio component and the DCF component, both in [-1, 1].
// =============================================================================

use crate::analyst::{AnalysisContext, Analyst};
use crate::errors::AnalystError;
use crate::types::{AnalystFinding, AnalystKind, Candidate, Fundamentals};

#[derive(Debug, Clone)]
pub struct FundamentalAnalyst {
    /// Added to the risk-free rate to discount cash flows.
    pub equity_risk_premium: f64,
    pub terminal_growth: f64,
    pub explicit_years: u32,
}

impl Default for FundamentalAnalyst {
    fn default() -> Self {
        Self {
            equity_risk_premium: 0.05,
            terminal_growth: 0.025,
            explicit_years: 5,
        }
    }
}

/// Ratio checks: (passed, available).
fn ratio_screen(f: &Fundamentals, price: f64) -> (u32, u32, Vec<String>) {
    let mut passed = 0;
    let mut available = 0;
    let mut notes = Vec::new();

    let mut check = |name: &str, value: Option<f64>, ok: fn(f64) -> bool| {
        if let Some(v) = value {
            available += 1;
            if ok(v) {
                passed += 1;
                notes.push(format!("{name} {v:.2} ok"));
            }
        }
    };

    check("P/E", f.pe_ratio.filter(|v| *v > 0.0), |v| v < 20.0);
    check("P/B", f.pb_ratio, |v| v < 2.0);
    check("D/E", f.debt_to_equity, |v| v < 0.5);
    let fcf_yield = match (f.free_cash_flow, f.shares_outstanding) {
        (Some(fcf), Some(shares)) if shares > 0.0 && price > 0.0 => Some(fcf / shares / price),
        _ => None,
    };
    check("FCF yield", fcf_yield, |v| v > 0.05);
    check("growth", f.earnings_growth, |v| v > 0.10);

    (passed, available, notes)
}

impl FundamentalAnalyst {
    /// Per-share intrinsic value.  `None` when FCF or share count is missing.
    pub fn dcf_value(&self, f: &Fundamentals, risk_free_rate: f64) -> Result<Option<f64>, AnalystError> {
        let (fcf, shares) = match (f.free_cash_flow, f.shares_outstanding) {
            (Some(fcf), Some(shares)) if shares > 0.0 => (fcf, shares),
            _ => return Ok(None),
        };
        let discount = risk_free_rate + self.equity_risk_premium;
        if discount <= self.terminal_growth {
            return Err(AnalystError::ComputationError(format!(
                "discount rate {discount:.3} not above terminal growth {:.3}",
                self.terminal_growth
            )));
        }
        let growth = f.earnings_growth.unwrap_or(0.0).clamp(-0.10, 0.25);

        let mut cash = fcf;
        let mut pv = 0.0;
        for year in 1..=self.explicit_years {
            cash *= 1.0 + growth;
            pv += cash / (1.0 + discount).powi(year as i32);
        }
        let terminal = cash * (1.0 + self.terminal_growth) / (discount - self.terminal_growth);
        pv += terminal / (1.0 + discount).powi(self.explicit_years as i32);

        Ok(Some(pv / shares))
    }
}

impl Analyst for FundamentalAnalyst {
    fn kind(&self) -> AnalystKind {
        AnalystKind::Fundamental
    }

    fn analyze(&self, candidate: &Candidate, ctx: &AnalysisContext) -> Result<AnalystFinding, AnalystError> {
        let f = candidate
            .fundamentals
            .as_ref()
            .ok_or_else(|| AnalystError::DataUnavailable("fundamentals feed unavailable".into()))?;

        let (passed, available, notes) = ratio_screen(f, candidate.last_price);
        let intrinsic = self.dcf_value(f, ctx.risk_free_rate)?;

        if available == 0 && intrinsic.is_none() {
            return Err(AnalystError::DataUnavailable("no valuation metrics reported".into()));
        }

        let ratio_component = (available > 0).then(|| 2.0 * passed as f64 / available as f64 - 1.0);
        let margin = intrinsic.map(|v| (v - candidate.last_price) / candidate.last_price);
        let dcf_component = margin.map(|m| m.clamp(-1.0, 1.0));

        let parts: Vec<f64> = ratio_component.into_iter().chain(dcf_component).collect();
        let score = parts.iter().sum::<f64>() / parts.len() as f64;
        let confidence = 0.7 * available as f64 / 5.0 + if intrinsic.is_some() { 0.3 } else { 0.0 };

        let mut rationale = format!("{passed}/{available} value checks");
        if !notes.is_empty() {
            rationale.push_str(&format!(" ({})", notes.join(", ")));
        }
        if let (Some(v), Some(m)) = (intrinsic, margin) {
            rationale.push_str(&format!("; DCF {v:.2} vs {:.2} ({:+.1}% margin)", candidate.last_price, m * 100.0));
        }

        Ok(AnalystFinding::new(AnalystKind::Fundamental, score, confidence, rationale))
    }
}
