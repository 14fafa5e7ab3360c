// =============================================================================
// News Analyst — scheduled catalysts by proximity and surprise history
// =============================================================================
//
// For each catalyst inside the horizon:
//
//   proximity = exp(-days / decay_days)
//   weight    = proximity * kind_weight
//   impact    = min(1, historical_surprise / 5%)
//   score    += weight * impact * surprise_bias
//
// score is normalised by the summed weight; confidence grows with the
// weight of the nearest event.  The rationale carries the implied expected
// move into the nearest catalyst from the ATM vol.
// =============================================================================

use crate::analyst::{AnalysisContext, Analyst};
use crate::errors::AnalystError;
use crate::pricing::volatility::expected_move_pct;
use crate::types::{AnalystFinding, AnalystKind, Candidate, CatalystKind};

#[derive(Debug, Clone)]
pub struct NewsAnalyst {
    pub horizon_days: i64,
    pub decay_days: f64,
}

impl Default for NewsAnalyst {
    fn default() -> Self {
        Self {
            horizon_days: 45,
            decay_days: 10.0,
        }
    }
}

fn kind_weight(kind: CatalystKind) -> f64 {
    match kind {
        CatalystKind::Earnings => 1.0,
        CatalystKind::Macro => 0.5,
        CatalystKind::Dividend => 0.2,
        CatalystKind::Other => 0.3,
    }
}

impl Analyst for NewsAnalyst {
    fn kind(&self) -> AnalystKind {
        AnalystKind::News
    }

    fn analyze(&self, candidate: &Candidate, ctx: &AnalysisContext) -> Result<AnalystFinding, AnalystError> {
        let catalysts = candidate
            .catalysts
            .as_ref()
            .ok_or_else(|| AnalystError::DataUnavailable("catalyst calendar unavailable".into()))?;

        let mut upcoming: Vec<(i64, &crate::types::Catalyst)> = catalysts
            .iter()
            .map(|c| ((c.date - ctx.today).num_days(), c))
            .filter(|(days, _)| *days >= 0 && *days <= self.horizon_days)
            .collect();
        upcoming.sort_by_key(|(days, _)| *days);

        let Some(&(nearest_days, nearest)) = upcoming.first() else {
            return Ok(AnalystFinding::new(AnalystKind::News, 0.0, 0.1, "no scheduled catalysts in horizon"));
        };

        let mut weight_sum = 0.0;
        let mut signed = 0.0;
        let mut max_weight = 0.0f64;
        for (days, c) in &upcoming {
            let w = (-(*days as f64) / self.decay_days).exp() * kind_weight(c.kind);
            let impact = (c.historical_surprise / 0.05).min(1.0);
            signed += w * impact * c.surprise_bias.clamp(-1.0, 1.0);
            weight_sum += w;
            max_weight = max_weight.max(w);
        }
        if weight_sum <= 0.0 {
            return Err(AnalystError::ComputationError("catalyst weights vanished".into()));
        }

        let score = signed / weight_sum;
        let confidence = 0.8 * max_weight.min(1.0);

        let mut rationale = format!(
            "{} catalyst(s); nearest {:?} in {}d ({})",
            upcoming.len(),
            nearest.kind,
            nearest_days,
            if nearest.description.is_empty() { "unnamed" } else { nearest.description.as_str() }
        );
        if let Some(iv) = candidate.atm_implied_vol() {
            let mv = expected_move_pct(iv, nearest_days.max(1) as f64);
            rationale.push_str(&format!(", implied move {:.1}% vs historical {:.1}%", mv * 100.0, nearest.historical_surprise * 100.0));
        }

        Ok(AnalystFinding::new(AnalystKind::News, score, confidence, rationale))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use crate::types::Catalyst;

    fn catalyst(kind: CatalystKind, days: i64, surprise: f64, bias: f64) -> Catalyst {
        Catalyst {
            kind,
            date: test_support::today() + chrono::Duration::days(days),
            historical_surprise: surprise,
            surprise_bias: bias,
            description: String::new(),
        }
    }

    #[test]
    fn imminent_beat_history_scores_bullish() {
        let mut c = test_support::candidate("ERN", 100.0);
        c.catalysts = Some(vec![catalyst(CatalystKind::Earnings, 2, 0.08, 0.9)]);
        let f = NewsAnalyst::default().analyze(&c, &test_support::context()).unwrap();
        assert!(f.score > 0.8, "{f:?}");
        assert!(f.confidence > 0.6);
        assert!(f.rationale.contains("implied move"));
    }

    #[test]
    fn nearer_events_dominate() {
        let mut c = test_support::candidate("MIX", 100.0);
        c.catalysts = Some(vec![
            catalyst(CatalystKind::Earnings, 1, 0.06, -1.0),
            catalyst(CatalystKind::Earnings, 40, 0.06, 1.0),
        ]);
        let f = NewsAnalyst::default().analyze(&c, &test_support::context()).unwrap();
        assert!(f.score < -0.9);
    }

    #[test]
    fn past_and_far_events_are_ignored() {
        let mut c = test_support::candidate("OLD", 100.0);
        c.catalysts = Some(vec![
            catalyst(CatalystKind::Earnings, -3, 0.1, 1.0),
            catalyst(CatalystKind::Macro, 120, 0.02, 1.0),
        ]);
        let f = NewsAnalyst::default().analyze(&c, &test_support::context()).unwrap();
        assert_eq!(f.score, 0.0);
        assert!((f.confidence - 0.1).abs() < 1e-12);
    }

    #[test]
    fn missing_calendar_abstains() {
        let mut c = test_support::candidate("NONE", 100.0);
        c.catalysts = None;
        assert!(NewsAnalyst::default().analyze(&c, &test_support::context()).is_err());
    }
}
