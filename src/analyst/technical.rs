// =============================================================================
// Technical Analyst — structural breaks, zones and market structure
// =============================================================================
//
// Each detector in `patterns` becomes one weighted signal:
//
//   contribution = weight * confidence * direction     (direction in {-1,0,1})
//
// score      = sum(contribution) / sum(weight)
// confidence = evidence share (weight * confidence of non-neutral signals)
//              scaled by how much of the look-back window was available.
// =============================================================================

use tracing::debug;

use crate::analyst::patterns::{self, Bar, ZoneKind};
use crate::analyst::{AnalysisContext, Analyst};
use crate::errors::AnalystError;
use crate::types::{AnalystFinding, AnalystKind, Candidate, Direction};

const MIN_BARS: usize = 20;
const ZONE_PROXIMITY: f64 = 0.05;

struct Signal {
    name: &'static str,
    weight: f64,
    confidence: f64,
    direction: Direction,
}

impl Signal {
    fn sign(&self) -> f64 {
        match self.direction {
            Direction::Bullish => 1.0,
            Direction::Bearish => -1.0,
            Direction::Neutral => 0.0,
        }
    }

    fn contribution(&self) -> f64 {
        self.weight * self.confidence * self.sign()
    }
}

pub struct TechnicalAnalyst;

/// Closest active order block within 5% of price: support below reads
/// bullish, resistance above reads bearish.
fn zone_signal(bars: &[Bar], price: f64) -> Signal {
    let nearest = patterns::order_blocks(bars, 2.0)
        .into_iter()
        .filter(|z| z.kind == ZoneKind::OrderBlock)
        .map(|z| {
            let dist = match z.direction {
                Direction::Bullish => (price - z.high).max(0.0) / price,
                _ => (z.low - price).max(0.0) / price,
            };
            (z, dist)
        })
        .filter(|(_, d)| *d <= ZONE_PROXIMITY)
        .min_by(|a, b| a.1.total_cmp(&b.1));

    match nearest {
        Some((z, dist)) => Signal {
            name: "order_block",
            weight: 0.20,
            confidence: 1.0 - dist / ZONE_PROXIMITY,
            direction: z.direction,
        },
        None => Signal { name: "order_block", weight: 0.20, confidence: 0.0, direction: Direction::Neutral },
    }
}

fn gap_signal(bars: &[Bar]) -> Signal {
    let gaps = patterns::fair_value_gaps(bars);
    let bull = gaps.iter().filter(|z| z.direction == Direction::Bullish).count() as f64;
    let bear = gaps.len() as f64 - bull;
    let total = bull + bear;
    let direction = if bull > bear {
        Direction::Bullish
    } else if bear > bull {
        Direction::Bearish
    } else {
        Direction::Neutral
    };
    Signal {
        name: "fair_value_gap",
        weight: 0.15,
        confidence: if total > 0.0 { ((bull - bear).abs() / total) * (total / 3.0).min(1.0) } else { 0.0 },
        direction,
    }
}

impl Analyst for TechnicalAnalyst {
    fn kind(&self) -> AnalystKind {
        AnalystKind::Technical
    }

    fn analyze(&self, candidate: &Candidate, ctx: &AnalysisContext) -> Result<AnalystFinding, AnalystError> {
        let history = candidate
            .history
            .as_ref()
            .ok_or_else(|| AnalystError::DataUnavailable("price history feed unavailable".into()))?;
        let bars = patterns::bars(history, ctx.lookback_bars.max(MIN_BARS));
        if bars.len() < MIN_BARS {
            return Err(AnalystError::DataUnavailable(format!(
                "need {MIN_BARS} bars, have {}",
                bars.len()
            )));
        }
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();

        let mut signals = Vec::with_capacity(5);

        let cusum = patterns::cusum(&closes);
        signals.push(Signal {
            name: "cusum",
            weight: 0.35,
            confidence: cusum.as_ref().map_or(0.0, |c| c.break_confidence),
            direction: cusum.as_ref().map_or(Direction::Neutral, |c| c.latest),
        });

        let structure = patterns::market_structure(&bars, 3);
        signals.push(Signal { name: "structure", weight: 0.30, confidence: 0.8, direction: structure });

        signals.push(zone_signal(&bars, candidate.last_price));
        signals.push(gap_signal(&bars));

        let (abs_dir, abs_strength) = patterns::absorption(&bars).unwrap_or((Direction::Neutral, 0.0));
        signals.push(Signal { name: "absorption", weight: 0.15, confidence: abs_strength, direction: abs_dir });

        let total_weight: f64 = signals.iter().map(|s| s.weight).sum();
        let score = signals.iter().map(Signal::contribution).sum::<f64>() / total_weight;
        let evidence = signals
            .iter()
            .filter(|s| s.direction != Direction::Neutral)
            .map(|s| s.weight * s.confidence)
            .sum::<f64>()
            / total_weight;
        let coverage = (bars.len() as f64 / ctx.lookback_bars.max(1) as f64).min(1.0);

        let active: Vec<String> = signals
            .iter()
            .filter(|s| s.direction != Direction::Neutral && s.confidence > 0.0)
            .map(|s| format!("{} {} ({:.2})", s.name, s.direction, s.confidence))
            .collect();
        let rationale = if active.is_empty() {
            format!("no pattern signal over {} bars", bars.len())
        } else {
            active.join(", ")
        };

        debug!(symbol = %candidate.symbol, score, evidence, "technical analysis complete");
        Ok(AnalystFinding::new(AnalystKind::Technical, score, evidence * coverage, rationale))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[test]
    fn strong_uptrend_scores_bullish() {
        let mut c = test_support::candidate("UP", 150.0);
        c.history = Some(test_support::history(120, 150.0, 0.01));
        let f = TechnicalAnalyst.analyze(&c, &test_support::context()).unwrap();
        assert!(f.score > 0.0, "{f:?}");
        assert!(f.confidence > 0.0);
    }

    #[test]
    fn strong_downtrend_scores_bearish() {
        let mut c = test_support::candidate("DOWN", 50.0);
        c.history = Some(test_support::history(120, 50.0, -0.01));
        let f = TechnicalAnalyst.analyze(&c, &test_support::context()).unwrap();
        assert!(f.score < 0.0, "{f:?}");
    }

    #[test]
    fn short_history_is_data_unavailable() {
        let mut c = test_support::candidate("NEW", 10.0);
        c.history = Some(test_support::history(10, 10.0, 0.0));
        assert!(matches!(
            TechnicalAnalyst.analyze(&c, &test_support::context()),
            Err(AnalystError::DataUnavailable(_))
        ));
        c.history = None;
        assert!(TechnicalAnalyst.analyze(&c, &test_support::context()).is_err());
    }
}
