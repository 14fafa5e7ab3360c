// =============================================================================
// Sentiment Analyst — sweeps and unusual volume from the order-flow feed
// =============================================================================
//
// Tag weights:
//   sweep           magnitude (urgency, already in [0, 1])
//   unusual volume  0.5 at 2x average, 1.0 at 3x and above
//
// score      = sum(weight * bias) / sum(weight)        (neutral tags dilute)
// confidence = min(1, sum(weight) / 2) * directional share
// =============================================================================

use crate::analyst::{AnalysisContext, Analyst};
use crate::errors::AnalystError;
use crate::types::{AnalystFinding, AnalystKind, Candidate, Direction, FlowType, OrderFlowTag};

pub struct SentimentAnalyst;

fn tag_weight(tag: &OrderFlowTag) -> f64 {
    match tag.flow_type {
        FlowType::Sweep => tag.magnitude.clamp(0.0, 1.0),
        FlowType::UnusualVolume if tag.magnitude > 3.0 => 1.0,
        FlowType::UnusualVolume => (0.5 + (tag.magnitude - 2.0) * 0.5).clamp(0.0, 1.0),
    }
}

fn bias_sign(d: Direction) -> f64 {
    match d {
        Direction::Bullish => 1.0,
        Direction::Bearish => -1.0,
        Direction::Neutral => 0.0,
    }
}

impl Analyst for SentimentAnalyst {
    fn kind(&self) -> AnalystKind {
        AnalystKind::Sentiment
    }

    fn analyze(&self, candidate: &Candidate, _ctx: &AnalysisContext) -> Result<AnalystFinding, AnalystError> {
        let tags = candidate
            .order_flow
            .as_ref()
            .ok_or_else(|| AnalystError::DataUnavailable("order-flow feed unavailable".into()))?;

        if tags.is_empty() {
            return Ok(AnalystFinding::new(AnalystKind::Sentiment, 0.0, 0.2, "no unusual order flow"));
        }

        let total: f64 = tags.iter().map(tag_weight).sum();
        if total <= 0.0 {
            return Ok(AnalystFinding::new(AnalystKind::Sentiment, 0.0, 0.1, "order flow below significance"));
        }
        let signed: f64 = tags.iter().map(|t| tag_weight(t) * bias_sign(t.bias)).sum();
        let directional: f64 = tags
            .iter()
            .filter(|t| t.bias != Direction::Neutral)
            .map(tag_weight)
            .sum();

        let score = signed / total;
        let confidence = (total / 2.0).min(1.0) * (directional / total);

        let sweeps = tags.iter().filter(|t| t.flow_type == FlowType::Sweep).count();
        let unusual = tags.len() - sweeps;
        let rationale = format!(
            "{sweeps} sweep(s), {unusual} unusual-volume tag(s), net flow {:+.2}",
            score
        );
        Ok(AnalystFinding::new(AnalystKind::Sentiment, score, confidence, rationale))
    }
}
