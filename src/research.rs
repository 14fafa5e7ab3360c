// =============================================================================
// Research Debate — synthesise analyst findings into one verdict
// =============================================================================
//
// Each finding is weighted by |score| x confidence and lands on the bull
// side (score > 0) or the bear side (score < 0).  Zero-score findings and
// abstentions carry no weight but still count towards the confidence base.
//
//   bull = sum of bull weights        bear = sum of bear weights
//   conviction = |bull - bear| / sum(confidence)          (clamped to [0, 1])
//   direction  = side with the larger total; equal totals -> neutral, 0
//
// Pure and deterministic: ordering ties inside an argument chain break on
// analyst kind, never on anything random.
// =============================================================================

use crate::types::{AnalystFinding, DebateVerdict, Direction, WeightedFinding};

/// Argument chains cite at most this many findings per side.
const MAX_CITED: usize = 3;

fn weight(f: &AnalystFinding) -> f64 {
    f.score.abs() * f.confidence
}

/// One side's argument chain: strongest findings first by confidence.
fn argument_chain(findings: &[AnalystFinding], bullish: bool) -> Vec<String> {
    let mut side: Vec<&AnalystFinding> = findings
        .iter()
        .filter(|f| if bullish { f.score > 0.0 } else { f.score < 0.0 })
        .collect();
    side.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| (a.kind as u8).cmp(&(b.kind as u8)))
    });
    side.into_iter()
        .take(MAX_CITED)
        .map(|f| format!("[{} {:+.2} @ {:.2}] {}", f.kind, f.score, f.confidence, f.rationale))
        .collect()
}

/// Never fails: an empty input set is a neutral verdict with zero conviction.
pub fn debate(findings: &[AnalystFinding]) -> DebateVerdict {
    let contributions: Vec<WeightedFinding> = findings
        .iter()
        .map(|f| WeightedFinding { finding: f.clone(), weight: weight(f) })
        .collect();

    let bull: f64 = findings.iter().filter(|f| f.score > 0.0).map(weight).sum();
    let bear: f64 = findings.iter().filter(|f| f.score < 0.0).map(weight).sum();
    let confidence_base: f64 = findings.iter().map(|f| f.confidence).sum();

    let direction = if bull > bear {
        Direction::Bullish
    } else if bear > bull {
        Direction::Bearish
    } else {
        Direction::Neutral
    };
    let conviction = if direction == Direction::Neutral || confidence_base <= 0.0 {
        0.0
    } else {
        ((bull - bear).abs() / confidence_base).clamp(0.0, 1.0)
    };

    DebateVerdict {
        direction,
        conviction,
        bull_case: argument_chain(findings, true),
        bear_case: argument_chain(findings, false),
        contributions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::finding;
    use crate::types::AnalystKind;

    #[test]
    fn unanimous_full_confidence_is_full_bullish_conviction() {
        let findings: Vec<_> = AnalystKind::ALL.iter().map(|k| finding(*k, 1.0, 1.0)).collect();
        let v = debate(&findings);
        assert_eq!(v.direction, Direction::Bullish);
        assert_eq!(v.conviction, 1.0);
        assert_eq!(v.bull_case.len(), 3);
        assert!(v.bear_case.is_empty());
    }

    #[test]
    fn empty_set_is_neutral() {
        let v = debate(&[]);
        assert_eq!(v.direction, Direction::Neutral);
        assert_eq!(v.conviction, 0.0);
        assert!(v.contributions.is_empty());
    }

    #[test]
    fn equal_support_ties_to_neutral() {
        let v = debate(&[
            finding(AnalystKind::Fundamental, 0.6, 0.5),
            finding(AnalystKind::Technical, -0.3, 1.0),
        ]);
        assert_eq!(v.direction, Direction::Neutral);
        assert_eq!(v.conviction, 0.0);
        assert_eq!(v.bull_case.len(), 1);
        assert_eq!(v.bear_case.len(), 1);
    }

    #[test]
    fn larger_side_wins_with_partial_conviction() {
        let v = debate(&[
            finding(AnalystKind::Fundamental, -0.8, 0.9),
            finding(AnalystKind::Technical, -0.5, 0.6),
            finding(AnalystKind::Sentiment, 0.4, 0.5),
            AnalystFinding::abstain(AnalystKind::News, "feed down"),
        ]);
        assert_eq!(v.direction, Direction::Bearish);
        let expected = (0.72 + 0.30 - 0.20) / 2.0;
        assert!((v.conviction - expected).abs() < 1e-12);
        assert_eq!(v.contributions.len(), 4);
    }

    #[test]
    fn abstentions_alone_are_neutral() {
        let findings: Vec<_> = AnalystKind::ALL
            .iter()
            .map(|k| AnalystFinding::abstain(*k, "down"))
            .collect();
        let v = debate(&findings);
        assert_eq!(v.direction, Direction::Neutral);
        assert_eq!(v.conviction, 0.0);
    }

    #[test]
    fn repeated_runs_are_bit_identical() {
        let mut state = 0x9e37_79b9_7f4a_7c15u64;
        let mut next = || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 11) as f64 / (1u64 << 53) as f64
        };
        for _ in 0..50 {
            let findings: Vec<_> = AnalystKind::ALL
                .iter()
                .map(|k| finding(*k, next() * 2.0 - 1.0, next()))
                .collect();
            let first = debate(&findings);
            for _ in 0..5 {
                let again = debate(&findings);
                assert_eq!(again, first);
                assert_eq!(again.conviction.to_bits(), first.conviction.to_bits());
            }
        }
    }
}
