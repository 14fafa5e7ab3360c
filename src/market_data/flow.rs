// =============================================================================
// Order-flow tagging — raw option prints to sweep / unusual-volume tags
// =============================================================================
//
// Aggressor side follows Lee-Ready: a print above the quote midpoint is
// buyer-initiated, below is seller-initiated, at the midpoint the tick test
// against the previous print decides.
//
// A sweep is a burst of >= 3 prints spanning >= 2 exchanges inside one
// second; its magnitude is urgency = min(1, contracts / 1000).
//
// Unusual volume compares the latest session to the trailing average
// (20 sessions, at least 5 required); ratio > 2 is tagged.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::types::{Direction, FlowType, OrderFlowTag};

pub const SWEEP_WINDOW_MS: i64 = 1_000;
pub const SWEEP_MIN_PRINTS: usize = 3;
pub const SWEEP_MIN_EXCHANGES: usize = 2;
pub const UNUSUAL_LOOKBACK: usize = 20;
pub const UNUSUAL_MIN_HISTORY: usize = 5;
pub const UNUSUAL_RATIO: f64 = 2.0;

/// One option trade print.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradePrint {
    pub price: f64,
    pub contracts: f64,
    pub timestamp_ms: i64,
    pub exchange: String,
    pub bid: f64,
    pub ask: f64,
}

/// Lee-Ready aggressor classification.
pub fn classify_lee_ready(print: &TradePrint, prev_price: Option<f64>) -> Direction {
    let mid = 0.5 * (print.bid + print.ask);
    if print.price > mid {
        Direction::Bullish
    } else if print.price < mid {
        Direction::Bearish
    } else {
        match prev_price {
            Some(p) if print.price > p => Direction::Bullish,
            Some(p) if print.price < p => Direction::Bearish,
            _ => Direction::Neutral,
        }
    }
}

fn majority(buys: f64, sells: f64) -> Direction {
    if buys > sells {
        Direction::Bullish
    } else if sells > buys {
        Direction::Bearish
    } else {
        Direction::Neutral
    }
}

/// Find sweep bursts in time-ordered prints.
pub fn detect_sweeps(prints: &[TradePrint]) -> Vec<OrderFlowTag> {
    let mut tags = Vec::new();
    let mut start = 0;

    while start < prints.len() {
        let t0 = prints[start].timestamp_ms;
        let mut end = start;
        while end + 1 < prints.len() && prints[end + 1].timestamp_ms - t0 < SWEEP_WINDOW_MS {
            end += 1;
        }

        let burst = &prints[start..=end];
        let mut exchanges: Vec<&str> = burst.iter().map(|p| p.exchange.as_str()).collect();
        exchanges.sort_unstable();
        exchanges.dedup();

        if burst.len() >= SWEEP_MIN_PRINTS && exchanges.len() >= SWEEP_MIN_EXCHANGES {
            let (mut buys, mut sells, mut contracts) = (0.0, 0.0, 0.0);
            let mut prev = if start > 0 { Some(prints[start - 1].price) } else { None };
            for p in burst {
                match classify_lee_ready(p, prev) {
                    Direction::Bullish => buys += p.contracts,
                    Direction::Bearish => sells += p.contracts,
                    Direction::Neutral => {}
                }
                contracts += p.contracts;
                prev = Some(p.price);
            }
            tags.push(OrderFlowTag {
                flow_type: FlowType::Sweep,
                magnitude: (contracts / 1_000.0).min(1.0),
                bias: majority(buys, sells),
            });
            start = end + 1;
        } else {
            start += 1;
        }
    }
    tags
}

/// Tag the latest session's volume when it is more than twice the trailing
/// average.  `volumes` is oldest first; the last element is today.
pub fn unusual_volume(volumes: &[f64], bias: Direction) -> Option<OrderFlowTag> {
    let (today, history) = volumes.split_last()?;
    let window = &history[history.len().saturating_sub(UNUSUAL_LOOKBACK)..];
    if window.len() < UNUSUAL_MIN_HISTORY {
        return None;
    }
    let avg = window.iter().sum::<f64>() / window.len() as f64;
    if avg <= 0.0 {
        return None;
    }
    let ratio = today / avg;
    (ratio > UNUSUAL_RATIO).then_some(OrderFlowTag {
        flow_type: FlowType::UnusualVolume,
        magnitude: ratio,
        bias,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn print(price: f64, contracts: f64, ts: i64, ex: &str) -> TradePrint {
        TradePrint {
            price,
            contracts,
            timestamp_ms: ts,
            exchange: ex.to_string(),
            bid: 1.00,
            ask: 1.10,
        }
    }

    #[test]
    fn lee_ready_quote_and_tick_rules() {
        assert_eq!(classify_lee_ready(&print(1.10, 1.0, 0, "A"), None), Direction::Bullish);
        assert_eq!(classify_lee_ready(&print(1.00, 1.0, 0, "A"), None), Direction::Bearish);
        assert_eq!(classify_lee_ready(&print(1.05, 1.0, 0, "A"), Some(1.02)), Direction::Bullish);
        assert_eq!(classify_lee_ready(&print(1.05, 1.0, 0, "A"), Some(1.08)), Direction::Bearish);
        assert_eq!(classify_lee_ready(&print(1.05, 1.0, 0, "A"), None), Direction::Neutral);
    }

    #[test]
    fn sweep_needs_multiple_exchanges_within_a_second() {
        let single_venue = vec![
            print(1.10, 200.0, 0, "CBOE"),
            print(1.10, 200.0, 100, "CBOE"),
            print(1.10, 200.0, 200, "CBOE"),
        ];
        assert!(detect_sweeps(&single_venue).is_empty());

        let sweep = vec![
            print(1.10, 300.0, 0, "CBOE"),
            print(1.10, 400.0, 150, "ISE"),
            print(1.10, 500.0, 400, "PHLX"),
            print(1.05, 10.0, 5_000, "CBOE"),
        ];
        let tags = detect_sweeps(&sweep);
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].flow_type, FlowType::Sweep);
        assert_eq!(tags[0].magnitude, 1.0);
        assert_eq!(tags[0].bias, Direction::Bullish);
    }

    #[test]
    fn spread_out_prints_are_not_a_sweep() {
        let slow = vec![
            print(1.10, 300.0, 0, "CBOE"),
            print(1.10, 300.0, 1_500, "ISE"),
            print(1.10, 300.0, 3_000, "PHLX"),
        ];
        assert!(detect_sweeps(&slow).is_empty());
    }

    #[test]
    fn unusual_volume_ratio() {
        let mut vols = vec![100.0; 20];
        vols.push(350.0);
        let tag = unusual_volume(&vols, Direction::Bearish).unwrap();
        assert!((tag.magnitude - 3.5).abs() < 1e-12);
        assert_eq!(tag.bias, Direction::Bearish);

        let mut normal = vec![100.0; 20];
        normal.push(150.0);
        assert!(unusual_volume(&normal, Direction::Neutral).is_none());

        assert!(unusual_volume(&[10.0, 10.0, 100.0], Direction::Neutral).is_none());
    }
}
