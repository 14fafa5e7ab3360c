// =============================================================================
// Price-pattern detectors used by the technical analyst
// =============================================================================
//
// All detectors are stateless functions over a bounded window of daily bars:
//
//   cusum               — mean-shift structural breaks
//   order_blocks        — last opposite bar before a displacement move
//   fair_value_gaps     — three-bar imbalances not yet traded back into
//   market_structure    — higher-highs/higher-lows vs lower-highs/lower-lows
//   absorption          — heavy volume absorbed inside a narrow range
//
// CUSUM keeps two one-sided statistics around the window mean:
//
//   S+_t = max(0, S+_{t-1} + x_t - mu - k)
//   S-_t = max(0, S-_{t-1} - x_t + mu - k)
//
// with k = 0.5 sigma and a break declared above 4 sigma.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::types::{Direction, PriceHistory};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Last `lookback` bars of `history`; highs/lows fall back to the close when
/// the feed does not report them.
pub fn bars(history: &PriceHistory, lookback: usize) -> Vec<Bar> {
    let n = history.closes.len();
    let start = n.saturating_sub(lookback);
    (start..n)
        .map(|i| {
            let close = history.closes[i];
            Bar {
                high: history.highs.get(i).copied().unwrap_or(close).max(close),
                low: history.lows.get(i).copied().unwrap_or(close).min(close),
                close,
                volume: history.volumes.get(i).copied().unwrap_or(0.0),
            }
        })
        .collect()
}

// ── CUSUM ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CusumState {
    pub s_plus: f64,
    pub s_minus: f64,
    pub threshold: f64,
    pub bullish_break: bool,
    pub bearish_break: bool,
    /// Which break fired last, if any.
    pub latest: Direction,
    pub break_confidence: f64,
    pub bars_since_break: usize,
}

/// Returns `None` with fewer than 20 points or a flat series.
pub fn cusum(closes: &[f64]) -> Option<CusumState> {
    let n = closes.len();
    if n < 20 {
        return None;
    }
    let mean = closes.iter().sum::<f64>() / n as f64;
    let std = (closes.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64).sqrt();
    if std < f64::EPSILON {
        return None;
    }

    let threshold = 4.0 * std;
    let k = 0.5 * std;
    let (mut s_plus, mut s_minus) = (0.0f64, 0.0f64);
    let mut bullish_break = false;
    let mut bearish_break = false;
    let mut latest = Direction::Neutral;
    let mut bars_since_break = n;

    for (i, &x) in closes.iter().enumerate() {
        let dev = x - mean;
        s_plus = (s_plus + dev - k).max(0.0);
        s_minus = (s_minus - dev - k).max(0.0);
        if s_plus > threshold {
            bullish_break = true;
            latest = Direction::Bullish;
            bars_since_break = n - 1 - i;
            s_plus = 0.0;
        }
        if s_minus > threshold {
            bearish_break = true;
            latest = Direction::Bearish;
            bars_since_break = n - 1 - i;
            s_minus = 0.0;
        }
    }

    let break_confidence = if latest != Direction::Neutral {
        let recency = 1.0 - bars_since_break as f64 / n as f64;
        let strength = (s_plus.max(s_minus) / threshold).min(1.0);
        (recency * 0.6 + strength * 0.4).clamp(0.0, 1.0)
    } else {
        0.0
    };

    Some(CusumState {
        s_plus,
        s_minus,
        threshold,
        bullish_break,
        bearish_break,
        latest,
        break_confidence,
        bars_since_break,
    })
}

// ── Zones ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneKind {
    OrderBlock,
    FairValueGap,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub kind: ZoneKind,
    /// Bullish zones act as support, bearish as resistance.
    pub direction: Direction,
    pub low: f64,
    pub high: f64,
    pub index: usize,
}

fn mean_abs_move(bars: &[Bar]) -> f64 {
    if bars.len() < 2 {
        return 0.0;
    }
    bars.windows(2).map(|w| (w[1].close - w[0].close).abs()).sum::<f64>() / (bars.len() - 1) as f64
}

/// Order blocks that price has not closed through since they formed.
///
/// A bullish block is the last down-close bar before an up move larger than
/// `displacement` times the average bar-to-bar move; bearish is symmetric.
pub fn order_blocks(bars: &[Bar], displacement: f64) -> Vec<Zone> {
    let avg = mean_abs_move(bars);
    if avg <= 0.0 || bars.len() < 3 {
        return Vec::new();
    }

    let mut zones = Vec::new();
    for i in 1..bars.len() - 1 {
        let own = bars[i].close - bars[i - 1].close;
        let next = bars[i + 1].close - bars[i].close;
        let direction = if own < 0.0 && next > displacement * avg {
            Direction::Bullish
        } else if own > 0.0 && -next > displacement * avg {
            Direction::Bearish
        } else {
            continue;
        };
        let zone = Zone {
            kind: ZoneKind::OrderBlock,
            direction,
            low: bars[i].low,
            high: bars[i].high,
            index: i,
        };
        let mitigated = bars[i + 2..].iter().any(|b| match direction {
            Direction::Bullish => b.close < zone.low,
            _ => b.close > zone.high,
        });
        if !mitigated {
            zones.push(zone);
        }
    }
    zones
}

/// Three-bar imbalances whose gap has not been traded back through.
pub fn fair_value_gaps(bars: &[Bar]) -> Vec<Zone> {
    let mut zones = Vec::new();
    for i in 2..bars.len() {
        let (a, c) = (&bars[i - 2], &bars[i]);
        let zone = if c.low > a.high {
            Zone { kind: ZoneKind::FairValueGap, direction: Direction::Bullish, low: a.high, high: c.low, index: i }
        } else if c.high < a.low {
            Zone { kind: ZoneKind::FairValueGap, direction: Direction::Bearish, low: c.high, high: a.low, index: i }
        } else {
            continue;
        };
        let filled = bars[i + 1..].iter().any(|b| match zone.direction {
            Direction::Bullish => b.low <= zone.low,
            _ => b.high >= zone.high,
        });
        if !filled {
            zones.push(zone);
        }
    }
    zones
}

// ── Structure ───────────────────────────────────────────────────────────────

/// Compare the last two swing highs and swing lows (a swing point beats the
/// `radius` bars either side of it).
pub fn market_structure(bars: &[Bar], radius: usize) -> Direction {
    if bars.len() < 2 * radius + 3 {
        return Direction::Neutral;
    }
    let mut swing_highs = Vec::new();
    let mut swing_lows = Vec::new();
    for i in radius..bars.len() - radius {
        let around = || (i - radius..=i + radius).filter(move |&j| j != i);
        if around().all(|j| bars[i].high > bars[j].high) {
            swing_highs.push(bars[i].high);
        }
        if around().all(|j| bars[i].low < bars[j].low) {
            swing_lows.push(bars[i].low);
        }
    }
    let last_two = |v: &[f64]| (v.len() >= 2).then(|| (v[v.len() - 2], v[v.len() - 1]));
    match (last_two(swing_highs.as_slice()), last_two(swing_lows.as_slice())) {
        (Some((h1, h2)), Some((l1, l2))) if h2 > h1 && l2 > l1 => Direction::Bullish,
        (Some((h1, h2)), Some((l1, l2))) if h2 < h1 && l2 < l1 => Direction::Bearish,
        _ => Direction::Neutral,
    }
}

// ── Absorption ──────────────────────────────────────────────────────────────

/// Heavy volume (> 2x the prior 20-bar average) inside a narrow range
/// (< 0.5 average true range) on the latest bar.  The absorbing side is the
/// opposite of the preceding move: sellers absorbed after a decline reads
/// bullish.  Returns (direction, strength in [0, 1]).
pub fn absorption(bars: &[Bar]) -> Option<(Direction, f64)> {
    if bars.len() < 21 {
        return None;
    }
    let (last, prior) = bars.split_last()?;
    let window = &prior[prior.len() - 20..];
    let avg_volume = window.iter().map(|b| b.volume).sum::<f64>() / 20.0;
    let atr = window
        .windows(2)
        .map(|w| (w[1].high - w[1].low).max((w[1].high - w[0].close).abs()).max((w[1].low - w[0].close).abs()))
        .sum::<f64>()
        / 19.0;
    if avg_volume <= 0.0 || atr <= 0.0 {
        return None;
    }
    let volume_ratio = last.volume / avg_volume;
    let range_ratio = (last.high - last.low) / atr;
    if volume_ratio <= 2.0 || range_ratio >= 0.5 {
        return None;
    }
    let preceding = last.close - window[0].close;
    let direction = if preceding < 0.0 {
        Direction::Bullish
    } else if preceding > 0.0 {
        Direction::Bearish
    } else {
        Direction::Neutral
    };
    let strength = ((volume_ratio - 2.0) / 2.0).min(1.0) * (1.0 - range_ratio / 0.5);
    Some((direction, strength.clamp(0.0, 1.0)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(close: f64) -> Bar {
        Bar { high: close + 0.5, low: close - 0.5, close, volume: 100.0 }
    }

    #[test]
    fn cusum_insufficient_or_flat() {
        assert!(cusum(&[1.0; 10]).is_none());
        assert!(cusum(&[100.0; 50]).is_none());
    }

    #[test]
    fn cusum_detects_upward_shift() {
        let mut data = vec![100.0; 30];
        data.extend((0..20).map(|i| 100.0 + i as f64 * 3.0));
        let s = cusum(&data).unwrap();
        assert!(s.bullish_break);
        assert_eq!(s.latest, Direction::Bullish);
        assert!(s.break_confidence > 0.0);
    }

    #[test]
    fn bullish_order_block_survives_until_broken() {
        let mut bars: Vec<Bar> = [100.0, 100.5, 100.0, 99.8, 104.0, 104.5, 105.0].iter().map(|&c| bar(c)).collect();
        let zones = order_blocks(&bars, 2.0);
        assert!(zones.iter().any(|z| z.direction == Direction::Bullish && z.index == 3));

        bars.push(bar(98.0));
        let zones = order_blocks(&bars, 2.0);
        assert!(!zones.iter().any(|z| z.direction == Direction::Bullish && z.index == 3));
    }

    #[test]
    fn fair_value_gap_until_filled() {
        let mut bars = vec![bar(100.0), bar(102.0), bar(104.0)];
        let gaps = fair_value_gaps(&bars);
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].direction, Direction::Bullish);
        assert!((gaps[0].low - 100.5).abs() < 1e-12);
        assert!((gaps[0].high - 103.5).abs() < 1e-12);

        bars.push(bar(100.0));
        assert!(fair_value_gaps(&bars).iter().all(|z| z.index != 2));
    }

    #[test]
    fn structure_reads_uptrend_and_downtrend() {
        let zigzag_up: Vec<Bar> = (0..40)
            .map(|i| bar(100.0 + i as f64 * 0.5 + if i % 6 < 3 { 2.0 } else { -2.0 } * ((i % 3) as f64)))
            .collect();
        assert_eq!(market_structure(&zigzag_up, 2), Direction::Bullish);

        let zigzag_down: Vec<Bar> = zigzag_up.iter().rev().cloned().collect();
        assert_eq!(market_structure(&zigzag_down, 2), Direction::Bearish);
    }

    #[test]
    fn absorption_after_decline_is_bullish() {
        let mut bars: Vec<Bar> = (0..21).map(|i| bar(120.0 - i as f64)).collect();
        let last = bars.len() - 1;
        bars[last] = Bar { high: 100.1, low: 99.95, close: 100.0, volume: 500.0 };
        let (dir, strength) = absorption(&bars).unwrap();
        assert_eq!(dir, Direction::Bullish);
        assert!(strength > 0.0);

        bars[last].volume = 150.0;
        assert!(absorption(&bars).is_none());
    }
}
