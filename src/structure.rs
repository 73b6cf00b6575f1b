//! C3 — StructureAnalyzer: swing points, S/R clustering, SMC structure
//! (BOS/CHOCH, liquidity pools, order blocks, FVGs, premium/discount),
//! price legs, Fibonacci levels, and a best-effort Elliott-wave hint.
//! Structure and SMC analyses may return empty/None without invalidating a
//! diagnostics pass (`spec.md` §4.13).

use serde::{Deserialize, Serialize};

use crate::types::{clamp, Bar};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwingKind {
    High,
    Low,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Swing {
    pub idx: usize,
    pub kind: SwingKind,
    pub price: f64,
    pub time: i64,
}

/// `find_swings(bars, left, right)`: indices where a bar's high (resp. low)
/// is the max (resp. min) in `[i-left, i+right]`. Ties resolve left-most.
pub fn find_swings(bars: &[Bar], left: usize, right: usize) -> Vec<Swing> {
    let n = bars.len();
    let mut out = Vec::new();
    if n == 0 {
        return out;
    }
    for i in 0..n {
        if i < left || i + right >= n {
            continue;
        }
        let window = &bars[i - left..=i + right];
        let max_high = window.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
        let min_low = window.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
        // Tie resolves left-most: only accept if no earlier bar in the
        // window shares the extreme.
        let earlier = &window[..left];
        if bars[i].high == max_high && !earlier.iter().any(|b| b.high == max_high) {
            out.push(Swing {
                idx: i,
                kind: SwingKind::High,
                price: bars[i].high,
                time: bars[i].timestamp_ms,
            });
        }
        if bars[i].low == min_low && !earlier.iter().any(|b| b.low == min_low) {
            out.push(Swing {
                idx: i,
                kind: SwingKind::Low,
                price: bars[i].low,
                time: bars[i].timestamp_ms,
            });
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LevelKind {
    Support,
    Resistance,
    LiquidityHigh,
    LiquidityLow,
    OrderblockDemand,
    OrderblockSupply,
    Fvg,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Level {
    pub price: f64,
    pub kind: LevelKind,
    pub strength: f64,
    pub touched_times: u32,
    pub time_first: i64,
    pub time_last: i64,
}

/// Groups prices whose relative distance is within `tolerance_bps` basis
/// points of each other; returns the mean of each group.
pub fn cluster_levels(prices: &[f64], tolerance_bps: f64) -> Vec<f64> {
    if prices.is_empty() {
        return Vec::new();
    }
    let mut sorted = prices.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let tol = tolerance_bps / 10_000.0;
    let mut clusters: Vec<Vec<f64>> = Vec::new();
    let mut current = vec![sorted[0]];
    for &p in &sorted[1..] {
        let anchor = current.iter().sum::<f64>() / current.len() as f64;
        if anchor.abs() > 1e-12 && (p - anchor).abs() / anchor <= tol {
            current.push(p);
        } else {
            clusters.push(std::mem::take(&mut current));
            current = vec![p];
        }
    }
    clusters.push(current);
    clusters
        .into_iter()
        .map(|g| g.iter().sum::<f64>() / g.len() as f64)
        .collect()
}

/// `strength = 0.4*touch_score + 0.3*age_score + 0.3*volume_score`, each
/// clamped to [0,1].
fn level_strength(touches: u32, age_bars: usize, total_bars: usize, volume_ratio: f64) -> f64 {
    let touch_score = clamp(touches as f64 / 5.0, 0.0, 1.0);
    let age_score = if total_bars == 0 {
        0.0
    } else {
        clamp(age_bars as f64 / total_bars as f64, 0.0, 1.0)
    };
    let volume_score = clamp(volume_ratio / 2.0, 0.0, 1.0);
    clamp(0.4 * touch_score + 0.3 * age_score + 0.3 * volume_score, 0.0, 1.0)
}

/// Builds support/resistance `Level`s from clustered swing prices.
pub fn build_levels(bars: &[Bar], swings: &[Swing], tolerance_bps: f64) -> Vec<Level> {
    if bars.is_empty() || swings.is_empty() {
        return Vec::new();
    }
    let current_price = bars.last().unwrap().close;
    let total_bars = bars.len();
    let highs: Vec<f64> = swings.iter().filter(|s| s.kind == SwingKind::High).map(|s| s.price).collect();
    let lows: Vec<f64> = swings.iter().filter(|s| s.kind == SwingKind::Low).map(|s| s.price).collect();

    let mut levels = Vec::new();
    for price in cluster_levels(&highs, tolerance_bps)
        .into_iter()
        .chain(cluster_levels(&lows, tolerance_bps))
    {
        let touching: Vec<&Swing> = swings
            .iter()
            .filter(|s| (s.price - price).abs() / price.max(1e-9) <= tolerance_bps / 10_000.0)
            .collect();
        if touching.is_empty() {
            continue;
        }
        let touches = touching.len() as u32;
        let first_idx = touching.iter().map(|s| s.idx).min().unwrap();
        let last_idx = touching.iter().map(|s| s.idx).max().unwrap();
        let age_bars = total_bars - first_idx;
        let avg_vol = bars.iter().filter_map(|b| b.volume).sum::<f64>() / total_bars as f64;
        let vol_at_level = touching
            .iter()
            .filter_map(|s| bars[s.idx].volume)
            .sum::<f64>()
            / touches as f64;
        let volume_ratio = if avg_vol.abs() < 1e-12 { 1.0 } else { vol_at_level / avg_vol };

        let kind = if price < current_price { LevelKind::Support } else { LevelKind::Resistance };
        levels.push(Level {
            price,
            kind,
            strength: level_strength(touches, age_bars, total_bars, volume_ratio),
            touched_times: touches,
            time_first: bars[first_idx].timestamp_ms,
            time_last: bars[last_idx].timestamp_ms,
        });
    }
    levels
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ZoneKind {
    Premium,
    Discount,
    Neutral,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BosChoch {
    pub is_bos: bool,
    pub bullish: bool,
    pub strength: f64,
    pub idx: usize,
    pub price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fvg {
    pub bullish: bool,
    pub low: f64,
    pub high: f64,
    pub idx: usize,
    pub filled: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SmcContext {
    pub last_bos: Option<BosChoch>,
    pub last_choch: Option<BosChoch>,
    pub liquidity_above: Vec<Level>,
    pub liquidity_below: Vec<Level>,
    pub order_blocks_demand: Vec<Level>,
    pub order_blocks_supply: Vec<Level>,
    pub fvgs: Vec<Fvg>,
    pub premium_zone_start: Option<f64>,
    pub discount_zone_end: Option<f64>,
    pub current_position: Option<ZoneKind>,
}

/// BOS: the last swing high exceeding the prior swing high by >= 1%;
/// CHOCH: following an up-BOS, the first lower-low. Symmetric downward.
fn detect_bos_choch(swings: &[Swing]) -> (Option<BosChoch>, Option<BosChoch>) {
    let highs: Vec<&Swing> = swings.iter().filter(|s| s.kind == SwingKind::High).collect();
    let lows: Vec<&Swing> = swings.iter().filter(|s| s.kind == SwingKind::Low).collect();

    let mut last_bos: Option<BosChoch> = None;
    for w in highs.windows(2) {
        let (prior, current) = (w[0], w[1]);
        let excess = (current.price - prior.price) / prior.price;
        if excess >= 0.01 {
            last_bos = Some(BosChoch {
                is_bos: true,
                bullish: true,
                strength: clamp(excess / 0.05, 0.0, 1.0),
                idx: current.idx,
                price: current.price,
            });
        }
    }
    for w in lows.windows(2) {
        let (prior, current) = (w[0], w[1]);
        let excess = (prior.price - current.price) / prior.price;
        if excess >= 0.01 {
            let candidate = BosChoch {
                is_bos: true,
                bullish: false,
                strength: clamp(excess / 0.05, 0.0, 1.0),
                idx: current.idx,
                price: current.price,
            };
            if last_bos.as_ref().map(|b| candidate.idx > b.idx).unwrap_or(true) {
                last_bos = Some(candidate);
            }
        }
    }

    let mut last_choch: Option<BosChoch> = None;
    if let Some(bos) = &last_bos {
        if bos.bullish {
            if let Some(lower_low) = lows.iter().find(|s| s.idx > bos.idx) {
                last_choch = Some(BosChoch {
                    is_bos: false,
                    bullish: false,
                    strength: bos.strength,
                    idx: lower_low.idx,
                    price: lower_low.price,
                });
            }
        } else if let Some(higher_high) = highs.iter().find(|s| s.idx > bos.idx) {
            last_choch = Some(BosChoch {
                is_bos: false,
                bullish: true,
                strength: bos.strength,
                idx: higher_high.idx,
                price: higher_high.price,
            });
        }
    }
    (last_bos, last_choch)
}

/// Liquidity pools: clusters of >=2 equal highs/lows within tolerance.
fn detect_liquidity_pools(swings: &[Swing], tolerance_bps: f64) -> (Vec<Level>, Vec<Level>) {
    let highs: Vec<f64> = swings.iter().filter(|s| s.kind == SwingKind::High).map(|s| s.price).collect();
    let lows: Vec<f64> = swings.iter().filter(|s| s.kind == SwingKind::Low).map(|s| s.price).collect();
    let tol = tolerance_bps / 10_000.0;

    let pools_from = |values: &[f64], kind: LevelKind| -> Vec<Level> {
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let mut groups: Vec<Vec<f64>> = Vec::new();
        let mut current = Vec::new();
        for &v in &sorted {
            if current.is_empty() {
                current.push(v);
                continue;
            }
            let anchor = current.iter().sum::<f64>() / current.len() as f64;
            if anchor.abs() > 1e-12 && (v - anchor).abs() / anchor <= tol {
                current.push(v);
            } else {
                groups.push(std::mem::take(&mut current));
                current = vec![v];
            }
        }
        if !current.is_empty() {
            groups.push(current);
        }
        groups
            .into_iter()
            .filter(|g| g.len() >= 2)
            .map(|g| {
                let price = g.iter().sum::<f64>() / g.len() as f64;
                Level {
                    price,
                    kind,
                    strength: clamp(g.len() as f64 / 4.0, 0.0, 1.0),
                    touched_times: g.len() as u32,
                    time_first: 0,
                    time_last: 0,
                }
            })
            .collect()
    };

    (pools_from(&highs, LevelKind::LiquidityHigh), pools_from(&lows, LevelKind::LiquidityLow))
}

/// Order blocks: searching back <= lookback bars from a BOS, the last
/// counter-direction candle with body >= 60% of range and volume ratio > 1.2.
fn find_order_block(bars: &[Bar], bos_idx: usize, bullish_bos: bool, lookback: usize) -> Option<Level> {
    if bars.is_empty() {
        return None;
    }
    let avg_vol = {
        let total: f64 = bars.iter().filter_map(|b| b.volume).sum();
        let count = bars.iter().filter(|b| b.volume.is_some()).count().max(1);
        total / count as f64
    };
    let start = bos_idx.saturating_sub(lookback);
    for i in (start..bos_idx).rev() {
        let bar = &bars[i];
        let range = bar.high - bar.low;
        if range.abs() < 1e-12 {
            continue;
        }
        let body = (bar.close - bar.open).abs();
        let body_ratio = body / range;
        let is_counter_bearish_candle = bar.close < bar.open;
        let is_counter_bullish_candle = bar.close > bar.open;
        // An up-BOS is preceded by a demand block: the last down candle.
        let counter_matches = if bullish_bos { is_counter_bearish_candle } else { is_counter_bullish_candle };
        if !counter_matches || body_ratio < 0.6 {
            continue;
        }
        let vol = bar.volume.unwrap_or(0.0);
        let vol_ratio = if avg_vol.abs() < 1e-12 { 1.0 } else { vol / avg_vol };
        if vol_ratio <= 1.2 {
            continue;
        }
        let kind = if bullish_bos { LevelKind::OrderblockDemand } else { LevelKind::OrderblockSupply };
        let price = if bullish_bos { bar.low } else { bar.high };
        return Some(Level {
            price,
            kind,
            strength: clamp(vol_ratio / 3.0, 0.0, 1.0),
            touched_times: 1,
            time_first: bar.timestamp_ms,
            time_last: bar.timestamp_ms,
        });
    }
    None
}

/// FVG: bullish when `low[i+1] > high[i-1]`; bearish symmetric. Marked
/// filled when a later bar trades back into the gap.
fn detect_fvgs(bars: &[Bar]) -> Vec<Fvg> {
    let n = bars.len();
    let mut out = Vec::new();
    if n < 3 {
        return out;
    }
    for i in 1..n - 1 {
        if bars[i + 1].low > bars[i - 1].high {
            let (low, high) = (bars[i - 1].high, bars[i + 1].low);
            let filled = bars[i + 2..].iter().any(|b| b.low <= low);
            out.push(Fvg { bullish: true, low, high, idx: i, filled });
        } else if bars[i + 1].high < bars[i - 1].low {
            let (low, high) = (bars[i + 1].high, bars[i - 1].low);
            let filled = bars[i + 2..].iter().any(|b| b.high >= high);
            out.push(Fvg { bullish: false, low, high, idx: i, filled });
        }
    }
    out
}

/// Premium/discount: midpoint of the highest recent swing-high to lowest
/// recent swing-low partitions the range; `current_position` reflects where
/// the last close sits.
fn premium_discount(bars: &[Bar], swings: &[Swing]) -> (Option<f64>, Option<f64>, Option<ZoneKind>) {
    let highs: Vec<f64> = swings.iter().filter(|s| s.kind == SwingKind::High).map(|s| s.price).collect();
    let lows: Vec<f64> = swings.iter().filter(|s| s.kind == SwingKind::Low).map(|s| s.price).collect();
    if highs.is_empty() || lows.is_empty() || bars.is_empty() {
        return (None, None, None);
    }
    let range_high = highs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let range_low = lows.iter().cloned().fold(f64::INFINITY, f64::min);
    if range_high <= range_low {
        return (None, None, None);
    }
    let mid = (range_high + range_low) / 2.0;
    let close = bars.last().unwrap().close;
    let position = if close > mid { ZoneKind::Premium } else if close < mid { ZoneKind::Discount } else { ZoneKind::Neutral };
    (Some(mid), Some(mid), Some(position))
}

pub fn build_smc_context(bars: &[Bar], swings: &[Swing], lookback: usize, tolerance_bps: f64) -> SmcContext {
    if bars.is_empty() || swings.is_empty() {
        return SmcContext::default();
    }
    let (last_bos, last_choch) = detect_bos_choch(swings);
    let (liquidity_above, liquidity_below) = detect_liquidity_pools(swings, tolerance_bps);
    let mut demand = Vec::new();
    let mut supply = Vec::new();
    if let Some(bos) = &last_bos {
        if let Some(ob) = find_order_block(bars, bos.idx, bos.bullish, lookback) {
            if bos.bullish {
                demand.push(ob);
            } else {
                supply.push(ob);
            }
        }
    }
    let fvgs = detect_fvgs(bars);
    let (premium_start, discount_end, position) = premium_discount(bars, swings);

    SmcContext {
        last_bos,
        last_choch,
        liquidity_above,
        liquidity_below,
        order_blocks_demand: demand,
        order_blocks_supply: supply,
        fvgs,
        premium_zone_start: premium_start,
        discount_zone_end: discount_end,
        current_position: position,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LegDirection {
    Up,
    Down,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceLeg {
    pub direction: LegDirection,
    pub start_idx: usize,
    pub end_idx: usize,
    pub length_pct: f64,
    pub is_impulse: bool,
}

/// Walks consecutive swing pairs into legs, drops legs below `min_leg_pct`,
/// classifies impulse legs (length and average volume both above the mean).
pub fn build_legs(bars: &[Bar], swings: &[Swing], min_leg_pct: f64) -> Vec<PriceLeg> {
    if swings.len() < 2 {
        return Vec::new();
    }
    let mut ordered = swings.to_vec();
    ordered.sort_by_key(|s| s.idx);

    let mut candidates = Vec::new();
    for w in ordered.windows(2) {
        let (a, b) = (&w[0], &w[1]);
        if a.kind == b.kind {
            continue;
        }
        let length_pct = (b.price - a.price).abs() / a.price.max(1e-9) * 100.0;
        if length_pct < min_leg_pct {
            continue;
        }
        let direction = if b.price > a.price { LegDirection::Up } else { LegDirection::Down };
        let avg_volume = if a.idx < b.idx && b.idx < bars.len() {
            bars[a.idx..=b.idx].iter().filter_map(|x| x.volume).sum::<f64>()
                / (b.idx - a.idx + 1) as f64
        } else {
            0.0
        };
        candidates.push((a.idx, b.idx, length_pct, direction, avg_volume));
    }
    if candidates.is_empty() {
        return Vec::new();
    }
    let mean_length = candidates.iter().map(|c| c.2).sum::<f64>() / candidates.len() as f64;
    let mean_volume = candidates.iter().map(|c| c.4).sum::<f64>() / candidates.len() as f64;

    candidates
        .into_iter()
        .map(|(start_idx, end_idx, length_pct, direction, avg_volume)| PriceLeg {
            direction,
            start_idx,
            end_idx,
            length_pct,
            is_impulse: length_pct > mean_length && avg_volume > mean_volume,
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FibonacciAnalysis {
    pub anchor_low: f64,
    pub anchor_high: f64,
    pub retracements: Vec<(f64, f64)>,
    pub extensions: Vec<(f64, f64)>,
}

const RETRACEMENT_RATIOS: [f64; 7] = [0.0, 0.236, 0.382, 0.5, 0.618, 0.786, 1.0];
const EXTENSION_RATIOS: [f64; 4] = [1.272, 1.618, 2.0, 2.618];

/// Fibonacci retracements/extensions anchored on the last swing pair.
/// Returns `None` ("unknown") rather than failing when fewer than two
/// swings are available.
pub fn fibonacci_analysis(swings: &[Swing]) -> Option<FibonacciAnalysis> {
    let mut ordered = swings.to_vec();
    ordered.sort_by_key(|s| s.idx);
    let last_two: Vec<&Swing> = ordered.iter().rev().take(2).collect();
    if last_two.len() < 2 {
        return None;
    }
    let (a, b) = (last_two[1], last_two[0]);
    let (low, high) = if a.price < b.price { (a.price, b.price) } else { (b.price, a.price) };
    let range = high - low;
    if range.abs() < 1e-12 {
        return None;
    }
    let retracements = RETRACEMENT_RATIOS.iter().map(|r| (*r, high - range * r)).collect();
    let extensions = EXTENSION_RATIOS.iter().map(|r| (*r, high + range * (r - 1.0))).collect();
    Some(FibonacciAnalysis { anchor_low: low, anchor_high: high, retracements, extensions })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElliottWaveAnalysis {
    pub pattern_hint: String,
    pub current_wave: Option<u8>,
    pub confidence: f64,
}

/// Heuristic Elliott-wave labelling over the last 5-9 pivots. Best-effort:
/// returns an "unknown" hint with zero confidence rather than failing.
pub fn elliott_wave_hint(swings: &[Swing]) -> ElliottWaveAnalysis {
    let mut ordered = swings.to_vec();
    ordered.sort_by_key(|s| s.idx);
    let pivots: Vec<&Swing> = ordered.iter().rev().take(9).collect();
    if pivots.len() < 5 {
        return ElliottWaveAnalysis { pattern_hint: "unknown".into(), current_wave: None, confidence: 0.0 };
    }
    let mut pivots: Vec<&Swing> = pivots.into_iter().rev().collect();
    pivots.dedup_by_key(|s| s.kind);
    if pivots.len() < 5 {
        return ElliottWaveAnalysis { pattern_hint: "unknown".into(), current_wave: None, confidence: 0.0 };
    }
    let alternating = pivots.windows(2).all(|w| w[0].kind != w[1].kind);
    if !alternating {
        return ElliottWaveAnalysis { pattern_hint: "unknown".into(), current_wave: None, confidence: 0.1 };
    }
    let last_five = &pivots[pivots.len() - 5..];
    let monotone_up = last_five[0].price < last_five[2].price && last_five[2].price < last_five[4].price;
    let monotone_down = last_five[0].price > last_five[2].price && last_five[2].price > last_five[4].price;
    if monotone_up || monotone_down {
        ElliottWaveAnalysis {
            pattern_hint: "impulse-5".into(),
            current_wave: Some(5),
            confidence: 0.4,
        }
    } else {
        ElliottWaveAnalysis { pattern_hint: "corrective-abc".into(), current_wave: Some(3), confidence: 0.3 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zigzag_bars() -> Vec<Bar> {
        let mut bars = Vec::new();
        let mut price = 100.0;
        for i in 0..60 {
            let swing = ((i as f64) / 5.0).sin() * 10.0;
            price = 100.0 + swing + i as f64 * 0.1;
            bars.push(Bar::new(
                1000 * i as i64,
                price - 0.3,
                price + 1.0,
                price - 1.0,
                price,
                Some(100.0 + (i % 7) as f64 * 10.0),
            ));
        }
        bars
    }

    #[test]
    fn find_swings_respects_window() {
        let bars = zigzag_bars();
        let swings = find_swings(&bars, 2, 2);
        assert!(!swings.is_empty());
        for s in &swings {
            assert!(s.idx >= 2 && s.idx + 2 < bars.len());
        }
    }

    #[test]
    fn cluster_levels_groups_close_prices() {
        let prices = [100.0, 100.05, 150.0, 150.1, 200.0];
        let clusters = cluster_levels(&prices, 50.0);
        assert_eq!(clusters.len(), 3);
    }

    #[test]
    fn empty_input_returns_empty_structure() {
        let smc = build_smc_context(&[], &[], 20, 10.0);
        assert!(smc.last_bos.is_none());
        assert!(smc.fvgs.is_empty());
    }

    #[test]
    fn fvg_detection_finds_gap() {
        let bars = vec![
            Bar::new(0, 10.0, 10.5, 9.5, 10.0, Some(10.0)),
            Bar::new(1, 10.0, 11.0, 10.0, 10.9, Some(10.0)),
            Bar::new(2, 12.0, 12.5, 11.8, 12.2, Some(10.0)),
        ];
        let fvgs = detect_fvgs(&bars);
        assert_eq!(fvgs.len(), 1);
        assert!(fvgs[0].bullish);
    }

    #[test]
    fn fibonacci_returns_none_with_fewer_than_two_swings() {
        assert!(fibonacci_analysis(&[]).is_none());
    }
}
