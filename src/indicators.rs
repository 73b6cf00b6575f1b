//! C1 — IndicatorCalculator: a pure transform of OHLCV bars into named
//! indicator series. Every series has exactly `bars.len()` entries; warm-up
//! positions are `None`, never a fabricated value (`spec.md` §8 property 1).
//! Deterministic and side-effect-free; missing volume degrades gracefully
//! rather than failing (`spec.md` §4.1).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::MIN_FULL_BARS;
use crate::types::Bar;

pub type Series = Vec<Option<f64>>;

/// Named indicator series, all aligned to the same input bar slice.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndicatorSet {
    pub series: HashMap<String, Series>,
    /// True when warm-up (`spec.md` §4.1 MIN_FULL_BARS) was not satisfied
    /// and only the minimal subset was computed.
    pub minimal: bool,
}

impl IndicatorSet {
    pub fn get(&self, name: &str) -> Option<&Series> {
        self.series.get(name)
    }

    pub fn last(&self, name: &str) -> Option<f64> {
        self.series.get(name).and_then(|s| s.last().copied().flatten())
    }

    fn insert(&mut self, name: &str, s: Series) {
        self.series.insert(name.to_string(), s);
    }
}

fn closes(bars: &[Bar]) -> Vec<f64> {
    bars.iter().map(|b| b.close).collect()
}

fn volumes(bars: &[Bar]) -> Vec<f64> {
    bars.iter().map(|b| b.volume.unwrap_or(0.0)).collect()
}

fn has_volume(bars: &[Bar]) -> bool {
    bars.iter().any(|b| b.volume.is_some())
}

/// SMA(n) over closes.
pub fn sma(values: &[f64], period: usize) -> Series {
    let n = values.len();
    let mut out = vec![None; n];
    if period == 0 || n < period {
        return out;
    }
    let mut window_sum: f64 = values[..period].iter().sum();
    out[period - 1] = Some(window_sum / period as f64);
    for i in period..n {
        window_sum += values[i] - values[i - period];
        out[i] = Some(window_sum / period as f64);
    }
    out
}

/// EMA(n) over closes, seeded with the SMA of the first `period` values.
pub fn ema(values: &[f64], period: usize) -> Series {
    let n = values.len();
    let mut out = vec![None; n];
    if period == 0 || n < period {
        return out;
    }
    let multiplier = 2.0 / (period as f64 + 1.0);
    let seed: f64 = values[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = Some(seed);
    let mut prev = seed;
    for i in period..n {
        let v = (values[i] - prev) * multiplier + prev;
        out[i] = Some(v);
        prev = v;
    }
    out
}

/// RSI(14), Wilder smoothing. `0 <= rsi <= 100` (spec.md §8 property 2).
pub fn rsi(values: &[f64], period: usize) -> Series {
    let n = values.len();
    let mut out = vec![None; n];
    if n < period + 1 {
        return out;
    }
    let mut gains = 0.0;
    let mut losses = 0.0;
    for i in 1..=period {
        let change = values[i] - values[i - 1];
        if change >= 0.0 {
            gains += change;
        } else {
            losses -= change;
        }
    }
    let mut avg_gain = gains / period as f64;
    let mut avg_loss = losses / period as f64;
    out[period] = Some(rsi_from_avgs(avg_gain, avg_loss));

    for i in (period + 1)..n {
        let change = values[i] - values[i - 1];
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
        out[i] = Some(rsi_from_avgs(avg_gain, avg_loss));
    }
    out
}

fn rsi_from_avgs(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    (100.0 - 100.0 / (1.0 + rs)).clamp(0.0, 100.0)
}

/// StochRSI(rsi_period, stoch_period, k_smooth, d_smooth). Returns (K, D),
/// both in `[0, 100]`.
pub fn stoch_rsi(
    values: &[f64],
    rsi_period: usize,
    stoch_period: usize,
    k_smooth: usize,
    d_smooth: usize,
) -> (Series, Series) {
    let n = values.len();
    let rsi_series = rsi(values, rsi_period);
    let mut raw_stoch = vec![None; n];

    for i in 0..n {
        if i + 1 < stoch_period {
            continue;
        }
        let window: Vec<f64> = rsi_series[i + 1 - stoch_period..=i]
            .iter()
            .filter_map(|v| *v)
            .collect();
        if window.len() < stoch_period {
            continue;
        }
        let min = window.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = window.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let cur = match rsi_series[i] {
            Some(v) => v,
            None => continue,
        };
        let value = if (max - min).abs() < 1e-9 {
            0.0
        } else {
            (cur - min) / (max - min) * 100.0
        };
        raw_stoch[i] = Some(value.clamp(0.0, 100.0));
    }

    let k = smooth_sma_over_option_series(&raw_stoch, k_smooth);
    let d = smooth_sma_over_option_series(&k, d_smooth);
    (k, d)
}

/// SMA over an already-`Option`-valued series: undefined input propagates as
/// undefined output rather than treating a gap as zero.
fn smooth_sma_over_option_series(values: &Series, period: usize) -> Series {
    let n = values.len();
    let mut out = vec![None; n];
    if period == 0 {
        return values.clone();
    }
    for i in 0..n {
        if i + 1 < period {
            continue;
        }
        let window = &values[i + 1 - period..=i];
        if window.iter().any(|v| v.is_none()) {
            continue;
        }
        let sum: f64 = window.iter().map(|v| v.unwrap()).sum();
        out[i] = Some((sum / period as f64).clamp(0.0, 100.0));
    }
    out
}

/// MACD(fast, slow, signal): returns (macd, signal, histogram).
pub fn macd(values: &[f64], fast: usize, slow: usize, signal: usize) -> (Series, Series, Series) {
    let n = values.len();
    let fast_ema = ema(values, fast);
    let slow_ema = ema(values, slow);
    let mut macd_line = vec![None; n];
    for i in 0..n {
        if let (Some(f), Some(s)) = (fast_ema[i], slow_ema[i]) {
            macd_line[i] = Some(f - s);
        }
    }
    let macd_values: Vec<f64> = macd_line.iter().map(|v| v.unwrap_or(0.0)).collect();
    let first_defined = macd_line.iter().position(|v| v.is_some());
    let signal_line = match first_defined {
        Some(start) => {
            let mut sig = vec![None; n];
            let tail = &macd_values[start..];
            let ema_tail = ema(tail, signal);
            for (i, v) in ema_tail.into_iter().enumerate() {
                sig[start + i] = v;
            }
            sig
        }
        None => vec![None; n],
    };
    let mut hist = vec![None; n];
    for i in 0..n {
        if let (Some(m), Some(s)) = (macd_line[i], signal_line[i]) {
            hist[i] = Some(m - s);
        }
    }
    (macd_line, signal_line, hist)
}

/// Bollinger(period, k sigma): returns (upper, middle, lower).
pub fn bollinger(values: &[f64], period: usize, k: f64) -> (Series, Series, Series) {
    let n = values.len();
    let mid = sma(values, period);
    let mut upper = vec![None; n];
    let mut lower = vec![None; n];
    for i in 0..n {
        if i + 1 < period {
            continue;
        }
        let window = &values[i + 1 - period..=i];
        if let Some(m) = mid[i] {
            let variance: f64 =
                window.iter().map(|v| (v - m).powi(2)).sum::<f64>() / period as f64;
            let sd = variance.sqrt();
            upper[i] = Some(m + k * sd);
            lower[i] = Some(m - k * sd);
        }
    }
    (upper, mid, lower)
}

/// ATR(period): rolling mean of the true range.
pub fn atr(bars: &[Bar], period: usize) -> Series {
    let n = bars.len();
    let mut tr = vec![0.0; n];
    for i in 0..n {
        let prev_close = if i > 0 { bars[i - 1].close } else { bars[i].open };
        let a = bars[i].high - bars[i].low;
        let b = (bars[i].high - prev_close).abs();
        let c = (bars[i].low - prev_close).abs();
        tr[i] = a.max(b).max(c);
    }
    sma(&tr, period)
}

/// OBV: cumulative volume signed by the direction of close-to-close change.
/// Missing volume collapses to an all-zero series (spec.md §8 boundary).
pub fn obv(bars: &[Bar]) -> Series {
    let n = bars.len();
    let mut out = vec![None; n];
    if n == 0 {
        return out;
    }
    let mut running = 0.0;
    out[0] = Some(0.0);
    for i in 1..n {
        let vol = bars[i].volume.unwrap_or(0.0);
        if bars[i].close > bars[i - 1].close {
            running += vol;
        } else if bars[i].close < bars[i - 1].close {
            running -= vol;
        }
        out[i] = Some(running);
    }
    out
}

/// CMF(period): Chaikin Money Flow.
pub fn cmf(bars: &[Bar], period: usize) -> Series {
    let n = bars.len();
    let mut mfv = vec![0.0; n];
    let mut vol = vec![0.0; n];
    for i in 0..n {
        let range = bars[i].high - bars[i].low;
        let v = bars[i].volume.unwrap_or(0.0);
        vol[i] = v;
        if range.abs() < 1e-12 {
            mfv[i] = 0.0;
            continue;
        }
        let mfm = ((bars[i].close - bars[i].low) - (bars[i].high - bars[i].close)) / range;
        mfv[i] = mfm * v;
    }
    let mut out = vec![None; n];
    for i in 0..n {
        if i + 1 < period {
            continue;
        }
        let mfv_sum: f64 = mfv[i + 1 - period..=i].iter().sum();
        let vol_sum: f64 = vol[i + 1 - period..=i].iter().sum();
        out[i] = Some(if vol_sum.abs() < 1e-12 { 0.0 } else { mfv_sum / vol_sum });
    }
    out
}

/// ADX(period) with +DI/-DI. Wilder's DMI.
pub fn adx(bars: &[Bar], period: usize) -> (Series, Series, Series) {
    let n = bars.len();
    let mut plus_dm = vec![0.0; n];
    let mut minus_dm = vec![0.0; n];
    let mut tr = vec![0.0; n];
    for i in 1..n {
        let up_move = bars[i].high - bars[i - 1].high;
        let down_move = bars[i - 1].low - bars[i].low;
        plus_dm[i] = if up_move > down_move && up_move > 0.0 { up_move } else { 0.0 };
        minus_dm[i] = if down_move > up_move && down_move > 0.0 { down_move } else { 0.0 };
        let prev_close = bars[i - 1].close;
        let a = bars[i].high - bars[i].low;
        let b = (bars[i].high - prev_close).abs();
        let c = (bars[i].low - prev_close).abs();
        tr[i] = a.max(b).max(c);
    }

    let mut plus_di = vec![None; n];
    let mut minus_di = vec![None; n];
    let mut adx_out = vec![None; n];

    if n <= period * 2 {
        return (adx_out, plus_di, minus_di);
    }

    let mut atr_w = tr[1..=period].iter().sum::<f64>();
    let mut plus_dm_w = plus_dm[1..=period].iter().sum::<f64>();
    let mut minus_dm_w = minus_dm[1..=period].iter().sum::<f64>();

    let mut dx_series: Vec<Option<f64>> = vec![None; n];

    for i in period..n {
        if i > period {
            atr_w = atr_w - atr_w / period as f64 + tr[i];
            plus_dm_w = plus_dm_w - plus_dm_w / period as f64 + plus_dm[i];
            minus_dm_w = minus_dm_w - minus_dm_w / period as f64 + minus_dm[i];
        }
        let pdi = if atr_w.abs() < 1e-12 { 0.0 } else { 100.0 * plus_dm_w / atr_w };
        let mdi = if atr_w.abs() < 1e-12 { 0.0 } else { 100.0 * minus_dm_w / atr_w };
        plus_di[i] = Some(pdi);
        minus_di[i] = Some(mdi);
        let denom = pdi + mdi;
        dx_series[i] = Some(if denom.abs() < 1e-12 { 0.0 } else { 100.0 * (pdi - mdi).abs() / denom });
    }

    let first_dx = period;
    let last = n;
    if last > first_dx + period {
        let seed: f64 = dx_series[first_dx..first_dx + period]
            .iter()
            .map(|v| v.unwrap_or(0.0))
            .sum::<f64>()
            / period as f64;
        adx_out[first_dx + period - 1] = Some(seed);
        let mut prev = seed;
        for i in (first_dx + period)..last {
            let dx = dx_series[i].unwrap_or(0.0);
            let v = (prev * (period as f64 - 1.0) + dx) / period as f64;
            adx_out[i] = Some(v);
            prev = v;
        }
    }
    (adx_out, plus_di, minus_di)
}

/// Ichimoku (tenkan, kijun, senkou_a, senkou_b); displacement is not applied
/// to the returned series (no forward shift) — callers that need the
/// plotted cloud position apply `displacement` themselves.
pub fn ichimoku(
    bars: &[Bar],
    tenkan_period: usize,
    kijun_period: usize,
    senkou_b_period: usize,
) -> (Series, Series, Series, Series) {
    let n = bars.len();
    let midpoint = |period: usize| -> Series {
        let mut out = vec![None; n];
        for i in 0..n {
            if i + 1 < period {
                continue;
            }
            let window = &bars[i + 1 - period..=i];
            let hi = window.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
            let lo = window.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
            out[i] = Some((hi + lo) / 2.0);
        }
        out
    };
    let tenkan = midpoint(tenkan_period);
    let kijun = midpoint(kijun_period);
    let senkou_b = midpoint(senkou_b_period);
    let mut senkou_a = vec![None; n];
    for i in 0..n {
        if let (Some(t), Some(k)) = (tenkan[i], kijun[i]) {
            senkou_a[i] = Some((t + k) / 2.0);
        }
    }
    (tenkan, kijun, senkou_a, senkou_b)
}

/// WaveTrend(channel, average): returns (wt1, wt2).
pub fn wavetrend(bars: &[Bar], channel: usize, average: usize) -> (Series, Series) {
    let n = bars.len();
    let hlc3: Vec<f64> = bars.iter().map(|b| (b.high + b.low + b.close) / 3.0).collect();
    let esa = ema(&hlc3, channel);
    let mut abs_diff = vec![0.0; n];
    for i in 0..n {
        if let Some(e) = esa[i] {
            abs_diff[i] = (hlc3[i] - e).abs();
        }
    }
    let d = ema(&abs_diff, channel);
    let mut ci = vec![None; n];
    for i in 0..n {
        if let (Some(e), Some(dv)) = (esa[i], d[i]) {
            if dv.abs() > 1e-12 {
                ci[i] = Some((hlc3[i] - e) / (0.015 * dv));
            } else {
                ci[i] = Some(0.0);
            }
        }
    }
    let ci_values: Vec<f64> = ci.iter().map(|v| v.unwrap_or(0.0)).collect();
    let first = ci.iter().position(|v| v.is_some());
    let wt1 = match first {
        Some(start) => {
            let mut out = vec![None; n];
            let tail = ema(&ci_values[start..], average);
            for (i, v) in tail.into_iter().enumerate() {
                out[start + i] = v;
            }
            out
        }
        None => vec![None; n],
    };
    let wt1_values: Vec<f64> = wt1.iter().map(|v| v.unwrap_or(0.0)).collect();
    let wt2 = sma(&wt1_values, 4);
    let mut wt2_masked = vec![None; n];
    for i in 0..n {
        if wt1[i].is_some() {
            wt2_masked[i] = wt2[i];
        }
    }
    (wt1, wt2_masked)
}

/// STC(fast, slow, cycle): Schaff Trend Cycle, a stochastic-smoothed MACD.
/// Returns values in `[0, 100]`.
pub fn stc(values: &[f64], fast: usize, slow: usize, cycle: usize) -> Series {
    let n = values.len();
    let (macd_line, _, _) = macd(values, fast, slow, 9.min(cycle.max(1)));
    let macd_values: Vec<f64> = macd_line.iter().map(|v| v.unwrap_or(f64::NAN)).collect();

    let stoch_of = |vals: &[f64], period: usize| -> Vec<Option<f64>> {
        let len = vals.len();
        let mut out = vec![None; len];
        for i in 0..len {
            if i + 1 < period {
                continue;
            }
            let window: Vec<f64> = vals[i + 1 - period..=i]
                .iter()
                .copied()
                .filter(|v| !v.is_nan())
                .collect();
            if window.len() < period {
                continue;
            }
            let min = window.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = window.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            if (max - min).abs() < 1e-9 {
                out[i] = Some(50.0);
            } else {
                out[i] = Some((vals[i] - min) / (max - min) * 100.0);
            }
        }
        out
    };

    let k1 = stoch_of(&macd_values, cycle);
    let k1_values: Vec<f64> = k1.iter().map(|v| v.unwrap_or(f64::NAN)).collect();
    let d1 = ema_option(&k1_values, 3);
    let d1_values: Vec<f64> = d1.iter().map(|v| v.unwrap_or(f64::NAN)).collect();
    let k2 = stoch_of(&d1_values, cycle);
    let k2_values: Vec<f64> = k2.iter().map(|v| v.unwrap_or(f64::NAN)).collect();
    let stc_series = ema_option(&k2_values, 3);

    let mut out = vec![None; n];
    for i in 0..n {
        if let Some(v) = stc_series[i] {
            if !v.is_nan() {
                out[i] = Some(v.clamp(0.0, 100.0));
            }
        }
    }
    out
}

/// EMA that tolerates NaN-marked gaps by treating them as "not yet started".
fn ema_option(values: &[f64], period: usize) -> Series {
    let n = values.len();
    let mut out = vec![None; n];
    let start = values.iter().position(|v| !v.is_nan());
    let start = match start {
        Some(s) => s,
        None => return out,
    };
    if n - start < period {
        return out;
    }
    let tail: Vec<f64> = values[start..].to_vec();
    let computed = ema(&tail, period);
    for (i, v) in computed.into_iter().enumerate() {
        out[start + i] = v;
    }
    out
}

/// VWAP anchored from the start of the window; falls back to SMA(20) when
/// volume is entirely absent (spec.md §4.1).
pub fn vwap(bars: &[Bar]) -> Series {
    let n = bars.len();
    if !has_volume(bars) {
        return sma(&closes(bars), 20);
    }
    let mut out = vec![None; n];
    let mut cum_pv = 0.0;
    let mut cum_v = 0.0;
    for i in 0..n {
        let typical = (bars[i].high + bars[i].low + bars[i].close) / 3.0;
        let v = bars[i].volume.unwrap_or(0.0);
        cum_pv += typical * v;
        cum_v += v;
        out[i] = Some(if cum_v.abs() < 1e-12 { typical } else { cum_pv / cum_v });
    }
    out
}

/// volume_spike(period): ratio of current volume to its rolling mean,
/// defaulting to 1.0 when volume is missing.
pub fn volume_spike(bars: &[Bar], period: usize) -> Series {
    let n = bars.len();
    if !has_volume(bars) {
        return vec![Some(1.0); n];
    }
    let vols = volumes(bars);
    let mean = sma(&vols, period);
    let mut out = vec![None; n];
    for i in 0..n {
        if let Some(m) = mean[i] {
            out[i] = Some(if m.abs() < 1e-12 { 1.0 } else { vols[i] / m });
        }
    }
    out
}

/// Builds the full (or minimal) indicator set for a bar slice.
pub fn compute_indicators(bars: &[Bar]) -> IndicatorSet {
    let mut set = IndicatorSet::default();
    let closes = closes(bars);

    set.insert("ema20", ema(&closes, 20));
    set.insert("ema50", ema(&closes, 50));
    set.insert("sma20", sma(&closes, 20));
    set.insert("rsi14", rsi(&closes, 14));
    set.insert("atr14", atr(bars, 14));
    set.insert("obv", obv(bars));
    set.insert("volume_spike20", volume_spike(bars, 20));
    set.insert("vwap", vwap(bars));
    let (bb_u, bb_m, bb_l) = bollinger(&closes, 20, 2.0);
    set.insert("bb_upper", bb_u);
    set.insert("bb_middle", bb_m);
    set.insert("bb_lower", bb_l);

    if bars.len() < MIN_FULL_BARS {
        set.minimal = true;
        return set;
    }

    set.insert("ema200", ema(&closes, 200.min(bars.len())));
    let (k, d) = stoch_rsi(&closes, 14, 14, 3, 3);
    set.insert("stoch_rsi_k", k);
    set.insert("stoch_rsi_d", d);
    let (macd_line, signal, hist) = macd(&closes, 12, 26, 9);
    set.insert("macd", macd_line);
    set.insert("macd_signal", signal);
    set.insert("macd_hist", hist);
    set.insert("cmf20", cmf(bars, 20));
    let (adx_s, plus_di, minus_di) = adx(bars, 14);
    set.insert("adx", adx_s);
    set.insert("plus_di", plus_di);
    set.insert("minus_di", minus_di);
    let (tenkan, kijun, senkou_a, senkou_b) = ichimoku(bars, 9, 26, 52);
    set.insert("ichimoku_tenkan", tenkan);
    set.insert("ichimoku_kijun", kijun);
    set.insert("ichimoku_senkou_a", senkou_a);
    set.insert("ichimoku_senkou_b", senkou_b);
    let (wt1, wt2) = wavetrend(bars, 10, 21);
    set.insert("wt1", wt1);
    set.insert("wt2", wt2);
    set.insert("stc", stc(&closes, 23, 50, 10));

    set
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic_uptrend(n: usize) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                let close = 100.0 * 1.002_f64.powi(i as i32);
                Bar::new(
                    1000 * i as i64,
                    close * 0.999,
                    close * 1.005,
                    close * 0.995,
                    close,
                    Some(1000.0),
                )
            })
            .collect()
    }

    #[test]
    fn series_length_matches_bars_and_warmup_is_undefined() {
        let bars = synthetic_uptrend(30);
        let closes = closes(&bars);
        let rsi_series = rsi(&closes, 14);
        assert_eq!(rsi_series.len(), bars.len());
        assert!(rsi_series[0].is_none());
        assert!(rsi_series[14].is_some());
    }

    #[test]
    fn rsi_stays_in_bounds() {
        let bars = synthetic_uptrend(250);
        let closes = closes(&bars);
        let rsi_series = rsi(&closes, 14);
        for v in rsi_series.into_iter().flatten() {
            assert!((0.0..=100.0).contains(&v));
        }
    }

    #[test]
    fn stoch_rsi_stays_in_bounds() {
        let bars = synthetic_uptrend(250);
        let closes = closes(&bars);
        let (k, d) = stoch_rsi(&closes, 14, 14, 3, 3);
        for v in k.into_iter().flatten() {
            assert!((0.0..=100.0).contains(&v));
        }
        for v in d.into_iter().flatten() {
            assert!((0.0..=100.0).contains(&v));
        }
    }

    #[test]
    fn stc_stays_in_bounds() {
        let bars = synthetic_uptrend(250);
        let closes = closes(&bars);
        let stc_series = stc(&closes, 23, 50, 10);
        for v in stc_series.into_iter().flatten() {
            assert!((0.0..=100.0).contains(&v));
        }
    }

    #[test]
    fn below_min_full_bars_yields_minimal_subset() {
        let bars = synthetic_uptrend(MIN_FULL_BARS - 1);
        let set = compute_indicators(&bars);
        assert!(set.minimal);
        assert!(set.get("macd").is_none());
        assert!(set.get("rsi14").is_some());
    }

    #[test]
    fn at_or_above_min_full_bars_yields_full_set() {
        let bars = synthetic_uptrend(MIN_FULL_BARS);
        let set = compute_indicators(&bars);
        assert!(!set.minimal);
        assert!(set.get("macd").is_some());
        assert!(set.get("ichimoku_tenkan").is_some());
    }

    #[test]
    fn missing_volume_falls_back_gracefully() {
        let bars: Vec<Bar> = synthetic_uptrend(200)
            .into_iter()
            .map(|mut b| {
                b.volume = None;
                b
            })
            .collect();
        let set = compute_indicators(&bars);
        // OBV collapses to all-zero, volume_spike defaults to 1.0.
        let obv_series = set.get("obv").unwrap();
        assert!(obv_series.iter().flatten().all(|v| *v == 0.0));
        let spike = set.get("volume_spike20").unwrap();
        assert!(spike.iter().flatten().all(|v| *v == 1.0));
    }

    #[test]
    fn empty_bars_do_not_panic() {
        let set = compute_indicators(&[]);
        assert!(set.minimal);
    }
}
