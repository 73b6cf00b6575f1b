//! C2 — FeatureExtractor: collapses indicator series into discrete states
//! (trend, volatility, liquidity, structure, derivatives regime) and detects
//! divergences. Fails closed: empty bars yield default features rather than
//! an error (`spec.md` §4.2).

use serde::{Deserialize, Serialize};

use crate::indicators::IndicatorSet;
use crate::types::Bar;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendState {
    Bullish,
    Bearish,
    Neutral,
}

impl std::fmt::Display for TrendState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TrendState::Bullish => "BULLISH",
            TrendState::Bearish => "BEARISH",
            TrendState::Neutral => "NEUTRAL",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolatilityState {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for VolatilityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            VolatilityState::Low => "LOW",
            VolatilityState::Medium => "MEDIUM",
            VolatilityState::High => "HIGH",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiquidityState {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for LiquidityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LiquidityState::Low => "LOW",
            LiquidityState::Medium => "MEDIUM",
            LiquidityState::High => "HIGH",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StructureState {
    HigherHigh,
    LowerLow,
    Range,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FundingState {
    ExtremeLong,
    Long,
    Neutral,
    Short,
    ExtremeShort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OiState {
    RapidUp,
    ModerateUp,
    Flat,
    ModerateDown,
    RapidDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CvdState {
    Buying,
    Selling,
    Flat,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DerivativesRegime {
    pub funding_state: Option<FundingState>,
    pub oi_state: Option<OiState>,
    pub cvd_state: Option<CvdState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DivergenceSide {
    Bullish,
    Bearish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DivergenceStrength {
    Weak,
    Medium,
    Strong,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Divergence {
    pub indicator: String,
    pub side: DivergenceSide,
    pub strength: DivergenceStrength,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Features {
    pub trend: TrendState,
    pub volatility: VolatilityState,
    pub liquidity: LiquidityState,
    pub structure: StructureState,
    pub derivatives_regime: Option<DerivativesRegime>,
    pub divergences: Vec<Divergence>,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            trend: TrendState::Neutral,
            volatility: VolatilityState::Medium,
            liquidity: LiquidityState::Medium,
            structure: StructureState::Range,
            derivatives_regime: None,
            divergences: Vec::new(),
        }
    }
}

/// Raw derivatives snapshot from the external `DerivativesProvider`
/// (`spec.md` §6). All fields optional; the provider may return an empty map.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DerivativesSnapshot {
    pub funding_rate: Option<f64>,
    pub open_interest: Option<f64>,
    pub oi_change_pct: Option<f64>,
    pub cvd: Option<f64>,
}

pub struct FeatureThresholds {
    pub volatility_high: f64,
    pub volatility_low: f64,
    pub liquidity_high: f64,
    pub liquidity_low: f64,
    pub rsi_bull: f64,
    pub rsi_bear: f64,
    pub funding_extreme: f64,
    pub funding_elevated: f64,
    pub oi_rapid_pct: f64,
    pub oi_moderate_pct: f64,
}

impl Default for FeatureThresholds {
    fn default() -> Self {
        Self {
            volatility_high: 1.5,
            volatility_low: 0.7,
            liquidity_high: 1.5,
            liquidity_low: 0.5,
            rsi_bull: 60.0,
            rsi_bear: 40.0,
            funding_extreme: 0.01,
            funding_elevated: 0.001,
            oi_rapid_pct: 10.0,
            oi_moderate_pct: 5.0,
        }
    }
}

/// Trend: a simple vote over EMA stack, EMA50-vs-200, RSI, MACD histogram
/// sign. Mean >= 0.3 bullish, <= -0.3 bearish, else neutral (`spec.md` §4.2).
fn classify_trend(bars: &[Bar], ind: &IndicatorSet, th: &FeatureThresholds) -> TrendState {
    let mut votes = Vec::new();
    let close = bars.last().map(|b| b.close);

    if let (Some(ema20), Some(ema50), Some(close)) = (ind.last("ema20"), ind.last("ema50"), close) {
        let ema200 = ind.last("ema200");
        if let Some(ema200) = ema200 {
            if ema20 > ema50 && ema50 > ema200 && close > ema20 {
                votes.push(1.0);
            } else if ema20 < ema50 && ema50 < ema200 && close < ema20 {
                votes.push(-1.0);
            } else {
                votes.push(0.0);
            }
        } else if ema20 > ema50 {
            votes.push(0.5);
        } else {
            votes.push(-0.5);
        }
    }

    if let (Some(ema50), Some(ema200)) = (ind.last("ema50"), ind.last("ema200")) {
        votes.push(if ema50 > ema200 { 1.0 } else { -1.0 });
    }

    if let Some(rsi) = ind.last("rsi14") {
        if rsi > th.rsi_bull {
            votes.push(1.0);
        } else if rsi < th.rsi_bear {
            votes.push(-1.0);
        } else {
            votes.push(0.0);
        }
    }

    if let Some(hist) = ind.last("macd_hist") {
        votes.push(if hist > 0.0 { 1.0 } else if hist < 0.0 { -1.0 } else { 0.0 });
    }

    if votes.is_empty() {
        return TrendState::Neutral;
    }
    let mean = votes.iter().sum::<f64>() / votes.len() as f64;
    if mean >= 0.3 {
        TrendState::Bullish
    } else if mean <= -0.3 {
        TrendState::Bearish
    } else {
        TrendState::Neutral
    }
}

fn classify_volatility(ind: &IndicatorSet, th: &FeatureThresholds) -> VolatilityState {
    let atr_series = match ind.get("atr14") {
        Some(s) => s,
        None => return VolatilityState::Medium,
    };
    let defined: Vec<f64> = atr_series.iter().filter_map(|v| *v).collect();
    if defined.is_empty() {
        return VolatilityState::Medium;
    }
    let now = *defined.last().unwrap();
    let mean = defined.iter().sum::<f64>() / defined.len() as f64;
    if mean.abs() < 1e-12 {
        return VolatilityState::Medium;
    }
    let ratio = now / mean;
    if ratio > th.volatility_high {
        VolatilityState::High
    } else if ratio < th.volatility_low {
        VolatilityState::Low
    } else {
        VolatilityState::Medium
    }
}

fn classify_liquidity(bars: &[Bar], th: &FeatureThresholds) -> LiquidityState {
    if !bars.iter().any(|b| b.volume.is_some()) {
        return LiquidityState::Low;
    }
    let start = bars.len().saturating_sub(20);
    let recent = &bars[start..];
    let volumes: Vec<f64> = recent.iter().map(|b| b.volume.unwrap_or(0.0)).collect();
    if volumes.is_empty() {
        return LiquidityState::Low;
    }
    let mean = volumes.iter().sum::<f64>() / volumes.len() as f64;
    let now = bars.last().and_then(|b| b.volume).unwrap_or(0.0);
    if mean.abs() < 1e-12 {
        return LiquidityState::Low;
    }
    let ratio = now / mean;
    if ratio > th.liquidity_high {
        LiquidityState::High
    } else if ratio < th.liquidity_low {
        LiquidityState::Low
    } else {
        LiquidityState::Medium
    }
}

/// Structure over the last ~20 bars: a new swing high above the prior block
/// is `HigherHigh`, a new swing low below is `LowerLow`, else `Range`.
fn classify_structure(bars: &[Bar]) -> StructureState {
    if bars.len() < 10 {
        return StructureState::Range;
    }
    let window = 20.min(bars.len());
    let recent = &bars[bars.len() - window..];
    let mid = recent.len() / 2;
    let (first_half, second_half) = recent.split_at(mid);
    let first_high = first_half.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
    let first_low = first_half.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
    let second_high = second_half.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
    let second_low = second_half.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);

    if second_high > first_high && second_low >= first_low {
        StructureState::HigherHigh
    } else if second_low < first_low && second_high <= first_high {
        StructureState::LowerLow
    } else {
        StructureState::Range
    }
}

fn classify_derivatives(
    deriv: Option<DerivativesSnapshot>,
    th: &FeatureThresholds,
) -> Option<DerivativesRegime> {
    let deriv = deriv?;
    let mut regime = DerivativesRegime::default();
    let mut any = false;

    if let Some(f) = deriv.funding_rate {
        any = true;
        regime.funding_state = Some(if f > th.funding_extreme {
            FundingState::ExtremeLong
        } else if f > th.funding_elevated {
            FundingState::Long
        } else if f < -th.funding_extreme {
            FundingState::ExtremeShort
        } else if f < -th.funding_elevated {
            FundingState::Short
        } else {
            FundingState::Neutral
        });
    }

    if let Some(oi) = deriv.oi_change_pct {
        any = true;
        regime.oi_state = Some(if oi > th.oi_rapid_pct {
            OiState::RapidUp
        } else if oi > th.oi_moderate_pct {
            OiState::ModerateUp
        } else if oi < -th.oi_rapid_pct {
            OiState::RapidDown
        } else if oi < -th.oi_moderate_pct {
            OiState::ModerateDown
        } else {
            OiState::Flat
        });
    }

    if let Some(cvd) = deriv.cvd {
        any = true;
        regime.cvd_state = Some(if cvd > 1e-9 {
            CvdState::Buying
        } else if cvd < -1e-9 {
            CvdState::Selling
        } else {
            CvdState::Flat
        });
    }

    if any { Some(regime) } else { None }
}

/// Detects bearish/bullish divergences between price and an oscillator over
/// the last swing pair: price makes a new extreme the oscillator doesn't
/// confirm (`spec.md` §4.2).
fn detect_divergences(bars: &[Bar], ind: &IndicatorSet) -> Vec<Divergence> {
    let mut out = Vec::new();
    if bars.len() < 10 {
        return out;
    }
    let window = 20.min(bars.len());
    let recent = &bars[bars.len() - window..];
    let offset = bars.len() - window;

    let price_low_idx = (0..recent.len())
        .min_by(|&a, &b| recent[a].low.partial_cmp(&recent[b].low).unwrap())
        .unwrap();
    let price_high_idx = (0..recent.len())
        .max_by(|&a, &b| recent[a].high.partial_cmp(&recent[b].high).unwrap())
        .unwrap();

    for name in ["rsi14", "macd_hist", "stoch_rsi_k", "obv"] {
        let series = match ind.get(name) {
            Some(s) => s,
            None => continue,
        };
        // Bullish divergence: price makes a lower low near the recent swing
        // low, the oscillator makes a higher low.
        if price_low_idx > 0 && price_low_idx < recent.len() - 1 {
            let prior_low_window = &recent[..price_low_idx];
            if let Some((prior_idx, prior_bar)) = prior_low_window
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| a.low.partial_cmp(&b.low).unwrap())
            {
                if recent[price_low_idx].low < prior_bar.low {
                    if let (Some(osc_now), Some(osc_prior)) =
                        (series[offset + price_low_idx], series[offset + prior_idx])
                    {
                        if osc_now > osc_prior {
                            let strength = strength_from_gap(osc_now - osc_prior);
                            out.push(Divergence {
                                indicator: name.to_string(),
                                side: DivergenceSide::Bullish,
                                strength,
                            });
                        }
                    }
                }
            }
        }
        // Bearish divergence: price makes a higher high, oscillator a lower high.
        if price_high_idx > 0 && price_high_idx < recent.len() - 1 {
            let prior_high_window = &recent[..price_high_idx];
            if let Some((prior_idx, prior_bar)) = prior_high_window
                .iter()
                .enumerate()
                .max_by(|(_, a), (_, b)| a.high.partial_cmp(&b.high).unwrap())
            {
                if recent[price_high_idx].high > prior_bar.high {
                    if let (Some(osc_now), Some(osc_prior)) =
                        (series[offset + price_high_idx], series[offset + prior_idx])
                    {
                        if osc_now < osc_prior {
                            let strength = strength_from_gap(osc_prior - osc_now);
                            out.push(Divergence {
                                indicator: name.to_string(),
                                side: DivergenceSide::Bearish,
                                strength,
                            });
                        }
                    }
                }
            }
        }
    }
    out
}

fn strength_from_gap(gap: f64) -> DivergenceStrength {
    let gap = gap.abs();
    if gap > 15.0 {
        DivergenceStrength::Strong
    } else if gap > 5.0 {
        DivergenceStrength::Medium
    } else {
        DivergenceStrength::Weak
    }
}

/// Computes `Features` for one symbol/timeframe pass. Returns the default
/// (neutral/medium/range) struct on empty input, never an error.
pub fn extract_features(
    bars: &[Bar],
    indicators: &IndicatorSet,
    derivatives: Option<DerivativesSnapshot>,
) -> Features {
    if bars.is_empty() {
        return Features::default();
    }
    let th = FeatureThresholds::default();
    Features {
        trend: classify_trend(bars, indicators, &th),
        volatility: classify_volatility(indicators, &th),
        liquidity: classify_liquidity(bars, &th),
        structure: classify_structure(bars),
        derivatives_regime: classify_derivatives(derivatives, &th),
        divergences: detect_divergences(bars, indicators),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::compute_indicators;

    fn uptrend_bars(n: usize) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                let close = 100.0 * 1.002_f64.powi(i as i32);
                Bar::new(1000 * i as i64, close * 0.999, close * 1.01, close * 0.99, close, Some(1000.0))
            })
            .collect()
    }

    #[test]
    fn empty_bars_yield_defaults() {
        let f = extract_features(&[], &IndicatorSet::default(), None);
        assert_eq!(f.trend, TrendState::Neutral);
        assert_eq!(f.structure, StructureState::Range);
    }

    #[test]
    fn strong_uptrend_is_classified_bullish() {
        let bars = uptrend_bars(200);
        let ind = compute_indicators(&bars);
        let f = extract_features(&bars, &ind, None);
        assert_eq!(f.trend, TrendState::Bullish);
    }

    #[test]
    fn missing_volume_is_low_liquidity() {
        let bars: Vec<Bar> = uptrend_bars(60)
            .into_iter()
            .map(|mut b| {
                b.volume = None;
                b
            })
            .collect();
        let ind = compute_indicators(&bars);
        let f = extract_features(&bars, &ind, None);
        assert_eq!(f.liquidity, LiquidityState::Low);
    }
}
