//! Six group scorers feeding `ScoringEngine` (`spec.md` §4.6): trend,
//! momentum, volume, volatility, structure, derivatives. Each returns a
//! `raw_score` in `[-2, 2]`; momentum additionally applies the momentum
//! regime modulation documented in `SPEC_FULL.md`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::features::{CvdState, Features, FundingState, OiState};
use crate::indicators::IndicatorSet;
use crate::market_analyzer::MarketPhase;
use crate::momentum::{MomentumAnalysis, MomentumRegime};
use crate::structure::SmcContext;
use crate::types::{clamp, Bias};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndicatorGroup {
    Trend,
    Momentum,
    Volume,
    Volatility,
    Structure,
    Derivatives,
}

impl IndicatorGroup {
    pub fn all() -> [IndicatorGroup; 6] {
        [
            IndicatorGroup::Trend,
            IndicatorGroup::Momentum,
            IndicatorGroup::Volume,
            IndicatorGroup::Volatility,
            IndicatorGroup::Structure,
            IndicatorGroup::Derivatives,
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupScore {
    pub group: IndicatorGroup,
    pub raw_score: f64,
    pub signals: HashMap<String, f64>,
    pub summary: String,
}

pub fn score_trend_group(indicators: &IndicatorSet, features: &Features) -> GroupScore {
    let mut signals = HashMap::new();
    let mut bullish = 0.0;
    let mut bearish = 0.0;

    let ema_dir = |series: &str| -> Option<bool> {
        let s = indicators.get(series)?;
        let n = s.len();
        if n < 2 {
            return None;
        }
        Some(s[n - 1]? > s[n - 2]?)
    };
    if let (Some(e20), Some(e50), Some(e200)) = (ema_dir("ema20"), ema_dir("ema50"), ema_dir("ema200")) {
        if e20 && e50 && e200 {
            bullish += 3.0;
            signals.insert("ema".into(), 1.5);
        } else if !e20 && !e50 && !e200 {
            bearish += 3.0;
            signals.insert("ema".into(), -1.5);
        } else {
            signals.insert("ema".into(), 0.0);
        }
    }

    if let (Some(adx), Some(plus_di), Some(minus_di)) =
        (indicators.last("adx"), indicators.last("plus_di"), indicators.last("minus_di"))
    {
        if adx > 25.0 {
            if plus_di > minus_di {
                bullish += 1.0;
                signals.insert("adx".into(), 0.5);
            } else if minus_di > plus_di {
                bearish += 1.0;
                signals.insert("adx".into(), -0.5);
            }
        }
    }

    if let (Some(tenkan), Some(kijun)) = (indicators.last("ichimoku_tenkan"), indicators.last("ichimoku_kijun")) {
        if tenkan > kijun {
            bullish += 0.5;
            signals.insert("ichimoku".into(), 0.25);
        } else {
            bearish += 0.5;
            signals.insert("ichimoku".into(), -0.25);
        }
    }

    match features.structure {
        crate::features::StructureState::HigherHigh => {
            bullish += 2.0;
            signals.insert("structure".into(), 1.0);
        }
        crate::features::StructureState::LowerLow => {
            bearish += 2.0;
            signals.insert("structure".into(), -1.0);
        }
        crate::features::StructureState::Range => {
            signals.insert("structure".into(), 0.0);
        }
    }

    match features.trend {
        crate::features::TrendState::Bullish => {
            bullish += 1.0;
            signals.insert("trend_state".into(), 0.5);
        }
        crate::features::TrendState::Bearish => {
            bearish += 1.0;
            signals.insert("trend_state".into(), -0.5);
        }
        crate::features::TrendState::Neutral => {
            signals.insert("trend_state".into(), 0.0);
        }
    }

    let raw_score = clamp((bullish - bearish) / 3.0, -2.0, 2.0);
    let summary = if raw_score > 1.0 {
        "strong bullish trend"
    } else if raw_score > 0.3 {
        "weak bullish trend"
    } else if raw_score < -1.0 {
        "strong bearish trend"
    } else if raw_score < -0.3 {
        "weak bearish trend"
    } else {
        "neutral trend"
    };

    GroupScore { group: IndicatorGroup::Trend, raw_score, signals, summary: summary.into() }
}

/// Momentum group, modulated by `MomentumAnalysis`'s regime the way
/// `scoring_engine.py`'s `score_momentum_group` adjusts for exhaustion,
/// reversal risk, and continuation.
pub fn score_momentum_group(indicators: &IndicatorSet, features: &Features, momentum: &MomentumAnalysis) -> GroupScore {
    let mut signals = HashMap::new();
    let mut bullish = 0.0;
    let mut bearish = 0.0;

    if let Some(rsi) = indicators.last("rsi14") {
        if rsi > 70.0 {
            bearish += 1.0;
            signals.insert("rsi".into(), -0.5);
        } else if rsi < 30.0 {
            bullish += 1.0;
            signals.insert("rsi".into(), 0.5);
        } else if rsi > 50.0 {
            signals.insert("rsi".into(), 0.2);
        } else {
            signals.insert("rsi".into(), -0.2);
        }
    }

    if let (Some(macd), Some(signal)) = (indicators.last("macd"), indicators.last("macd_signal")) {
        if macd > signal {
            bullish += 1.0;
            signals.insert("macd".into(), 0.5);
        } else {
            bearish += 1.0;
            signals.insert("macd".into(), -0.5);
        }
    }

    if let (Some(k), Some(d)) = (indicators.last("stoch_rsi_k"), indicators.last("stoch_rsi_d")) {
        if k > 80.0 && d > 80.0 {
            bearish += 1.0;
            signals.insert("stoch_rsi".into(), -0.5);
        } else if k < 20.0 && d < 20.0 {
            bullish += 1.0;
            signals.insert("stoch_rsi".into(), 0.5);
        }
    }

    if let (Some(wt1), Some(wt2)) = (indicators.last("wt1"), indicators.last("wt2")) {
        if wt1 > wt2 {
            bullish += 1.0;
            signals.insert("wt".into(), 0.5);
        } else {
            bearish += 1.0;
            signals.insert("wt".into(), -0.5);
        }
    }

    if let Some(stc) = indicators.last("stc") {
        if stc > 75.0 {
            bearish += 1.0;
            signals.insert("stc".into(), -0.5);
        } else if stc < 25.0 {
            bullish += 1.0;
            signals.insert("stc".into(), 0.5);
        }
    }

    for div in &features.divergences {
        let weight = match div.strength {
            crate::features::DivergenceStrength::Strong => 1.5,
            crate::features::DivergenceStrength::Medium => 1.0,
            crate::features::DivergenceStrength::Weak => 0.5,
        };
        match div.side {
            crate::features::DivergenceSide::Bullish => {
                bullish += weight;
                signals.insert(format!("divergence_{}", div.indicator), weight * 0.8);
            }
            crate::features::DivergenceSide::Bearish => {
                bearish += weight;
                signals.insert(format!("divergence_{}", div.indicator), -weight * 0.8);
            }
        }
    }

    let mut raw_score = clamp((bullish - bearish) / 3.0, -2.0, 2.0);

    let bias = if momentum.score > 0.0 { Bias::Long } else if momentum.score < 0.0 { Bias::Short } else { Bias::Neutral };
    let strength = clamp(momentum.score.abs() / 2.0, 0.0, 1.0);
    let aligned = (bias == Bias::Long && raw_score > 0.0) || (bias == Bias::Short && raw_score < 0.0);

    match momentum.regime {
        MomentumRegime::Exhaustion if aligned => {
            let factor = (1.0 - strength * 0.5).max(0.5);
            raw_score *= factor;
            signals.insert("momentum_intel_factor".into(), factor);
        }
        MomentumRegime::ReversalRisk if aligned => {
            let factor = 1.0 + strength * 0.4;
            raw_score = clamp(raw_score * factor, -2.0, 2.0);
            signals.insert("momentum_intel_factor".into(), factor);
        }
        MomentumRegime::Continuation if raw_score.abs() > 0.3 => {
            let factor = 1.0 + strength * 0.15;
            raw_score = clamp(raw_score * factor, -2.0, 2.0);
            signals.insert("momentum_intel_factor".into(), factor);
        }
        MomentumRegime::Neutral if raw_score.abs() > 0.5 => {
            raw_score *= 0.9;
            signals.insert("momentum_intel_factor".into(), 0.9);
        }
        _ => {}
    }

    let summary = if raw_score > 0.5 {
        "momentum rising"
    } else if raw_score < -0.5 {
        "momentum falling"
    } else {
        "momentum neutral"
    };

    GroupScore { group: IndicatorGroup::Momentum, raw_score, signals, summary: summary.into() }
}

pub fn score_volume_group(indicators: &IndicatorSet) -> GroupScore {
    let mut signals = HashMap::new();
    let mut bullish = 0.0;
    let mut bearish = 0.0;

    if let Some(obv) = indicators.get("obv") {
        if let (Some(last), Some(prev)) = (obv.last().copied().flatten(), obv.iter().rev().nth(1).copied().flatten()) {
            if last < prev {
                bearish += 1.0;
                signals.insert("obv".into(), -0.8);
            } else if last > prev {
                bullish += 1.0;
                signals.insert("obv".into(), 0.8);
            } else {
                signals.insert("obv".into(), 0.0);
            }
        }
    }

    if let Some(cmf) = indicators.last("cmf20") {
        if cmf > 0.05 {
            bullish += 1.0;
            signals.insert("cmf".into(), 0.5);
        } else if cmf < -0.05 {
            bearish += 1.0;
            signals.insert("cmf".into(), -0.5);
        } else {
            signals.insert("cmf".into(), 0.0);
        }
    }

    let raw_score = clamp((bullish - bearish) / 1.5, -2.0, 2.0);
    let summary = if raw_score > 0.5 {
        "volume confirms upside"
    } else if raw_score < -0.5 {
        "volume confirms downside"
    } else {
        "volume neutral"
    };

    GroupScore { group: IndicatorGroup::Volume, raw_score, signals, summary: summary.into() }
}

pub fn score_volatility_group(indicators: &IndicatorSet, features: &Features) -> GroupScore {
    let mut signals = HashMap::new();
    let mut bullish = 0.0;
    let mut bearish = 0.0;

    if let (Some(upper), Some(lower)) = (indicators.last("bb_upper"), indicators.last("bb_lower")) {
        if let Some(close_like) = indicators.last("sma20") {
            if close_like > upper {
                bearish += 1.0;
                signals.insert("bb".into(), -0.5);
            } else if close_like < lower {
                bullish += 1.0;
                signals.insert("bb".into(), 0.5);
            } else {
                signals.insert("bb".into(), 0.0);
            }
        }
    }

    if features.volatility == crate::features::VolatilityState::High {
        match features.trend {
            crate::features::TrendState::Bullish => {
                signals.insert("volatility".into(), 0.3);
            }
            crate::features::TrendState::Bearish => {
                signals.insert("volatility".into(), -0.3);
            }
            crate::features::TrendState::Neutral => {
                signals.insert("volatility".into(), 0.0);
            }
        }
    }

    let raw_score = clamp((bullish - bearish) / 1.5, -2.0, 2.0);
    let summary = if raw_score > 0.3 {
        "volatility supports upside"
    } else if raw_score < -0.3 {
        "volatility supports downside"
    } else {
        "volatility neutral"
    };

    GroupScore { group: IndicatorGroup::Volatility, raw_score, signals, summary: summary.into() }
}

pub fn score_structure_group(smc: Option<&SmcContext>, phase: MarketPhase) -> GroupScore {
    let mut signals = HashMap::new();
    let mut bullish = 0.0;
    let mut bearish = 0.0;

    if let Some(smc) = smc {
        if let Some(bos) = &smc.last_bos {
            if bos.bullish {
                bullish += 1.0;
                signals.insert("bos".into(), 0.8);
            } else {
                bearish += 1.0;
                signals.insert("bos".into(), -0.8);
            }
        } else {
            signals.insert("bos".into(), 0.0);
        }

        match smc.current_position {
            Some(crate::structure::ZoneKind::Discount) => {
                bullish += 1.0;
                signals.insert("premium_discount".into(), 0.5);
            }
            Some(crate::structure::ZoneKind::Premium) => {
                bearish += 1.0;
                signals.insert("premium_discount".into(), -0.5);
            }
            _ => {
                signals.insert("premium_discount".into(), 0.0);
            }
        }
    }

    match phase {
        MarketPhase::Accumulation | MarketPhase::ExpansionUp => {
            bullish += 1.0;
            signals.insert("phase".into(), 0.5);
        }
        MarketPhase::Distribution | MarketPhase::ExpansionDown => {
            bearish += 1.0;
            signals.insert("phase".into(), -0.5);
        }
        MarketPhase::Shakeout => {
            signals.insert("phase".into(), 0.0);
        }
    }

    let raw_score = clamp((bullish - bearish) / 2.0, -2.0, 2.0);
    let summary = if raw_score > 0.5 {
        "structure supports upside"
    } else if raw_score < -0.5 {
        "structure supports downside"
    } else {
        "structure neutral"
    };

    GroupScore { group: IndicatorGroup::Structure, raw_score, signals, summary: summary.into() }
}

pub fn score_derivatives_group(features: &Features) -> GroupScore {
    let mut signals = HashMap::new();
    let mut bullish = 0.0;
    let mut bearish = 0.0;

    if let Some(regime) = &features.derivatives_regime {
        match regime.funding_state {
            Some(FundingState::ExtremeLong) | Some(FundingState::Long) => {
                bearish += 1.0;
                signals.insert("funding".into(), -0.5);
            }
            Some(FundingState::ExtremeShort) | Some(FundingState::Short) => {
                bullish += 1.0;
                signals.insert("funding".into(), 0.5);
            }
            _ => {
                signals.insert("funding".into(), 0.0);
            }
        }

        match (regime.oi_state, features.trend) {
            (Some(OiState::RapidUp) | Some(OiState::ModerateUp), crate::features::TrendState::Bearish) => {
                bearish += 1.0;
                signals.insert("oi".into(), -0.5);
            }
            (Some(OiState::RapidDown) | Some(OiState::ModerateDown), crate::features::TrendState::Bullish) => {
                bullish += 1.0;
                signals.insert("oi".into(), 0.5);
            }
            _ => {
                signals.insert("oi".into(), 0.0);
            }
        }

        if let Some(CvdState::Buying) = regime.cvd_state {
            bullish += 0.5;
        } else if let Some(CvdState::Selling) = regime.cvd_state {
            bearish += 0.5;
        }
    }

    let raw_score = clamp((bullish - bearish) / 1.5, -2.0, 2.0);
    let summary = if raw_score > 0.3 {
        "derivatives support upside"
    } else if raw_score < -0.3 {
        "derivatives support downside"
    } else {
        "derivatives neutral"
    };

    GroupScore { group: IndicatorGroup::Derivatives, raw_score, signals, summary: summary.into() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::compute_indicators;
    use crate::types::Bar;

    fn uptrend_bars(n: usize) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                let close = 100.0 * 1.004_f64.powi(i as i32);
                Bar::new(1000 * i as i64, close * 0.999, close * 1.01, close * 0.99, close, Some(1000.0))
            })
            .collect()
    }

    #[test]
    fn trend_score_is_bounded() {
        let bars = uptrend_bars(200);
        let ind = compute_indicators(&bars);
        let features = Features::default();
        let score = score_trend_group(&ind, &features);
        assert!(score.raw_score >= -2.0 && score.raw_score <= 2.0);
    }

    #[test]
    fn volume_group_handles_missing_volume() {
        let ind = IndicatorSet::default();
        let score = score_volume_group(&ind);
        assert!(score.raw_score.abs() <= 2.0);
    }

    #[test]
    fn structure_group_defaults_neutral_without_smc() {
        let score = score_structure_group(None, MarketPhase::Shakeout);
        assert!((score.raw_score).abs() < 1e-9);
    }
}
