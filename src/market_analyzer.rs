//! C4 — MarketAnalyzer: phase classification, risk/pump indices and the
//! overall confidence score derived from `Features` (`spec.md` §4.4).

use serde::{Deserialize, Serialize};

use crate::config::{DiagnosticsConfig, IndexWeights};
use crate::features::{
    DerivativesRegime, FundingState, Features, LiquidityState, OiState, StructureState, TrendState,
    VolatilityState,
};
use crate::indicators::IndicatorSet;
use crate::types::clamp;

/// Closed phase enumeration, exactly the five phases of `spec.md` §3/§4.4 —
/// no extra "breakout"/"choppy" buckets; the decision table below is the
/// single source of truth for how a `Features` reading maps onto one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketPhase {
    Accumulation,
    Distribution,
    ExpansionUp,
    ExpansionDown,
    Shakeout,
}

impl std::fmt::Display for MarketPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MarketPhase::Accumulation => "ACCUMULATION",
            MarketPhase::Distribution => "DISTRIBUTION",
            MarketPhase::ExpansionUp => "EXPANSION_UP",
            MarketPhase::ExpansionDown => "EXPANSION_DOWN",
            MarketPhase::Shakeout => "SHAKEOUT",
        };
        write!(f, "{s}")
    }
}

impl MarketPhase {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "ACCUMULATION" => MarketPhase::Accumulation,
            "DISTRIBUTION" => MarketPhase::Distribution,
            "EXPANSION_UP" => MarketPhase::ExpansionUp,
            "EXPANSION_DOWN" => MarketPhase::ExpansionDown,
            "SHAKEOUT" => MarketPhase::Shakeout,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketAnalysis {
    pub phase: MarketPhase,
    pub risk_score: f64,
    pub pump_score: f64,
    pub confidence: f64,
}

/// Data-driven phase table, first-match-wins, exactly `spec.md` §4.4's
/// decision table: high-vol+low-liq is always a shakeout; a bullish/bearish
/// trend with medium-or-high liquidity is an expansion regardless of
/// volatility; everything else falls to accumulation on a neutral-or-bullish
/// trend, distribution on bearish. A derivatives override is applied on top.
fn classify_phase(features: &Features) -> MarketPhase {
    let base = classify_phase_base(features);
    if let Some(regime) = &features.derivatives_regime {
        if let Some(overridden) = phase_from_derivatives_override(base, regime) {
            return overridden;
        }
    }
    base
}

fn classify_phase_base(features: &Features) -> MarketPhase {
    let high_vol = features.volatility == VolatilityState::High;
    let low_liq = features.liquidity == LiquidityState::Low;
    let med_or_high_liq = matches!(features.liquidity, LiquidityState::Medium | LiquidityState::High);

    if high_vol && low_liq {
        return MarketPhase::Shakeout;
    }
    if features.trend == TrendState::Bullish && med_or_high_liq {
        return MarketPhase::ExpansionUp;
    }
    if features.trend == TrendState::Bearish && med_or_high_liq {
        return MarketPhase::ExpansionDown;
    }
    if matches!(features.trend, TrendState::Neutral | TrendState::Bullish) {
        return MarketPhase::Accumulation;
    }
    // Only a bearish trend with low liquidity (and not also high volatility,
    // caught above) reaches here.
    MarketPhase::Distribution
}

/// Derivative overrides (`spec.md` §4.4): extreme-low funding with rising OI
/// flips an accumulation read to a shakeout; extreme-high funding with
/// falling OI flips an expansion-up read to distribution.
fn phase_from_derivatives_override(base: MarketPhase, regime: &DerivativesRegime) -> Option<MarketPhase> {
    let rising_oi = matches!(regime.oi_state, Some(OiState::RapidUp) | Some(OiState::ModerateUp));
    let falling_oi = matches!(regime.oi_state, Some(OiState::RapidDown) | Some(OiState::ModerateDown));
    if base == MarketPhase::Accumulation && regime.funding_state == Some(FundingState::ExtremeShort) && rising_oi {
        return Some(MarketPhase::Shakeout);
    }
    if base == MarketPhase::ExpansionUp && regime.funding_state == Some(FundingState::ExtremeLong) && falling_oi {
        return Some(MarketPhase::Distribution);
    }
    None
}

/// Weighted sum over the five risk/pump components (each internally scored
/// on a `[0, 100]` sub-scale for readability), rescaled to the public
/// `[0, 1]` contract (`spec.md` §8: `risk_score, pump_score ∈ [0, 1]`).
fn weighted_index(
    weights: &IndexWeights,
    volatility_component: f64,
    liquidity_component: f64,
    phase_component: f64,
    derivatives_component: f64,
    trend_component: f64,
) -> f64 {
    let raw = weights.volatility * volatility_component
        + weights.liquidity * liquidity_component
        + weights.phase * phase_component
        + weights.derivatives * derivatives_component
        + weights.trend * trend_component;
    clamp(raw / 100.0, 0.0, 1.0)
}

fn risk_components(features: &Features, phase: MarketPhase) -> (f64, f64, f64, f64, f64) {
    let volatility = match features.volatility {
        VolatilityState::High => 80.0,
        VolatilityState::Medium => 45.0,
        VolatilityState::Low => 15.0,
    };
    let liquidity = match features.liquidity {
        LiquidityState::Low => 75.0,
        LiquidityState::Medium => 40.0,
        LiquidityState::High => 15.0,
    };
    // Ordinal ranking per `spec.md` §4.4's per-phase risk weights
    // (shakeout > expansion-down > distribution > expansion-up > accumulation).
    let phase_risk = match phase {
        MarketPhase::Shakeout => 90.0,
        MarketPhase::ExpansionDown => 70.0,
        MarketPhase::Distribution => 50.0,
        MarketPhase::ExpansionUp => 30.0,
        MarketPhase::Accumulation => 10.0,
    };
    let derivatives = features
        .derivatives_regime
        .as_ref()
        .map(|r| match (r.funding_state, r.oi_state) {
            (Some(FundingState::ExtremeLong), _) | (Some(FundingState::ExtremeShort), _) => 80.0,
            (Some(FundingState::Long), Some(OiState::RapidUp))
            | (Some(FundingState::Short), Some(OiState::RapidDown)) => 60.0,
            _ => 30.0,
        })
        .unwrap_or(50.0);
    let trend = match features.trend {
        TrendState::Bearish => 65.0,
        TrendState::Neutral => 40.0,
        TrendState::Bullish => 20.0,
    };
    (volatility, liquidity, phase_risk, derivatives, trend)
}

fn pump_components(
    features: &Features,
    indicators: &IndicatorSet,
    current_close: Option<f64>,
    cfg: &DiagnosticsConfig,
    phase: MarketPhase,
) -> (f64, f64, f64, f64, f64) {
    let volatility = match features.volatility {
        VolatilityState::Low => 70.0,
        VolatilityState::Medium => 45.0,
        VolatilityState::High => 20.0,
    };
    let liquidity = match features.liquidity {
        LiquidityState::Low => 60.0,
        LiquidityState::Medium => 40.0,
        LiquidityState::High => 25.0,
    };
    // Ordinal ranking per `spec.md` §4.4's favorable-phase weights
    // (accumulation > shakeout > expansion-up > expansion-down/distribution).
    let phase_pump = match phase {
        MarketPhase::Accumulation => 90.0,
        MarketPhase::Shakeout => 75.0,
        MarketPhase::ExpansionUp => 60.0,
        MarketPhase::ExpansionDown => 20.0,
        MarketPhase::Distribution => 10.0,
    };
    let derivatives = features
        .derivatives_regime
        .as_ref()
        .and_then(|r| r.cvd_state)
        .map(|c| match c {
            crate::features::CvdState::Buying => 70.0,
            crate::features::CvdState::Flat => 45.0,
            crate::features::CvdState::Selling => 20.0,
        })
        .unwrap_or(45.0);
    let mut trend = match features.trend {
        TrendState::Bullish => 60.0,
        TrendState::Neutral => 40.0,
        TrendState::Bearish => 20.0,
    };
    if let (Some(close), Some(vwap)) = (current_close, indicators.last("vwap")) {
        if close > 0.0 && (close - vwap).abs() / close <= cfg.vwap_discount_threshold {
            trend += 5.0;
        }
    }
    if let (Some(close), Some(ema200)) = (current_close, indicators.last("ema200")) {
        if close > 0.0 && (close - ema200).abs() / close <= cfg.ema200_discount_threshold {
            trend += 5.0;
        }
    }
    (volatility, liquidity, phase_pump, derivatives, clamp(trend, 0.0, 100.0))
}

/// Confidence: grows with history depth, derivative availability and
/// indicator coverage; shrinks under conflicting signals.
fn compute_confidence(bars_len: usize, indicators: &IndicatorSet, features: &Features, cfg: &DiagnosticsConfig) -> f64 {
    let history_score = clamp(bars_len as f64 / cfg.min_full_bars as f64, 0.0, 1.0);
    let coverage_score = if indicators.minimal { 0.5 } else { 1.0 };
    let derivatives_score = if features.derivatives_regime.is_some() { 1.0 } else { 0.6 };
    let divergence_penalty = clamp(features.divergences.len() as f64 * 0.05, 0.0, 0.2);

    let raw = 0.4 * history_score + 0.3 * coverage_score + 0.2 * derivatives_score - divergence_penalty + 0.1;
    clamp(raw, 0.0, 1.0)
}

pub fn analyze_market(
    bars_len: usize,
    current_close: Option<f64>,
    indicators: &IndicatorSet,
    features: &Features,
    cfg: &DiagnosticsConfig,
) -> MarketAnalysis {
    let phase = classify_phase(features);
    let (rv, rl, rp, rd, rt) = risk_components(features, phase);
    let risk_score = weighted_index(&cfg.risk_weights, rv, rl, rp, rd, rt);
    let (pv, pl, pp, pd, pt) = pump_components(features, indicators, current_close, cfg, phase);
    let pump_score = weighted_index(&cfg.pump_weights, pv, pl, pp, pd, pt);
    let confidence = compute_confidence(bars_len, indicators, features, cfg);

    MarketAnalysis { phase, risk_score, pump_score, confidence }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::Features;
    use crate::indicators::IndicatorSet;

    #[test]
    fn bullish_medium_vol_liq_is_expansion_up() {
        let features = Features {
            trend: TrendState::Bullish,
            volatility: VolatilityState::Medium,
            liquidity: LiquidityState::Medium,
            structure: StructureState::HigherHigh,
            ..Features::default()
        };
        assert_eq!(classify_phase(&features), MarketPhase::ExpansionUp);
    }

    #[test]
    fn bullish_low_vol_low_liq_is_accumulation() {
        let features = Features {
            trend: TrendState::Bullish,
            volatility: VolatilityState::Low,
            liquidity: LiquidityState::Low,
            structure: StructureState::Range,
            ..Features::default()
        };
        assert_eq!(classify_phase(&features), MarketPhase::Accumulation);
    }

    #[test]
    fn bearish_medium_vol_liq_is_expansion_down() {
        let features = Features {
            trend: TrendState::Bearish,
            volatility: VolatilityState::High,
            liquidity: LiquidityState::Medium,
            structure: StructureState::LowerLow,
            ..Features::default()
        };
        assert_eq!(classify_phase(&features), MarketPhase::ExpansionDown);
    }

    #[test]
    fn risk_and_pump_scores_are_bounded() {
        let cfg = DiagnosticsConfig::default();
        let features = Features::default();
        let indicators = IndicatorSet::default();
        let analysis = analyze_market(200, Some(100.0), &indicators, &features, &cfg);
        assert!(analysis.risk_score >= 0.0 && analysis.risk_score <= 1.0);
        assert!(analysis.pump_score >= 0.0 && analysis.pump_score <= 1.0);
        assert!(analysis.confidence >= 0.0 && analysis.confidence <= 1.0);
    }

    #[test]
    fn shakeout_phase_is_classified_high_risk() {
        let features = Features {
            trend: TrendState::Neutral,
            volatility: VolatilityState::High,
            liquidity: LiquidityState::Low,
            structure: StructureState::Range,
            ..Features::default()
        };
        assert_eq!(classify_phase(&features), MarketPhase::Shakeout);
        let cfg = DiagnosticsConfig::default();
        let indicators = IndicatorSet::default();
        let analysis = analyze_market(200, Some(100.0), &indicators, &features, &cfg);
        assert!(analysis.risk_score > 0.5);
    }

    #[test]
    fn low_history_depresses_confidence() {
        let cfg = DiagnosticsConfig::default();
        let features = Features::default();
        let indicators = IndicatorSet::default();
        let shallow = analyze_market(10, Some(100.0), &indicators, &features, &cfg);
        let deep = analyze_market(300, Some(100.0), &indicators, &features, &cfg);
        assert!(shallow.confidence < deep.confidence);
    }
}
