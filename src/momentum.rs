//! C5 — MomentumIntelligence: volatility-calibrated oscillator regime
//! detection (`spec.md` §4.5). Classifies continuation vs exhaustion vs
//! reversal risk from RSI/StochRSI/MACD histogram slope, modulated by ADX
//! trend strength, derivative confirmation, and proximity to known S/R.

use serde::{Deserialize, Serialize};

use crate::features::{DerivativesRegime, Features, FundingState, OiState};
use crate::indicators::IndicatorSet;
use crate::structure::Level;
use crate::types::clamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MomentumRegime {
    Continuation,
    Exhaustion,
    ReversalRisk,
    Neutral,
}

impl std::fmt::Display for MomentumRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MomentumRegime::Continuation => "CONTINUATION",
            MomentumRegime::Exhaustion => "EXHAUSTION",
            MomentumRegime::ReversalRisk => "REVERSAL_RISK",
            MomentumRegime::Neutral => "NEUTRAL",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MomentumGrade {
    StrongBullish,
    WeakBullish,
    Flat,
    WeakBearish,
    StrongBearish,
}

impl std::fmt::Display for MomentumGrade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MomentumGrade::StrongBullish => "STRONG_BULLISH",
            MomentumGrade::WeakBullish => "WEAK_BULLISH",
            MomentumGrade::Flat => "FLAT",
            MomentumGrade::WeakBearish => "WEAK_BEARISH",
            MomentumGrade::StrongBearish => "STRONG_BEARISH",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MomentumAnalysis {
    pub regime: MomentumRegime,
    pub grade: MomentumGrade,
    pub score: f64,
    pub confidence: f64,
    pub comment: String,
}

/// Raw momentum score: average of normalised RSI deviation from 50,
/// StochRSI-K deviation from 50, and MACD histogram sign/magnitude, each in
/// `[-1, 1]`, then scaled to roughly `[-2, 2]` (`scoring_engine.py`
/// momentum-modulation precedent).
fn raw_momentum_score(indicators: &IndicatorSet) -> f64 {
    let mut parts = Vec::new();
    if let Some(rsi) = indicators.last("rsi14") {
        parts.push(clamp((rsi - 50.0) / 25.0, -1.0, 1.0));
    }
    if let Some(k) = indicators.last("stoch_rsi_k") {
        parts.push(clamp((k - 50.0) / 25.0, -1.0, 1.0));
    }
    if let Some(hist) = indicators.last("macd_hist") {
        parts.push(clamp(hist.signum() * (hist.abs() / (hist.abs() + 1.0)), -1.0, 1.0));
    }
    if parts.is_empty() {
        return 0.0;
    }
    let mean = parts.iter().sum::<f64>() / parts.len() as f64;
    mean * 2.0
}

fn grade_and_comment(score: f64) -> (MomentumGrade, &'static str) {
    if score > 1.0 {
        (MomentumGrade::StrongBullish, "momentum strongly favors continuation higher")
    } else if score > 0.3 {
        (MomentumGrade::WeakBullish, "momentum mildly favors upside")
    } else if score < -1.0 {
        (MomentumGrade::StrongBearish, "momentum strongly favors continuation lower")
    } else if score < -0.3 {
        (MomentumGrade::WeakBearish, "momentum mildly favors downside")
    } else {
        (MomentumGrade::Flat, "momentum is indecisive")
    }
}

/// Exhaustion counter: RSI/StochRSI in overbought/oversold territory while
/// the oscillator itself is rolling over (3-bar slope against price).
fn exhaustion_votes(indicators: &IndicatorSet) -> i32 {
    let mut votes = 0;
    if let Some(series) = indicators.get("rsi14") {
        if let Some(slope) = last_slope(series, 3) {
            if let Some(last) = series.last().copied().flatten() {
                if last > 70.0 && slope < 0.0 {
                    votes += 1;
                } else if last < 30.0 && slope > 0.0 {
                    votes += 1;
                }
            }
        }
    }
    if let Some(series) = indicators.get("stoch_rsi_k") {
        if let Some(slope) = last_slope(series, 3) {
            if let Some(last) = series.last().copied().flatten() {
                if last > 80.0 && slope < 0.0 {
                    votes += 1;
                } else if last < 20.0 && slope > 0.0 {
                    votes += 1;
                }
            }
        }
    }
    votes
}

fn last_slope(series: &[Option<f64>], lookback: usize) -> Option<f64> {
    if series.len() < lookback + 1 {
        return None;
    }
    let tail: Vec<f64> = series[series.len() - lookback - 1..].iter().filter_map(|v| *v).collect();
    if tail.len() < 2 {
        return None;
    }
    Some(tail[tail.len() - 1] - tail[0])
}

fn regime_from_score(score: f64, exhaustion: i32) -> MomentumRegime {
    if exhaustion >= 2 {
        MomentumRegime::Exhaustion
    } else if exhaustion == 1 {
        MomentumRegime::ReversalRisk
    } else if score.abs() > 0.3 {
        MomentumRegime::Continuation
    } else {
        MomentumRegime::Neutral
    }
}

/// Confidence modulation: ADX trend strength boosts continuation/exhaustion
/// confidence; derivative confirmation (CVD/OI aligned with the score's
/// sign) adds further weight; proximity to a strong S/R level dampens it
/// (reversal is more plausible right at a wall).
fn compute_confidence(
    score: f64,
    indicators: &IndicatorSet,
    derivatives: Option<&DerivativesRegime>,
    nearby_levels: &[Level],
    current_price: Option<f64>,
) -> f64 {
    let mut confidence = 0.5;
    if let Some(adx) = indicators.last("adx") {
        confidence += clamp(adx / 100.0, 0.0, 0.3);
    }
    if let Some(regime) = derivatives {
        let aligned = match (regime.cvd_state, regime.oi_state) {
            (Some(crate::features::CvdState::Buying), _) if score > 0.0 => true,
            (Some(crate::features::CvdState::Selling), _) if score < 0.0 => true,
            (_, Some(OiState::RapidUp)) if score > 0.0 => true,
            (_, Some(OiState::RapidDown)) if score < 0.0 => true,
            _ => false,
        };
        if aligned {
            confidence += 0.15;
        }
        if matches!(regime.funding_state, Some(FundingState::ExtremeLong) | Some(FundingState::ExtremeShort)) {
            confidence -= 0.1;
        }
    }
    if let Some(price) = current_price {
        let near_strong_wall = nearby_levels.iter().any(|lvl| {
            lvl.strength > 0.6 && price.abs() > 1e-9 && (lvl.price - price).abs() / price < 0.01
        });
        if near_strong_wall {
            confidence -= 0.15;
        }
    }
    clamp(confidence, 0.0, 1.0)
}

pub fn analyze_momentum(
    indicators: &IndicatorSet,
    features: &Features,
    nearby_levels: &[Level],
    current_price: Option<f64>,
) -> MomentumAnalysis {
    let score = raw_momentum_score(indicators);
    let exhaustion = exhaustion_votes(indicators);
    let regime = regime_from_score(score, exhaustion);
    let (grade, comment) = grade_and_comment(score);
    let confidence = compute_confidence(score, indicators, features.derivatives_regime.as_ref(), nearby_levels, current_price);

    MomentumAnalysis {
        regime,
        grade,
        score,
        confidence,
        comment: comment.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::compute_indicators;
    use crate::types::Bar;

    fn uptrend_bars(n: usize) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                let close = 100.0 * 1.005_f64.powi(i as i32);
                Bar::new(1000 * i as i64, close * 0.999, close * 1.01, close * 0.99, close, Some(1000.0))
            })
            .collect()
    }

    #[test]
    fn strong_uptrend_is_bullish_grade() {
        let bars = uptrend_bars(200);
        let ind = compute_indicators(&bars);
        let features = Features::default();
        let analysis = analyze_momentum(&ind, &features, &[], Some(bars.last().unwrap().close));
        assert!(matches!(analysis.grade, MomentumGrade::StrongBullish | MomentumGrade::WeakBullish));
    }

    #[test]
    fn empty_indicators_are_neutral() {
        let ind = IndicatorSet::default();
        let features = Features::default();
        let analysis = analyze_momentum(&ind, &features, &[], None);
        assert_eq!(analysis.regime, MomentumRegime::Neutral);
        assert_eq!(analysis.grade, MomentumGrade::Flat);
    }

    #[test]
    fn confidence_stays_in_bounds() {
        let bars = uptrend_bars(200);
        let ind = compute_indicators(&bars);
        let features = Features::default();
        let analysis = analyze_momentum(&ind, &features, &[], Some(100.0));
        assert!(analysis.confidence >= 0.0 && analysis.confidence <= 1.0);
    }
}
