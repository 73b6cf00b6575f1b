//! C7 — Multi-TF Aggregator: combines per-timeframe scores into a single
//! target-timeframe signal using `TargetTfMatrix` (`spec.md` §4.7), plus
//! consensus helpers over a symbol's full multi-TF snapshot set.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::TargetTfMatrix;
use crate::market_analyzer::MarketPhase;
use crate::momentum::MomentumGrade;
use crate::scoring::{GroupScore, IndicatorGroup, TimeframeScore};
use crate::types::{clamp, Bias, Timeframe};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiTfScore {
    pub target_tf: Timeframe,
    pub aggregated_long: f64,
    pub aggregated_short: f64,
    pub confidence: f64,
    pub direction: Bias,
    pub momentum_grade: Option<MomentumGrade>,
    pub momentum_comment: Option<String>,
}

/// Weighted sum of per-TF `net_score` using the target-TF row of
/// `TargetTfMatrix`, normalised into `[0, 10]`.
pub fn aggregate_multi_tf(
    per_tf: &HashMap<Timeframe, TimeframeScore>,
    target_tf: Timeframe,
    matrix: &TargetTfMatrix,
) -> MultiTfScore {
    let aggregated_net: f64 = per_tf
        .iter()
        .map(|(tf, score)| score.net_score * matrix.weight(target_tf, *tf))
        .sum();

    let aggregated_long = clamp((aggregated_net + 2.0) / 4.0 * 10.0, 0.0, 10.0);
    let aggregated_short = clamp(10.0 - aggregated_long, 0.0, 10.0);
    let direction = if aggregated_long > aggregated_short { Bias::Long } else { Bias::Short };

    let confidence = compute_confidence(per_tf, target_tf, matrix);
    let (momentum_grade, momentum_comment) = momentum_grade_and_comment(per_tf, target_tf);

    MultiTfScore { target_tf, aggregated_long, aggregated_short, confidence, direction, momentum_grade, momentum_comment }
}

/// Confidence grows with cross-timeframe agreement on direction, weighted
/// by the target-TF row (`spec.md` §4.7 confidence formula, grounded on
/// `scoring_engine.py::_compute_confidence`).
fn compute_confidence(per_tf: &HashMap<Timeframe, TimeframeScore>, target_tf: Timeframe, matrix: &TargetTfMatrix) -> f64 {
    let Some(target_score) = per_tf.get(&target_tf) else {
        return 0.5;
    };
    let target_sign = sign_of(target_score.net_score);
    if target_sign == 0 {
        return 0.4;
    }

    let mut aligned = 0.0;
    let mut total = 0.0;
    for (tf, score) in per_tf {
        let w = matrix.weight(target_tf, *tf);
        if w <= 0.0 {
            continue;
        }
        total += w;
        let sign = sign_of(score.net_score);
        if sign == target_sign {
            aligned += w;
        } else if sign == 0 {
            aligned += w * 0.3;
        }
    }
    let ratio = if total > 0.0 { aligned / total } else { 0.0 };
    let confidence = clamp(0.3 + 0.7 * ratio, 0.0, 1.0);
    (confidence * 100.0).round() / 100.0
}

fn sign_of(net_score: f64) -> i32 {
    if net_score > 0.2 {
        1
    } else if net_score < -0.2 {
        -1
    } else {
        0
    }
}

/// Grade/comment derived from the target timeframe's momentum group score
/// (`scoring_engine.py::_compute_momentum_grade_and_comment`).
fn momentum_grade_and_comment(
    per_tf: &HashMap<Timeframe, TimeframeScore>,
    target_tf: Timeframe,
) -> (Option<MomentumGrade>, Option<String>) {
    let Some(target_score) = per_tf.get(&target_tf) else {
        return (None, None);
    };
    let Some(momentum) = target_score.group_scores.get(&IndicatorGroup::Momentum) else {
        return (None, None);
    };
    let factor_hint = momentum.signals.get("momentum_intel_factor").copied();
    let score = momentum.raw_score;

    let (grade, comment) = if score > 1.0 {
        (MomentumGrade::StrongBullish, bullish_comment(factor_hint, "strong bullish"))
    } else if score > 0.3 {
        (MomentumGrade::WeakBullish, bullish_comment(factor_hint, "weak bullish"))
    } else if score < -1.0 {
        (MomentumGrade::StrongBearish, bearish_comment(factor_hint, "strong bearish"))
    } else if score < -0.3 {
        (MomentumGrade::WeakBearish, bearish_comment(factor_hint, "weak bearish"))
    } else {
        (MomentumGrade::Flat, "momentum neutral".to_string())
    };
    (Some(grade), Some(comment))
}

fn bullish_comment(factor: Option<f64>, prefix: &str) -> String {
    match factor {
        Some(f) if f < 0.99 => format!("{prefix} momentum, signs of exhaustion"),
        Some(f) if f > 1.0 => format!("{prefix} momentum, elevated reversal risk"),
        _ => format!("{prefix} momentum"),
    }
}

fn bearish_comment(factor: Option<f64>, prefix: &str) -> String {
    match factor {
        Some(f) if f < 0.99 => format!("{prefix} momentum, signs of exhaustion"),
        Some(f) if f > 1.0 => format!("{prefix} momentum, elevated reversal risk"),
        _ => format!("{prefix} momentum"),
    }
}

/// Consensus phase across a symbol's per-timeframe snapshots: each
/// timeframe's phase is weighted (1d=3, 4h=2, 1h=1) and the highest-weight
/// phase wins (`multi_tf.py::get_consensus_phase`).
pub fn consensus_phase(phases: &HashMap<Timeframe, MarketPhase>) -> Option<MarketPhase> {
    if phases.is_empty() {
        return None;
    }
    let weight = |tf: Timeframe| -> f64 {
        match tf {
            Timeframe::D1 => 3.0,
            Timeframe::H4 => 2.0,
            Timeframe::H1 => 1.0,
            Timeframe::W1 => 4.0,
        }
    };
    let mut totals: HashMap<MarketPhase, f64> = HashMap::new();
    for (tf, phase) in phases {
        *totals.entry(*phase).or_insert(0.0) += weight(*tf);
    }
    totals
        .into_iter()
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
        .map(|(phase, _)| phase)
}

/// Consensus over the higher timeframes only (4h/1d).
pub fn higher_tf_consensus(phases: &HashMap<Timeframe, MarketPhase>) -> Option<MarketPhase> {
    let higher: HashMap<Timeframe, MarketPhase> = phases
        .iter()
        .filter(|(tf, _)| matches!(tf, Timeframe::H4 | Timeframe::D1 | Timeframe::W1))
        .map(|(k, v)| (*k, *v))
        .collect();
    consensus_phase(&higher)
}

fn is_bullish_phase(phase: MarketPhase) -> bool {
    matches!(phase, MarketPhase::Accumulation | MarketPhase::ExpansionUp)
}

fn is_bearish_phase(phase: MarketPhase) -> bool {
    matches!(phase, MarketPhase::Distribution | MarketPhase::ExpansionDown)
}

/// True when at least one timeframe reads bullish and another reads
/// bearish (`multi_tf.py::get_timeframe_conflict`).
pub fn timeframe_conflict(phases: &HashMap<Timeframe, MarketPhase>) -> bool {
    if phases.len() < 2 {
        return false;
    }
    let has_bullish = phases.values().any(|p| is_bullish_phase(*p));
    let has_bearish = phases.values().any(|p| is_bearish_phase(*p));
    has_bullish && has_bearish
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::GroupScore;

    fn score(net_score: f64) -> TimeframeScore {
        let mut group_scores = HashMap::new();
        group_scores.insert(
            IndicatorGroup::Momentum,
            GroupScore { group: IndicatorGroup::Momentum, raw_score: net_score, signals: HashMap::new(), summary: String::new() },
        );
        TimeframeScore {
            timeframe: Timeframe::H1,
            phase: MarketPhase::Accumulation,
            group_scores,
            net_score,
            normalized_long: clamp((net_score + 2.0) / 4.0 * 10.0, 0.0, 10.0),
            normalized_short: 0.0,
        }
    }

    #[test]
    fn aggregate_favors_target_tf_weight() {
        let mut per_tf = HashMap::new();
        per_tf.insert(Timeframe::H1, score(1.5));
        per_tf.insert(Timeframe::H4, score(-1.5));
        let matrix = TargetTfMatrix::default();
        let result = aggregate_multi_tf(&per_tf, Timeframe::H1, &matrix);
        assert_eq!(result.direction, Bias::Long);
    }

    #[test]
    fn empty_snapshots_yield_no_consensus() {
        let phases: HashMap<Timeframe, MarketPhase> = HashMap::new();
        assert!(consensus_phase(&phases).is_none());
    }

    #[test]
    fn conflicting_phases_are_detected() {
        let mut phases = HashMap::new();
        phases.insert(Timeframe::H1, MarketPhase::Accumulation);
        phases.insert(Timeframe::D1, MarketPhase::Distribution);
        assert!(timeframe_conflict(&phases));
    }
}
