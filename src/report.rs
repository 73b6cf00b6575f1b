//! C9 — ReportBuilder: assembles the per-timeframe and multi-TF results into
//! one `CompactReport`, plus a lightweight `SetupType` classification
//! (`spec.md` §3/§4). Rendering the report to a display string is a
//! presentation-boundary concern and out of scope (`spec.md` §1).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::aggregator::MultiTfScore;
use crate::market_analyzer::MarketAnalysis;
use crate::momentum::{MomentumAnalysis, MomentumGrade};
use crate::planner::{GlobalRegimeHint, TradePlan};
use crate::scoring::TimeframeScore;
use crate::structure::SmcContext;
use crate::types::{clamp, Bias, Timeframe};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetupType {
    Soft,
    Impulse,
    NeedsConfirmation,
    Neutral,
}

impl std::fmt::Display for SetupType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SetupType::Soft => "soft",
            SetupType::Impulse => "impulse",
            SetupType::NeedsConfirmation => "needs_confirmation",
            SetupType::Neutral => "neutral",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupClassification {
    pub setup_type: SetupType,
    pub grade: char,
    pub confidence: f64,
    pub comment: String,
}

/// Without the ML forecast the source drew `predicted_return`/`probability_up`
/// from (out of scope, `SPEC_FULL.md` §11), this classifies from the
/// diagnostics signals that survive: the long/short score spread stands in
/// for `probability_up`, momentum grade/strength for the forecast's impulse
/// reading, and an optional `GlobalRegimeHint` for the regime-conflict check
/// (`setup_type.py::classify_setup`).
pub fn classify_setup(
    score_long: f64,
    score_short: f64,
    momentum_grade: Option<MomentumGrade>,
    momentum_strength: Option<f64>,
    regime: Option<GlobalRegimeHint>,
    direction: Bias,
) -> SetupClassification {
    let spread = (score_long - score_short).abs() / 10.0; // analogue of |predicted_return|, in [0,1]
    let probability_up = clamp(score_long / 10.0, 0.0, 1.0);
    let strength = momentum_strength.unwrap_or(0.5);

    let is_soft = spread < 0.15 && ((0.55..=0.65).contains(&probability_up) || (0.35..=0.45).contains(&probability_up));
    let is_impulse = spread > 0.3 && probability_up > 0.7;

    let mut needs_confirmation = false;
    if let Some(regime) = regime {
        let contradicts = match regime {
            GlobalRegimeHint::RiskOn | GlobalRegimeHint::AltSeason => direction == Bias::Short,
            GlobalRegimeHint::RiskOff | GlobalRegimeHint::Panic => direction == Bias::Long,
        };
        if contradicts {
            needs_confirmation = true;
        }
    }
    if strength < 0.4 {
        needs_confirmation = true;
    }

    let setup_type = if is_soft {
        SetupType::Soft
    } else if is_impulse {
        SetupType::Impulse
    } else if needs_confirmation {
        SetupType::NeedsConfirmation
    } else {
        SetupType::Neutral
    };

    let mut score = 0.0;
    score += if spread > 0.3 { 30.0 } else if spread > 0.2 { 20.0 } else if spread > 0.1 { 10.0 } else { 0.0 };
    score += if probability_up > 0.8 { 30.0 } else if probability_up > 0.7 { 20.0 } else if probability_up > 0.6 { 10.0 } else { 0.0 };
    score += match momentum_grade {
        Some(MomentumGrade::StrongBullish) | Some(MomentumGrade::StrongBearish) => 20.0,
        Some(MomentumGrade::WeakBullish) | Some(MomentumGrade::WeakBearish) => 10.0,
        _ => 0.0,
    };
    score += strength * 10.0;

    let grade = if score >= 70.0 {
        'A'
    } else if score >= 50.0 {
        'B'
    } else if score >= 30.0 {
        'C'
    } else {
        'D'
    };

    let mut confidence: f64 = 0.5;
    let extremity = (probability_up - 0.5).abs();
    if extremity > 0.3 {
        confidence = 0.8;
    } else if extremity > 0.2 {
        confidence = 0.7;
    } else if extremity > 0.1 {
        confidence = 0.6;
    }
    confidence += (strength - 0.5) * 0.2;
    let confidence = clamp(confidence, 0.0, 1.0);

    let comment = match setup_type {
        SetupType::Soft => "soft setup: small edge, wide uncertainty".to_string(),
        SetupType::Impulse => format!("impulse setup: {direction} bias with strong conviction"),
        SetupType::NeedsConfirmation => "needs confirmation: momentum or regime disagrees with direction".to_string(),
        SetupType::Neutral => "no clear setup".to_string(),
    };

    SetupClassification { setup_type, grade, confidence, comment }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerTfSummary {
    pub weight: f64,
    pub phase: String,
    pub net_score: f64,
    pub normalized_long: f64,
    pub normalized_short: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SmcSummary {
    pub support: Vec<f64>,
    pub resistance: Vec<f64>,
    pub liquidity_above: Vec<f64>,
    pub liquidity_below: Vec<f64>,
    pub fvg_count: usize,
    pub last_bos_bullish: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeMapSummary {
    pub bias: Bias,
    pub mode: String,
    pub position_size_factor: f64,
    pub skip_trading: bool,
    pub limit_buy_zone: Option<(f64, f64)>,
    pub add_on_breakout_level: Option<f64>,
    pub dont_dca_above: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactReport {
    pub symbol: String,
    pub target_tf: Timeframe,
    pub timestamp_ms: i64,
    pub regime: String,
    pub direction: Bias,
    pub score_long: f64,
    pub score_short: f64,
    pub confidence: f64,
    pub setup: SetupClassification,
    pub per_tf: HashMap<Timeframe, PerTfSummary>,
    pub smc: SmcSummary,
    pub trade_map: TradeMapSummary,
    pub tl_dr: String,
}

fn tl_dr(symbol: &str, direction: Bias, regime: &str, confidence: f64, plan: &TradePlan) -> String {
    let action = if plan.skip_trading {
        "stand aside".to_string()
    } else {
        format!("lean {direction}")
    };
    format!("{symbol}: {regime}, {action} (confidence {confidence:.0}%, {})", plan.mode)
}

/// Assembles one `CompactReport` from the per-TF scores, multi-TF
/// aggregation, market analysis, SMC context and trade plan of the target
/// timeframe (`spec.md` §3).
pub fn build_report(
    symbol: &str,
    target_tf: Timeframe,
    timestamp_ms: i64,
    per_tf_scores: &HashMap<Timeframe, TimeframeScore>,
    weights: &crate::config::TargetTfMatrix,
    multi: &MultiTfScore,
    analysis: &MarketAnalysis,
    momentum: &MomentumAnalysis,
    smc: Option<&SmcContext>,
    plan: &TradePlan,
    regime: Option<GlobalRegimeHint>,
) -> CompactReport {
    let per_tf = per_tf_scores
        .iter()
        .map(|(tf, score)| {
            (
                *tf,
                PerTfSummary {
                    weight: weights.weight(target_tf, *tf),
                    phase: score.phase.to_string(),
                    net_score: score.net_score,
                    normalized_long: score.normalized_long,
                    normalized_short: score.normalized_short,
                },
            )
        })
        .collect();

    let smc_summary = smc.map(summarize_smc).unwrap_or_default();

    let trade_map = TradeMapSummary {
        bias: multi.direction,
        mode: plan.mode.to_string(),
        position_size_factor: plan.position_size_factor,
        skip_trading: plan.skip_trading,
        limit_buy_zone: plan.limit_buy_zone,
        add_on_breakout_level: plan.add_on_breakout_level,
        dont_dca_above: plan.dont_dca_above,
    };

    let momentum_strength = clamp(momentum.score.abs() / 2.0, 0.0, 1.0);
    let setup = classify_setup(
        multi.aggregated_long,
        multi.aggregated_short,
        multi.momentum_grade,
        Some(momentum_strength),
        regime,
        multi.direction,
    );

    let regime_str = analysis.phase.to_string();
    let tl_dr = tl_dr(symbol, multi.direction, &regime_str, multi.confidence * 100.0, plan);

    CompactReport {
        symbol: symbol.to_string(),
        target_tf,
        timestamp_ms,
        regime: regime_str,
        direction: multi.direction,
        score_long: multi.aggregated_long,
        score_short: multi.aggregated_short,
        confidence: multi.confidence,
        setup,
        per_tf,
        smc: smc_summary,
        trade_map,
        tl_dr,
    }
}

fn summarize_smc(smc: &SmcContext) -> SmcSummary {
    use crate::structure::LevelKind;
    let support = smc.order_blocks_demand.iter().map(|l| l.price).collect();
    let resistance = smc.order_blocks_supply.iter().map(|l| l.price).collect();
    let liquidity_above = smc
        .liquidity_above
        .iter()
        .filter(|l| l.kind == LevelKind::LiquidityHigh)
        .map(|l| l.price)
        .collect();
    let liquidity_below = smc
        .liquidity_below
        .iter()
        .filter(|l| l.kind == LevelKind::LiquidityLow)
        .map(|l| l.price)
        .collect();
    SmcSummary {
        support,
        resistance,
        liquidity_above,
        liquidity_below,
        fvg_count: smc.fvgs.len(),
        last_bos_bullish: smc.last_bos.as_ref().map(|b| b.bullish),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn impulse_setup_needs_large_spread_and_high_probability() {
        let s = classify_setup(9.0, 1.0, Some(MomentumGrade::StrongBullish), Some(0.8), None, Bias::Long);
        assert_eq!(s.setup_type, SetupType::Impulse);
        assert!(s.grade == 'A' || s.grade == 'B');
    }

    #[test]
    fn weak_momentum_always_needs_confirmation() {
        let s = classify_setup(6.0, 4.0, Some(MomentumGrade::WeakBullish), Some(0.2), None, Bias::Long);
        assert_eq!(s.setup_type, SetupType::NeedsConfirmation);
    }

    #[test]
    fn regime_conflict_forces_needs_confirmation() {
        let s = classify_setup(7.0, 3.0, Some(MomentumGrade::WeakBullish), Some(0.6), Some(GlobalRegimeHint::RiskOff), Bias::Long);
        assert_eq!(s.setup_type, SetupType::NeedsConfirmation);
    }
}
