//! C8 — TradePlanner: turns a `MarketAnalysis` into a `TradePlan` (mode,
//! entry zones, breakout trigger, invalidation level, position-size factor,
//! skip flag), modulated by an optional `GlobalRegimeHint` and
//! `MomentumAnalysis` (`spec.md` §4.8).

use serde::{Deserialize, Serialize};

use crate::config::TradePlannerThresholds;
use crate::features::{Features, LiquidityState, VolatilityState};
use crate::indicators::IndicatorSet;
use crate::market_analyzer::{MarketAnalysis, MarketPhase};
use crate::momentum::{MomentumAnalysis, MomentumRegime};
use crate::structure::{Level, LevelKind, SmcContext};
use crate::types::{clamp, Bar};

/// Coarse market-wide risk appetite. The source's `GlobalRegime` subsystem
/// is out of scope (`spec.md` §1); only the threshold/multiplier table it
/// would have fed into the planner survives, keyed off this small hint a
/// caller may optionally supply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GlobalRegimeHint {
    RiskOn,
    RiskOff,
    Panic,
    AltSeason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeMode {
    Neutral,
    AccumulationPlay,
    TrendFollow,
    MeanReversion,
    DistributionWait,
}

impl std::fmt::Display for TradeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TradeMode::Neutral => "neutral",
            TradeMode::AccumulationPlay => "accumulation_play",
            TradeMode::TrendFollow => "trend_follow",
            TradeMode::MeanReversion => "mean_reversion",
            TradeMode::DistributionWait => "distribution_wait",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradePlan {
    pub mode: TradeMode,
    pub small_position_allowed: bool,
    pub small_position_comment: String,
    pub limit_buy_zone: Option<(f64, f64)>,
    pub add_on_breakout_level: Option<f64>,
    pub dont_dca_above: Option<f64>,
    pub skip_trading: bool,
    pub skip_trading_comment: Option<String>,
    pub position_size_factor: f64,
    pub scenario_playbook: Option<String>,
    pub regime_info: Option<String>,
}

fn determine_mode(phase: MarketPhase) -> TradeMode {
    match phase {
        MarketPhase::Accumulation => TradeMode::AccumulationPlay,
        MarketPhase::ExpansionUp => TradeMode::TrendFollow,
        MarketPhase::Distribution => TradeMode::DistributionWait,
        MarketPhase::Shakeout | MarketPhase::ExpansionDown => TradeMode::Neutral,
    }
}

/// Small-position-allowed: phase+volatility table, down-weighted by
/// `MomentumAnalysis` exhaustion/reversal-risk (`spec.md` §4.8).
fn small_position_allowed(
    analysis: &MarketAnalysis,
    features: &Features,
    mode: TradeMode,
    momentum: &MomentumAnalysis,
) -> (bool, String) {
    if momentum.regime == MomentumRegime::Exhaustion && momentum.confidence > 0.7 {
        return (
            false,
            format!("momentum is overheated ({}) — correction risk is high", momentum.comment),
        );
    }
    if momentum.regime == MomentumRegime::ReversalRisk && momentum.confidence > 0.6 {
        return (
            false,
            format!("reversal risk elevated ({}) — wait for confirmation", momentum.comment),
        );
    }

    match analysis.phase {
        MarketPhase::Accumulation => match features.volatility {
            VolatilityState::Low => (true, "range/accumulation, a small probing position is acceptable".into()),
            VolatilityState::Medium => (true, "accumulation with moderate volatility, a small position is acceptable with care".into()),
            VolatilityState::High => (false, "accumulation with high volatility — wait for compression".into()),
        },
        MarketPhase::ExpansionUp => {
            if mode == TradeMode::TrendFollow {
                (true, "trend-follow: expansion up is a good opportunity to join the trend".into())
            } else {
                (true, "expansion up, a small position is acceptable but watch for fakeouts".into())
            }
        }
        MarketPhase::ExpansionDown => (false, "directional dump in progress, a probing position is elevated risk".into()),
        MarketPhase::Distribution => (false, "distribution phase, better to wait for a pullback or new base".into()),
        MarketPhase::Shakeout => (false, "market in a shakeout — high volatility with low liquidity, better to wait".into()),
    }
}

fn bos_price(smc: Option<&SmcContext>, bullish: bool) -> Option<f64> {
    smc.and_then(|s| s.last_bos.as_ref()).filter(|b| b.bullish == bullish).map(|b| b.price)
}

fn strongest(levels: &[Level], kind: LevelKind) -> Option<&Level> {
    levels
        .iter()
        .filter(|l| l.kind == kind)
        .max_by(|a, b| a.strength.partial_cmp(&b.strength).unwrap())
}

fn nearest_above(levels: &[Level], price: f64) -> Option<&Level> {
    levels
        .iter()
        .filter(|l| l.price > price)
        .min_by(|a, b| a.price.partial_cmp(&b.price).unwrap())
}

fn nearest_below(levels: &[Level], price: f64) -> Option<&Level> {
    levels
        .iter()
        .filter(|l| l.price < price)
        .max_by(|a, b| a.price.partial_cmp(&b.price).unwrap())
}

/// Accumulation-play entry zone: demand order block, else strong support
/// cluster, else discount-zone boundary, else EMA20-50 band, else recent
/// lows minus 0.3*ATR (`spec.md` §4.8 priority list).
fn accumulation_limit_zone(
    bars: &[Bar],
    indicators: &IndicatorSet,
    smc: Option<&SmcContext>,
    levels: &[Level],
    current_price: f64,
) -> Option<(f64, f64)> {
    if let Some(smc) = smc {
        if let Some(ob) = smc.order_blocks_demand.iter().max_by(|a, b| a.strength.partial_cmp(&b.strength).unwrap()) {
            return Some((ob.price * 0.995, ob.price * 1.005));
        }
    }
    if let Some(support) = strongest(levels, LevelKind::Support) {
        return Some((support.price * 0.995, support.price * 1.005));
    }
    if let Some(smc) = smc {
        if let Some(end) = smc.discount_zone_end {
            return Some((end * 0.99, end * 1.0));
        }
    }
    if let (Some(ema20), Some(ema50)) = (indicators.last("ema20"), indicators.last("ema50")) {
        let (lo, hi) = if ema20 < ema50 { (ema20, ema50) } else { (ema50, ema20) };
        return Some((lo, hi));
    }
    if let (Some(atr), Some(recent_low)) = (
        indicators.last("atr14"),
        bars.iter().rev().take(20).map(|b| b.low).fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.min(v)))),
    ) {
        let low = recent_low - atr * 0.3;
        return Some((low, current_price));
    }
    None
}

fn breakout_level(smc: Option<&SmcContext>, levels: &[Level], current_price: f64) -> Option<f64> {
    if let Some(bos) = bos_price(smc, true) {
        if bos > current_price {
            return Some(bos);
        }
    }
    if let Some(smc) = smc {
        if let Some(pool) = smc.liquidity_above.iter().min_by(|a, b| a.price.partial_cmp(&b.price).unwrap()) {
            return Some(pool.price);
        }
    }
    if let Some(res) = strongest(levels, LevelKind::Resistance) {
        return Some(res.price);
    }
    nearest_above(levels, current_price).map(|l| l.price)
}

fn dont_dca_level(indicators: &IndicatorSet, smc: Option<&SmcContext>, levels: &[Level], current_price: f64) -> Option<f64> {
    if let Some(smc) = smc {
        if let Some(start) = smc.premium_zone_start {
            return Some(start);
        }
    }
    if let Some(res) = strongest(levels, LevelKind::Resistance) {
        return Some(res.price);
    }
    if let Some(ema200) = indicators.last("ema200") {
        return Some(ema200);
    }
    if let Some(upper) = indicators.last("bb_upper") {
        return Some(upper);
    }
    nearest_above(levels, current_price).map(|l| l.price)
}

fn mean_reversion_zone(indicators: &IndicatorSet, current_price: f64) -> Option<(f64, f64)> {
    let basis = indicators.last("vwap").or_else(|| indicators.last("bb_middle"))?;
    let _ = current_price;
    Some((basis * 0.975, basis * 1.025))
}

fn mean_reversion_resistance(indicators: &IndicatorSet) -> Option<f64> {
    indicators
        .last("bb_upper")
        .or_else(|| indicators.last("vwap").map(|v| v * 1.05))
}

fn should_skip_trading(
    analysis: &MarketAnalysis,
    momentum: &MomentumAnalysis,
    regime: Option<GlobalRegimeHint>,
    th: &TradePlannerThresholds,
) -> (bool, Option<String>) {
    if momentum.regime == MomentumRegime::Exhaustion && momentum.confidence > th.exhaustion_skip_confidence {
        return (
            true,
            Some(format!(
                "skip: momentum is overheated with high confidence ({}) — correction risk too high",
                momentum.comment
            )),
        );
    }

    let (risk_th, pump_th) = match regime {
        Some(GlobalRegimeHint::RiskOff) => (th.risk_off_risk_threshold, th.risk_off_pump_threshold),
        Some(GlobalRegimeHint::Panic) => (th.panic_risk_threshold, th.panic_pump_threshold),
        Some(GlobalRegimeHint::RiskOn) => (th.risk_on_risk_threshold, th.risk_on_pump_threshold),
        Some(GlobalRegimeHint::AltSeason) | None => (th.default_risk_threshold, th.default_pump_threshold),
    };

    if analysis.risk_score > risk_th && analysis.pump_score < pump_th {
        return (true, Some("skip: high risk at low upside potential, look elsewhere".into()));
    }

    let extreme_threshold = if regime == Some(GlobalRegimeHint::Panic) {
        th.panic_extreme_risk_threshold
    } else {
        th.extreme_risk_threshold
    };
    if analysis.risk_score > extreme_threshold {
        return (true, Some("skip: extreme risk — unstable structure, wait for improvement".into()));
    }

    if analysis.pump_score < th.low_pump_skip_threshold && analysis.risk_score > th.low_pump_skip_risk_threshold {
        return (true, Some("skip: very low upside at elevated risk — unfavorable risk/reward".into()));
    }

    (false, None)
}

/// Position-size factor in `[0.3, 1.5]`, starting from 1.0 then multiplied
/// by regime, pump/risk adjustment, and `MomentumAnalysis` modulation
/// (`spec.md` §4.8).
fn position_size_factor(analysis: &MarketAnalysis, momentum: &MomentumAnalysis, regime: Option<GlobalRegimeHint>, th: &TradePlannerThresholds) -> f64 {
    let mut factor = 1.0;
    factor *= match regime {
        Some(GlobalRegimeHint::RiskOff) => th.regime_mult_risk_off,
        Some(GlobalRegimeHint::Panic) => th.regime_mult_panic,
        Some(GlobalRegimeHint::RiskOn) => th.regime_mult_risk_on,
        Some(GlobalRegimeHint::AltSeason) => th.regime_mult_alt_season,
        None => 1.0,
    };

    if analysis.pump_score > 0.8 {
        factor *= 1.2;
    } else if analysis.pump_score > 0.6 {
        factor *= 1.1;
    } else if analysis.pump_score < 0.3 {
        factor *= 0.7;
    }

    if analysis.risk_score > 0.7 {
        factor *= 0.7;
    } else if analysis.risk_score > 0.5 {
        factor *= 0.85;
    } else if analysis.risk_score < 0.3 {
        factor *= 1.1;
    }

    let momentum_adjustment = match momentum.regime {
        MomentumRegime::Exhaustion => (0.6 - momentum.strength_or_confidence() * 0.2).max(0.4),
        MomentumRegime::ReversalRisk => (0.7 - momentum.confidence * 0.2).max(0.5),
        MomentumRegime::Continuation if momentum.confidence > 0.7 => 1.0 + momentum.strength_or_confidence() * 0.1,
        _ => 1.0,
    };
    factor *= momentum_adjustment;

    clamp(factor, 0.3, 1.5)
}

fn scenario_playbook(phase: MarketPhase, mode: TradeMode, pump_score: f64) -> Option<String> {
    match mode {
        TradeMode::AccumulationPlay => Some(if pump_score > 0.7 {
            "accumulate in the base with limit orders below and aggressive adds on breakout; stops below the accumulation zone".into()
        } else {
            "cautious accumulation: small limit orders, wait for confirmation, strict stops".into()
        }),
        TradeMode::TrendFollow => Some(if phase == MarketPhase::ExpansionUp {
            "trend-follow: add on pullbacks to EMA20/50, partial profit-taking at new extremes, stop below the last significant low".into()
        } else {
            "cautious trend-follow: small positions on breakouts, quick exit on reversal signs".into()
        }),
        TradeMode::MeanReversion => Some("mean reversion: fade extremes back toward VWAP/BB basis, tight invalidation beyond the band".into()),
        TradeMode::DistributionWait => Some("distribution: stand aside, wait for a clean break of the range before committing".into()),
        TradeMode::Neutral => None,
    }
}

pub fn build_plan(
    bars: &[Bar],
    indicators: &IndicatorSet,
    features: &Features,
    analysis: &MarketAnalysis,
    momentum: &MomentumAnalysis,
    levels: &[Level],
    smc: Option<&SmcContext>,
    mode_override: Option<TradeMode>,
    regime: Option<GlobalRegimeHint>,
    th: &TradePlannerThresholds,
) -> TradePlan {
    let current_price = bars.last().map(|b| b.close).unwrap_or(0.0);
    let mode = mode_override.unwrap_or_else(|| determine_mode(analysis.phase));
    let (small_position_allowed, small_position_comment) = small_position_allowed(analysis, features, mode, momentum);

    let (limit_buy_zone, add_on_breakout_level, dont_dca_above) = match mode {
        TradeMode::TrendFollow => (
            None,
            breakout_level(smc, levels, current_price),
            dont_dca_level(indicators, smc, levels, current_price),
        ),
        TradeMode::MeanReversion => (
            mean_reversion_zone(indicators, current_price),
            None,
            mean_reversion_resistance(indicators),
        ),
        TradeMode::DistributionWait | TradeMode::Neutral => (None, None, dont_dca_level(indicators, smc, levels, current_price)),
        TradeMode::AccumulationPlay => (
            accumulation_limit_zone(bars, indicators, smc, levels, current_price),
            breakout_level(smc, levels, current_price),
            dont_dca_level(indicators, smc, levels, current_price),
        ),
    };

    let (skip_trading, skip_trading_comment) = should_skip_trading(analysis, momentum, regime, th);
    let position_size_factor = position_size_factor(analysis, momentum, regime, th);
    let scenario_playbook = scenario_playbook(analysis.phase, mode, analysis.pump_score);
    let regime_info = regime.map(|r| format!("{r:?}"));

    TradePlan {
        mode,
        small_position_allowed,
        small_position_comment,
        limit_buy_zone,
        add_on_breakout_level,
        dont_dca_above,
        skip_trading,
        skip_trading_comment,
        position_size_factor,
        scenario_playbook,
        regime_info,
    }
}

impl MomentumAnalysis {
    /// `strength` proxy used by the planner's position-size modulation
    /// (`spec.md` §4.8); `MomentumAnalysis` records a raw oscillator score
    /// rather than a separate `[0,1]` strength field, so this derives one.
    fn strength_or_confidence(&self) -> f64 {
        clamp(self.score.abs() / 2.0, 0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DiagnosticsConfig;
    use crate::features::Features;
    use crate::indicators::compute_indicators;
    use crate::market_analyzer::analyze_market;
    use crate::momentum::analyze_momentum;

    fn range_bars(n: usize) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                let osc = ((i as f64) * 0.3).sin() * 0.5;
                let close = 100.0 + osc;
                Bar::new(1000 * i as i64, close - 0.1, close + 0.3, close - 0.3, close, Some(100.0))
            })
            .collect()
    }

    #[test]
    fn accumulation_phase_yields_accumulation_play_with_zone() {
        let cfg = DiagnosticsConfig::default();
        let bars = range_bars(200);
        let ind = compute_indicators(&bars);
        let features = Features {
            trend: crate::features::TrendState::Neutral,
            volatility: VolatilityState::Low,
            liquidity: LiquidityState::Low,
            ..extract_default(&bars, &ind)
        };
        let analysis = analyze_market(bars.len(), Some(100.0), &ind, &features, &cfg);
        let momentum = analyze_momentum(&ind, &features, &[], Some(100.0));
        let plan = build_plan(&bars, &ind, &features, &analysis, &momentum, &[], None, None, None, &cfg.trade_planner);
        assert_eq!(plan.mode, TradeMode::AccumulationPlay);
        assert!(plan.position_size_factor >= 0.3 && plan.position_size_factor <= 1.5);
    }

    #[test]
    fn extreme_risk_skips_trading() {
        let cfg = DiagnosticsConfig::default();
        let bars = range_bars(200);
        let ind = compute_indicators(&bars);
        let features = extract_default(&bars, &ind);
        let mut analysis = analyze_market(bars.len(), Some(100.0), &ind, &features, &cfg);
        analysis.risk_score = 0.9;
        analysis.pump_score = 0.1;
        let momentum = analyze_momentum(&ind, &features, &[], Some(100.0));
        let plan = build_plan(&bars, &ind, &features, &analysis, &momentum, &[], None, None, None, &cfg.trade_planner);
        assert!(plan.skip_trading);
    }

    fn extract_default(bars: &[Bar], ind: &IndicatorSet) -> Features {
        crate::features::extract_features(bars, ind, None)
    }
}
