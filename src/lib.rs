//! Market diagnostics engine: turns OHLCV bar history into a per-symbol,
//! per-timeframe market read — indicators, structure, momentum regime,
//! weighted scoring, multi-timeframe aggregation, a trade plan and a compact
//! report — then logs the pass and, on a later cadence, scores its
//! real-world outcome for calibration.
//!
//! The pipeline runs in strict topological order C1→C10 per `(symbol,
//! target_tf)`: indicators, features, structure, market analysis, momentum,
//! per-TF scoring, multi-TF aggregation, trade planning, report assembly,
//! snapshot logging. Parallelism is per-symbol; within a symbol timeframes
//! are computed sequentially (`spec.md` §5).

pub mod aggregator;
pub mod anomaly;
pub mod cache;
pub mod calibration;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod features;
pub mod indicators;
pub mod market_analyzer;
pub mod momentum;
pub mod outcome;
pub mod planner;
pub mod report;
pub mod scoring;
pub mod storage;
pub mod structure;
pub mod types;

pub mod prelude {
    pub use crate::aggregator::{aggregate_multi_tf, MultiTfScore};
    pub use crate::anomaly::{detect_all_anomalies, AnomalyAlert, AnomalyType, Severity};
    pub use crate::calibration::{generate_calibration_report, CalibrationReport, InMemoryWeightsStorage, WeightsConfiguration, WeightsStorage};
    pub use crate::collaborators::{resolve_current_price, BarRepository, CurrentPriceSource, DerivativesProvider};
    pub use crate::config::DiagnosticsConfig;
    pub use crate::error::{DiagResult, DiagnosticsError};
    pub use crate::features::{extract_features, Features};
    pub use crate::indicators::{compute_indicators, IndicatorSet};
    pub use crate::market_analyzer::{analyze_market, MarketAnalysis, MarketPhase};
    pub use crate::momentum::{analyze_momentum, MomentumAnalysis};
    pub use crate::outcome::evaluate_outcome;
    pub use crate::planner::{build_plan, GlobalRegimeHint, TradeMode, TradePlan};
    pub use crate::report::{build_report, CompactReport};
    pub use crate::scoring::{ScoringEngine, TimeframeScore};
    pub use crate::storage::{DiagnosticsOutcome, DiagnosticsRepository, DiagnosticsSnapshot, SnapshotFilter};
    pub use crate::structure::{build_levels, build_smc_context, find_swings, SmcContext};
    pub use crate::types::{Bar, Bias, Timeframe};
    pub use crate::DiagnosticsPass;
}

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::collaborators::{BarRepository, CurrentPriceSource, DerivativesProvider};
use crate::config::DiagnosticsConfig;
use crate::error::DiagnosticsError;
use crate::planner::{GlobalRegimeHint, TradePlan};
use crate::report::CompactReport;
use crate::scoring::{ScoringEngine, TimeframeScore};
use crate::storage::{DiagnosticsRepository, DiagnosticsSnapshot};
use crate::structure::{build_levels, build_smc_context, find_swings};
use crate::types::{validate_bars, Bar, Timeframe};

const SWING_LEFT: usize = 3;
const SWING_RIGHT: usize = 3;
const LEVEL_TOLERANCE_BPS: f64 = 15.0;
const SMC_LOOKBACK: usize = 50;

/// One analytical pass for a single `(symbol, target_tf)`: everything
/// downstream of the report, flattened for persistence
/// (`DiagnosticsSnapshot`) and the `TradePlan` it was derived from.
pub struct DiagnosticsPass {
    pub report: CompactReport,
    pub plan: TradePlan,
    pub snapshot: DiagnosticsSnapshot,
}

/// Orchestrates C1–C10 for a set of collaborators, the way the teacher's
/// agents are composed under an `AgentContext` (`engine/agent_trait.rs`),
/// except here there is no long-lived agent loop — each call is one
/// self-contained pass, matching the periodic-cadence scheduling model of
/// `spec.md` §5.
pub struct DiagnosticsEngine {
    pub config: DiagnosticsConfig,
    pub bars: Arc<dyn BarRepository>,
    pub derivatives: Option<Arc<dyn DerivativesProvider>>,
    pub current_price: Option<Arc<dyn CurrentPriceSource>>,
    pub repository: Arc<dyn DiagnosticsRepository>,
    pub scoring: ScoringEngine,
}

impl DiagnosticsEngine {
    pub fn new(
        config: DiagnosticsConfig,
        bars: Arc<dyn BarRepository>,
        derivatives: Option<Arc<dyn DerivativesProvider>>,
        current_price: Option<Arc<dyn CurrentPriceSource>>,
        repository: Arc<dyn DiagnosticsRepository>,
        group_weights: crate::config::GroupWeights,
    ) -> Self {
        Self { config, bars, derivatives, current_price, repository, scoring: ScoringEngine::new(group_weights) }
    }

    /// Computes one `(symbol, timeframe)` `TimeframeScore`, running C1–C6.
    /// Returns `InputInsufficient` when fewer than `min_full_bars` bars are
    /// available — the caller is expected to skip this timeframe rather
    /// than abort the multi-TF pass (`spec.md` §4.13).
    async fn score_one_timeframe(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<(TimeframeScore, Vec<Bar>), DiagnosticsError> {
        let bars = self.bars.last_n(symbol, timeframe, self.config.min_full_bars.max(200)).await?;
        validate_bars(&bars)?;
        if bars.len() < self.config.min_full_bars {
            return Err(DiagnosticsError::InputInsufficient(format!(
                "{symbol} {timeframe}: {} bars, need {}", bars.len(), self.config.min_full_bars
            )));
        }

        let indicators = crate::indicators::compute_indicators(&bars);
        let derivatives_snapshot = match &self.derivatives {
            Some(source) => source.get_derivatives(symbol).await,
            None => None,
        };
        let features = crate::features::extract_features(&bars, &indicators, derivatives_snapshot);
        let current_close = bars.last().map(|b| b.close);
        let analysis = crate::market_analyzer::analyze_market(bars.len(), current_close, &indicators, &features, &self.config);

        let swings = find_swings(&bars, SWING_LEFT, SWING_RIGHT);
        let levels = build_levels(&bars, &swings, LEVEL_TOLERANCE_BPS);
        let smc = build_smc_context(&bars, &swings, SMC_LOOKBACK, LEVEL_TOLERANCE_BPS);
        let momentum = crate::momentum::analyze_momentum(&indicators, &features, &levels, current_close);

        let snapshot_id = bars.last().map(|b| b.timestamp_ms.to_string()).unwrap_or_default();
        let score = self
            .scoring
            .score_timeframe(symbol, timeframe, &snapshot_id, analysis.phase, &indicators, &features, &momentum, Some(&smc))
            .await;

        debug!(symbol, %timeframe, net_score = score.net_score, "scored timeframe");
        Ok((score, bars))
    }

    /// Runs the full C1–C9 pass for one `(symbol, target_tf)` across every
    /// configured timeframe, then logs the resulting snapshot (C10). A
    /// missing or insufficient timeframe is skipped, never aborting the
    /// pass (`spec.md` §4.13); if the target timeframe itself is
    /// insufficient the whole pass is skipped (`Ok(None)`).
    pub async fn run_pass(
        &self,
        symbol: &str,
        target_tf: Timeframe,
        mode_override: Option<crate::planner::TradeMode>,
        regime: Option<GlobalRegimeHint>,
    ) -> Result<Option<DiagnosticsPass>, DiagnosticsError> {
        let mut per_tf_scores = HashMap::new();
        let mut target_bars: Option<Vec<Bar>> = None;

        for tf in Timeframe::all() {
            match self.score_one_timeframe(symbol, tf).await {
                Ok((score, bars)) => {
                    if tf == target_tf {
                        target_bars = Some(bars);
                    }
                    per_tf_scores.insert(tf, score);
                }
                Err(err) => {
                    warn!(symbol, %tf, error = %err, "skipping timeframe");
                    if tf == target_tf {
                        return Ok(None);
                    }
                }
            }
        }

        let Some(bars) = target_bars else { return Ok(None) };
        let indicators = crate::indicators::compute_indicators(&bars);
        let derivatives_snapshot = match &self.derivatives {
            Some(source) => source.get_derivatives(symbol).await,
            None => None,
        };
        let features = crate::features::extract_features(&bars, &indicators, derivatives_snapshot);
        let current_close = crate::collaborators::resolve_current_price(
            self.current_price.as_deref(),
            symbol,
            &self.bars.last_n(symbol, Timeframe::H1, 1).await.unwrap_or_default(),
        )
        .await
        .or(bars.last().map(|b| b.close));
        let analysis = crate::market_analyzer::analyze_market(bars.len(), current_close, &indicators, &features, &self.config);

        let swings = find_swings(&bars, SWING_LEFT, SWING_RIGHT);
        let levels = build_levels(&bars, &swings, LEVEL_TOLERANCE_BPS);
        let smc = build_smc_context(&bars, &swings, SMC_LOOKBACK, LEVEL_TOLERANCE_BPS);
        let momentum = crate::momentum::analyze_momentum(&indicators, &features, &levels, current_close);

        let multi = crate::aggregator::aggregate_multi_tf(&per_tf_scores, target_tf, &self.config.target_tf_matrix);
        let plan = crate::planner::build_plan(
            &bars, &indicators, &features, &analysis, &momentum, &levels, Some(&smc), mode_override, regime, &self.config.trade_planner,
        );

        let timestamp_ms = bars.last().map(|b| b.timestamp_ms).unwrap_or(0);
        let report = crate::report::build_report(
            symbol, target_tf, timestamp_ms, &per_tf_scores, &self.config.target_tf_matrix, &multi, &analysis, &momentum, Some(&smc), &plan, regime,
        );

        let nearest_support = levels
            .iter()
            .filter(|l| l.price <= current_close.unwrap_or(f64::INFINITY))
            .map(|l| l.price)
            .fold(None, |acc: Option<f64>, p| Some(acc.map_or(p, |a| a.max(p))));
        let nearest_resistance = levels
            .iter()
            .filter(|l| l.price >= current_close.unwrap_or(f64::NEG_INFINITY))
            .map(|l| l.price)
            .fold(None, |acc: Option<f64>, p| Some(acc.map_or(p, |a| a.min(p))));
        let distance_to_support = match (current_close, nearest_support) {
            (Some(px), Some(sup)) if px > 0.0 => Some((px - sup) / px),
            _ => None,
        };
        let distance_to_resistance = match (current_close, nearest_resistance) {
            (Some(px), Some(res)) if px > 0.0 => Some((res - px) / px),
            _ => None,
        };

        let unfilled_fvgs: Vec<&crate::structure::Fvg> = smc.fvgs.iter().filter(|f| !f.filled).collect();
        let nearest_unfilled_fvg = unfilled_fvgs
            .iter()
            .min_by(|a, b| {
                let mid_a = (a.low + a.high) / 2.0;
                let mid_b = (b.low + b.high) / 2.0;
                let da = (mid_a - current_close.unwrap_or(mid_a)).abs();
                let db = (mid_b - current_close.unwrap_or(mid_b)).abs();
                da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
            })
            .copied();
        let has_unfilled_imbalance = nearest_unfilled_fvg.is_some();
        let imbalance_distance = match (current_close, nearest_unfilled_fvg) {
            (Some(px), Some(fvg)) if px > 0.0 => Some((((fvg.low + fvg.high) / 2.0) - px) / px),
            _ => None,
        };

        let bearish_trigger_level = match multi.direction {
            crate::types::Bias::Short => plan.add_on_breakout_level,
            crate::types::Bias::Long => None,
        };
        let position_r = match (current_close, plan.dont_dca_above) {
            (Some(px), Some(stop)) if (px - stop).abs() > f64::EPSILON => Some((px - stop) / (px - stop).abs()),
            _ => None,
        };

        let snapshot = DiagnosticsSnapshot {
            id: 0,
            symbol: symbol.to_string(),
            timeframe: target_tf,
            timestamp_ms,
            aggregated_long: multi.aggregated_long,
            aggregated_short: multi.aggregated_short,
            direction: multi.direction,
            confidence: multi.confidence,
            regime: analysis.phase.to_string(),
            trend: features.trend.to_string(),
            volatility: features.volatility.to_string(),
            liquidity: features.liquidity.to_string(),
            nearest_support,
            nearest_resistance,
            distance_to_support,
            distance_to_resistance,
            has_unfilled_imbalance,
            imbalance_distance,
            bias: multi.direction,
            position_r,
            position_size_factor: Some(plan.position_size_factor),
            bullish_trigger_level: plan.add_on_breakout_level,
            bearish_trigger_level,
            invalidation_level: plan.dont_dca_above,
            setup_type: Some(report.setup.setup_type.to_string()),
            setup_description: Some(report.setup.comment.clone()),
            current_price: current_close,
        };

        let id = match self.repository.log_snapshot(snapshot.clone()).await {
            Ok(id) => id,
            Err(err) => {
                warn!(symbol, %target_tf, error = %err, "failed to log snapshot");
                0
            }
        };
        let mut snapshot = snapshot;
        snapshot.id = id;

        Ok(Some(DiagnosticsPass { report, plan, snapshot }))
    }
}
