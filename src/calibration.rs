//! C12 — CalibrationAnalyzer: turns accumulated
//! `(DiagnosticsSnapshot, DiagnosticsOutcome)` pairs into score-bucket win
//! rates, group-weight correlation recommendations, and threshold
//! promotions (`spec.md` §4.11, grounded on `calibration_analyzer.py`). Also
//! hosts `WeightsStorage`, the named/versioned `GroupWeights` configuration
//! store `ScoringEngine` reloads from (`weights_storage.py`).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::config::GroupWeights;
use crate::error::DiagnosticsError;
use crate::scoring::IndicatorGroup;
use crate::storage::{DiagnosticsOutcome, DiagnosticsRepository, DiagnosticsSnapshot, SnapshotFilter};
use crate::types::Bias;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreBucketStats {
    pub score_range: (f64, f64),
    pub count: usize,
    pub avg_r: Option<f64>,
    pub win_rate: Option<f64>,
    pub loss_rate: Option<f64>,
    pub avg_max_r_up: Option<f64>,
    pub avg_max_r_down: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupWeightRecommendation {
    pub group: IndicatorGroup,
    pub current_weight: f64,
    pub recommended_weight: f64,
    pub correlation_with_success: f64,
    pub reasoning: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeStats {
    pub avg_r: f64,
    pub win_rate: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreThresholds {
    pub strong: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationReport {
    pub score_thresholds: HashMap<Bias, ScoreThresholds>,
    pub group_weights: GroupWeights,
    pub recommendations: Vec<GroupWeightRecommendation>,
    pub stats_by_regime: HashMap<String, RegimeStats>,
}

fn bucket_name(direction: Bias, score: f64) -> Option<&'static str> {
    match direction {
        Bias::Long => Some(if score < 4.0 {
            "weak_long"
        } else if score < 6.0 {
            "moderate_long"
        } else if score < 8.0 {
            "strong_long"
        } else {
            "extreme_long"
        }),
        Bias::Short => Some(if score < 4.0 {
            "weak_short"
        } else if score < 6.0 {
            "moderate_short"
        } else if score < 8.0 {
            "strong_short"
        } else {
            "extreme_short"
        }),
        Bias::Neutral => None,
    }
}

fn score_range(name: &str) -> (f64, f64) {
    match name {
        "weak_long" | "weak_short" => (0.0, 4.0),
        "moderate_long" | "moderate_short" => (4.0, 6.0),
        "strong_long" | "strong_short" => (6.0, 8.0),
        _ => (8.0, 10.0),
    }
}

fn matching_outcome(outcomes: &[DiagnosticsOutcome], horizon_bars: u32, horizon_hours: f64) -> Option<&DiagnosticsOutcome> {
    outcomes
        .iter()
        .find(|o| o.horizon_bars == horizon_bars && (o.horizon_hours - horizon_hours).abs() < 0.1)
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Bucket analysis over accumulated snapshot/outcome pairs, analogue of
/// `analyze_score_buckets`: groups pairs by `(direction, score)` bucket and
/// summarises `r_at_horizon` outcomes per bucket.
pub fn analyze_score_buckets(
    pairs: &[(DiagnosticsSnapshot, Vec<DiagnosticsOutcome>)],
    horizon_bars: u32,
    horizon_hours: f64,
) -> HashMap<String, ScoreBucketStats> {
    let mut buckets: HashMap<&str, Vec<f64>> = HashMap::new();
    let mut max_r_up_by_bucket: HashMap<&str, Vec<f64>> = HashMap::new();
    let mut max_r_down_by_bucket: HashMap<&str, Vec<f64>> = HashMap::new();
    let mut counts: HashMap<&str, usize> = HashMap::new();

    for (snapshot, outcomes) in pairs {
        let Some(outcome) = matching_outcome(outcomes, horizon_bars, horizon_hours) else { continue };
        let Some(r) = outcome.r_at_horizon else { continue };
        let score = match snapshot.direction {
            Bias::Long => snapshot.aggregated_long,
            Bias::Short => snapshot.aggregated_short,
            Bias::Neutral => continue,
        };
        let Some(name) = bucket_name(snapshot.direction, score) else { continue };
        *counts.entry(name).or_insert(0) += 1;
        buckets.entry(name).or_default().push(r);
        if let Some(up) = outcome.max_r_up {
            max_r_up_by_bucket.entry(name).or_default().push(up);
        }
        if let Some(down) = outcome.max_r_down {
            max_r_down_by_bucket.entry(name).or_default().push(down);
        }
    }

    let mut out = HashMap::new();
    for (name, r_values) in &buckets {
        let count = counts.get(name).copied().unwrap_or(0);
        let wins = r_values.iter().filter(|r| **r >= 1.0).count();
        let losses = r_values.iter().filter(|r| **r <= -1.0).count();
        out.insert(
            name.to_string(),
            ScoreBucketStats {
                score_range: score_range(name),
                count,
                avg_r: mean(r_values),
                win_rate: if count > 0 { Some(wins as f64 / count as f64) } else { None },
                loss_rate: if count > 0 { Some(losses as f64 / count as f64) } else { None },
                avg_max_r_up: max_r_up_by_bucket.get(name).and_then(|v| mean(v)),
                avg_max_r_down: max_r_down_by_bucket.get(name).and_then(|v| mean(v)),
            },
        );
    }
    out
}

/// Pearson correlation between a group's raw score (sign-aligned with trade
/// direction) and `r_at_horizon`, needs >= 10 paired samples
/// (`analyze_group_correlations`).
fn pearson_correlation(pairs: &[(f64, f64)]) -> Option<f64> {
    if pairs.len() < 10 {
        return None;
    }
    let scores: Vec<f64> = pairs.iter().map(|p| p.0).collect();
    let results: Vec<f64> = pairs.iter().map(|p| p.1).collect();
    let mean_score = mean(&scores)?;
    let mean_result = mean(&results)?;
    let numerator: f64 = scores.iter().zip(&results).map(|(s, r)| (s - mean_score) * (r - mean_result)).sum();
    let denom_score: f64 = scores.iter().map(|s| (s - mean_score).powi(2)).sum();
    let denom_result: f64 = results.iter().map(|r| (r - mean_result).powi(2)).sum();
    if denom_score <= 0.0 || denom_result <= 0.0 {
        return None;
    }
    Some(numerator / (denom_score * denom_result).sqrt())
}

pub fn analyze_group_correlations(
    pairs: &[(DiagnosticsSnapshot, Vec<DiagnosticsOutcome>, HashMap<IndicatorGroup, f64>)],
    horizon_bars: u32,
    horizon_hours: f64,
) -> HashMap<IndicatorGroup, f64> {
    let mut by_group: HashMap<IndicatorGroup, Vec<(f64, f64)>> = HashMap::new();
    for (snapshot, outcomes, group_scores) in pairs {
        let Some(outcome) = matching_outcome(outcomes, horizon_bars, horizon_hours) else { continue };
        let Some(r) = outcome.r_at_horizon else { continue };
        for (group, raw_score) in group_scores {
            match snapshot.direction {
                Bias::Long if *raw_score > 0.0 => by_group.entry(*group).or_default().push((*raw_score, r)),
                Bias::Short if *raw_score < 0.0 => by_group.entry(*group).or_default().push((raw_score.abs(), r.abs())),
                _ => {}
            }
        }
    }
    by_group
        .into_iter()
        .filter_map(|(group, samples)| pearson_correlation(&samples).map(|c| (group, c)))
        .collect()
}

fn weight_for(weights: &GroupWeights, group: IndicatorGroup) -> f64 {
    match group {
        IndicatorGroup::Trend => weights.trend,
        IndicatorGroup::Momentum => weights.momentum,
        IndicatorGroup::Volume => weights.volume,
        IndicatorGroup::Volatility => weights.volatility,
        IndicatorGroup::Structure => weights.structure,
        IndicatorGroup::Derivatives => weights.derivatives,
    }
}

/// Threshold promotion: the "strong" bucket's win rate must clear 0.6 to
/// keep the 6.0 cutoff; otherwise, if the "extreme" bucket clears 0.6,
/// the cutoff is promoted to 7.5 — fewer signals qualify as strong but
/// those that do actually win (`generate_calibration_report`'s threshold
/// logic, supplemented per `SPEC_FULL.md` §11).
fn promote_threshold(buckets: &HashMap<String, ScoreBucketStats>, strong_key: &str, extreme_key: &str) -> Option<f64> {
    if let Some(strong) = buckets.get(strong_key) {
        if strong.win_rate.unwrap_or(0.0) >= 0.6 {
            return Some(6.0);
        }
    }
    if let Some(extreme) = buckets.get(extreme_key) {
        if extreme.win_rate.unwrap_or(0.0) >= 0.6 {
            return Some(7.5);
        }
    }
    None
}

pub fn generate_calibration_report(
    pairs: &[(DiagnosticsSnapshot, Vec<DiagnosticsOutcome>)],
    group_score_pairs: &[(DiagnosticsSnapshot, Vec<DiagnosticsOutcome>, HashMap<IndicatorGroup, f64>)],
    current_weights: &GroupWeights,
    horizon_bars: u32,
    horizon_hours: f64,
) -> CalibrationReport {
    let buckets = analyze_score_buckets(pairs, horizon_bars, horizon_hours);

    let mut score_thresholds = HashMap::new();
    if let Some(t) = promote_threshold(&buckets, "strong_long", "extreme_long") {
        score_thresholds.insert(Bias::Long, ScoreThresholds { strong: t });
    }
    if let Some(t) = promote_threshold(&buckets, "strong_short", "extreme_short") {
        score_thresholds.insert(Bias::Short, ScoreThresholds { strong: t });
    }

    let correlations = analyze_group_correlations(group_score_pairs, horizon_bars, horizon_hours);
    let mut recommendations = Vec::new();
    for (group, correlation) in &correlations {
        let current_weight = weight_for(current_weights, *group);
        let recommended_weight = if *correlation > 0.3 {
            (current_weight * 1.2).min(0.35)
        } else if *correlation < -0.1 {
            (current_weight * 0.8).max(0.05)
        } else {
            current_weight
        };
        if (recommended_weight - current_weight).abs() > 0.01 {
            recommendations.push(GroupWeightRecommendation {
                group: *group,
                current_weight,
                recommended_weight,
                correlation_with_success: *correlation,
                reasoning: format!("correlation with success: {correlation:.2}"),
            });
        }
    }

    let mut stats_by_regime: HashMap<String, Vec<f64>> = HashMap::new();
    for (snapshot, outcomes) in pairs {
        let Some(outcome) = matching_outcome(outcomes, horizon_bars, horizon_hours) else { continue };
        let Some(r) = outcome.r_at_horizon else { continue };
        stats_by_regime.entry(snapshot.regime.clone()).or_default().push(r);
    }
    let stats_by_regime = stats_by_regime
        .into_iter()
        .map(|(regime, values)| {
            let wins = values.iter().filter(|r| **r >= 1.0).count();
            let count = values.len();
            (
                regime,
                RegimeStats { avg_r: mean(&values).unwrap_or(0.0), win_rate: wins as f64 / count as f64, count },
            )
        })
        .collect();

    CalibrationReport {
        score_thresholds,
        group_weights: current_weights.clone(),
        recommendations,
        stats_by_regime,
    }
}

/// One named, versioned `GroupWeights` configuration; only one may be
/// `active` at a time (`scoring_weights` table's `is_active` invariant).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightsConfiguration {
    pub name: String,
    pub weights: GroupWeights,
    pub description: Option<String>,
    pub created_at_ms: i64,
    pub is_active: bool,
}

/// Storage for named `GroupWeights` configurations. Activating a
/// configuration is expected to invalidate `ScoringEngine`'s score cache —
/// that invalidation is the caller's responsibility (`ScoringEngine` has no
/// visibility into weight storage), not this trait's (`spec.md` §4.11).
#[async_trait]
pub trait WeightsStorage: Send + Sync {
    async fn save_weights(&self, config: WeightsConfiguration) -> Result<(), DiagnosticsError>;
    async fn load_weights(&self, name: Option<&str>) -> Result<Option<GroupWeights>, DiagnosticsError>;
    async fn get_active_weights(&self) -> Result<GroupWeights, DiagnosticsError>;
    async fn list_configurations(&self) -> Result<Vec<WeightsConfiguration>, DiagnosticsError>;
    async fn set_active(&self, name: &str) -> Result<bool, DiagnosticsError>;
}

pub struct InMemoryWeightsStorage {
    configs: RwLock<HashMap<String, WeightsConfiguration>>,
}

impl InMemoryWeightsStorage {
    pub fn new(created_at_ms: i64) -> Arc<Self> {
        let mut configs = HashMap::new();
        configs.insert(
            "default".to_string(),
            WeightsConfiguration {
                name: "default".to_string(),
                weights: GroupWeights::default(),
                description: Some("default group weights".into()),
                created_at_ms,
                is_active: true,
            },
        );
        Arc::new(Self { configs: RwLock::new(configs) })
    }
}

#[async_trait]
impl WeightsStorage for InMemoryWeightsStorage {
    async fn save_weights(&self, config: WeightsConfiguration) -> Result<(), DiagnosticsError> {
        let mut configs = self.configs.write().await;
        if config.is_active {
            for existing in configs.values_mut() {
                existing.is_active = false;
            }
        }
        configs.insert(config.name.clone(), config);
        Ok(())
    }

    async fn load_weights(&self, name: Option<&str>) -> Result<Option<GroupWeights>, DiagnosticsError> {
        let configs = self.configs.read().await;
        match name {
            Some(name) => Ok(configs.get(name).map(|c| c.weights.clone())),
            None => Ok(configs.values().find(|c| c.is_active).map(|c| c.weights.clone())),
        }
    }

    async fn get_active_weights(&self) -> Result<GroupWeights, DiagnosticsError> {
        let configs = self.configs.read().await;
        configs
            .values()
            .find(|c| c.is_active)
            .map(|c| c.weights.clone())
            .ok_or_else(|| DiagnosticsError::RepositoryError("no active weights configuration".into()))
    }

    async fn list_configurations(&self) -> Result<Vec<WeightsConfiguration>, DiagnosticsError> {
        Ok(self.configs.read().await.values().cloned().collect())
    }

    async fn set_active(&self, name: &str) -> Result<bool, DiagnosticsError> {
        let mut configs = self.configs.write().await;
        if !configs.contains_key(name) {
            return Ok(false);
        }
        for (key, config) in configs.iter_mut() {
            config.is_active = key == name;
        }
        Ok(true)
    }
}

/// Fetches all `(snapshot, outcomes)` pairs for a symbol/timeframe from a
/// `DiagnosticsRepository`, the shape `analyze_score_buckets` consumes.
pub async fn load_snapshot_outcome_pairs(
    repo: &dyn DiagnosticsRepository,
    filter: SnapshotFilter,
) -> Result<Vec<(DiagnosticsSnapshot, Vec<DiagnosticsOutcome>)>, DiagnosticsError> {
    let snapshots = repo.get_snapshots(filter).await?;
    let mut out = Vec::with_capacity(snapshots.len());
    for snapshot in snapshots {
        let outcomes = repo.get_outcomes_for_snapshot(snapshot.id).await?;
        out.push((snapshot, outcomes));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(direction: Bias, score: f64) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            id: 1,
            symbol: "BTCUSDT".into(),
            timeframe: crate::types::Timeframe::H1,
            timestamp_ms: 0,
            aggregated_long: if direction == Bias::Long { score } else { 10.0 - score },
            aggregated_short: if direction == Bias::Short { score } else { 10.0 - score },
            direction,
            confidence: 0.7,
            regime: "TRENDING_BULL".into(),
            trend: "BULLISH".into(),
            volatility: "MEDIUM".into(),
            liquidity: "MEDIUM".into(),
            nearest_support: None,
            nearest_resistance: None,
            distance_to_support: None,
            distance_to_resistance: None,
            has_unfilled_imbalance: false,
            imbalance_distance: None,
            bias: direction,
            position_r: None,
            position_size_factor: Some(1.0),
            bullish_trigger_level: None,
            bearish_trigger_level: None,
            invalidation_level: None,
            setup_type: None,
            setup_description: None,
            current_price: Some(100.0),
        }
    }

    fn outcome(r: f64) -> DiagnosticsOutcome {
        DiagnosticsOutcome {
            snapshot_id: 1,
            horizon_bars: 4,
            horizon_hours: 24.0,
            max_r_up: Some(r.max(0.0)),
            max_r_down: Some((-r).max(0.0)),
            hit_tp: r >= 1.0,
            hit_sl: r <= -1.0,
            r_at_horizon: Some(r),
            entry_price: 100.0,
            price_at_horizon: 100.0 + r,
            highest_price: 110.0,
            lowest_price: 90.0,
        }
    }

    #[test]
    fn strong_long_bucket_win_rate_computed() {
        let pairs: Vec<_> = (0..10)
            .map(|i| {
                let r = if i < 7 { 1.5 } else { -1.2 };
                (snapshot(Bias::Long, 7.0), vec![outcome(r)])
            })
            .collect();
        let buckets = analyze_score_buckets(&pairs, 4, 24.0);
        let strong = buckets.get("strong_long").unwrap();
        assert_eq!(strong.count, 10);
        assert!((strong.win_rate.unwrap() - 0.7).abs() < 1e-9);
    }

    #[test]
    fn threshold_promotes_when_strong_bucket_underperforms() {
        let mut buckets = HashMap::new();
        buckets.insert(
            "strong_long".to_string(),
            ScoreBucketStats { score_range: (6.0, 8.0), count: 10, avg_r: Some(0.1), win_rate: Some(0.3), loss_rate: Some(0.5), avg_max_r_up: None, avg_max_r_down: None },
        );
        buckets.insert(
            "extreme_long".to_string(),
            ScoreBucketStats { score_range: (8.0, 10.0), count: 10, avg_r: Some(1.0), win_rate: Some(0.65), loss_rate: Some(0.1), avg_max_r_up: None, avg_max_r_down: None },
        );
        assert_eq!(promote_threshold(&buckets, "strong_long", "extreme_long"), Some(7.5));
    }

    #[tokio::test]
    async fn activating_a_configuration_deactivates_others() {
        let storage = InMemoryWeightsStorage::new(0);
        storage
            .save_weights(WeightsConfiguration {
                name: "calibrated".into(),
                weights: GroupWeights::default(),
                description: None,
                created_at_ms: 1,
                is_active: false,
            })
            .await
            .unwrap();
        assert!(storage.set_active("calibrated").await.unwrap());
        let configs = storage.list_configurations().await.unwrap();
        let active: Vec<_> = configs.iter().filter(|c| c.is_active).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "calibrated");
    }

    #[tokio::test]
    async fn unknown_configuration_is_not_activated() {
        let storage = InMemoryWeightsStorage::new(0);
        assert!(!storage.set_active("nonexistent").await.unwrap());
    }
}
