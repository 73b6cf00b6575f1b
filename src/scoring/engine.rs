//! C6 — ScoringEngine: combines the six group scores into one timeframe
//! score, weighted by `GroupWeights`, with a 60s TTL single-flight cache
//! (`spec.md` §4.6).

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::ScoreCache;
use crate::config::GroupWeights;
use crate::features::Features;
use crate::indicators::IndicatorSet;
use crate::market_analyzer::MarketPhase;
use crate::momentum::MomentumAnalysis;
use crate::scoring::groups::{
    score_derivatives_group, score_momentum_group, score_structure_group, score_trend_group,
    score_volatility_group, score_volume_group, GroupScore, IndicatorGroup,
};
use crate::structure::SmcContext;
use crate::types::{clamp, Timeframe};

const CACHE_TTL: Duration = Duration::from_secs(60);
const CACHE_CAPACITY: usize = 4096;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeframeScore {
    pub timeframe: Timeframe,
    pub phase: MarketPhase,
    pub group_scores: HashMap<IndicatorGroup, GroupScore>,
    pub net_score: f64,
    pub normalized_long: f64,
    pub normalized_short: f64,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct CacheKey {
    symbol: String,
    timeframe: Timeframe,
    snapshot_id: String,
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

pub struct ScoringEngine {
    weights: GroupWeights,
    cache: ScoreCache<CacheKey, TimeframeScore>,
}

impl ScoringEngine {
    pub fn new(weights: GroupWeights) -> Self {
        Self { weights, cache: ScoreCache::new(CACHE_CAPACITY, CACHE_TTL) }
    }

    pub fn weights(&self) -> &GroupWeights {
        &self.weights
    }

    pub fn set_weights(&mut self, weights: GroupWeights) {
        self.weights = weights;
    }

    /// Scores one timeframe. `snapshot_id` (bar-series fingerprint, e.g. the
    /// last bar's timestamp) keys the cache alongside symbol/timeframe so a
    /// stale cached score is never served once new bars arrive.
    pub async fn score_timeframe(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        snapshot_id: &str,
        phase: MarketPhase,
        indicators: &IndicatorSet,
        features: &Features,
        momentum: &MomentumAnalysis,
        smc: Option<&SmcContext>,
    ) -> TimeframeScore {
        let key = CacheKey {
            symbol: symbol.to_string(),
            timeframe,
            snapshot_id: snapshot_id.to_string(),
        };
        let weights = self.weights.clone();
        let indicators = indicators.clone();
        let features = features.clone();
        let momentum = momentum.clone();
        let smc = smc.cloned();

        self.cache
            .get_or_compute(key, move || async move {
                compute_timeframe_score(timeframe, phase, &indicators, &features, &momentum, smc.as_ref(), &weights)
            })
            .await
    }

    pub async fn invalidate_cache(&self) {
        self.cache.invalidate_all().await;
    }
}

fn compute_timeframe_score(
    timeframe: Timeframe,
    phase: MarketPhase,
    indicators: &IndicatorSet,
    features: &Features,
    momentum: &MomentumAnalysis,
    smc: Option<&SmcContext>,
    weights: &GroupWeights,
) -> TimeframeScore {
    let mut group_scores = HashMap::new();
    group_scores.insert(IndicatorGroup::Trend, score_trend_group(indicators, features));
    group_scores.insert(IndicatorGroup::Momentum, score_momentum_group(indicators, features, momentum));
    group_scores.insert(IndicatorGroup::Volume, score_volume_group(indicators));
    group_scores.insert(IndicatorGroup::Volatility, score_volatility_group(indicators, features));
    group_scores.insert(IndicatorGroup::Structure, score_structure_group(smc, phase));
    group_scores.insert(IndicatorGroup::Derivatives, score_derivatives_group(features));

    let net_score: f64 = group_scores
        .iter()
        .map(|(group, score)| score.raw_score * weight_for(weights, *group))
        .sum();

    let normalized_long = clamp((net_score + 2.0) / 4.0 * 10.0, 0.0, 10.0);
    let normalized_short = clamp(10.0 - normalized_long, 0.0, 10.0);

    TimeframeScore { timeframe, phase, group_scores, net_score, normalized_long, normalized_short }
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

    #[tokio::test]
    async fn scoring_is_cached_per_key() {
        let engine = ScoringEngine::new(GroupWeights::default());
        let bars = uptrend_bars(200);
        let ind = compute_indicators(&bars);
        let features = Features::default();
        let momentum = crate::momentum::analyze_momentum(&ind, &features, &[], Some(100.0));

        let a = engine
            .score_timeframe("BTCUSDT", Timeframe::H1, "snap-1", MarketPhase::ExpansionUp, &ind, &features, &momentum, None)
            .await;
        let b = engine
            .score_timeframe("BTCUSDT", Timeframe::H1, "snap-1", MarketPhase::ExpansionUp, &ind, &features, &momentum, None)
            .await;
        assert!((a.net_score - b.net_score).abs() < 1e-12);
    }

    #[tokio::test]
    async fn normalized_scores_sum_to_ten() {
        let engine = ScoringEngine::new(GroupWeights::default());
        let bars = uptrend_bars(200);
        let ind = compute_indicators(&bars);
        let features = Features::default();
        let momentum = crate::momentum::analyze_momentum(&ind, &features, &[], Some(100.0));
        let score = engine
            .score_timeframe("ETHUSDT", Timeframe::H4, "snap-2", MarketPhase::Accumulation, &ind, &features, &momentum, None)
            .await;
        assert!((score.normalized_long + score.normalized_short - 10.0).abs() < 1e-9);
    }
}
