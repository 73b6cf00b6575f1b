//! Integration tests for the concrete scenarios of `spec.md` §8 (S1-S6):
//! end-to-end passes through `DiagnosticsEngine`, plus the calibration and
//! cache-invalidation behaviors that don't go through a full pass.

use std::sync::Arc;

use async_trait::async_trait;

use market_doctor::prelude::*;
use market_doctor::config::{DiagnosticsConfig, GroupWeights};
use market_doctor::error::DiagnosticsError;
use market_doctor::DiagnosticsEngine;

/// Serves the same fixed bar series for every timeframe requested — enough
/// to drive a full `DiagnosticsEngine::run_pass` without a real market-data
/// backend.
struct FixedBarRepository {
    bars: Vec<Bar>,
}

#[async_trait]
impl BarRepository for FixedBarRepository {
    async fn last_n(&self, _symbol: &str, _timeframe: Timeframe, n: usize) -> Result<Vec<Bar>, DiagnosticsError> {
        let start = self.bars.len().saturating_sub(n);
        Ok(self.bars[start..].to_vec())
    }

    async fn bars_between(&self, _symbol: &str, _timeframe: Timeframe, from_ms: i64, to_ms: i64) -> Result<Vec<Bar>, DiagnosticsError> {
        Ok(self.bars.iter().filter(|b| b.timestamp_ms >= from_ms && b.timestamp_ms <= to_ms).cloned().collect())
    }

    async fn last_ts(&self, _symbol: &str, _timeframe: Timeframe) -> Result<Option<i64>, DiagnosticsError> {
        Ok(self.bars.last().map(|b| b.timestamp_ms))
    }

    async fn upsert_bar(&self, _symbol: &str, _timeframe: Timeframe, _bar: Bar) -> Result<(), DiagnosticsError> {
        Ok(())
    }

    async fn upsert_bars(&self, _symbol: &str, _timeframe: Timeframe, _bars: Vec<Bar>) -> Result<(), DiagnosticsError> {
        Ok(())
    }
}

fn engine_for(bars: Vec<Bar>) -> DiagnosticsEngine {
    DiagnosticsEngine::new(
        DiagnosticsConfig::default(),
        Arc::new(FixedBarRepository { bars }),
        None,
        None,
        InMemoryDiagnosticsRepository::new(),
        GroupWeights::default(),
    )
}

/// S1 — clean uptrend, close[i] = 100 * 1.002^i, constant volume, no
/// derivatives.
fn s1_bullish_bars(n: usize) -> Vec<Bar> {
    (0..n)
        .map(|i| {
            let close = 100.0 * 1.002_f64.powi(i as i32);
            Bar::new(3_600_000 * i as i64, close * 0.999, close * 1.006, close * 0.994, close, Some(1000.0))
        })
        .collect()
}

/// S2 — range compression: a wider 2% oscillation for the first 150 bars
/// narrowing to a 0.3% band for the last 50, which is what drives
/// `ATR_now / mean(ATR) < 0.7` (low volatility). Volume ramps down across
/// the last 50 bars so the last-20-bar window (what `classify_liquidity`
/// actually looks at) ends low relative to its own mean, not just thin
/// overall.
fn s2_compression_bars(n: usize) -> Vec<Bar> {
    let taper_start = n - 50;
    (0..n)
        .map(|i| {
            let wide_phase = i < taper_start;
            let amplitude = if wide_phase { 2.0 } else { 0.3 };
            let osc = ((i as f64) * 0.4).sin() * amplitude;
            let close = 100.0 + osc;
            let half_range = amplitude * 0.3 + 0.05;
            let volume = if wide_phase {
                100.0
            } else {
                let k = (i - taper_start) as f64;
                100.0 - k * (85.0 / 49.0)
            };
            Bar::new(3_600_000 * i as i64, close - half_range * 0.3, close + half_range, close - half_range, close, Some(volume))
        })
        .collect()
}

/// S3 — shakeout: a calm range for 170 bars, then the last 30 bars triple
/// their true range and ramp volume down to a third — the ramp (rather
/// than a flat cut) ensures the last-20-bar window `classify_liquidity`
/// inspects is itself declining, not just uniformly thin.
fn s3_shakeout_bars(n: usize) -> Vec<Bar> {
    let spike_start = n - 30;
    (0..n)
        .map(|i| {
            let spike = i >= spike_start;
            let amplitude = if spike { 6.0 } else { 1.0 };
            let volume = if spike {
                let k = (i - spike_start) as f64;
                900.0 - k * (800.0 / 29.0)
            } else {
                900.0
            };
            let osc = ((i as f64) * 0.5).sin() * amplitude;
            let close = 100.0 + osc;
            let half_range = amplitude * 0.6;
            Bar::new(3_600_000 * i as i64, close - half_range * 0.2, close + half_range, close - half_range, close, Some(volume))
        })
        .collect()
}

#[tokio::test]
async fn s1_trend_bullish_continuation() {
    let bars = s1_bullish_bars(200);
    let ind = compute_indicators(&bars);
    let features = extract_features(&bars, &ind, None);
    assert_eq!(features.trend, market_doctor::features::TrendState::Bullish);

    let trend_group = market_doctor::scoring::groups::score_trend_group(&ind, &features);
    assert!(trend_group.raw_score > 1.0, "trend group raw_score was {}", trend_group.raw_score);

    let engine = engine_for(bars);
    let pass = engine.run_pass("BTCUSDT", Timeframe::H1, None, None).await.unwrap().unwrap();
    assert_eq!(pass.report.regime, "EXPANSION_UP");
    assert_eq!(pass.report.direction, Bias::Long);
    assert!(pass.report.score_long >= 7.0, "aggregated_long was {}", pass.report.score_long);
}

#[tokio::test]
async fn s2_range_compression_is_accumulation() {
    let bars = s2_compression_bars(200);
    let ind = compute_indicators(&bars);
    let features = extract_features(&bars, &ind, None);
    assert_eq!(features.volatility, market_doctor::features::VolatilityState::Low);

    let engine = engine_for(bars);
    let pass = engine.run_pass("BTCUSDT", Timeframe::H1, None, None).await.unwrap().unwrap();
    assert_eq!(pass.report.regime, "ACCUMULATION");
    assert_eq!(pass.plan.mode.to_string(), "accumulation_play");
    assert!(pass.plan.limit_buy_zone.is_some());
}

#[tokio::test]
async fn s3_shakeout_restricts_position_size() {
    let bars = s3_shakeout_bars(200);
    let ind = compute_indicators(&bars);
    let features = extract_features(&bars, &ind, None);
    assert_eq!(features.volatility, market_doctor::features::VolatilityState::High);
    assert_eq!(features.liquidity, market_doctor::features::LiquidityState::Low);

    let engine = engine_for(bars);
    let pass = engine.run_pass("BTCUSDT", Timeframe::H1, None, None).await.unwrap().unwrap();
    assert_eq!(pass.report.regime, "SHAKEOUT");
    assert!(!pass.plan.small_position_allowed);
    assert!(pass.plan.position_size_factor <= 0.7, "position_size_factor was {}", pass.plan.position_size_factor);
}

/// S4 — entry at 100 with a 102 bullish trigger / 98 invalidation; five
/// bars follow with highs [101,103,104,103,102] and lows
/// [99,99.5,100,101,101].
#[test]
fn s4_snapshot_to_outcome_for_long() {
    let entry = Bar::new(0, 100.0, 100.2, 99.8, 100.0, Some(10.0));
    let highs = [101.0, 103.0, 104.0, 103.0, 102.0];
    let lows = [99.0, 99.5, 100.0, 101.0, 101.0];
    let mut bars = vec![entry];
    for (i, (&high, &low)) in highs.iter().zip(lows.iter()).enumerate() {
        let close = if i == highs.len() - 1 { 102.0 } else { (high + low) / 2.0 };
        bars.push(Bar::new(3_600_000 * (i as i64 + 1), close, high, low, close, Some(10.0)));
    }

    let outcome = evaluate_outcome(&bars, 0, 100.0, Bias::Long, Some(102.0), None, Some(98.0), 5, 5.0, 1).unwrap();
    assert!(outcome.hit_tp);
    assert!(!outcome.hit_sl);
    assert!((outcome.r_at_horizon.unwrap() - 1.0).abs() < 1e-9, "r_at_horizon was {:?}", outcome.r_at_horizon);
    assert!((outcome.max_r_up.unwrap() - 2.0).abs() < 1e-9, "max_r_up was {:?}", outcome.max_r_up);
}

/// S5 — 100 snapshots in the `strong_long` bucket (aggregated_long = 7.0),
/// 65% winning (`r_at_horizon >= 1.0`). The "strong" threshold stays at 6.0
/// since the strong bucket itself clears the 0.6 win-rate bar.
#[test]
fn s5_calibration_recommends_keeping_strong_threshold() {
    let snapshot = |i: usize| DiagnosticsSnapshot {
        id: i as i64,
        symbol: "BTCUSDT".into(),
        timeframe: Timeframe::H1,
        timestamp_ms: i as i64,
        aggregated_long: 7.0,
        aggregated_short: 3.0,
        direction: Bias::Long,
        confidence: 0.7,
        regime: "EXPANSION_UP".into(),
        trend: "BULLISH".into(),
        volatility: "MEDIUM".into(),
        liquidity: "MEDIUM".into(),
        nearest_support: None,
        nearest_resistance: None,
        distance_to_support: None,
        distance_to_resistance: None,
        has_unfilled_imbalance: false,
        imbalance_distance: None,
        bias: Bias::Long,
        position_r: None,
        position_size_factor: Some(1.0),
        bullish_trigger_level: None,
        bearish_trigger_level: None,
        invalidation_level: None,
        setup_type: None,
        setup_description: None,
        current_price: Some(100.0),
    };
    let outcome = |r: f64, id: i64| DiagnosticsOutcome {
        snapshot_id: id,
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
    };

    let pairs: Vec<_> = (0..100)
        .map(|i| {
            let r = if i < 65 { 1.5 } else { -1.2 };
            (snapshot(i), vec![outcome(r, i as i64)])
        })
        .collect();

    let report = generate_calibration_report(&pairs, &[], &GroupWeights::default(), 4, 24.0);
    let long_threshold = report.score_thresholds.get(&Bias::Long).expect("strong_long bucket should clear 0.6 win rate");
    assert!((long_threshold.strong - 6.0).abs() < 1e-9);
}

/// S6 — recomputing a `TimeframeScore` for the same `(symbol, timeframe,
/// snapshot_id)` under new weights only reflects the change once the cache
/// has been invalidated; before that, the stale cached value is served.
#[tokio::test]
async fn s6_weight_activation_invalidates_cache() {
    let bars = s1_bullish_bars(200);
    let ind = compute_indicators(&bars);
    let features = extract_features(&bars, &ind, None);
    let momentum = analyze_momentum(&ind, &features, &[], Some(bars.last().unwrap().close));

    let mut engine = ScoringEngine::new(GroupWeights::default());
    let before = engine
        .score_timeframe("BTCUSDT", Timeframe::H1, "snap-1", MarketPhase::ExpansionUp, &ind, &features, &momentum, None)
        .await;

    let new_weights = GroupWeights {
        trend: 0.40,
        momentum: 0.20,
        volume: 0.10,
        volatility: 0.10,
        structure: 0.15,
        derivatives: 0.05,
    };
    engine.set_weights(new_weights.clone());

    let stale = engine
        .score_timeframe("BTCUSDT", Timeframe::H1, "snap-1", MarketPhase::ExpansionUp, &ind, &features, &momentum, None)
        .await;
    assert!((stale.net_score - before.net_score).abs() < 1e-12, "cache should still serve the old value pre-invalidation");

    engine.invalidate_cache().await;
    let after = engine
        .score_timeframe("BTCUSDT", Timeframe::H1, "snap-1", MarketPhase::ExpansionUp, &ind, &features, &momentum, None)
        .await;
    assert!((after.net_score - before.net_score).abs() > 1e-9, "net_score should differ once the cache is invalidated under new weights");
    assert_eq!(engine.weights().clone(), new_weights);
}
