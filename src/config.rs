//! Configuration surface. A single struct carries every tunable named in
//! `spec.md` §6; `validate()` is invoked once at process start and rejects
//! internally-inconsistent configuration with a `Misconfiguration` error —
//! never at per-request time, per `spec.md` §7.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::DiagnosticsError;
use crate::types::Timeframe;

/// Minimum number of bars required for the full indicator set (`spec.md`
/// §4.1). Below this, `IndicatorCalculator` returns a minimal subset only.
pub const MIN_FULL_BARS: usize = 150;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolatilityThresholds {
    pub high_ratio: f64,
    pub low_ratio: f64,
}

impl Default for VolatilityThresholds {
    fn default() -> Self {
        Self {
            high_ratio: 1.5,
            low_ratio: 0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidityThresholds {
    pub high_ratio: f64,
    pub low_ratio: f64,
}

impl Default for LiquidityThresholds {
    fn default() -> Self {
        Self {
            high_ratio: 1.5,
            low_ratio: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RsiBands {
    pub overbought: f64,
    pub oversold: f64,
    pub bull_mid: f64,
    pub bear_mid: f64,
}

impl Default for RsiBands {
    fn default() -> Self {
        Self {
            overbought: 70.0,
            oversold: 30.0,
            bull_mid: 60.0,
            bear_mid: 40.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DerivativesThresholds {
    pub funding_extreme: f64,
    pub funding_elevated: f64,
    pub oi_rapid_pct: f64,
    pub oi_moderate_pct: f64,
}

impl Default for DerivativesThresholds {
    fn default() -> Self {
        Self {
            funding_extreme: 0.01,
            funding_elevated: 0.001,
            oi_rapid_pct: 10.0,
            oi_moderate_pct: 5.0,
        }
    }
}

/// Weight map over the five `risk_score`/`pump_score` components
/// (volatility, liquidity, phase, derivatives, trend). Must sum to 1.0 ±
/// 0.01, validated at load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexWeights {
    pub volatility: f64,
    pub liquidity: f64,
    pub phase: f64,
    pub derivatives: f64,
    pub trend: f64,
}

impl IndexWeights {
    pub fn sum(&self) -> f64 {
        self.volatility + self.liquidity + self.phase + self.derivatives + self.trend
    }
}

impl Default for IndexWeights {
    fn default() -> Self {
        Self {
            volatility: 0.30,
            liquidity: 0.25,
            phase: 0.20,
            derivatives: 0.15,
            trend: 0.10,
        }
    }
}

/// Group weights used by `ScoringEngine` (`spec.md` §4.6). This is the
/// payload persisted and versioned by `WeightsStorage`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupWeights {
    pub trend: f64,
    pub momentum: f64,
    pub volume: f64,
    pub volatility: f64,
    pub structure: f64,
    pub derivatives: f64,
}

impl GroupWeights {
    pub fn sum(&self) -> f64 {
        self.trend + self.momentum + self.volume + self.volatility + self.structure + self.derivatives
    }
}

impl Default for GroupWeights {
    fn default() -> Self {
        Self {
            trend: 0.25,
            momentum: 0.25,
            volume: 0.15,
            volatility: 0.10,
            structure: 0.20,
            derivatives: 0.05,
        }
    }
}

/// Target-TF-dependent weight matrix for multi-timeframe aggregation
/// (`spec.md` §4.7 table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetTfMatrix {
    pub rows: HashMap<Timeframe, HashMap<Timeframe, f64>>,
}

impl Default for TargetTfMatrix {
    fn default() -> Self {
        let mut rows = HashMap::new();
        let row = |h1: f64, h4: f64, d1: f64, w1: f64| {
            let mut m = HashMap::new();
            m.insert(Timeframe::H1, h1);
            m.insert(Timeframe::H4, h4);
            m.insert(Timeframe::D1, d1);
            m.insert(Timeframe::W1, w1);
            m
        };
        rows.insert(Timeframe::H1, row(0.50, 0.30, 0.15, 0.05));
        rows.insert(Timeframe::H4, row(0.20, 0.40, 0.30, 0.10));
        rows.insert(Timeframe::D1, row(0.10, 0.25, 0.40, 0.25));
        rows.insert(Timeframe::W1, row(0.05, 0.15, 0.30, 0.50));
        Self { rows }
    }
}

impl TargetTfMatrix {
    pub fn weight(&self, target: Timeframe, tf: Timeframe) -> f64 {
        self.rows
            .get(&target)
            .and_then(|row| row.get(&tf))
            .copied()
            .unwrap_or(0.0)
    }
}

/// `TradePlanner` thresholds (`spec.md` §4.8), grounded on `trade_planner.py`'s
/// `_should_skip_trading`/`_calculate_position_size` defaults. The full
/// `GlobalRegime` subsystem is out of scope; only the per-regime threshold
/// and position-size multipliers it would have fed are kept, applied
/// against an optional `GlobalRegimeHint` supplied by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradePlannerThresholds {
    pub default_risk_threshold: f64,
    pub default_pump_threshold: f64,
    pub risk_off_risk_threshold: f64,
    pub risk_off_pump_threshold: f64,
    pub panic_risk_threshold: f64,
    pub panic_pump_threshold: f64,
    pub risk_on_risk_threshold: f64,
    pub risk_on_pump_threshold: f64,
    pub extreme_risk_threshold: f64,
    pub panic_extreme_risk_threshold: f64,
    pub low_pump_skip_threshold: f64,
    pub low_pump_skip_risk_threshold: f64,
    pub exhaustion_skip_confidence: f64,
    pub regime_mult_risk_off: f64,
    pub regime_mult_panic: f64,
    pub regime_mult_risk_on: f64,
    pub regime_mult_alt_season: f64,
    pub atr_padding_low: f64,
    pub atr_padding_high: f64,
}

impl Default for TradePlannerThresholds {
    fn default() -> Self {
        Self {
            default_risk_threshold: 0.7,
            default_pump_threshold: 0.3,
            risk_off_risk_threshold: 0.6,
            risk_off_pump_threshold: 0.4,
            panic_risk_threshold: 0.5,
            panic_pump_threshold: 0.5,
            risk_on_risk_threshold: 0.75,
            risk_on_pump_threshold: 0.25,
            extreme_risk_threshold: 0.85,
            panic_extreme_risk_threshold: 0.75,
            low_pump_skip_threshold: 0.2,
            low_pump_skip_risk_threshold: 0.5,
            exhaustion_skip_confidence: 0.8,
            regime_mult_risk_off: 0.5,
            regime_mult_panic: 0.3,
            regime_mult_risk_on: 1.1,
            regime_mult_alt_season: 1.15,
            atr_padding_low: 0.2,
            atr_padding_high: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    pub min_full_bars: usize,
    pub volatility: VolatilityThresholds,
    pub liquidity: LiquidityThresholds,
    pub rsi_bands: RsiBands,
    pub derivatives: DerivativesThresholds,
    pub risk_weights: IndexWeights,
    pub pump_weights: IndexWeights,
    pub target_tf_matrix: TargetTfMatrix,
    /// VWAP/EMA200 deviation threshold (fraction) used by `pump_score`'s
    /// small bonus terms (`spec.md` §4.4).
    pub vwap_discount_threshold: f64,
    pub ema200_discount_threshold: f64,
    pub trade_planner: TradePlannerThresholds,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            min_full_bars: MIN_FULL_BARS,
            volatility: VolatilityThresholds::default(),
            liquidity: LiquidityThresholds::default(),
            rsi_bands: RsiBands::default(),
            derivatives: DerivativesThresholds::default(),
            risk_weights: IndexWeights::default(),
            pump_weights: IndexWeights::default(),
            target_tf_matrix: TargetTfMatrix::default(),
            vwap_discount_threshold: 0.01,
            ema200_discount_threshold: 0.02,
            trade_planner: TradePlannerThresholds::default(),
        }
    }
}

impl DiagnosticsConfig {
    /// Validated at load; invalid configuration is rejected with a clear
    /// `Misconfiguration` error rather than silently clamped.
    pub fn validate(&self) -> Result<(), DiagnosticsError> {
        let check_sum = |name: &str, sum: f64| -> Result<(), DiagnosticsError> {
            if (sum - 1.0).abs() > 0.01 {
                return Err(DiagnosticsError::Misconfiguration(format!(
                    "{name} weights sum to {sum:.4}, expected 1.0 +/- 0.01"
                )));
            }
            Ok(())
        };
        check_sum("risk_score", self.risk_weights.sum())?;
        check_sum("pump_score", self.pump_weights.sum())?;

        if self.min_full_bars == 0 {
            return Err(DiagnosticsError::Misconfiguration(
                "min_full_bars must be positive".into(),
            ));
        }
        for target in Timeframe::all() {
            if !self.target_tf_matrix.rows.contains_key(&target) {
                return Err(DiagnosticsError::Misconfiguration(format!(
                    "target_tf_matrix missing row for {target}"
                )));
            }
        }
        Ok(())
    }

    pub fn from_toml_str(s: &str) -> Result<Self, DiagnosticsError> {
        let cfg: DiagnosticsConfig =
            toml::from_str(s).map_err(|e| DiagnosticsError::Misconfiguration(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Default group weights must also satisfy the sum invariant (`spec.md` §8
/// property 6); checked in tests rather than at runtime since it is a
/// compile-time constant.
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(DiagnosticsConfig::default().validate().is_ok());
    }

    #[test]
    fn default_group_weights_sum_to_one() {
        assert!((GroupWeights::default().sum() - 1.0).abs() <= 0.01);
    }

    #[test]
    fn misconfigured_weights_are_rejected() {
        let mut cfg = DiagnosticsConfig::default();
        cfg.risk_weights.trend = 10.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn matrix_rows_are_complete() {
        let cfg = DiagnosticsConfig::default();
        for target in Timeframe::all() {
            let row_sum: f64 = Timeframe::all()
                .iter()
                .map(|tf| cfg.target_tf_matrix.weight(target, *tf))
                .sum();
            assert!((row_sum - 1.0).abs() < 1e-6, "{target} row sums to {row_sum}");
        }
    }
}
