//! Shared primitive types: OHLCV bars, timeframes, and small closed enums
//! used across every pipeline stage.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::DiagnosticsError;

/// One OHLCV bar. `volume` is optional — several indicators (VWAP, OBV, CMF,
/// volume-spike, the liquidity feature) must degrade gracefully when it is
/// absent rather than fail.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: Option<f64>,
}

impl Bar {
    pub fn new(
        timestamp_ms: i64,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: Option<f64>,
    ) -> Self {
        Self {
            timestamp_ms,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// `low <= min(open, close) <= max(open, close) <= high`.
    pub fn is_consistent(&self) -> bool {
        let lo = self.open.min(self.close);
        let hi = self.open.max(self.close);
        self.low <= lo && lo <= hi && hi <= self.high
    }
}

/// Validates a bar series at the ingest boundary: strictly ascending
/// timestamps and OHLC consistency. `InputMalformed` bars must never reach
/// the pipeline stages — this is the gate that keeps that true.
pub fn validate_bars(bars: &[Bar]) -> Result<(), DiagnosticsError> {
    let mut prev_ts: Option<i64> = None;
    for (i, bar) in bars.iter().enumerate() {
        if !bar.is_consistent() {
            return Err(DiagnosticsError::InputMalformed(format!(
                "bar {i} at ts={} violates OHLC consistency",
                bar.timestamp_ms
            )));
        }
        if let Some(prev) = prev_ts {
            if bar.timestamp_ms <= prev {
                return Err(DiagnosticsError::InputMalformed(format!(
                    "bar {i} at ts={} is not strictly ascending (prev={})",
                    bar.timestamp_ms, prev
                )));
            }
        }
        prev_ts = Some(bar.timestamp_ms);
    }
    Ok(())
}

/// Supported timeframes. Closed enumeration per the target-TF weight matrix
/// (`spec.md` §4.7); an unknown string is a `Misconfiguration`, not a panic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub enum Timeframe {
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
    #[serde(rename = "1w")]
    W1,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
            Timeframe::W1 => "1w",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1h" => Some(Timeframe::H1),
            "4h" => Some(Timeframe::H4),
            "1d" => Some(Timeframe::D1),
            "1w" => Some(Timeframe::W1),
            _ => None,
        }
    }

    pub fn all() -> [Timeframe; 4] {
        [Timeframe::H1, Timeframe::H4, Timeframe::D1, Timeframe::W1]
    }

    /// Approximate bar duration, used by the outcome evaluator to reason
    /// about horizons expressed in hours as well as bars.
    pub fn duration_ms(&self) -> i64 {
        match self {
            Timeframe::H1 => 3_600_000,
            Timeframe::H4 => 4 * 3_600_000,
            Timeframe::D1 => 24 * 3_600_000,
            Timeframe::W1 => 7 * 24 * 3_600_000,
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A bias/direction. Used by momentum, scoring, trade planning, and outcome
/// evaluation alike; kept as one enum rather than one per component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bias {
    Long,
    Short,
    Neutral,
}

impl fmt::Display for Bias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Bias::Long => "LONG",
            Bias::Short => "SHORT",
            Bias::Neutral => "NEUTRAL",
        };
        write!(f, "{s}")
    }
}

/// Clamp into `[lo, hi]`. Centralised so every stage clamps the same way
/// after arithmetic, per `spec.md` §9 (floating-point discipline).
pub fn clamp(x: f64, lo: f64, hi: f64) -> f64 {
    x.max(lo).min(hi)
}

/// Compares two scores with an explicit epsilon rather than `==`, per
/// `spec.md` §9 ("do not expose equality on scores").
pub fn approx_eq(a: f64, b: f64, epsilon: f64) -> bool {
    (a - b).abs() <= epsilon
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bar_consistency() {
        let ok = Bar::new(1, 10.0, 12.0, 9.0, 11.0, Some(100.0));
        assert!(ok.is_consistent());
        let bad = Bar::new(1, 10.0, 9.0, 9.5, 11.0, None);
        assert!(!bad.is_consistent());
    }

    #[test]
    fn validate_rejects_non_monotone_timestamps() {
        let bars = vec![
            Bar::new(100, 1.0, 1.0, 1.0, 1.0, None),
            Bar::new(100, 1.0, 1.0, 1.0, 1.0, None),
        ];
        assert!(validate_bars(&bars).is_err());
    }

    #[test]
    fn validate_accepts_ascending_consistent_bars() {
        let bars = vec![
            Bar::new(100, 1.0, 2.0, 0.5, 1.5, Some(10.0)),
            Bar::new(200, 1.5, 2.5, 1.0, 2.0, Some(12.0)),
        ];
        assert!(validate_bars(&bars).is_ok());
    }

    #[test]
    fn timeframe_roundtrip() {
        for tf in Timeframe::all() {
            assert_eq!(Timeframe::parse(tf.as_str()), Some(tf));
        }
        assert_eq!(Timeframe::parse("15m"), None);
    }
}
