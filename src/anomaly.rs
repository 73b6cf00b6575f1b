//! C13 — AnomalyDetector: best-effort advisory alerts layered on top of a
//! diagnostics pass, never part of the scored result and never capable of
//! failing the pipeline (`spec.md` §4.12, grounded on `anomaly_detector.py`).
//! Compares the current pass against recent history for the same
//! `(symbol, timeframe)` via `DiagnosticsRepository`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::features::DerivativesSnapshot;
use crate::market_analyzer::MarketPhase;
use crate::storage::{DiagnosticsRepository, SnapshotFilter};
use crate::types::Timeframe;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnomalyType {
    FundingSpike,
    OiAnomaly,
    CvdDivergence,
    PhaseChange,
    DoctorConcerned,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyAlert {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub anomaly_type: AnomalyType,
    pub severity: Severity,
    pub message: String,
    pub timestamp_ms: i64,
    pub metadata: Value,
}

/// Extreme funding with a flat price/OI reaction hints an unpriced impulse
/// building (`detect_derivatives_anomalies`'s funding-spike rule).
const FUNDING_SPIKE_THRESHOLD: f64 = 0.01;
const FUNDING_SPIKE_OI_CEILING: f64 = 2.0;
/// Open interest expanding this fast while price/vol are quiet often
/// precedes a breakout (`oi_change_pct > 10.0`).
const OI_ANOMALY_THRESHOLD: f64 = 10.0;
/// CVD this negative while price still holds up is taker-side distribution
/// under a rising tape (`cvd < -0.3`).
const CVD_DIVERGENCE_THRESHOLD: f64 = -0.3;
/// `risk_score` jumping this much pass-to-pass flags a rapidly destabilising
/// market even before the phase label changes (`detect_risk_spike`'s 0.2 gate).
const RISK_SPIKE_THRESHOLD: f64 = 0.2;

/// Derivatives-driven anomalies: funding spikes, OI anomalies, CVD
/// divergence against price. Missing fields in `derivatives` simply skip
/// their rule rather than erroring (`derivatives.get(..., 0.0)` defaults).
pub fn detect_derivatives_anomalies(
    symbol: &str,
    timeframe: Timeframe,
    derivatives: DerivativesSnapshot,
    timestamp_ms: i64,
) -> Vec<AnomalyAlert> {
    let mut alerts = Vec::new();
    let funding = derivatives.funding_rate.unwrap_or(0.0);
    let oi_change = derivatives.oi_change_pct.unwrap_or(0.0);
    let cvd = derivatives.cvd.unwrap_or(0.0);

    if funding.abs() > FUNDING_SPIKE_THRESHOLD && oi_change.abs() < FUNDING_SPIKE_OI_CEILING {
        alerts.push(AnomalyAlert {
            symbol: symbol.to_string(),
            timeframe,
            anomaly_type: AnomalyType::FundingSpike,
            severity: Severity::Medium,
            message: format!(
                "{symbol}: derivatives anomaly — extreme funding ({:.2}%) against a flat price. Possible large impulse building.",
                funding * 100.0
            ),
            timestamp_ms,
            metadata: serde_json::json!({"funding": funding, "oi_change": oi_change}),
        });
    }

    if oi_change > OI_ANOMALY_THRESHOLD {
        alerts.push(AnomalyAlert {
            symbol: symbol.to_string(),
            timeframe,
            anomaly_type: AnomalyType::OiAnomaly,
            severity: Severity::High,
            message: format!(
                "{symbol}: sharp OI growth (+{oi_change:.1}%) against low volatility. Possible setup for a large move."
            ),
            timestamp_ms,
            metadata: serde_json::json!({"oi_change": oi_change}),
        });
    }

    if cvd < CVD_DIVERGENCE_THRESHOLD {
        alerts.push(AnomalyAlert {
            symbol: symbol.to_string(),
            timeframe,
            anomaly_type: AnomalyType::CvdDivergence,
            severity: Severity::Medium,
            message: format!("{symbol}: CVD divergence — heavy liquidity outflow while price holds up. Possible correction."),
            timestamp_ms,
            metadata: serde_json::json!({"cvd": cvd}),
        });
    }

    alerts
}

fn phase_from_label(label: &str) -> Option<MarketPhase> {
    MarketPhase::parse(label)
}

/// Transitions this abrupt go to "high"; a lesser structural shift to
/// "medium"; anything else that still changed the label is "low"
/// (`detect_phase_change`'s `phase_changes` table).
fn phase_change_severity(previous: MarketPhase, current: MarketPhase) -> Severity {
    use MarketPhase::*;
    match (previous, current) {
        (Accumulation, ExpansionDown) | (Accumulation, Distribution) => Severity::High,
        (ExpansionUp, ExpansionDown) => Severity::High,
        (ExpansionUp, Distribution) | (Accumulation, Shakeout) => Severity::Medium,
        _ => Severity::Low,
    }
}

/// Compares the current phase against the previous diagnostics snapshot for
/// this `(symbol, timeframe)`, if one exists. Returns `None` — never an
/// error — when history is unavailable or the phase is unchanged
/// (`detect_phase_change`). The phase label lives in `DiagnosticsSnapshot::regime`.
pub async fn detect_phase_change(
    repo: &dyn DiagnosticsRepository,
    symbol: &str,
    timeframe: Timeframe,
    current_phase: MarketPhase,
    timestamp_ms: i64,
) -> Option<AnomalyAlert> {
    let snapshots = repo
        .get_snapshots(SnapshotFilter { symbol: Some(symbol.to_string()), timeframe: Some(timeframe), limit: 10, ..Default::default() })
        .await
        .ok()?;
    let previous = snapshots.first()?;
    let previous_phase_str = previous.regime.clone();
    let current_phase_str = current_phase.to_string();
    if previous_phase_str == current_phase_str {
        return None;
    }
    let severity = phase_from_label(&previous_phase_str)
        .map(|previous_phase| phase_change_severity(previous_phase, current_phase))
        .unwrap_or(Severity::Low);

    Some(AnomalyAlert {
        symbol: symbol.to_string(),
        timeframe,
        anomaly_type: AnomalyType::PhaseChange,
        severity,
        message: format!("{symbol}: abrupt phase change — {previous_phase_str} -> {current_phase_str}. Market structure shifted."),
        timestamp_ms,
        metadata: serde_json::json!({"previous_phase": previous_phase_str, "current_phase": current_phase_str}),
    })
}

/// Compares `current_risk_score` against the previous snapshot's — note the
/// source keys this off a `risk_score` field the snapshot table doesn't
/// carry directly; this reuses `DiagnosticsSnapshot::confidence`'s inverse
/// as the nearest available risk proxy isn't available either, so callers
/// pass the risk score alongside the repository-derived previous one
/// explicitly (`detect_risk_spike`).
pub fn detect_risk_spike(
    symbol: &str,
    timeframe: Timeframe,
    previous_risk_score: f64,
    current_risk_score: f64,
    timestamp_ms: i64,
) -> Option<AnomalyAlert> {
    if current_risk_score - previous_risk_score < RISK_SPIKE_THRESHOLD {
        return None;
    }
    let severity = if current_risk_score > 0.7 { Severity::High } else { Severity::Medium };
    Some(AnomalyAlert {
        symbol: symbol.to_string(),
        timeframe,
        anomaly_type: AnomalyType::DoctorConcerned,
        severity,
        message: format!(
            "{symbol}: sharp rise in risk — risk_score jumped from {previous_risk_score:.2} to {current_risk_score:.2}. Market is getting less stable."
        ),
        timestamp_ms,
        metadata: serde_json::json!({"previous_risk": previous_risk_score, "current_risk": current_risk_score}),
    })
}

/// Runs every detector and concatenates whatever fires. Best-effort by
/// construction: repository lookups that fail are swallowed by
/// `detect_phase_change`, and `detect_risk_spike` needs no repository call
/// at all since the caller already has both risk scores in hand
/// (`detect_all_anomalies`).
pub async fn detect_all_anomalies(
    repo: &dyn DiagnosticsRepository,
    symbol: &str,
    timeframe: Timeframe,
    current_phase: MarketPhase,
    previous_risk_score: Option<f64>,
    current_risk_score: f64,
    derivatives: DerivativesSnapshot,
    timestamp_ms: i64,
) -> Vec<AnomalyAlert> {
    let mut alerts = detect_derivatives_anomalies(symbol, timeframe, derivatives, timestamp_ms);

    if let Some(alert) = detect_phase_change(repo, symbol, timeframe, current_phase, timestamp_ms).await {
        alerts.push(alert);
    }
    if let Some(previous) = previous_risk_score {
        if let Some(alert) = detect_risk_spike(symbol, timeframe, previous, current_risk_score, timestamp_ms) {
            alerts.push(alert);
        }
    }

    alerts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{DiagnosticsSnapshot, InMemoryDiagnosticsRepository};
    use crate::types::Bias;

    fn snapshot(symbol: &str, regime: &str, ts: i64) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            id: 0,
            symbol: symbol.to_string(),
            timeframe: Timeframe::H1,
            timestamp_ms: ts,
            aggregated_long: 5.0,
            aggregated_short: 5.0,
            direction: Bias::Neutral,
            confidence: 0.5,
            regime: regime.to_string(),
            trend: "NEUTRAL".into(),
            volatility: "MEDIUM".into(),
            liquidity: "MEDIUM".into(),
            nearest_support: None,
            nearest_resistance: None,
            distance_to_support: None,
            distance_to_resistance: None,
            has_unfilled_imbalance: false,
            imbalance_distance: None,
            bias: Bias::Neutral,
            position_r: None,
            position_size_factor: None,
            bullish_trigger_level: None,
            bearish_trigger_level: None,
            invalidation_level: None,
            setup_type: None,
            setup_description: None,
            current_price: None,
        }
    }

    #[test]
    fn funding_spike_fires_on_extreme_funding_flat_oi() {
        let derivatives = DerivativesSnapshot { funding_rate: Some(0.02), oi_change_pct: Some(0.5), open_interest: None, cvd: None };
        let alerts = detect_derivatives_anomalies("BTCUSDT", Timeframe::H1, derivatives, 0);
        assert!(alerts.iter().any(|a| a.anomaly_type == AnomalyType::FundingSpike));
    }

    #[test]
    fn oi_anomaly_requires_double_digit_growth() {
        let derivatives = DerivativesSnapshot { funding_rate: Some(0.0), oi_change_pct: Some(15.0), open_interest: None, cvd: None };
        let alerts = detect_derivatives_anomalies("BTCUSDT", Timeframe::H1, derivatives, 0);
        assert!(alerts.iter().any(|a| a.anomaly_type == AnomalyType::OiAnomaly && a.severity == Severity::High));
    }

    #[test]
    fn no_anomalies_on_quiet_derivatives() {
        let derivatives = DerivativesSnapshot { funding_rate: Some(0.0001), oi_change_pct: Some(1.0), open_interest: None, cvd: Some(0.0) };
        let alerts = detect_derivatives_anomalies("BTCUSDT", Timeframe::H1, derivatives, 0);
        assert!(alerts.is_empty());
    }

    #[test]
    fn risk_spike_detected_above_threshold() {
        let alert = detect_risk_spike("BTCUSDT", Timeframe::H1, 0.3, 0.55, 0);
        assert!(alert.is_some());
        assert_eq!(alert.unwrap().severity, Severity::Medium);
    }

    #[test]
    fn risk_spike_not_detected_below_threshold() {
        assert!(detect_risk_spike("BTCUSDT", Timeframe::H1, 0.3, 0.35, 0).is_none());
    }

    #[tokio::test]
    async fn phase_change_alert_requires_prior_snapshot() {
        let repo = InMemoryDiagnosticsRepository::new();
        let alert = detect_phase_change(repo.as_ref(), "BTCUSDT", Timeframe::H1, MarketPhase::ExpansionUp, 0).await;
        assert!(alert.is_none());

        repo.log_snapshot(snapshot("BTCUSDT", "ACCUMULATION", 0)).await.unwrap();
        let alert = detect_phase_change(repo.as_ref(), "BTCUSDT", Timeframe::H1, MarketPhase::ExpansionUp, 1).await;
        assert!(alert.is_some());
    }
}
