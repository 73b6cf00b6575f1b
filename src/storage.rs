//! C10 — DiagnosticsLogger: persists one `DiagnosticsSnapshot` per
//! diagnostics pass and the `DiagnosticsOutcome` rows later written against
//! it (`spec.md` §6). The real persistence substrate (SQL schema, migration)
//! is out of scope (`spec.md` §1); only the `DiagnosticsRepository` interface
//! is specified, following the `#[async_trait]` collaborator-trait pattern
//! the teacher uses for `Agent` (`engine/agent_trait.rs`). An in-memory
//! reference implementation is provided for tests and the demo binary.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::DiagnosticsError;
use crate::types::{Bias, Timeframe};

/// One diagnostics pass, flattened for storage (`diagnostics_snapshots`
/// table fields, `diagnostics_logger.py::_init_tables`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsSnapshot {
    pub id: i64,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub timestamp_ms: i64,

    pub aggregated_long: f64,
    pub aggregated_short: f64,
    pub direction: Bias,
    pub confidence: f64,

    pub regime: String,
    pub trend: String,
    pub volatility: String,
    pub liquidity: String,

    pub nearest_support: Option<f64>,
    pub nearest_resistance: Option<f64>,
    pub distance_to_support: Option<f64>,
    pub distance_to_resistance: Option<f64>,

    pub has_unfilled_imbalance: bool,
    pub imbalance_distance: Option<f64>,

    pub bias: Bias,
    pub position_r: Option<f64>,
    pub position_size_factor: Option<f64>,
    pub bullish_trigger_level: Option<f64>,
    pub bearish_trigger_level: Option<f64>,
    pub invalidation_level: Option<f64>,

    pub setup_type: Option<String>,
    pub setup_description: Option<String>,

    pub current_price: Option<f64>,
}

/// One evaluation of a prior snapshot, `horizon_bars` bars / `horizon_hours`
/// hours forward (`diagnostics_results` table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsOutcome {
    pub snapshot_id: i64,
    pub horizon_bars: u32,
    pub horizon_hours: f64,

    pub max_r_up: Option<f64>,
    pub max_r_down: Option<f64>,
    pub hit_tp: bool,
    pub hit_sl: bool,
    pub r_at_horizon: Option<f64>,

    pub entry_price: f64,
    pub price_at_horizon: f64,
    pub highest_price: f64,
    pub lowest_price: f64,
}

#[derive(Debug, Clone, Default)]
pub struct SnapshotFilter {
    pub symbol: Option<String>,
    pub timeframe: Option<Timeframe>,
    pub start_timestamp_ms: Option<i64>,
    pub end_timestamp_ms: Option<i64>,
    pub limit: usize,
}

/// Persistence boundary for diagnostics snapshots and their outcomes. A
/// `log_snapshot` call assigns and returns the new row id; `log_outcome` is
/// idempotent on `(snapshot_id, horizon_bars, horizon_hours)` (upsert, per
/// `diagnostics_logger.py::log_result`'s `INSERT OR REPLACE`).
#[async_trait]
pub trait DiagnosticsRepository: Send + Sync {
    async fn log_snapshot(&self, snapshot: DiagnosticsSnapshot) -> Result<i64, DiagnosticsError>;
    async fn log_outcome(&self, outcome: DiagnosticsOutcome) -> Result<(), DiagnosticsError>;
    async fn get_snapshots(&self, filter: SnapshotFilter) -> Result<Vec<DiagnosticsSnapshot>, DiagnosticsError>;
    async fn get_outcomes_for_snapshot(&self, snapshot_id: i64) -> Result<Vec<DiagnosticsOutcome>, DiagnosticsError>;
}

/// Reference in-memory implementation. Not meant for production use — the
/// real substrate is explicitly out of scope — but exercises the trait
/// contract for tests and the demo binary.
#[derive(Default)]
pub struct InMemoryDiagnosticsRepository {
    next_id: AtomicI64,
    snapshots: RwLock<HashMap<i64, DiagnosticsSnapshot>>,
    outcomes: RwLock<HashMap<(i64, u32, u64), DiagnosticsOutcome>>,
}

impl InMemoryDiagnosticsRepository {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl DiagnosticsRepository for InMemoryDiagnosticsRepository {
    async fn log_snapshot(&self, mut snapshot: DiagnosticsSnapshot) -> Result<i64, DiagnosticsError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        snapshot.id = id;
        self.snapshots.write().await.insert(id, snapshot);
        Ok(id)
    }

    async fn log_outcome(&self, outcome: DiagnosticsOutcome) -> Result<(), DiagnosticsError> {
        if !self.snapshots.read().await.contains_key(&outcome.snapshot_id) {
            return Err(DiagnosticsError::RepositoryError(format!(
                "no snapshot with id {}", outcome.snapshot_id
            )));
        }
        let key = (outcome.snapshot_id, outcome.horizon_bars, outcome.horizon_hours.to_bits());
        self.outcomes.write().await.insert(key, outcome);
        Ok(())
    }

    async fn get_snapshots(&self, filter: SnapshotFilter) -> Result<Vec<DiagnosticsSnapshot>, DiagnosticsError> {
        let snapshots = self.snapshots.read().await;
        let mut out: Vec<DiagnosticsSnapshot> = snapshots
            .values()
            .filter(|s| filter.symbol.as_ref().map_or(true, |sym| sym == &s.symbol))
            .filter(|s| filter.timeframe.map_or(true, |tf| tf == s.timeframe))
            .filter(|s| filter.start_timestamp_ms.map_or(true, |start| s.timestamp_ms >= start))
            .filter(|s| filter.end_timestamp_ms.map_or(true, |end| s.timestamp_ms <= end))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.timestamp_ms.cmp(&a.timestamp_ms));
        if filter.limit > 0 {
            out.truncate(filter.limit);
        }
        Ok(out)
    }

    async fn get_outcomes_for_snapshot(&self, snapshot_id: i64) -> Result<Vec<DiagnosticsOutcome>, DiagnosticsError> {
        Ok(self
            .outcomes
            .read()
            .await
            .values()
            .filter(|o| o.snapshot_id == snapshot_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(symbol: &str, ts: i64) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            id: 0,
            symbol: symbol.to_string(),
            timeframe: Timeframe::H1,
            timestamp_ms: ts,
            aggregated_long: 6.0,
            aggregated_short: 4.0,
            direction: Bias::Long,
            confidence: 0.7,
            regime: "TRENDING_BULL".into(),
            trend: "BULLISH".into(),
            volatility: "MEDIUM".into(),
            liquidity: "MEDIUM".into(),
            nearest_support: Some(99.0),
            nearest_resistance: Some(105.0),
            distance_to_support: Some(0.02),
            distance_to_resistance: Some(0.04),
            has_unfilled_imbalance: false,
            imbalance_distance: None,
            bias: Bias::Long,
            position_r: Some(0.5),
            position_size_factor: Some(1.0),
            bullish_trigger_level: Some(105.0),
            bearish_trigger_level: None,
            invalidation_level: Some(98.0),
            setup_type: Some("impulse".into()),
            setup_description: Some("clean impulse leg, demand zone held".into()),
            current_price: Some(101.0),
        }
    }

    #[tokio::test]
    async fn log_and_fetch_roundtrip() {
        let repo = InMemoryDiagnosticsRepository::new();
        let id = repo.log_snapshot(snapshot("BTCUSDT", 1000)).await.unwrap();
        let found = repo
            .get_snapshots(SnapshotFilter { symbol: Some("BTCUSDT".into()), limit: 10, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, id);
    }

    #[tokio::test]
    async fn outcome_upserts_on_same_horizon() {
        let repo = InMemoryDiagnosticsRepository::new();
        let id = repo.log_snapshot(snapshot("BTCUSDT", 1000)).await.unwrap();
        let outcome = DiagnosticsOutcome {
            snapshot_id: id,
            horizon_bars: 24,
            horizon_hours: 24.0,
            max_r_up: Some(1.5),
            max_r_down: Some(-0.5),
            hit_tp: false,
            hit_sl: false,
            r_at_horizon: Some(1.2),
            entry_price: 100.0,
            price_at_horizon: 122.0,
            highest_price: 125.0,
            lowest_price: 95.0,
        };
        repo.log_outcome(outcome.clone()).await.unwrap();
        let mut updated = outcome;
        updated.r_at_horizon = Some(1.8);
        repo.log_outcome(updated).await.unwrap();

        let outcomes = repo.get_outcomes_for_snapshot(id).await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].r_at_horizon, Some(1.8));
    }

    #[tokio::test]
    async fn outcome_for_unknown_snapshot_errors() {
        let repo = InMemoryDiagnosticsRepository::new();
        let outcome = DiagnosticsOutcome {
            snapshot_id: 999,
            horizon_bars: 1,
            horizon_hours: 1.0,
            max_r_up: None,
            max_r_down: None,
            hit_tp: false,
            hit_sl: false,
            r_at_horizon: None,
            entry_price: 1.0,
            price_at_horizon: 1.0,
            highest_price: 1.0,
            lowest_price: 1.0,
        };
        assert!(repo.log_outcome(outcome).await.is_err());
    }
}
