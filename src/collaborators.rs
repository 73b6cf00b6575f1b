//! IN-side collaborator interfaces the core consumes (`spec.md` §6):
//! `BarRepository`, `DerivativesProvider`, `CurrentPriceSource`. Modelled as
//! `#[async_trait]` objects the same way the teacher models `Agent`
//! (`engine/agent_trait.rs`) and `DiagnosticsRepository`/`WeightsStorage`
//! model the OUT side. No implementation ships here beyond the in-memory
//! ones used by tests and `diagnostics_runner` — the real market-data and
//! derivatives sources are out of scope (`spec.md` §1).

use async_trait::async_trait;

use crate::error::DiagnosticsError;
use crate::features::DerivativesSnapshot;
use crate::types::{Bar, Timeframe};

/// Bar history source. Contract: idempotent upserts on `(symbol, timeframe,
/// ts)`; reads return ascending, monotone-non-decreasing timestamps.
#[async_trait]
pub trait BarRepository: Send + Sync {
    async fn last_n(&self, symbol: &str, timeframe: Timeframe, n: usize) -> Result<Vec<Bar>, DiagnosticsError>;
    async fn bars_between(&self, symbol: &str, timeframe: Timeframe, from_ms: i64, to_ms: i64) -> Result<Vec<Bar>, DiagnosticsError>;
    async fn last_ts(&self, symbol: &str, timeframe: Timeframe) -> Result<Option<i64>, DiagnosticsError>;
    async fn upsert_bar(&self, symbol: &str, timeframe: Timeframe, bar: Bar) -> Result<(), DiagnosticsError>;
    async fn upsert_bars(&self, symbol: &str, timeframe: Timeframe, bars: Vec<Bar>) -> Result<(), DiagnosticsError>;
}

/// Derivatives snapshot source, optional and best-effort: failures are
/// downgraded to `None` by the caller rather than propagated
/// (`DependencyUnavailable`, `spec.md` §7).
#[async_trait]
pub trait DerivativesProvider: Send + Sync {
    async fn get_derivatives(&self, symbol: &str) -> Option<DerivativesSnapshot>;
}

/// Spot-price lookup, optional and short-lived. On failure the core falls
/// back to the last 1h close (`spec.md` §4.13).
#[async_trait]
pub trait CurrentPriceSource: Send + Sync {
    async fn spot_price(&self, symbol: &str) -> Option<f64>;
}

/// Resolves current price via `source` (if present), falling back to the
/// last close of the 1h bar series (`spec.md` §4.13's fallback rule).
pub async fn resolve_current_price(source: Option<&dyn CurrentPriceSource>, symbol: &str, h1_bars: &[Bar]) -> Option<f64> {
    if let Some(source) = source {
        if let Some(price) = source.spot_price(symbol).await {
            return Some(price);
        }
    }
    h1_bars.last().map(|b| b.close)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Bar;

    struct FailingPriceSource;

    #[async_trait]
    impl CurrentPriceSource for FailingPriceSource {
        async fn spot_price(&self, _symbol: &str) -> Option<f64> {
            None
        }
    }

    #[tokio::test]
    async fn falls_back_to_last_close_when_source_unavailable() {
        let bars = vec![
            Bar::new(0, 99.0, 101.0, 98.0, 100.0, Some(10.0)),
            Bar::new(1000, 100.0, 103.0, 99.0, 102.0, Some(10.0)),
        ];
        let source = FailingPriceSource;
        let price = resolve_current_price(Some(&source), "BTCUSDT", &bars).await;
        assert_eq!(price, Some(102.0));
    }

    #[tokio::test]
    async fn no_source_falls_back_too() {
        let bars = vec![Bar::new(0, 99.0, 101.0, 98.0, 100.0, Some(10.0))];
        let price = resolve_current_price(None, "BTCUSDT", &bars).await;
        assert_eq!(price, Some(100.0));
    }
}
