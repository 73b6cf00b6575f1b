//! Demo binary: wires `DiagnosticsEngine` to in-memory collaborator
//! implementations and runs one pass over a synthetic bar series. The real
//! market-data fetcher, persistence substrate and periodic scheduler are out
//! of scope (`spec.md` §1); this exists only to give the crate a runnable
//! shape, mirroring how the teacher ships `src/bin/*` demos alongside its
//! library (`src/bin/simple_bybit_test.rs`).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;
use tracing_subscriber::EnvFilter;

use market_doctor::prelude::*;

struct InMemoryBarRepository {
    bars: RwLock<HashMap<(String, Timeframe), Vec<Bar>>>,
}

impl InMemoryBarRepository {
    fn new() -> Arc<Self> {
        Arc::new(Self { bars: RwLock::new(HashMap::new()) })
    }

    async fn seed(&self, symbol: &str, timeframe: Timeframe, bars: Vec<Bar>) {
        self.bars.write().await.insert((symbol.to_string(), timeframe), bars);
    }
}

#[async_trait]
impl BarRepository for InMemoryBarRepository {
    async fn last_n(&self, symbol: &str, timeframe: Timeframe, n: usize) -> Result<Vec<Bar>, DiagnosticsError> {
        let bars = self.bars.read().await;
        let series = bars.get(&(symbol.to_string(), timeframe)).cloned().unwrap_or_default();
        let start = series.len().saturating_sub(n);
        Ok(series[start..].to_vec())
    }

    async fn bars_between(&self, symbol: &str, timeframe: Timeframe, from_ms: i64, to_ms: i64) -> Result<Vec<Bar>, DiagnosticsError> {
        let bars = self.bars.read().await;
        Ok(bars
            .get(&(symbol.to_string(), timeframe))
            .map(|series| series.iter().filter(|b| b.timestamp_ms >= from_ms && b.timestamp_ms <= to_ms).cloned().collect())
            .unwrap_or_default())
    }

    async fn last_ts(&self, symbol: &str, timeframe: Timeframe) -> Result<Option<i64>, DiagnosticsError> {
        let bars = self.bars.read().await;
        Ok(bars.get(&(symbol.to_string(), timeframe)).and_then(|s| s.last()).map(|b| b.timestamp_ms))
    }

    async fn upsert_bar(&self, symbol: &str, timeframe: Timeframe, bar: Bar) -> Result<(), DiagnosticsError> {
        let mut bars = self.bars.write().await;
        let series = bars.entry((symbol.to_string(), timeframe)).or_default();
        match series.iter_mut().find(|b| b.timestamp_ms == bar.timestamp_ms) {
            Some(existing) => *existing = bar,
            None => series.push(bar),
        }
        series.sort_by_key(|b| b.timestamp_ms);
        Ok(())
    }

    async fn upsert_bars(&self, symbol: &str, timeframe: Timeframe, new_bars: Vec<Bar>) -> Result<(), DiagnosticsError> {
        for bar in new_bars {
            self.upsert_bar(symbol, timeframe, bar).await?;
        }
        Ok(())
    }
}

fn synthetic_uptrend(n: usize, step_ms: i64) -> Vec<Bar> {
    (0..n)
        .map(|i| {
            let close = 30_000.0 * 1.0015_f64.powi(i as i32);
            Bar::new(step_ms * i as i64, close * 0.998, close * 1.01, close * 0.99, close, Some(500.0 + i as f64))
        })
        .collect()
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let bar_repo = InMemoryBarRepository::new();
    let symbol = "BTCUSDT";
    for tf in Timeframe::all() {
        let bars = synthetic_uptrend(220, tf.duration_ms());
        bar_repo.seed(symbol, tf, bars).await;
    }

    let diagnostics_repo = market_doctor::storage::InMemoryDiagnosticsRepository::new();
    let weights_storage = InMemoryWeightsStorage::new(0);
    let active_weights = weights_storage.get_active_weights().await.expect("seeded default weights");

    let engine = market_doctor::DiagnosticsEngine::new(
        DiagnosticsConfig::default(),
        bar_repo,
        None,
        None,
        diagnostics_repo,
        active_weights,
    );

    match engine.run_pass(symbol, Timeframe::H1, None, None).await {
        Ok(Some(pass)) => {
            info!(symbol, "{}", pass.report.tl_dr);
            println!("{}", serde_json::to_string_pretty(&pass.report).unwrap());
        }
        Ok(None) => println!("{symbol}: insufficient data, pass skipped"),
        Err(err) => eprintln!("{symbol}: diagnostics pass failed: {err}"),
    }
}
