//! C6 — ScoringEngine module tree: per-group scorers and the timeframe
//! aggregation engine that weighs and caches them.

pub mod engine;
pub mod groups;

pub use engine::{ScoringEngine, TimeframeScore};
pub use groups::{GroupScore, IndicatorGroup};
