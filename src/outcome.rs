//! C11 — OutcomeEvaluator: walks forward from a snapshot's entry bar to
//! compute the realised R-multiple against TP/SL levels implied by the
//! snapshot (`spec.md` §4.9, grounded on
//! `diagnostics_logging_service.py::_compute_result`).
//!
//! Deliberate deviation from the source (`SPEC_FULL.md` §12, Open Question
//! 1): when no bar exists at or after the snapshot timestamp the source
//! falls back to the last available bar; this evaluator instead returns
//! `Ok(None)` rather than fabricate an entry against stale data.

use crate::storage::DiagnosticsOutcome;
use crate::types::{Bar, Bias};

fn entry_index(bars: &[Bar], snapshot_ts: i64) -> Option<usize> {
    bars.iter().position(|b| b.timestamp_ms >= snapshot_ts)
}

/// Computes the outcome for one `(snapshot, horizon)` pair. Returns `None`
/// (never fabricated) when:
/// - no bar exists at/after `snapshot_ts` (Open Question 1), or
/// - fewer than `horizon_bars + 1` bars remain from the entry bar.
///
/// `bias == Neutral` (no trade recommended) also yields `None`: R-multiple
/// is undefined without a direction (`_compute_result`'s `NO_TRADE` branch).
pub fn evaluate_outcome(
    bars: &[Bar],
    snapshot_ts: i64,
    entry_price: f64,
    bias: Bias,
    bullish_trigger: Option<f64>,
    bearish_trigger: Option<f64>,
    invalidation_level: Option<f64>,
    horizon_bars: u32,
    horizon_hours: f64,
    snapshot_id: i64,
) -> Option<DiagnosticsOutcome> {
    if bias == Bias::Neutral {
        return None;
    }
    let entry_idx = entry_index(bars, snapshot_ts)?;
    let horizon = horizon_bars as usize;
    if entry_idx + horizon >= bars.len() {
        return None;
    }

    let window = &bars[entry_idx..=entry_idx + horizon];
    let highest_price = window.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
    let lowest_price = window.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
    let price_at_horizon = window.last().unwrap().close;

    let (max_r_up, max_r_down, r_at_horizon, hit_tp, hit_sl) = match bias {
        Bias::Long => {
            let tp_level = bullish_trigger.or(invalidation_level).unwrap_or(entry_price * 1.02);
            let sl_level = invalidation_level.unwrap_or(entry_price * 0.98);
            if entry_price <= sl_level {
                (None, None, None, false, false)
            } else {
                let risk = entry_price - sl_level;
                (
                    Some((highest_price - entry_price) / risk),
                    Some((entry_price - lowest_price) / risk),
                    Some((price_at_horizon - entry_price) / risk),
                    highest_price >= tp_level,
                    lowest_price <= sl_level,
                )
            }
        }
        Bias::Short => {
            let tp_level = bearish_trigger.or(invalidation_level).unwrap_or(entry_price * 0.98);
            let sl_level = invalidation_level.unwrap_or(entry_price * 1.02);
            if sl_level <= entry_price {
                (None, None, None, false, false)
            } else {
                let risk = sl_level - entry_price;
                (
                    Some((sl_level - lowest_price) / risk),
                    Some((highest_price - sl_level) / risk),
                    Some((entry_price - price_at_horizon) / risk),
                    lowest_price <= tp_level,
                    highest_price >= sl_level,
                )
            }
        }
        Bias::Neutral => unreachable!(),
    };

    Some(DiagnosticsOutcome {
        snapshot_id,
        horizon_bars,
        horizon_hours,
        max_r_up,
        max_r_down,
        hit_tp,
        hit_sl,
        r_at_horizon,
        entry_price,
        price_at_horizon,
        highest_price,
        lowest_price,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bars_rising(n: usize, start_ts: i64) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                let close = 100.0 + i as f64;
                Bar::new(start_ts + 1000 * i as i64, close - 0.5, close + 1.0, close - 1.0, close, Some(10.0))
            })
            .collect()
    }

    #[test]
    fn long_outcome_tracks_favorable_move() {
        let bars = bars_rising(30, 0);
        let outcome = evaluate_outcome(&bars, 0, 100.0, Bias::Long, Some(110.0), None, Some(98.0), 20, 20.0, 1).unwrap();
        assert!(outcome.max_r_up.unwrap() > 0.0);
        assert!(outcome.hit_tp);
        assert!(!outcome.hit_sl);
    }

    #[test]
    fn insufficient_future_bars_yields_none() {
        let bars = bars_rising(10, 0);
        let outcome = evaluate_outcome(&bars, 0, 100.0, Bias::Long, Some(110.0), None, Some(98.0), 20, 20.0, 1);
        assert!(outcome.is_none());
    }

    #[test]
    fn no_bar_at_or_after_snapshot_skips_rather_than_fabricates() {
        let bars = bars_rising(30, 0);
        let far_future_ts = bars.last().unwrap().timestamp_ms + 1;
        let outcome = evaluate_outcome(&bars, far_future_ts, 100.0, Bias::Long, None, None, Some(98.0), 5, 5.0, 1);
        assert!(outcome.is_none());
    }

    #[test]
    fn neutral_bias_yields_no_outcome() {
        let bars = bars_rising(30, 0);
        let outcome = evaluate_outcome(&bars, 0, 100.0, Bias::Neutral, None, None, None, 5, 5.0, 1);
        assert!(outcome.is_none());
    }

    #[test]
    fn short_outcome_tracks_favorable_decline() {
        let bars: Vec<Bar> = (0..30)
            .map(|i| {
                let close = 100.0 - i as f64;
                Bar::new(1000 * i as i64, close + 0.5, close + 1.0, close - 1.0, close, Some(10.0))
            })
            .collect();
        let outcome = evaluate_outcome(&bars, 0, 100.0, Bias::Short, None, Some(90.0), Some(102.0), 20, 20.0, 1).unwrap();
        assert!(outcome.max_r_up.unwrap() > 0.0);
        assert!(outcome.hit_tp);
    }
}
