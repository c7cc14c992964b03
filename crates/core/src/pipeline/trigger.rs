//! Trigger definitions and the shared evaluator.
//!
//! A trigger supplies its own stage-4 predicate and its own weighted metric
//! list. The evaluator is the same for all of them: run the filter chain,
//! normalize every metric across the survivors, take the weighted sum, rank.

use crate::domain::{FilteredCandidate, MarketRow, Session};
use crate::pipeline::filter::{run_chain, FilterThresholds, StageCount};
use anyhow::ensure;

const WEIGHT_TOLERANCE: f64 = 1e-9;

/// Transform applied to a raw metric before min-max normalization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scale {
    /// Clip into `[0, cap]`.
    Linear { cap: f64 },
    /// `ln(1 + max(x, 0))`, for heavy-tailed volumes and values.
    Log,
}

impl Scale {
    pub fn apply(&self, raw: f64) -> f64 {
        match *self {
            Scale::Linear { cap } => raw.clamp(0.0, cap),
            Scale::Log => raw.max(0.0).ln_1p(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MetricSpec {
    pub name: &'static str,
    pub weight: f64,
    pub scale: Scale,
    /// `None` counts as 0 after scaling.
    pub extract: fn(&MarketRow<'_>) -> Option<f64>,
}

#[derive(Debug, Clone)]
pub struct TriggerDefinition {
    pub name: &'static str,
    pub session: Session,
    pub predicate: fn(&MarketRow<'_>) -> bool,
    pub metrics: Vec<MetricSpec>,
    pub limit: usize,
    pub stop_loss_pct: f64,
}

/// Ranked output of one trigger plus its filter funnel.
#[derive(Debug, Clone)]
pub struct TriggerOutcome {
    pub trigger: &'static str,
    pub stages: Vec<StageCount>,
    pub ranked: Vec<FilteredCandidate>,
}

impl TriggerDefinition {
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            (2..=3).contains(&self.metrics.len()),
            "trigger {} must declare 2..=3 metrics (got {})",
            self.name,
            self.metrics.len()
        );
        ensure!(
            self.metrics.iter().all(|m| m.weight > 0.0),
            "trigger {} has a non-positive weight",
            self.name
        );
        let sum: f64 = self.metrics.iter().map(|m| m.weight).sum();
        ensure!(
            (sum - 1.0).abs() <= WEIGHT_TOLERANCE,
            "trigger {} weights sum to {sum}, expected 1.0",
            self.name
        );
        ensure!(self.limit >= 1, "trigger {} limit must be >= 1", self.name);
        ensure!(
            self.stop_loss_pct > 0.0 && self.stop_loss_pct < 1.0,
            "trigger {} stop_loss_pct must be in (0, 1)",
            self.name
        );
        Ok(())
    }

    /// Filters, scores and ranks `rows`. Returning fewer than `limit`
    /// candidates (or none) is normal.
    pub fn evaluate(&self, rows: &[MarketRow<'_>], thresholds: &FilterThresholds) -> TriggerOutcome {
        let predicate = self.predicate;
        let outcome = run_chain(rows, thresholds, |r| predicate(r));
        let survivors = outcome.survivors;

        let mut scores = vec![0.0; survivors.len()];
        for metric in &self.metrics {
            let values: Vec<f64> = survivors
                .iter()
                .map(|r| metric.scale.apply((metric.extract)(r).unwrap_or(0.0)))
                .collect();
            for (score, norm) in scores.iter_mut().zip(min_max(&values)) {
                *score += metric.weight * norm;
            }
        }

        let mut ranked: Vec<FilteredCandidate> = survivors
            .iter()
            .zip(scores)
            .map(|(row, composite_score)| FilteredCandidate {
                ticker: row.ticker.to_string(),
                trigger: self.name,
                composite_score,
                price: row.price(),
                stop_loss_pct: self.stop_loss_pct,
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.composite_score
                .total_cmp(&a.composite_score)
                .then_with(|| a.ticker.cmp(&b.ticker))
        });
        ranked.truncate(self.limit);

        TriggerOutcome {
            trigger: self.name,
            stages: outcome.stages,
            ranked,
        }
    }
}

/// Min-max into `[0, 1]`. A flat (or single-element) series maps to 1.0.
pub fn min_max(values: &[f64]) -> Vec<f64> {
    let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = hi - lo;
    if !(range > 0.0) {
        return vec![1.0; values.len()];
    }
    values.iter().map(|v| (v - lo) / range).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::fixtures::snapshot;
    use crate::domain::SnapshotSet;
    use chrono::NaiveDate;

    fn lenient() -> FilterThresholds {
        FilterThresholds {
            min_market_cap: 0.0,
            min_traded_value: 0.0,
            max_change_rate: 1.0,
        }
    }

    fn surge_like() -> TriggerDefinition {
        TriggerDefinition {
            name: "test_surge",
            session: Session::Morning,
            predicate: |r| r.volume_ratio().is_some_and(|v| v >= 2.0),
            metrics: vec![
                MetricSpec {
                    name: "volume_ratio",
                    weight: 0.6,
                    scale: Scale::Linear { cap: 20.0 },
                    extract: |r| r.volume_ratio(),
                },
                MetricSpec {
                    name: "volume",
                    weight: 0.4,
                    scale: Scale::Log,
                    extract: |r| Some(r.current.volume),
                },
            ],
            limit: 2,
            stop_loss_pct: 0.05,
        }
    }

    fn set(rows: &[(&str, f64, f64)]) -> SnapshotSet {
        // (ticker, prev_volume, volume)
        let cur_d = NaiveDate::from_ymd_opt(2026, 3, 6).unwrap();
        let prev_d = NaiveDate::from_ymd_opt(2026, 3, 5).unwrap();
        let mut s = SnapshotSet::default();
        for (t, pv, v) in rows {
            s.current.insert(t.to_string(), snapshot(t, cur_d, 100.0, 101.0, *v));
            s.previous.insert(t.to_string(), snapshot(t, prev_d, 100.0, 100.0, *pv));
            s.market_caps.insert(t.to_string(), 1.0e12);
        }
        s
    }

    #[test]
    fn min_max_handles_flat_series() {
        assert_eq!(min_max(&[3.0, 3.0]), vec![1.0, 1.0]);
        assert_eq!(min_max(&[1.0, 2.0, 3.0]), vec![0.0, 0.5, 1.0]);
        assert!(min_max(&[]).is_empty());
    }

    #[test]
    fn scale_clips_and_logs() {
        assert_eq!(Scale::Linear { cap: 1.0 }.apply(3.0), 1.0);
        assert_eq!(Scale::Linear { cap: 1.0 }.apply(-3.0), 0.0);
        assert_eq!(Scale::Log.apply(-5.0), 0.0);
        assert!((Scale::Log.apply(std::f64::consts::E - 1.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn validates_weight_sum() {
        let mut t = surge_like();
        t.validate().unwrap();
        t.metrics[0].weight = 0.7;
        assert!(t.validate().is_err());
    }

    #[test]
    fn ranks_by_composite_and_truncates() {
        let s = set(&[
            ("A", 100.0, 300.0),  // ratio 3
            ("B", 100.0, 1000.0), // ratio 10, biggest volume
            ("C", 100.0, 500.0),  // ratio 5
            ("D", 100.0, 150.0),  // filtered out by predicate
        ]);
        let rows = s.rows();
        let out = surge_like().evaluate(&rows, &lenient());

        let tickers: Vec<_> = out.ranked.iter().map(|c| c.ticker.as_str()).collect();
        assert_eq!(tickers, vec!["B", "C"]);
        assert!((out.ranked[0].composite_score - 1.0).abs() < 1e-12);
        assert!(out.ranked.iter().all(|c| c.trigger == "test_surge"));
        assert_eq!(out.stages.last().unwrap().passed, 3);
    }

    #[test]
    fn ties_break_by_ticker() {
        let s = set(&[("B", 100.0, 300.0), ("A", 100.0, 300.0)]);
        let rows = s.rows();
        let out = surge_like().evaluate(&rows, &lenient());
        let tickers: Vec<_> = out.ranked.iter().map(|c| c.ticker.as_str()).collect();
        assert_eq!(tickers, vec!["A", "B"]);
    }

    #[test]
    fn empty_survivors_is_not_an_error() {
        let s = set(&[("A", 100.0, 100.0)]);
        let rows = s.rows();
        let out = surge_like().evaluate(&rows, &lenient());
        assert!(out.ranked.is_empty());
    }
}
