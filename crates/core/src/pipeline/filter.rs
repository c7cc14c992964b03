use crate::domain::MarketRow;
use serde::{Deserialize, Serialize};

/// Baseline thresholds shared by every trigger.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterThresholds {
    /// KRW.
    pub min_market_cap: f64,
    /// KRW, `close * volume`.
    pub min_traded_value: f64,
    /// Exclusive upper bound on `|close / prev_close - 1|`.
    pub max_change_rate: f64,
}

impl Default for FilterThresholds {
    fn default() -> Self {
        Self {
            min_market_cap: 100_000_000_000.0,
            min_traded_value: 5_000_000_000.0,
            max_change_rate: 0.20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterStage {
    Input,
    MarketCap,
    TradedValue,
    ChangeRate,
    Trigger,
}

/// Survivor count after one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCount {
    pub stage: FilterStage,
    pub passed: usize,
}

#[derive(Debug, Clone)]
pub struct FilterOutcome<'a> {
    pub survivors: Vec<MarketRow<'a>>,
    pub stages: Vec<StageCount>,
}

pub fn passes_market_cap(row: &MarketRow<'_>, t: &FilterThresholds) -> bool {
    row.market_cap >= t.min_market_cap
}

pub fn passes_traded_value(row: &MarketRow<'_>, t: &FilterThresholds) -> bool {
    row.traded_value() >= t.min_traded_value
}

/// Rows without a usable previous close never pass.
pub fn passes_change_rate(row: &MarketRow<'_>, t: &FilterThresholds) -> bool {
    row.change_rate()
        .is_some_and(|rate| rate.abs() < t.max_change_rate)
}

/// Runs the four stages in order. Survivors keep their input order.
pub fn run_chain<'a, P>(
    rows: &[MarketRow<'a>],
    thresholds: &FilterThresholds,
    predicate: P,
) -> FilterOutcome<'a>
where
    P: Fn(&MarketRow<'a>) -> bool,
{
    let mut stages = vec![StageCount {
        stage: FilterStage::Input,
        passed: rows.len(),
    }];

    let survivors = narrow(rows.to_vec(), FilterStage::MarketCap, &mut stages, |r| {
        passes_market_cap(r, thresholds)
    });
    let survivors = narrow(survivors, FilterStage::TradedValue, &mut stages, |r| {
        passes_traded_value(r, thresholds)
    });
    let survivors = narrow(survivors, FilterStage::ChangeRate, &mut stages, |r| {
        passes_change_rate(r, thresholds)
    });
    let survivors = narrow(survivors, FilterStage::Trigger, &mut stages, predicate);

    FilterOutcome { survivors, stages }
}

fn narrow<'a>(
    rows: Vec<MarketRow<'a>>,
    stage: FilterStage,
    stages: &mut Vec<StageCount>,
    keep: impl Fn(&MarketRow<'a>) -> bool,
) -> Vec<MarketRow<'a>> {
    let out: Vec<_> = rows.into_iter().filter(|r| keep(r)).collect();
    stages.push(StageCount {
        stage,
        passed: out.len(),
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::fixtures::snapshot;
    use crate::domain::SnapshotSet;
    use chrono::NaiveDate;

    fn set(rows: &[(&str, f64, f64, f64, f64)]) -> SnapshotSet {
        // (ticker, prev_close, close, volume, market_cap)
        let cur_d = NaiveDate::from_ymd_opt(2026, 3, 6).unwrap();
        let prev_d = NaiveDate::from_ymd_opt(2026, 3, 5).unwrap();
        let mut s = SnapshotSet::default();
        for (t, prev_close, close, volume, cap) in rows {
            s.current
                .insert(t.to_string(), snapshot(t, cur_d, *prev_close, *close, *volume));
            s.previous
                .insert(t.to_string(), snapshot(t, prev_d, *prev_close, *prev_close, *volume));
            s.market_caps.insert(t.to_string(), *cap);
        }
        s
    }

    fn thresholds() -> FilterThresholds {
        FilterThresholds {
            min_market_cap: 1_000.0,
            min_traded_value: 10_000.0,
            max_change_rate: 0.10,
        }
    }

    #[test]
    fn stages_narrow_in_order_and_keep_order() {
        let s = set(&[
            ("A", 100.0, 105.0, 200.0, 5_000.0), // passes
            ("B", 100.0, 105.0, 200.0, 500.0),   // cap
            ("C", 100.0, 105.0, 10.0, 5_000.0),  // traded value
            ("D", 100.0, 130.0, 200.0, 5_000.0), // change rate
            ("E", 100.0, 95.0, 200.0, 5_000.0),  // passes
        ]);
        let rows = s.rows();
        let out = run_chain(&rows, &thresholds(), |_| true);

        let tickers: Vec<_> = out.survivors.iter().map(|r| r.ticker).collect();
        assert_eq!(tickers, vec!["A", "E"]);
        let counts: Vec<_> = out.stages.iter().map(|s| s.passed).collect();
        assert_eq!(counts, vec![5, 4, 3, 2, 2]);
    }

    #[test]
    fn trigger_predicate_is_last_stage() {
        let s = set(&[
            ("A", 100.0, 105.0, 200.0, 5_000.0),
            ("E", 100.0, 95.0, 200.0, 5_000.0),
        ]);
        let rows = s.rows();
        let out = run_chain(&rows, &thresholds(), |r| r.change_rate().unwrap() > 0.0);
        assert_eq!(out.survivors.len(), 1);
        assert_eq!(out.survivors[0].ticker, "A");
        assert_eq!(out.stages.last().unwrap().stage, FilterStage::Trigger);
    }

    #[test]
    fn change_rate_ceiling_is_exclusive_and_monotone() {
        let s = set(&[
            ("A", 100.0, 105.0, 200.0, 5_000.0),
            ("B", 100.0, 110.0, 200.0, 5_000.0),
            ("C", 100.0, 115.0, 200.0, 5_000.0),
            ("D", 100.0, 80.0, 200.0, 5_000.0),
        ]);
        let rows = s.rows();

        let mut prev: Vec<&str> = Vec::new();
        for ceiling in [0.05, 0.1, 0.12, 0.16, 0.21, 1.0] {
            let t = FilterThresholds {
                max_change_rate: ceiling,
                ..thresholds()
            };
            let out = run_chain(&rows, &t, |_| true);
            let now: Vec<&str> = out.survivors.iter().map(|r| r.ticker).collect();
            for ticker in &prev {
                assert!(now.contains(ticker), "{ticker} dropped at ceiling {ceiling}");
            }
            prev = now;
        }
        assert_eq!(prev, vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn missing_previous_close_fails_change_rate() {
        let s = set(&[("A", 0.0, 105.0, 200.0, 5_000.0)]);
        let rows = s.rows();
        assert!(!passes_change_rate(&rows[0], &thresholds()));
    }
}
