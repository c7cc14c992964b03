pub mod catalog;
pub mod collector;
pub mod filter;
pub mod hybrid;
pub mod select;
pub mod trigger;

use crate::domain::{RunStats, SelectionItem, SelectionReport, Session, TriggerStats};
use crate::env_parse;
use crate::ingest::MarketDataProvider;
use anyhow::Context;
use chrono::{NaiveDate, Utc};
use collector::CollectorOptions;
use filter::FilterThresholds;
use hybrid::HybridParams;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_RUN_TIMEOUT_SECS: u64 = 1500;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub thresholds: FilterThresholds,
    pub hybrid: HybridParams,
    /// Global ceiling on the final selection.
    pub max_picks: usize,
    pub collector: CollectorOptions,
    /// Wall-clock bound on a whole run, calendar lookup included.
    pub run_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            thresholds: FilterThresholds::default(),
            hybrid: HybridParams::default(),
            max_picks: 3,
            collector: CollectorOptions::default(),
            run_timeout: Duration::from_secs(DEFAULT_RUN_TIMEOUT_SECS),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let mut out = Self {
            collector: CollectorOptions::from_env(),
            ..Default::default()
        };

        if let Some(v) = env_parse::<f64>("MIN_MARKET_CAP") {
            out.thresholds.min_market_cap = v;
        }
        if let Some(v) = env_parse::<f64>("MIN_TRADING_VALUE") {
            out.thresholds.min_traded_value = v;
        }
        if let Some(v) = env_parse::<f64>("MAX_CHANGE_RATE") {
            out.thresholds.max_change_rate = v;
        }
        if let Some(v) = env_parse::<f64>("TARGET_MIN_UPSIDE") {
            out.hybrid.min_upside = v;
        }
        if let Some(n) = env_parse::<usize>("MAX_PICKS") {
            out.max_picks = n;
        }
        if let Some(secs) = env_parse::<u64>("RUN_TIMEOUT_SECS") {
            out.run_timeout = Duration::from_secs(secs.max(1));
        }

        out
    }
}

/// Runs one session end to end against a resolved trading date.
///
/// `universe` maps ticker to display name.
pub async fn run_session(
    provider: Arc<dyn MarketDataProvider>,
    universe: &BTreeMap<String, String>,
    as_of_date: NaiveDate,
    session: Session,
    config: &PipelineConfig,
) -> anyhow::Result<SelectionReport> {
    let triggers = catalog::for_session(session);
    for trigger in &triggers {
        trigger.validate()?;
    }

    let tickers: Vec<String> = universe.keys().cloned().collect();
    let (snapshots, collection) =
        collector::collect_snapshots(Arc::clone(&provider), &tickers, as_of_date, &config.collector)
            .await
            .context("snapshot collection failed")?;

    let rows = snapshots.rows();
    let outcomes: Vec<_> = triggers
        .iter()
        .map(|t| t.evaluate(&rows, &config.thresholds))
        .collect();

    for outcome in &outcomes {
        tracing::info!(
            %as_of_date,
            %session,
            trigger = outcome.trigger,
            ranked = outcome.ranked.len(),
            top = outcome.ranked.first().map(|c| c.ticker.as_str()).unwrap_or("-"),
            "trigger evaluated"
        );
    }

    let shortlist: Vec<String> = outcomes
        .iter()
        .flat_map(|o| o.ranked.iter().map(|c| c.ticker.clone()))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let (windows, missing_history) =
        collector::collect_history(provider, &shortlist, as_of_date, &config.collector).await;
    if !missing_history.is_empty() {
        tracing::warn!(
            %as_of_date,
            missing = missing_history.len(),
            "history window missing; using minimum-upside targets"
        );
    }

    let mut stats = RunStats {
        universe_size: universe.len(),
        eligible_rows: rows.len(),
        excluded_tickers: collection.excluded_tickers(),
        ..Default::default()
    };

    let mut scored_all = Vec::new();
    for outcome in outcomes {
        let ranked = outcome.ranked.len();
        let scored = hybrid::score_shortlist(outcome.ranked, &windows, &config.hybrid);
        stats.invalid_candidates += scored.invalid.len();
        stats.triggers.push(TriggerStats {
            trigger: outcome.trigger.to_string(),
            stages: outcome.stages,
            ranked,
            scored: scored.scored.len(),
        });
        scored_all.extend(scored.scored);
    }

    let picks = select::select_final(scored_all, config.max_picks);
    let items = picks
        .iter()
        .enumerate()
        .map(|(idx, c)| SelectionItem::from_scored(idx as i32 + 1, c, universe.get(c.ticker()).cloned()))
        .collect();

    let report = SelectionReport {
        as_of_date,
        session,
        generated_at: Utc::now(),
        items,
        stats,
    };
    report.validate(config.max_picks)?;

    tracing::info!(
        %as_of_date,
        %session,
        picks = report.items.len(),
        excluded_tickers = report.stats.excluded_tickers,
        invalid_candidates = report.stats.invalid_candidates,
        "selection finished"
    );

    Ok(report)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::collector::CollectorOptions;
    use crate::domain::DailyBar;
    use crate::ingest::MarketDataProvider;
    use anyhow::Result;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::time::Duration;

    pub(crate) fn fast_options() -> CollectorOptions {
        CollectorOptions {
            backoff_base: Duration::ZERO,
            ..CollectorOptions::default()
        }
    }

    /// In-memory provider. Tickers without data are silently omitted, the
    /// way a real upstream drops symbols it cannot serve.
    #[derive(Debug, Default)]
    pub(crate) struct FakeProvider {
        bars: BTreeMap<String, Vec<DailyBar>>,
        caps: BTreeMap<String, f64>,
        failing_bar_calls: AtomicU32,
        bar_calls: AtomicUsize,
        max_batch: AtomicUsize,
    }

    impl FakeProvider {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn with_bars(mut self, ticker: &str, bars: Vec<DailyBar>) -> Self {
            self.bars.insert(ticker.to_string(), bars);
            self
        }

        /// Flat previous bar and a current bar moving from `prev_close` to `close`.
        pub(crate) fn with_pair(
            self,
            ticker: &str,
            prev_date: NaiveDate,
            date: NaiveDate,
            prev_close: f64,
            close: f64,
            volume: f64,
        ) -> Self {
            self.with_bars(
                ticker,
                vec![
                    DailyBar {
                        date: prev_date,
                        open: prev_close,
                        high: prev_close,
                        low: prev_close,
                        close: prev_close,
                        volume,
                    },
                    DailyBar {
                        date,
                        open: prev_close,
                        high: prev_close.max(close),
                        low: prev_close.min(close),
                        close,
                        volume,
                    },
                ],
            )
        }

        pub(crate) fn with_cap(mut self, ticker: &str, cap: f64) -> Self {
            self.caps.insert(ticker.to_string(), cap);
            self
        }

        /// The first `n` bar calls fail.
        pub(crate) fn failing_bars(self, n: u32) -> Self {
            self.failing_bar_calls.store(n, Ordering::SeqCst);
            self
        }

        pub(crate) fn bar_calls(&self) -> usize {
            self.bar_calls.load(Ordering::SeqCst)
        }

        pub(crate) fn max_batch_len(&self) -> usize {
            self.max_batch.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl MarketDataProvider for FakeProvider {
        fn provider_name(&self) -> &'static str {
            "fake"
        }

        async fn fetch_daily_bars(
            &self,
            tickers: &[String],
            start: NaiveDate,
            end: NaiveDate,
        ) -> Result<BTreeMap<String, Vec<DailyBar>>> {
            self.bar_calls.fetch_add(1, Ordering::SeqCst);
            self.max_batch.fetch_max(tickers.len(), Ordering::SeqCst);

            let remaining = self.failing_bar_calls.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failing_bar_calls.store(remaining - 1, Ordering::SeqCst);
                anyhow::bail!("upstream unavailable");
            }

            let mut out = BTreeMap::new();
            for t in tickers {
                if let Some(bars) = self.bars.get(t) {
                    let rows: Vec<_> = bars
                        .iter()
                        .filter(|b| b.date >= start && b.date <= end)
                        .cloned()
                        .collect();
                    out.insert(t.clone(), rows);
                }
            }
            Ok(out)
        }

        async fn fetch_market_caps(
            &self,
            tickers: &[String],
            _as_of_date: NaiveDate,
        ) -> Result<BTreeMap<String, f64>> {
            Ok(tickers
                .iter()
                .filter_map(|t| self.caps.get(t).map(|c| (t.clone(), *c)))
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{fast_options, FakeProvider};
    use super::*;
    use crate::domain::DailyBar;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, day).unwrap()
    }

    fn bars(volume_prev: f64, volume: f64) -> Vec<DailyBar> {
        vec![
            DailyBar {
                date: d(5),
                open: 10_000.0,
                high: 10_000.0,
                low: 10_000.0,
                close: 10_000.0,
                volume: volume_prev,
            },
            DailyBar {
                date: d(6),
                open: 10_000.0,
                high: 10_100.0,
                low: 10_000.0,
                close: 10_100.0,
                volume,
            },
        ]
    }

    /// A has no data; B and C both surge on volume, B harder.
    fn provider() -> FakeProvider {
        FakeProvider::new()
            .with_bars("B", bars(1_000_000.0, 5_000_000.0))
            .with_bars("C", bars(1_000_000.0, 3_000_000.0))
            .with_cap("B", 1.0e13)
            .with_cap("C", 1.0e13)
    }

    fn universe() -> BTreeMap<String, String> {
        [("A", "Alpha"), ("B", "Bravo"), ("C", "Charlie")]
            .into_iter()
            .map(|(t, n)| (t.to_string(), n.to_string()))
            .collect()
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            collector: fast_options(),
            ..Default::default()
        }
    }

    #[test]
    fn run_timeout_reads_env_override() {
        assert_eq!(PipelineConfig::default().run_timeout, Duration::from_secs(1500));

        std::env::set_var("RUN_TIMEOUT_SECS", "90");
        let cfg = PipelineConfig::from_env();
        std::env::remove_var("RUN_TIMEOUT_SECS");
        assert_eq!(cfg.run_timeout, Duration::from_secs(90));
    }

    #[tokio::test]
    async fn failed_ticker_is_excluded_and_best_candidate_wins() {
        let report = run_session(Arc::new(provider()), &universe(), d(6), Session::Morning, &config())
            .await
            .unwrap();

        assert_eq!(report.items.len(), 1);
        let item = &report.items[0];
        assert_eq!(item.ticker, "B");
        assert_eq!(item.trigger, "volume_surge");
        assert_eq!(item.name.as_deref(), Some("Bravo"));
        assert_eq!(report.stats.excluded_tickers, 1);
        assert_eq!(report.stats.universe_size, 3);
        assert_eq!(report.stats.triggers.len(), 3);
    }

    #[tokio::test]
    async fn afternoon_shared_top_pick_goes_to_better_trigger() {
        let report = run_session(Arc::new(provider()), &universe(), d(6), Session::Afternoon, &config())
            .await
            .unwrap();

        let picks: Vec<_> = report
            .items
            .iter()
            .map(|i| (i.trigger.as_str(), i.ticker.as_str()))
            .collect();
        assert_eq!(
            picks,
            vec![("closing_strength", "B"), ("quiet_accumulation", "C")]
        );
        assert!(report
            .stats
            .triggers
            .iter()
            .all(|t| catalog::for_session(Session::Afternoon)
                .iter()
                .any(|d| d.name == t.trigger)));
    }

    #[tokio::test]
    async fn identical_inputs_give_identical_selection() {
        let a = run_session(Arc::new(provider()), &universe(), d(6), Session::Afternoon, &config())
            .await
            .unwrap();
        let b = run_session(Arc::new(provider()), &universe(), d(6), Session::Afternoon, &config())
            .await
            .unwrap();
        assert_eq!(a.items, b.items);
        assert_eq!(a.stats, b.stats);
    }

    #[tokio::test]
    async fn total_snapshot_failure_aborts() {
        let provider = provider().failing_bars(u32::MAX);
        let err = run_session(Arc::new(provider), &universe(), d(6), Session::Morning, &config())
            .await
            .unwrap_err();
        let fatal = err
            .downcast_ref::<crate::error::PipelineError>()
            .is_some_and(|e| e.is_fatal());
        assert!(fatal, "{err:#}");
    }
}
