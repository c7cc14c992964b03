//! Batched snapshot and history collection.
//!
//! Tickers are chunked into fixed-size batches that run on a bounded worker
//! pool. Each batch retries with exponential backoff; a batch that exhausts
//! its attempts leaves its tickers missing instead of failing the run.

use crate::domain::{DailyBar, PriceWindow, SnapshotSet, TickerSnapshot};
use crate::env_parse;
use crate::error::{DegradedData, DegradedStage, PipelineError};
use crate::ingest::MarketDataProvider;
use anyhow::Result;
use chrono::{Duration as ChronoDuration, NaiveDate};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

#[derive(Debug, Clone)]
pub struct CollectorOptions {
    pub bar_batch_size: usize,
    pub market_cap_batch_size: usize,
    /// Concurrent batches in flight.
    pub concurrency: usize,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    /// Calendar days fetched before the target date for the snapshot pair.
    pub window_days: i64,
    pub history_sessions: usize,
    pub history_days: i64,
}

impl Default for CollectorOptions {
    fn default() -> Self {
        Self {
            bar_batch_size: 20,
            market_cap_batch_size: 50,
            concurrency: 4,
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
            window_days: 10,
            history_sessions: 10,
            history_days: 20,
        }
    }
}

impl CollectorOptions {
    pub fn from_env() -> Self {
        let mut out = Self::default();
        if let Some(n) = env_parse::<usize>("COLLECTOR_BAR_BATCH_SIZE") {
            out.bar_batch_size = n.max(1);
        }
        if let Some(n) = env_parse::<usize>("COLLECTOR_MARKET_CAP_BATCH_SIZE") {
            out.market_cap_batch_size = n.max(1);
        }
        if let Some(n) = env_parse::<usize>("COLLECTOR_CONCURRENCY") {
            out.concurrency = n.max(1);
        }
        if let Some(n) = env_parse::<u32>("COLLECTOR_MAX_ATTEMPTS") {
            out.max_attempts = n.max(1);
        }
        if let Some(ms) = env_parse::<u64>("COLLECTOR_BACKOFF_MS") {
            out.backoff_base = Duration::from_millis(ms);
        }
        if let Some(n) = env_parse::<i64>("SNAPSHOT_WINDOW_DAYS") {
            out.window_days = n.max(5);
        }
        if let Some(n) = env_parse::<usize>("HISTORY_SESSIONS") {
            out.history_sessions = n.max(1);
        }
        if let Some(n) = env_parse::<i64>("HISTORY_WINDOW_DAYS") {
            out.history_days = n.max(1);
        }
        out
    }
}

#[derive(Debug, Clone, Default)]
pub struct CollectionReport {
    pub requested: usize,
    pub degraded: Vec<DegradedData>,
    pub bar_batches: usize,
    pub failed_bar_batches: usize,
    pub market_cap_batches: usize,
    pub failed_market_cap_batches: usize,
}

impl CollectionReport {
    /// Distinct tickers that cannot be evaluated.
    pub fn excluded_tickers(&self) -> usize {
        self.degraded
            .iter()
            .filter(|d| d.stage != DegradedStage::History)
            .map(|d| d.ticker.as_str())
            .collect::<BTreeSet<_>>()
            .len()
    }
}

#[derive(Debug)]
struct BatchResults<T> {
    values: BTreeMap<String, T>,
    batches: usize,
    failed: usize,
}

/// Fetches the snapshot pair and market caps for `tickers`.
///
/// Fails only when no daily-bar batch succeeds or no ticker has a bar on
/// `as_of_date`.
pub async fn collect_snapshots(
    provider: Arc<dyn MarketDataProvider>,
    tickers: &[String],
    as_of_date: NaiveDate,
    opts: &CollectorOptions,
) -> Result<(SnapshotSet, CollectionReport)> {
    if tickers.is_empty() {
        return Err(PipelineError::fatal("daily_bars", "empty ticker universe").into());
    }

    let mut report = CollectionReport {
        requested: tickers.len(),
        ..Default::default()
    };

    let start = as_of_date - ChronoDuration::days(opts.window_days);
    let bars = fetch_bars(Arc::clone(&provider), "daily_bars", tickers, start, as_of_date, opts).await;
    report.bar_batches = bars.batches;
    report.failed_bar_batches = bars.failed;

    if bars.failed == bars.batches {
        return Err(PipelineError::fatal(
            "daily_bars",
            format!("all {} batches failed for {as_of_date}", bars.batches),
        )
        .into());
    }

    let mut set = SnapshotSet {
        as_of_date: Some(as_of_date),
        ..Default::default()
    };

    for ticker in tickers {
        let Some(rows) = bars.values.get(ticker) else {
            report.degraded.push(degraded(ticker, DegradedStage::DailyBars));
            continue;
        };

        let Some(current) = rows.iter().find(|b| b.date == as_of_date) else {
            report.degraded.push(degraded(ticker, DegradedStage::CurrentBar));
            continue;
        };

        let Some(previous) = rows
            .iter()
            .filter(|b| b.date < as_of_date)
            .max_by_key(|b| b.date)
        else {
            report.degraded.push(degraded(ticker, DegradedStage::PreviousBar));
            continue;
        };

        set.current
            .insert(ticker.clone(), TickerSnapshot::from_bar(ticker, current));
        set.previous
            .insert(ticker.clone(), TickerSnapshot::from_bar(ticker, previous));
    }

    if set.current.is_empty() {
        return Err(PipelineError::fatal(
            "daily_bars",
            format!("no ticker has a bar for {as_of_date}"),
        )
        .into());
    }

    // Caps are only needed for tickers that survived the bar join.
    let cap_tickers: Vec<String> = set.previous.keys().cloned().collect();
    let caps = {
        let provider = Arc::clone(&provider);
        fetch_batched(
            "market_caps",
            &cap_tickers,
            opts.market_cap_batch_size,
            opts,
            move |chunk: Vec<String>| {
                let provider = Arc::clone(&provider);
                async move { provider.fetch_market_caps(&chunk, as_of_date).await }
            },
        )
        .await
    };
    report.market_cap_batches = caps.batches;
    report.failed_market_cap_batches = caps.failed;
    if caps.batches > 0 && caps.failed == caps.batches {
        tracing::error!(%as_of_date, batches = caps.batches, "all market-cap batches failed");
    }

    for ticker in &cap_tickers {
        match caps.values.get(ticker) {
            Some(cap) if cap.is_finite() && *cap > 0.0 => {
                set.market_caps.insert(ticker.clone(), *cap);
            }
            _ => report.degraded.push(degraded(ticker, DegradedStage::MarketCap)),
        }
    }

    tracing::info!(
        %as_of_date,
        requested = report.requested,
        complete = set.market_caps.len(),
        excluded = report.excluded_tickers(),
        failed_bar_batches = report.failed_bar_batches,
        failed_market_cap_batches = report.failed_market_cap_batches,
        "snapshot collection finished"
    );

    Ok((set, report))
}

/// Trailing high/low windows for a shortlist. Missing tickers are reported,
/// never fatal.
pub async fn collect_history(
    provider: Arc<dyn MarketDataProvider>,
    tickers: &[String],
    as_of_date: NaiveDate,
    opts: &CollectorOptions,
) -> (BTreeMap<String, PriceWindow>, Vec<DegradedData>) {
    let mut windows = BTreeMap::new();
    let mut missing = Vec::new();
    if tickers.is_empty() {
        return (windows, missing);
    }

    let start = as_of_date - ChronoDuration::days(opts.history_days);
    let bars = fetch_bars(provider, "history", tickers, start, as_of_date, opts).await;

    for ticker in tickers {
        match bars
            .values
            .get(ticker)
            .and_then(|rows| PriceWindow::from_bars(rows, as_of_date, opts.history_sessions))
        {
            Some(window) => {
                windows.insert(ticker.clone(), window);
            }
            None => missing.push(degraded(ticker, DegradedStage::History)),
        }
    }

    (windows, missing)
}

async fn fetch_bars(
    provider: Arc<dyn MarketDataProvider>,
    label: &'static str,
    tickers: &[String],
    start: NaiveDate,
    end: NaiveDate,
    opts: &CollectorOptions,
) -> BatchResults<Vec<DailyBar>> {
    fetch_batched(label, tickers, opts.bar_batch_size, opts, move |chunk: Vec<String>| {
        let provider = Arc::clone(&provider);
        async move { provider.fetch_daily_bars(&chunk, start, end).await }
    })
    .await
}

async fn fetch_batched<T, F, Fut>(
    label: &'static str,
    tickers: &[String],
    batch_size: usize,
    opts: &CollectorOptions,
    fetch: F,
) -> BatchResults<T>
where
    T: Send + 'static,
    F: Fn(Vec<String>) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<BTreeMap<String, T>>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(opts.concurrency.max(1)));
    let mut tasks = JoinSet::new();
    let max_attempts = opts.max_attempts.max(1);
    let backoff_base = opts.backoff_base;

    for (batch_idx, chunk) in tickers.chunks(batch_size.max(1)).enumerate() {
        let chunk = chunk.to_vec();
        let semaphore = Arc::clone(&semaphore);
        let fetch = fetch.clone();
        tasks.spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(err) => return Err(anyhow::Error::from(err)),
            };
            let t0 = Instant::now();
            let res = with_retries(label, batch_idx, max_attempts, backoff_base, || {
                fetch(chunk.clone())
            })
            .await;
            tracing::debug!(
                label,
                batch_idx,
                batch_size = chunk.len(),
                ok = res.is_ok(),
                elapsed_ms = t0.elapsed().as_millis(),
                "batch fetch"
            );
            res
        });
    }

    let mut out = BatchResults {
        values: BTreeMap::new(),
        batches: 0,
        failed: 0,
    };

    while let Some(joined) = tasks.join_next().await {
        out.batches += 1;
        match joined {
            Ok(Ok(values)) => out.values.extend(values),
            Ok(Err(err)) => {
                out.failed += 1;
                tracing::warn!(label, error = %err, "batch exhausted retries; tickers marked missing");
            }
            Err(err) => {
                out.failed += 1;
                tracing::warn!(label, error = %err, "batch task aborted; tickers marked missing");
            }
        }
    }

    out
}

async fn with_retries<T, F, Fut>(
    label: &'static str,
    batch_idx: usize,
    max_attempts: u32,
    backoff_base: Duration,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(v) => return Ok(v),
            Err(err) => {
                if attempt >= max_attempts {
                    return Err(err);
                }
                let backoff = backoff_base * (1u32 << (attempt - 1).min(16));
                tracing::warn!(
                    label,
                    batch_idx,
                    attempt,
                    ?backoff,
                    error = %err,
                    "batch fetch failed; retrying"
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

fn degraded(ticker: &str, stage: DegradedStage) -> DegradedData {
    DegradedData {
        ticker: ticker.to_string(),
        stage,
    }
}
