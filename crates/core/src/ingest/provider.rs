use crate::config::Settings;
use crate::domain::DailyBar;
use crate::ingest::types::{
    ConstituentsResponse, DailyBarsResponse, MarketCapsResponse, SessionResponse,
};
use crate::ingest::{Constituent, ConstituentSource, MarketDataProvider};
use crate::time::kr_market::CalendarProvider;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RETRIES: u32 = 3;

const BARS_PATH: &str = "/v1/daily_bars";
const MARKET_CAPS_PATH: &str = "/v1/market_caps";
const CONSTITUENTS_PATH: &str = "/v1/constituents";
const SESSIONS_PATH: &str = "/v1/calendar/sessions";

/// Generic JSON-over-HTTP upstream for bars, caps, constituents and the calendar.
///
/// Bar and cap calls are single attempts; the collector owns batch retries.
/// Constituent and calendar lookups retry here.
#[derive(Debug, Clone)]
pub struct HttpJsonDataProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    retries: u32,
}

impl HttpJsonDataProvider {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let base_url = settings.require_data_provider_base_url()?.to_string();
        let api_key = settings.data_provider_api_key.clone();

        let timeout_secs = std::env::var("DATA_PROVIDER_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let retries = std::env::var("DATA_PROVIDER_RETRIES")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_RETRIES)
            .max(1);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build data provider http client")?;

        Ok(Self {
            http,
            base_url,
            api_key,
            retries,
        })
    }

    fn url(&self, path: &str) -> String {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };

        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(api_key) = &self.api_key {
            headers.insert("x-api-key", HeaderValue::from_str(api_key)?);
        }
        Ok(headers)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let url = self.url(path);
        let res = self
            .http
            .get(url)
            .headers(self.headers()?)
            .query(query)
            .send()
            .await
            .with_context(|| format!("data provider request failed: {path}"))?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read provider response")?;

        if !status.is_success() {
            anyhow::bail!("data provider HTTP {status} ({path}): {text}");
        }

        serde_json::from_str::<T>(&text)
            .with_context(|| format!("failed to parse provider response ({path}): {text}"))
    }

    async fn get_json_retrying<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.get_json(path, query).await {
                Ok(v) => return Ok(v),
                Err(err) => {
                    if attempt >= self.retries {
                        return Err(err);
                    }
                    let backoff = retry_backoff(attempt);
                    tracing::warn!(attempt, ?backoff, path, error = %err, "data provider fetch failed; retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl MarketDataProvider for HttpJsonDataProvider {
    fn provider_name(&self) -> &'static str {
        "external_http_json"
    }

    async fn fetch_daily_bars(
        &self,
        tickers: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<BTreeMap<String, Vec<DailyBar>>> {
        let query = [
            ("tickers", tickers.join(",")),
            ("start", start.to_string()),
            ("end", end.to_string()),
        ];
        let resp: DailyBarsResponse = self.get_json(BARS_PATH, &query).await?;
        Ok(bars_by_ticker(resp, start, end))
    }

    async fn fetch_market_caps(
        &self,
        tickers: &[String],
        as_of_date: NaiveDate,
    ) -> Result<BTreeMap<String, f64>> {
        let query = [
            ("tickers", tickers.join(",")),
            ("as_of_date", as_of_date.to_string()),
        ];
        let resp: MarketCapsResponse = self.get_json(MARKET_CAPS_PATH, &query).await?;
        anyhow::ensure!(
            resp.as_of_date == as_of_date,
            "provider as_of_date mismatch: expected {as_of_date}, got {}",
            resp.as_of_date
        );

        Ok(resp
            .items
            .into_iter()
            .filter_map(|item| item.market_cap.map(|cap| (item.ticker.trim().to_string(), cap)))
            .collect())
    }
}

#[async_trait::async_trait]
impl CalendarProvider for HttpJsonDataProvider {
    fn calendar_name(&self) -> &'static str {
        "external_http_json"
    }

    async fn is_session(&self, date: NaiveDate) -> Result<bool> {
        let resp: SessionResponse = self
            .get_json_retrying(SESSIONS_PATH, &[("date", date.to_string())])
            .await?;
        anyhow::ensure!(
            resp.date == date,
            "calendar date mismatch: expected {date}, got {}",
            resp.date
        );
        Ok(resp.is_session)
    }
}

/// An index constituent list served by [`HttpJsonDataProvider`].
#[derive(Debug, Clone)]
pub struct HttpConstituentSource {
    provider: HttpJsonDataProvider,
    index: String,
}

impl HttpConstituentSource {
    pub fn new(provider: HttpJsonDataProvider, index: impl Into<String>) -> Self {
        Self {
            provider,
            index: index.into(),
        }
    }
}

#[async_trait::async_trait]
impl ConstituentSource for HttpConstituentSource {
    fn source_name(&self) -> String {
        format!("http:{}", self.index)
    }

    async fn fetch_constituents(&self) -> Result<Vec<Constituent>> {
        let path = format!("{CONSTITUENTS_PATH}/{}", self.index);
        let resp: ConstituentsResponse = self.provider.get_json_retrying(&path, &[]).await?;
        Ok(constituents_from(resp))
    }
}

fn bars_by_ticker(
    resp: DailyBarsResponse,
    start: NaiveDate,
    end: NaiveDate,
) -> BTreeMap<String, Vec<DailyBar>> {
    let mut out = BTreeMap::new();
    for item in resp.items {
        let ticker = item.ticker.trim().to_string();
        if ticker.is_empty() {
            continue;
        }
        let bars: Vec<DailyBar> = item
            .bars
            .into_iter()
            .filter(|b| b.date >= start && b.date <= end && is_valid_bar(b))
            .collect();
        out.insert(ticker, bars);
    }
    out
}

/// `1s, 2s, 4s, ...` after the given failed attempt, capped at 2^16 seconds.
pub(crate) fn retry_backoff(attempt: u32) -> Duration {
    Duration::from_secs(1u64 << attempt.saturating_sub(1).min(16))
}

pub(crate) fn is_valid_bar(bar: &DailyBar) -> bool {
    let prices = [bar.open, bar.high, bar.low, bar.close];
    prices.iter().all(|p| p.is_finite() && *p > 0.0)
        && bar.volume.is_finite()
        && bar.volume >= 0.0
        && bar.high >= bar.low
}

fn constituents_from(resp: ConstituentsResponse) -> Vec<Constituent> {
    resp.items
        .into_iter()
        .filter_map(|item| {
            let ticker = item.ticker.trim().to_string();
            if ticker.is_empty() {
                return None;
            }
            Some(Constituent {
                ticker,
                name: item.name.trim().to_string(),
            })
        })
        .collect()
}
