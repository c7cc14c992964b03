pub mod kis;
pub mod provider;
pub mod types;

use crate::domain::DailyBar;
use anyhow::Result;
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// One listed instrument from a constituent source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constituent {
    pub ticker: String,
    pub name: String,
}

/// An index or market listing the universe is built from.
#[async_trait::async_trait]
pub trait ConstituentSource: Send + Sync {
    fn source_name(&self) -> String;

    async fn fetch_constituents(&self) -> Result<Vec<Constituent>>;
}

/// OHLCV and market-cap upstream.
///
/// Batch calls may omit tickers they could not serve; an `Err` means the
/// whole batch failed and is eligible for retry.
#[async_trait::async_trait]
pub trait MarketDataProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    async fn fetch_daily_bars(
        &self,
        tickers: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<BTreeMap<String, Vec<DailyBar>>>;

    /// Market cap in KRW per ticker.
    async fn fetch_market_caps(
        &self,
        tickers: &[String],
        as_of_date: NaiveDate,
    ) -> Result<BTreeMap<String, f64>>;
}
