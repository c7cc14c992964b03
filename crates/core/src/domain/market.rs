use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One upstream OHLCV row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerSnapshot {
    pub ticker: String,
    pub as_of_date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl TickerSnapshot {
    pub fn from_bar(ticker: &str, bar: &DailyBar) -> Self {
        Self {
            ticker: ticker.to_string(),
            as_of_date: bar.date,
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
        }
    }

    pub fn traded_value(&self) -> f64 {
        self.close * self.volume
    }
}

/// Current/previous snapshot tables plus market caps for one run.
///
/// Built once by the collector and only read afterwards. A ticker that is
/// absent from any of the three tables has no [`MarketRow`].
#[derive(Debug, Clone, Default)]
pub struct SnapshotSet {
    pub as_of_date: Option<NaiveDate>,
    pub current: BTreeMap<String, TickerSnapshot>,
    pub previous: BTreeMap<String, TickerSnapshot>,
    pub market_caps: BTreeMap<String, f64>,
}

impl SnapshotSet {
    pub fn row(&self, ticker: &str) -> Option<MarketRow<'_>> {
        let (ticker, current) = self.current.get_key_value(ticker)?;
        let previous = self.previous.get(ticker)?;
        let market_cap = *self.market_caps.get(ticker)?;
        Some(MarketRow {
            ticker,
            current,
            previous,
            market_cap,
        })
    }

    /// Complete rows in ticker order.
    pub fn rows(&self) -> Vec<MarketRow<'_>> {
        self.current
            .keys()
            .filter_map(|ticker| self.row(ticker))
            .collect()
    }
}

/// Joined view of one ticker across the snapshot tables.
#[derive(Debug, Clone, Copy)]
pub struct MarketRow<'a> {
    pub ticker: &'a str,
    pub current: &'a TickerSnapshot,
    pub previous: &'a TickerSnapshot,
    pub market_cap: f64,
}

impl MarketRow<'_> {
    pub fn price(&self) -> f64 {
        self.current.close
    }

    pub fn traded_value(&self) -> f64 {
        self.current.traded_value()
    }

    /// `close / prev_close - 1`; `None` without a usable previous close.
    pub fn change_rate(&self) -> Option<f64> {
        ratio(self.current.close, self.previous.close).map(|r| r - 1.0)
    }

    pub fn volume_ratio(&self) -> Option<f64> {
        ratio(self.current.volume, self.previous.volume)
    }

    /// Opening gap against the previous close.
    pub fn gap_ratio(&self) -> Option<f64> {
        ratio(self.current.open, self.previous.close).map(|r| r - 1.0)
    }

    pub fn intraday_return(&self) -> Option<f64> {
        ratio(self.current.close, self.current.open).map(|r| r - 1.0)
    }

    /// Where the close sits inside the day's range, 0 at the low and 1 at the high.
    pub fn closing_strength(&self) -> Option<f64> {
        let range = self.current.high - self.current.low;
        if !(range > 0.0) {
            return None;
        }
        Some(((self.current.close - self.current.low) / range).clamp(0.0, 1.0))
    }

    /// Traded value as a fraction of market cap.
    pub fn turnover(&self) -> Option<f64> {
        ratio(self.traded_value(), self.market_cap)
    }
}

fn ratio(num: f64, den: f64) -> Option<f64> {
    if !(den > 0.0) || !num.is_finite() || !den.is_finite() {
        return None;
    }
    Some(num / den)
}

/// High/low over a short trailing window of sessions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceWindow {
    pub high: f64,
    pub low: f64,
    pub sessions: usize,
}

impl PriceWindow {
    /// Uses the last `sessions` bars on or before `as_of_date`.
    pub fn from_bars(bars: &[DailyBar], as_of_date: NaiveDate, sessions: usize) -> Option<Self> {
        let mut eligible: Vec<&DailyBar> = bars.iter().filter(|b| b.date <= as_of_date).collect();
        eligible.sort_by_key(|b| b.date);
        let start = eligible.len().saturating_sub(sessions);
        let window = &eligible[start..];
        if window.is_empty() {
            return None;
        }

        let high = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let low = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);
        Some(Self {
            high,
            low,
            sessions: window.len(),
        })
    }
}
