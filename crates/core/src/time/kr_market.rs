use crate::error::PipelineError;
use anyhow::Context;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc};
use std::collections::HashSet;

const KST_OFFSET_SECS: i32 = 9 * 3600;

// If the job runs before this time (KST), treat it as "yesterday's" market date.
// KRX close is ~15:30 KST; we use a slightly conservative cutoff.
const CLOSE_CUTOFF_HOUR_KST: u32 = 16;
const CLOSE_CUTOFF_MINUTE_KST: u32 = 0;

// Longest KRX closure on record is well under this.
const MAX_LOOKBACK_DAYS: i64 = 31;

/// Answers whether a date is a KRX trading session.
#[async_trait::async_trait]
pub trait CalendarProvider: Send + Sync {
    fn calendar_name(&self) -> &'static str;

    async fn is_session(&self, date: NaiveDate) -> anyhow::Result<bool>;
}

/// Weekdays are sessions. Used when no real calendar can be consulted.
#[derive(Debug, Clone, Copy, Default)]
pub struct WeekdayCalendar;

#[async_trait::async_trait]
impl CalendarProvider for WeekdayCalendar {
    fn calendar_name(&self) -> &'static str {
        "weekday"
    }

    async fn is_session(&self, date: NaiveDate) -> anyhow::Result<bool> {
        Ok(!is_weekend(date))
    }
}

/// Weekends plus a configured holiday list.
#[derive(Debug, Clone)]
pub struct StaticHolidayCalendar {
    holidays: HashSet<NaiveDate>,
}

impl StaticHolidayCalendar {
    pub fn new(holidays: HashSet<NaiveDate>) -> Self {
        Self { holidays }
    }

    pub fn from_env() -> Self {
        Self::new(configured_holidays())
    }
}

#[async_trait::async_trait]
impl CalendarProvider for StaticHolidayCalendar {
    fn calendar_name(&self) -> &'static str {
        "static_holidays"
    }

    async fn is_session(&self, date: NaiveDate) -> anyhow::Result<bool> {
        Ok(!is_weekend(date) && !self.holidays.contains(&date))
    }
}

/// Default requested date: today in KST, or yesterday before the close cutoff.
pub fn default_requested_date(now_utc: DateTime<Utc>) -> anyhow::Result<NaiveDate> {
    let kst = chrono::FixedOffset::east_opt(KST_OFFSET_SECS).context("invalid KST offset")?;
    let now_kst = now_utc.with_timezone(&kst);

    let cutoff_reached =
        (now_kst.hour(), now_kst.minute()) >= (CLOSE_CUTOFF_HOUR_KST, CLOSE_CUTOFF_MINUTE_KST);
    let mut date = now_kst.date_naive();
    if !cutoff_reached {
        date = date - Duration::days(1);
    }
    Ok(date)
}

/// Walks back from `date` to the nearest session at or before it.
pub async fn resolve_with(
    calendar: &dyn CalendarProvider,
    date: NaiveDate,
) -> Result<NaiveDate, PipelineError> {
    let mut cur = date;
    for _ in 0..=MAX_LOOKBACK_DAYS {
        match calendar.is_session(cur).await {
            Ok(true) => return Ok(cur),
            Ok(false) => cur = cur - Duration::days(1),
            Err(err) => {
                return Err(PipelineError::CalendarUnavailable {
                    date: cur,
                    detail: format!("{}: {err:#}", calendar.calendar_name()),
                })
            }
        }
    }

    Err(PipelineError::CalendarUnavailable {
        date,
        detail: format!("no session within {MAX_LOOKBACK_DAYS} days"),
    })
}

/// Like [`resolve_with`], but degrades to the weekday rule when the calendar
/// cannot be consulted.
pub async fn resolve_trading_day(calendar: &dyn CalendarProvider, date: NaiveDate) -> NaiveDate {
    match resolve_with(calendar, date).await {
        Ok(d) => d,
        Err(err) => {
            tracing::warn!(%date, error = %err, "trading calendar unavailable; falling back to weekdays");
            previous_weekday_inclusive(date)
        }
    }
}

pub fn previous_weekday_inclusive(date: NaiveDate) -> NaiveDate {
    let mut cur = date;
    while is_weekend(cur) {
        cur = cur - Duration::days(1);
    }
    cur
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), chrono::Weekday::Sat | chrono::Weekday::Sun)
}

fn configured_holidays() -> HashSet<NaiveDate> {
    // Minimal set of widely observed fixed-date holidays.
    // Extend via KR_MARKET_HOLIDAYS="YYYY-MM-DD,YYYY-MM-DD".
    let mut out = HashSet::new();
    for y in 2024..=2030 {
        for (m, d) in [(1, 1), (3, 1), (5, 5), (6, 6), (8, 15), (10, 3), (10, 9), (12, 25), (12, 31)] {
            if let Some(date) = NaiveDate::from_ymd_opt(y, m, d) {
                out.insert(date);
            }
        }
    }

    if let Ok(s) = std::env::var("KR_MARKET_HOLIDAYS") {
        out.extend(parse_holiday_list(&s));
    }

    out
}

pub fn parse_holiday_list(s: &str) -> Vec<NaiveDate> {
    s.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .filter_map(|p| NaiveDate::parse_from_str(p, "%Y-%m-%d").ok())
        .collect()
}
