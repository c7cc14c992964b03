use chrono::NaiveDate;
use serde::Serialize;
use std::time::Duration;

/// Failures that change the outcome of a run or of a single candidate.
///
/// Only `FatalCollection` and `Timeout` abort a run. `CalendarUnavailable` is
/// recovered by the weekday fallback and `InvalidCandidate` drops one candidate.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PipelineError {
    #[error("fatal collection failure ({stage}): {detail}")]
    FatalCollection { stage: &'static str, detail: String },

    #[error("trading calendar unavailable for {date}: {detail}")]
    CalendarUnavailable { date: NaiveDate, detail: String },

    #[error("invalid candidate {ticker}: {reason}")]
    InvalidCandidate { ticker: String, reason: String },

    #[error("run exceeded timeout of {0:?}")]
    Timeout(Duration),
}

impl PipelineError {
    pub fn fatal(stage: &'static str, detail: impl Into<String>) -> Self {
        Self::FatalCollection {
            stage,
            detail: detail.into(),
        }
    }

    pub fn invalid(ticker: &str, reason: impl Into<String>) -> Self {
        Self::InvalidCandidate {
            ticker: ticker.to_string(),
            reason: reason.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::FatalCollection { .. } | Self::Timeout(_))
    }
}

/// Where a degraded data point was lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradedStage {
    DailyBars,
    CurrentBar,
    PreviousBar,
    MarketCap,
    History,
}

/// A ticker excluded from the run because some upstream data was missing.
/// Never an error; counted and reported alongside the output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DegradedData {
    pub ticker: String,
    pub stage: DegradedStage,
}
