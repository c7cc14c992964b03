use crate::domain::candidate::{ScoredCandidate, Session};
use crate::pipeline::filter::StageCount;
use anyhow::ensure;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// The terminal artifact of a run, handed to the reporting side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionReport {
    pub as_of_date: NaiveDate,
    pub session: Session,
    pub generated_at: DateTime<Utc>,
    pub items: Vec<SelectionItem>,
    pub stats: RunStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionItem {
    pub rank: i32,
    pub ticker: String,
    pub name: Option<String>,
    pub trigger: String,
    pub composite_score: f64,
    pub final_score: f64,
    pub price: f64,
    pub stop_loss: f64,
    pub target_price: f64,
    pub risk_reward: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub universe_size: usize,
    pub eligible_rows: usize,
    /// Tickers dropped because some upstream data point was missing.
    pub excluded_tickers: usize,
    pub invalid_candidates: usize,
    pub triggers: Vec<TriggerStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerStats {
    pub trigger: String,
    pub stages: Vec<StageCount>,
    pub ranked: usize,
    pub scored: usize,
}

impl SelectionItem {
    pub fn from_scored(rank: i32, scored: &ScoredCandidate, name: Option<String>) -> Self {
        Self {
            rank,
            ticker: scored.candidate.ticker.clone(),
            name,
            trigger: scored.candidate.trigger.to_string(),
            composite_score: scored.candidate.composite_score,
            final_score: scored.final_score,
            price: scored.candidate.price,
            stop_loss: scored.stop_loss,
            target_price: scored.target_price,
            risk_reward: scored.risk_reward,
        }
    }
}

impl SelectionReport {
    /// Checks the selection rules before the report leaves the process.
    pub fn validate(&self, max_picks: usize) -> anyhow::Result<()> {
        ensure!(
            self.items.len() <= max_picks,
            "selection has {} items, cap is {max_picks}",
            self.items.len()
        );

        let mut tickers = BTreeSet::new();
        let mut triggers = BTreeSet::new();
        for (idx, item) in self.items.iter().enumerate() {
            ensure!(
                item.rank == idx as i32 + 1,
                "rank {} at position {idx} is not contiguous",
                item.rank
            );
            ensure!(
                tickers.insert(item.ticker.as_str()),
                "duplicate ticker in selection: {}",
                item.ticker
            );
            ensure!(
                triggers.insert(item.trigger.as_str()),
                "trigger {} contributed more than one pick",
                item.trigger
            );
            ensure!(
                item.stop_loss < item.price && item.price <= item.target_price,
                "inconsistent price levels for {}",
                item.ticker
            );
        }

        Ok(())
    }
}
