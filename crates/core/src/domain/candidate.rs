use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Evaluation window. Every trigger belongs to exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Session {
    Morning,
    Afternoon,
}

impl Session {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Morning => "morning",
            Self::Afternoon => "afternoon",
        }
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Session {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "morning" | "am" => Ok(Self::Morning),
            "afternoon" | "pm" => Ok(Self::Afternoon),
            other => anyhow::bail!("unknown session `{other}` (expected morning|afternoon)"),
        }
    }
}

/// Output of a trigger evaluator: ranked by composite score only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilteredCandidate {
    pub ticker: String,
    pub trigger: &'static str,
    pub composite_score: f64,
    pub price: f64,
    /// Trigger's stop-loss tolerance, carried to the hybrid scorer.
    pub stop_loss_pct: f64,
}

/// A [`FilteredCandidate`] enriched with risk/reward fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredCandidate {
    #[serde(flatten)]
    pub candidate: FilteredCandidate,
    pub stop_loss: f64,
    pub target_price: f64,
    pub risk_reward: f64,
    pub agent_fit_score: f64,
    pub final_score: f64,
}

impl ScoredCandidate {
    pub fn ticker(&self) -> &str {
        &self.candidate.ticker
    }

    pub fn trigger(&self) -> &'static str {
        self.candidate.trigger
    }
}
