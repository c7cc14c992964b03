use crate::domain::DailyBar;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyBarsResponse {
    pub items: Vec<TickerBars>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerBars {
    pub ticker: String,
    pub bars: Vec<DailyBar>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketCapsResponse {
    pub as_of_date: NaiveDate,
    pub items: Vec<MarketCapItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketCapItem {
    pub ticker: String,
    /// KRW. `null` when the upstream has no figure for the date.
    pub market_cap: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstituentsResponse {
    pub index: String,
    pub items: Vec<ConstituentItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstituentItem {
    pub ticker: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResponse {
    pub date: NaiveDate,
    pub is_session: bool,
}
