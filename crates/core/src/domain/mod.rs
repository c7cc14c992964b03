pub mod candidate;
pub mod market;
pub mod selection;

pub use candidate::{FilteredCandidate, ScoredCandidate, Session};
pub use market::{DailyBar, MarketRow, PriceWindow, SnapshotSet, TickerSnapshot};
pub use selection::{RunStats, SelectionItem, SelectionReport, TriggerStats};
