//! Append-only Parquet log of scrape outcomes, one row per target per run.

pub mod scrapes;
pub mod state;
pub mod table_history;

pub use scrapes::ScrapeRow;
pub use state::ScrapeStatus;
pub use table_history::{HistoryRow, TableHistory};
