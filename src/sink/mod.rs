//! Where accepted record sets go.
//!
//! Sinks own everything past extraction: trimming, typing, date
//! partitioning and same-day dedupe.

pub mod csv_file;
pub mod parquet_file;

pub use csv_file::CsvSink;
pub use parquet_file::ParquetSink;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::info;

use crate::record::RecordSet;

#[async_trait]
pub trait Sink: Send + Sync {
    fn name(&self) -> &str;

    /// Persist one record set, returning the number of rows written.
    async fn append(&self, set: &RecordSet) -> Result<usize>;

    /// Drop everything previously stored for `date`.
    async fn purge(&self, date: NaiveDate) -> Result<()>;
}

/// `<root>/<table>/date=YYYYMMDD`
pub fn partition_dir(root: &Path, table: &str, date: NaiveDate) -> PathBuf {
    root.join(table)
        .join(format!("date={}", date.format("%Y%m%d")))
}

/// Remove one date partition; a missing partition is fine.
pub(crate) fn remove_partition(root: &Path, table: &str, date: NaiveDate) -> Result<()> {
    let dir = partition_dir(root, table, date);
    if !dir.exists() {
        return Ok(());
    }
    fs::remove_dir_all(&dir).with_context(|| format!("removing partition {}", dir.display()))?;
    info!(partition = %dir.display(), "purged");
    Ok(())
}

/// Cells as stored: surrounding whitespace trimmed, blank cells become null.
pub(crate) fn normalize_cell(cell: &str) -> Option<String> {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
