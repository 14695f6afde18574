use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::info;

use super::{normalize_cell, partition_dir, remove_partition, Sink};
use crate::record::RecordSet;

/// Plain CSV output for local runs: `<root>/<table>/date=YYYYMMDD/<source>.csv`.
/// A rerun for the same source and day replaces the file.
pub struct CsvSink {
    root: PathBuf,
    table: String,
}

impl CsvSink {
    pub fn new(root: impl Into<PathBuf>, table: &str) -> Result<Self> {
        let root = root.into();
        let table_dir = root.join(table);
        fs::create_dir_all(&table_dir)
            .with_context(|| format!("could not create `{}`", table_dir.display()))?;
        Ok(Self {
            root,
            table: table.to_string(),
        })
    }
}

#[async_trait]
impl Sink for CsvSink {
    fn name(&self) -> &str {
        &self.table
    }

    async fn append(&self, set: &RecordSet) -> Result<usize> {
        if set.is_empty() {
            return Ok(0);
        }
        let root = self.root.clone();
        let table = self.table.clone();
        let owned = set.clone();
        let path = tokio::task::spawn_blocking(move || write_csv(&root, &table, &owned))
            .await
            .context("csv writer task failed")??;
        info!(source = %set.source, rows = set.len(), file = %path.display(), "wrote csv");
        Ok(set.len())
    }

    async fn purge(&self, date: NaiveDate) -> Result<()> {
        remove_partition(&self.root, &self.table, date)
    }
}

fn write_csv(root: &Path, table: &str, set: &RecordSet) -> Result<PathBuf> {
    let dir = partition_dir(root, table, set.scrape_date);
    fs::create_dir_all(&dir).with_context(|| format!("could not create `{}`", dir.display()))?;
    let final_path = dir.join(format!("{}.csv", set.source));
    let tmp = dir.join(format!("{}.csv.tmp", set.source));

    let mut wtr = csv::Writer::from_path(&tmp)
        .with_context(|| format!("creating `{}`", tmp.display()))?;

    let mut header: Vec<&str> = set.columns.iter().map(String::as_str).collect();
    header.extend(["source", "scrape_date"]);
    wtr.write_record(&header)?;

    let date = set.scrape_date.format("%Y-%m-%d").to_string();
    for row in &set.rows {
        let mut record: Vec<String> = (0..set.columns.len())
            .map(|i| row.get(i).and_then(|c| normalize_cell(c)).unwrap_or_default())
            .collect();
        record.push(set.source.clone());
        record.push(date.clone());
        wtr.write_record(&record)?;
    }
    wtr.flush()
        .with_context(|| format!("flushing `{}`", tmp.display()))?;
    drop(wtr);

    fs::rename(&tmp, &final_path).with_context(|| {
        format!(
            "failed to rename `{}` to `{}`",
            tmp.display(),
            final_path.display()
        )
    })?;
    Ok(final_path)
}
