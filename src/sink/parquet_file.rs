use anyhow::{Context, Result};
use arrow::{
    array::{ArrayRef, Date32Array, StringArray},
    datatypes::{DataType as ArrowDataType, Field, Schema as ArrowSchema},
    record_batch::RecordBatch,
};
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Utc};
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::{
    fs::{self, File},
    io::BufWriter,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::info;

use super::{normalize_cell, partition_dir, remove_partition, Sink};
use crate::record::RecordSet;

/// Days from 0001-01-01 to 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Hive-partitioned Parquet output, one file per record set:
/// `<root>/<table>/date=YYYYMMDD/<source>---<ts>.parquet`.
pub struct ParquetSink {
    root: PathBuf,
    table: String,
}

impl ParquetSink {
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
impl Sink for ParquetSink {
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
        let path = tokio::task::spawn_blocking(move || write_record_set(&root, &table, &owned))
            .await
            .context("parquet writer task failed")??;
        info!(source = %set.source, rows = set.len(), file = %path.display(), "wrote parquet");
        Ok(set.len())
    }

    async fn purge(&self, date: NaiveDate) -> Result<()> {
        remove_partition(&self.root, &self.table, date)
    }
}

/// Every scraped column as nullable text, then the two tag columns.
pub fn record_set_schema(columns: &[String]) -> ArrowSchema {
    let mut fields: Vec<Field> = columns
        .iter()
        .map(|c| Field::new(c, ArrowDataType::Utf8, true))
        .collect();
    fields.push(Field::new("source", ArrowDataType::Utf8, false));
    fields.push(Field::new("scrape_date", ArrowDataType::Date32, false));
    ArrowSchema::new(fields)
}

pub fn to_record_batch(set: &RecordSet) -> Result<RecordBatch> {
    let schema = Arc::new(record_set_schema(&set.columns));
    let n = set.len();

    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(set.columns.len() + 2);
    for col in 0..set.columns.len() {
        let values: Vec<Option<String>> = set
            .rows
            .iter()
            .map(|row| row.get(col).and_then(|c| normalize_cell(c)))
            .collect();
        arrays.push(Arc::new(StringArray::from(values)));
    }
    arrays.push(Arc::new(StringArray::from(vec![set.source.as_str(); n])));
    arrays.push(Arc::new(Date32Array::from(vec![date32(set.scrape_date); n])));

    RecordBatch::try_new(schema, arrays)
        .with_context(|| format!("building record batch for {}", set.source))
}

/// Write to a `.tmp` file and rename into place.
pub fn write_record_set(root: &Path, table: &str, set: &RecordSet) -> Result<PathBuf> {
    let dir = partition_dir(root, table, set.scrape_date);
    fs::create_dir_all(&dir).with_context(|| format!("could not create `{}`", dir.display()))?;

    let ts = Utc::now().timestamp_micros();
    let fname = format!("{}---{}.parquet", set.source, ts);
    let tmp = dir.join(format!("{}.tmp", fname));
    let final_path = dir.join(&fname);

    let batch = to_record_batch(set)?;
    let file = File::create(&tmp)
        .with_context(|| format!("could not create temporary file `{}`", tmp.display()))?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(BufWriter::new(file), batch.schema(), Some(props))
        .context("creating ArrowWriter")?;
    writer.write(&batch).context("writing record batch")?;
    writer.close().context("closing ArrowWriter")?;

    fs::rename(&tmp, &final_path).with_context(|| {
        format!(
            "failed to rename `{}` to `{}`",
            tmp.display(),
            final_path.display()
        )
    })?;
    Ok(final_path)
}

/// Arrow `Date32`: days since 1970-01-01.
pub(crate) fn date32(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Array;
    use glob::glob;
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use tempfile::tempdir;

    fn sample(date: NaiveDate) -> RecordSet {
        RecordSet {
            source: "sv-151".to_string(),
            scrape_date: date,
            columns: vec!["Product Name".to_string(), "Market Price".to_string()],
            rows: vec![
                vec!["Pikachu ".to_string(), "$0.25".to_string()],
                vec!["Mew ex".to_string(), " ".to_string()],
            ],
        }
    }

    fn files(root: &Path) -> Vec<PathBuf> {
        glob(&format!("{}/**/*.parquet", root.display()))
            .unwrap()
            .filter_map(Result::ok)
            .collect()
    }

    #[test]
    fn epoch_is_day_zero() {
        assert_eq!(date32(NaiveDate::from_ymd_opt(1970, 1, 1).unwrap()), 0);
        assert_eq!(date32(NaiveDate::from_ymd_opt(1970, 1, 2).unwrap()), 1);
    }

    #[tokio::test]
    async fn append_writes_a_partitioned_file() {
        let tmp = tempdir().unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 11, 5).unwrap();
        let sink = ParquetSink::new(tmp.path(), "pokemon_prices").unwrap();

        assert_eq!(sink.append(&sample(date)).await.unwrap(), 2);

        let written = files(tmp.path());
        assert_eq!(written.len(), 1);
        assert!(written[0]
            .to_string_lossy()
            .contains("pokemon_prices/date=20241105/sv-151---"));

        let file = File::open(&written[0]).unwrap();
        let mut reader = ParquetRecordBatchReaderBuilder::try_new(file)
            .unwrap()
            .build()
            .unwrap();
        let batch = reader.next().unwrap().unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.num_columns(), 4);

        let names = batch
            .column(0)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(names.value(0), "Pikachu");
        let prices = batch
            .column(1)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert!(prices.is_null(1));
        let dates = batch
            .column(3)
            .as_any()
            .downcast_ref::<Date32Array>()
            .unwrap();
        assert_eq!(dates.value(0), date32(date));
    }

    #[tokio::test]
    async fn empty_sets_write_nothing() {
        let tmp = tempdir().unwrap();
        let sink = ParquetSink::new(tmp.path(), "pokemon_prices").unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 11, 5).unwrap();
        assert_eq!(sink.append(&RecordSet::empty("x", date)).await.unwrap(), 0);
        assert!(files(tmp.path()).is_empty());
    }

    #[tokio::test]
    async fn purge_drops_only_that_date() {
        let tmp = tempdir().unwrap();
        let sink = ParquetSink::new(tmp.path(), "pokemon_prices").unwrap();
        let d1 = NaiveDate::from_ymd_opt(2024, 11, 5).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2024, 11, 6).unwrap();
        sink.append(&sample(d1)).await.unwrap();
        sink.append(&sample(d2)).await.unwrap();

        sink.purge(d2).await.unwrap();
        let left = files(tmp.path());
        assert_eq!(left.len(), 1);
        assert!(left[0].to_string_lossy().contains("date=20241105"));

        // purging again is a no-op
        sink.purge(d2).await.unwrap();
    }
}
