use anyhow::{Context, Result};
use arrow::{
    array::{ArrayRef, StringArray, TimestampMicrosecondArray},
    datatypes::Schema as ArrowSchema,
    record_batch::RecordBatch,
};
use chrono::{NaiveDate, Utc};
use glob::glob;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use std::{
    collections::HashSet,
    fs::{self, File},
    io::BufWriter,
    marker::PhantomData,
    path::PathBuf,
    sync::{Arc, Mutex},
};
use tracing::warn;

/// A row type that can live in a [`TableHistory`].
pub trait HistoryRow: Sized {
    /// Column index of the string key in the schema
    const KEY_COLUMN: usize;
    /// Column index of the microsecond timestamp in the schema
    const TIME_COLUMN: usize;

    /// Date used for the `date=YYYYMMDD` partition
    fn partition_date(&self) -> NaiveDate;
    fn schema() -> ArrowSchema;
    /// Single-row column arrays matching `schema()`
    fn to_arrays(&self) -> Vec<ArrayRef>;
    /// Dedupe key; must agree with `extract_key` for rows read back
    fn unique_key(&self) -> String;

    /// Rebuild the dedupe key from a stored row. `None` if the batch does not
    /// have the expected column types.
    fn extract_key(batch: &RecordBatch, row: usize) -> Option<String> {
        let key = batch
            .column(Self::KEY_COLUMN)
            .as_any()
            .downcast_ref::<StringArray>()?
            .value(row);
        let ts = batch
            .column(Self::TIME_COLUMN)
            .as_any()
            .downcast_ref::<TimestampMicrosecondArray>()?
            .value(row);
        Some(format!("{}--{}", key, ts))
    }
}

/// Hive-partitioned append-only Parquet table with in-memory dedupe.
pub struct TableHistory<R: HistoryRow> {
    base_dir: PathBuf,
    table: String,
    schema: Arc<ArrowSchema>,
    seen: Mutex<HashSet<String>>,
    _marker: PhantomData<R>,
}

impl<R: HistoryRow + Send + Sync + 'static> TableHistory<R> {
    /// Create the table directory if needed and load existing keys.
    pub fn new(base_dir: impl Into<PathBuf>, table: &str) -> Result<Arc<Self>> {
        let base_dir = base_dir.into();
        let table_dir = base_dir.join(table);
        fs::create_dir_all(&table_dir)
            .with_context(|| format!("could not create `{}`", table_dir.display()))?;

        let schema = Arc::new(R::schema());
        let mut seen_set = HashSet::new();

        for part in fs::read_dir(&table_dir)? {
            let part = part?;
            if !part.file_type()?.is_dir() {
                continue;
            }
            let part_dir = part.path();
            for entry in glob(&format!("{}/*.parquet", part_dir.display()))? {
                let path = entry?;
                let file = File::open(&path)
                    .with_context(|| format!("failed to open `{}`", path.display()))?;
                let mut reader = ParquetRecordBatchReaderBuilder::try_new(file)?
                    .with_batch_size(1024)
                    .build()?;
                while let Some(batch) = reader.next().transpose()? {
                    for i in 0..batch.num_rows() {
                        match R::extract_key(&batch, i) {
                            Some(key) => {
                                seen_set.insert(key);
                            }
                            None => {
                                warn!(file = %path.display(), "unexpected history schema; skipped");
                                break;
                            }
                        }
                    }
                }
            }
        }

        Ok(Arc::new(Self {
            base_dir,
            table: table.to_string(),
            schema,
            seen: Mutex::new(seen_set),
            _marker: PhantomData,
        }))
    }

    /// Append one row. Rows whose key is already present are skipped.
    pub fn add(&self, row: &R) -> Result<()> {
        let key = row.unique_key();
        {
            let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
            if !seen.insert(key.clone()) {
                return Ok(());
            }
        }

        let partition = format!("date={}", row.partition_date().format("%Y%m%d"));
        let dir = self.base_dir.join(&self.table).join(partition);
        fs::create_dir_all(&dir)?;

        let ts = Utc::now().timestamp_micros();
        let fname = format!("{}---{}.parquet", key, ts);
        let tmp = dir.join(format!("{}.tmp", fname));
        let final_path = dir.join(&fname);

        let file = File::create(&tmp)
            .with_context(|| format!("could not create `{}`", tmp.display()))?;
        let mut writer = ArrowWriter::try_new(BufWriter::new(file), self.schema.clone(), None)?;
        let batch = RecordBatch::try_new(self.schema.clone(), row.to_arrays())?;
        writer.write(&batch)?;
        writer.close()?;
        fs::rename(&tmp, &final_path)?;
        Ok(())
    }

    pub fn contains(&self, key: &str) -> bool {
        let seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        seen.contains(key)
    }

    /// Merge every partition's files into one `consolidated.parquet`.
    pub fn vacuum(&self) -> Result<()> {
        let table_dir = self.base_dir.join(&self.table);
        for part in fs::read_dir(&table_dir)? {
            let part = part?;
            if !part.file_type()?.is_dir() {
                continue;
            }
            let dir = part.path();

            let files = glob(&format!("{}/*.parquet", dir.display()))?
                .filter_map(Result::ok)
                .collect::<Vec<_>>();
            if files.len() < 2 {
                continue;
            }

            let tmp = dir.join("consolidated.parquet.tmp");
            let file = File::create(&tmp)?;
            let mut writer = ArrowWriter::try_new(BufWriter::new(file), self.schema.clone(), None)?;

            for p in &files {
                let f = File::open(p)?;
                let mut reader = ParquetRecordBatchReaderBuilder::try_new(f)?
                    .with_batch_size(1024)
                    .build()?;
                while let Some(batch) = reader.next().transpose()? {
                    writer.write(&batch)?;
                }
            }
            writer.close()?;
            let cons = dir.join("consolidated.parquet");
            fs::rename(&tmp, &cons)?;

            for p in files {
                if p.file_name().and_then(|n| n.to_str()) != Some("consolidated.parquet") {
                    fs::remove_file(&p)
                        .with_context(|| format!("failed to delete `{}`", p.display()))?;
                }
            }
        }
        Ok(())
    }
}
