use anyhow::Result;
use arrow::{
    array::{ArrayRef, Date32Array, StringArray, TimestampMicrosecondArray, UInt32Array, UInt64Array},
    datatypes::{DataType as ArrowDataType, Field, Schema as ArrowSchema, TimeUnit},
};
use chrono::{DateTime, NaiveDate, Utc};
use std::{path::PathBuf, sync::Arc};

use crate::history::state::ScrapeStatus;
use crate::history::table_history::{HistoryRow, TableHistory};
use crate::sink::parquet_file::date32;

pub struct ScrapeRow {
    pub source: String,
    pub scrape_date: NaiveDate,
    pub attempts: u32,
    pub rows: u64,
    pub status: ScrapeStatus,
    pub recorded_at: DateTime<Utc>,
}

impl HistoryRow for ScrapeRow {
    const KEY_COLUMN: usize = 0;
    const TIME_COLUMN: usize = 5;

    fn partition_date(&self) -> NaiveDate {
        self.scrape_date
    }

    fn schema() -> ArrowSchema {
        ArrowSchema::new(vec![
            Field::new("source", ArrowDataType::Utf8, false),
            Field::new("scrape_date", ArrowDataType::Date32, false),
            Field::new("attempts", ArrowDataType::UInt32, false),
            Field::new("rows", ArrowDataType::UInt64, false),
            Field::new("status", ArrowDataType::Utf8, false),
            Field::new(
                "recorded_at",
                ArrowDataType::Timestamp(TimeUnit::Microsecond, None),
                false,
            ),
        ])
    }

    fn to_arrays(&self) -> Vec<ArrayRef> {
        vec![
            Arc::new(StringArray::from(vec![self.source.clone()])),
            Arc::new(Date32Array::from(vec![date32(self.scrape_date)])),
            Arc::new(UInt32Array::from(vec![self.attempts])),
            Arc::new(UInt64Array::from(vec![self.rows])),
            Arc::new(StringArray::from(vec![self.status.as_str()])),
            Arc::new(TimestampMicrosecondArray::from(vec![self
                .recorded_at
                .timestamp_micros()])),
        ]
    }

    fn unique_key(&self) -> String {
        format!("{}--{}", self.source, self.recorded_at.timestamp_micros())
    }
}

impl TableHistory<ScrapeRow> {
    pub fn new_scrapes(base: impl Into<PathBuf>) -> Result<Arc<Self>> {
        TableHistory::new(base, "scrapes")
    }
}
