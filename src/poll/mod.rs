//! Table-ready poller.
//!
//! Loads a price-guide page, waits until its table's row count is acceptable,
//! and reads the table into a [`RecordSet`]. Failed or mismatched attempts
//! are retried under a [`RetryPolicy`]; when attempts run out the result is an
//! empty record set, never an error.

pub mod clock;
pub mod policy;

pub use clock::{Clock, LocalClock};
pub use policy::{Acceptance, Observation, RetryPolicy, Stability, StabilityTracker};

use anyhow::Context;
use chrono::NaiveDate;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::locate::TableLocator;
use crate::page::{Browser, PageHandle, RowHandle};
use crate::record::{ColumnMap, RecordSet, RowFilter};
use crate::targets::Target;

/// Why a loaded table was not accepted. Always retried.
#[derive(Debug, thiserror::Error)]
pub enum Mismatch {
    #[error("found {observed} rows, expected {expected} including header")]
    RowCount { expected: usize, observed: usize },
    #[error("table has no rows")]
    EmptyTable,
    #[error("row count still changing after {checks} checks")]
    Unsettled { checks: u32 },
    #[error("none of {wanted:?} in header {headers:?}")]
    NoColumns {
        wanted: Vec<String>,
        headers: Vec<String>,
    },
    #[error("row {row} has {cells} cells, column index {needed} required")]
    ShortRow {
        row: usize,
        cells: usize,
        needed: usize,
    },
    #[error("filter column `{0}` not among scraped columns")]
    FilterColumnMissing(String),
    #[error("no rows matched the row filter")]
    NothingMatched,
}

#[derive(Debug, thiserror::Error)]
enum AttemptError {
    #[error(transparent)]
    Mismatch(#[from] Mismatch),
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// Result of one poll, with the number of attempts it took.
#[derive(Debug, Clone)]
pub struct PollReport {
    pub record_set: RecordSet,
    pub attempts: u32,
}

pub struct TablePoller {
    base_url: Url,
    locator: Box<dyn TableLocator>,
    policy: RetryPolicy,
    stability: Stability,
    columns: Vec<String>,
    filter: Option<RowFilter>,
    clock: Arc<dyn Clock>,
}

impl TablePoller {
    pub fn new(base_url: Url, locator: Box<dyn TableLocator>) -> Self {
        Self {
            base_url,
            locator,
            policy: RetryPolicy::default(),
            stability: Stability::default(),
            columns: Vec::new(),
            filter: None,
            clock: Arc::new(LocalClock),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_stability(mut self, stability: Stability) -> Self {
        self.stability = stability;
        self
    }

    /// Column allowlist. Empty keeps every header.
    pub fn with_columns(mut self, columns: Vec<String>) -> Self {
        self.columns = columns;
        self
    }

    pub fn with_filter(mut self, filter: Option<RowFilter>) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Today's date by the poller's clock; the date a scrape started now would carry.
    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    pub async fn poll(&self, target: &Target, browser: &dyn Browser) -> RecordSet {
        self.poll_with_report(target, browser).await.record_set
    }

    #[instrument(level = "info", skip(self, target, browser), fields(source = %target.source()))]
    pub async fn poll_with_report(&self, target: &Target, browser: &dyn Browser) -> PollReport {
        let url = match target.url(&self.base_url) {
            Ok(u) => u,
            Err(e) => {
                warn!("cannot build URL: {:#}", e);
                return PollReport {
                    record_set: RecordSet::empty(target.source(), self.clock.today()),
                    attempts: 0,
                };
            }
        };
        let acceptance = Acceptance::for_target(target, &self.stability);
        let max = self.policy.max_attempts;

        for attempt in 1..=max {
            match self.attempt(browser, url.as_str(), target, &acceptance).await {
                Ok(record_set) => {
                    info!(attempt, rows = record_set.len(), "table scraped");
                    return PollReport {
                        record_set,
                        attempts: attempt,
                    };
                }
                Err(AttemptError::Mismatch(m)) => {
                    warn!(attempt, url = %url, "table not ready: {}", m)
                }
                Err(AttemptError::Failed(e)) => warn!(attempt, url = %url, "attempt failed: {:#}", e),
            }
            if attempt < max {
                sleep(self.policy.backoff).await;
            }
        }

        warn!(attempts = max, url = %url, "giving up; target contributes no rows");
        PollReport {
            record_set: RecordSet::empty(target.source(), self.clock.today()),
            attempts: max,
        }
    }

    /// Count the table's data rows once it settles, ignoring any expected
    /// count. Used to build the expected-count list.
    pub async fn observe_row_count(&self, target: &Target, browser: &dyn Browser) -> Option<usize> {
        let url = target.url(&self.base_url).ok()?;
        for attempt in 1..=self.policy.max_attempts {
            match self.count_attempt(browser, url.as_str()).await {
                Ok(rows) => return Some(rows),
                Err(e) => debug!(attempt, source = %target.source(), "count failed: {}", e),
            }
            if attempt < self.policy.max_attempts {
                sleep(self.policy.backoff).await;
            }
        }
        None
    }

    async fn attempt(
        &self,
        browser: &dyn Browser,
        url: &str,
        target: &Target,
        acceptance: &Acceptance,
    ) -> Result<RecordSet, AttemptError> {
        let mut page = browser.new_page().await.context("opening page")?;
        let outcome = self.read_table(&mut *page, url, target, acceptance).await;
        close_page(page).await;
        outcome
    }

    async fn count_attempt(&self, browser: &dyn Browser, url: &str) -> Result<usize, AttemptError> {
        let mut page = browser.new_page().await.context("opening page")?;
        let outcome = match self.load(&mut *page, url).await {
            Ok(()) => self.await_stable_rows(&mut *page, &self.stability).await,
            Err(e) => Err(e),
        };
        close_page(page).await;
        outcome.map(|rows| rows.len().saturating_sub(1))
    }

    async fn read_table(
        &self,
        page: &mut dyn PageHandle,
        url: &str,
        target: &Target,
        acceptance: &Acceptance,
    ) -> Result<RecordSet, AttemptError> {
        self.load(page, url).await?;
        let rows = match acceptance {
            Acceptance::Exact { expected_rows } => {
                let rows = self.locator.locate(page).await?;
                let expected = Acceptance::exact_row_count(*expected_rows);
                if rows.len() != expected {
                    return Err(Mismatch::RowCount {
                        expected,
                        observed: rows.len(),
                    }
                    .into());
                }
                rows
            }
            Acceptance::Stable(stability) => self.await_stable_rows(page, stability).await?,
        };
        debug!(rows = rows.len(), "row count accepted");
        self.extract(page, &rows, target).await
    }

    async fn load(&self, page: &mut dyn PageHandle, url: &str) -> Result<(), AttemptError> {
        page.navigate(url, self.policy.navigation_timeout)
            .await
            .with_context(|| format!("navigating to {}", url))?;
        page.wait_quiescent(self.policy.quiescent_timeout)
            .await
            .context("waiting for page to settle")?;
        Ok(())
    }

    async fn await_stable_rows(
        &self,
        page: &mut dyn PageHandle,
        stability: &Stability,
    ) -> Result<Vec<RowHandle>, AttemptError> {
        let mut tracker = StabilityTracker::new(stability.checks);
        for check in 1..=stability.max_checks.max(1) {
            let rows = self.locator.locate(page).await?;
            match tracker.observe(rows.len()) {
                Observation::Stable(0) => return Err(Mismatch::EmptyTable.into()),
                Observation::Stable(_) => return Ok(rows),
                Observation::Pending => {
                    debug!(check, rows = rows.len(), "row count not settled")
                }
            }
            sleep(stability.interval).await;
        }
        Err(Mismatch::Unsettled {
            checks: stability.max_checks,
        }
        .into())
    }

    async fn extract(
        &self,
        page: &mut dyn PageHandle,
        rows: &[RowHandle],
        target: &Target,
    ) -> Result<RecordSet, AttemptError> {
        let Some((header_row, data_rows)) = rows.split_first() else {
            return Err(Mismatch::EmptyTable.into());
        };

        let headers = read_cells(page, *header_row).await?;
        let map = ColumnMap::resolve(&headers, &self.columns);
        if map.is_empty() {
            return Err(Mismatch::NoColumns {
                wanted: self.columns.clone(),
                headers,
            }
            .into());
        }
        let missing = map.missing(&self.columns);
        if !missing.is_empty() {
            debug!(?missing, "columns absent from page; dropped");
        }

        let mut out = Vec::with_capacity(data_rows.len());
        for (i, row) in data_rows.iter().enumerate() {
            let cells = read_cells(page, *row).await?;
            let fields = map.project(&cells).ok_or_else(|| Mismatch::ShortRow {
                row: i + 1,
                cells: cells.len(),
                needed: map.indices().max().unwrap_or_default(),
            })?;
            out.push(fields);
        }

        if let Some(filter) = &self.filter {
            out = filter
                .apply(&map, out)
                .ok_or_else(|| Mismatch::FilterColumnMissing(filter.column.clone()))?;
            if out.is_empty() {
                return Err(Mismatch::NothingMatched.into());
            }
        }

        Ok(RecordSet {
            source: target.source().to_string(),
            scrape_date: self.clock.today(),
            columns: map.names(),
            rows: out,
        })
    }
}

// Every page is closed exactly once, here, whatever the attempt returned.
async fn close_page(page: Box<dyn PageHandle>) {
    if let Err(e) = page.close().await {
        warn!("closing page: {:#}", e);
    }
}

async fn read_cells(page: &dyn PageHandle, row: RowHandle) -> anyhow::Result<Vec<String>> {
    let count = page.cell_count(row).await?;
    let mut cells = Vec::with_capacity(count);
    for idx in 0..count {
        cells.push(page.cell_text(row, idx).await?);
    }
    Ok(cells)
}
