//! Drives the poller over a target list and feeds the sink.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tracing::{error, info, instrument, warn};

use crate::history::{ScrapeRow, ScrapeStatus, TableHistory};
use crate::page::Browser;
use crate::poll::{PollReport, TablePoller};
use crate::sink::Sink;
use crate::targets::Target;

/// Per-run outcome counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub targets: usize,
    pub scraped: usize,
    /// Sources that produced no rows after every attempt
    pub empty: Vec<String>,
    pub rows: usize,
    pub rows_written: usize,
    /// Sources whose rows the sink refused
    pub sink_failures: Vec<String>,
}

pub struct BatchRunner {
    poller: Arc<TablePoller>,
    browser: Arc<dyn Browser>,
    sink: Arc<dyn Sink>,
    concurrency: usize,
    history: Option<Arc<TableHistory<ScrapeRow>>>,
}

impl BatchRunner {
    pub fn new(poller: Arc<TablePoller>, browser: Arc<dyn Browser>, sink: Arc<dyn Sink>) -> Self {
        Self {
            poller,
            browser,
            sink,
            concurrency: 1,
            history: None,
        }
    }

    /// Polls in flight at once. Values below 1 mean sequential.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_history(mut self, history: Arc<TableHistory<ScrapeRow>>) -> Self {
        self.history = Some(history);
        self
    }

    /// Drop whatever the sink already holds for today, so a rerun does not
    /// duplicate rows.
    pub async fn purge_today(&self) -> Result<()> {
        let today = self.poller.today();
        info!(sink = %self.sink.name(), date = %today, "purging today's rows");
        self.sink
            .purge(today)
            .await
            .with_context(|| format!("purging {} for {}", self.sink.name(), today))
    }

    /// Poll every target and hand non-empty record sets to the sink. Empty
    /// targets and sink failures are logged and counted; the batch always
    /// runs to the end.
    #[instrument(level = "info", skip_all, fields(sink = %self.sink.name(), targets = targets.len()))]
    pub async fn run(&self, targets: Vec<Target>) -> BatchSummary {
        let mut summary = BatchSummary {
            targets: targets.len(),
            ..Default::default()
        };
        if targets.is_empty() {
            info!("no targets");
            return summary;
        }

        // sized so a finished poll never waits on the receiver while holding a permit
        let (tx, mut rx) = mpsc::channel::<(Target, PollReport)>(targets.len());
        let sem = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(targets.len());

        let producer = {
            let poller = Arc::clone(&self.poller);
            let browser = Arc::clone(&self.browser);
            async move {
                for target in targets {
                    let permit = match Arc::clone(&sem).acquire_owned().await {
                        Ok(p) => p,
                        Err(_) => break,
                    };
                    let poller = Arc::clone(&poller);
                    let browser = Arc::clone(&browser);
                    let tx = tx.clone();
                    handles.push(tokio::spawn(async move {
                        let _permit = permit;
                        let report = poller.poll_with_report(&target, browser.as_ref()).await;
                        let _ = tx.send((target, report)).await;
                    }));
                }
                // the receiver ends once every task has dropped its sender
                drop(tx);
                handles
            }
        };

        let consumer = async {
            while let Some((target, report)) = rx.recv().await {
                self.record(&mut summary, &target, report).await;
            }
        };

        let (handles, ()) = tokio::join!(producer, consumer);
        for h in handles {
            if let Err(e) = h.await {
                error!("poll task failed: {}", e);
            }
        }

        info!(
            scraped = summary.scraped,
            empty = summary.empty.len(),
            rows = summary.rows,
            rows_written = summary.rows_written,
            "batch finished"
        );
        if !summary.empty.is_empty() {
            warn!(sources = ?summary.empty, "targets with no data");
        }
        summary
    }

    async fn record(&self, summary: &mut BatchSummary, target: &Target, report: PollReport) {
        let source = target.source().to_string();
        let set = &report.record_set;

        let status = if set.is_empty() {
            warn!(source = %source, attempts = report.attempts, "no rows; target skipped");
            summary.empty.push(source.clone());
            ScrapeStatus::Empty
        } else {
            summary.scraped += 1;
            summary.rows += set.len();
            match self.sink.append(set).await {
                Ok(n) => {
                    summary.rows_written += n;
                    ScrapeStatus::Scraped
                }
                Err(e) => {
                    error!(source = %source, sink = %self.sink.name(), "sink append failed: {:#}", e);
                    summary.sink_failures.push(source.clone());
                    ScrapeStatus::SinkFailed
                }
            }
        };

        if let Some(history) = &self.history {
            let row = ScrapeRow {
                source,
                scrape_date: set.scrape_date,
                attempts: report.attempts,
                rows: set.len() as u64,
                status,
                recorded_at: Utc::now(),
            };
            let history = Arc::clone(history);
            match tokio::task::spawn_blocking(move || history.add(&row)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("history write failed: {:#}", e),
                Err(e) => warn!("history task failed: {}", e),
            }
        }
    }
}
