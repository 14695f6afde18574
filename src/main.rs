use anyhow::{Context, Result};
use clap::Parser;
use std::{path::PathBuf, sync::Arc};
use tracing::{info, warn};

use tcgscraper::{
    config::{Config, Job},
    history::TableHistory,
    logging,
    page::open_browser,
    targets::load_targets,
    BatchRunner,
};

/// Scrape price-guide tables into date-partitioned files.
#[derive(Parser, Debug)]
struct Args {
    /// YAML configuration file; defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Which job to run
    #[arg(long, value_enum, default_value_t = Job::Cards)]
    job: Job,

    /// Target list, overriding the job's configured one
    #[arg(long)]
    targets: Option<PathBuf>,

    /// Only process the first N targets
    #[arg(long)]
    limit: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let args = Args::parse();

    // ─── 1) configuration and targets ────────────────────────────────
    let cfg = Config::load(args.config.as_deref())?;
    let job_cfg = cfg.job(args.job);
    let list = args.targets.clone().unwrap_or_else(|| job_cfg.targets.clone());
    let mut targets = load_targets(&list)?;
    if let Some(n) = args.limit {
        targets.truncate(n);
    }
    info!(
        job = args.job.as_str(),
        targets = targets.len(),
        list = %list.display(),
        backend = ?cfg.backend,
        "startup"
    );

    // ─── 2) page source, poller, sink ────────────────────────────────
    let browser = open_browser(cfg.backend).await?;
    let poller = Arc::new(cfg.poller_for(args.job)?);
    let sink = cfg.sink_for(args.job)?;
    let mut runner = BatchRunner::new(poller, browser, sink).with_concurrency(cfg.concurrency);

    let history = match &cfg.history_dir {
        Some(dir) => Some(TableHistory::new_scrapes(dir).context("opening scrape history")?),
        None => None,
    };
    if let Some(h) = &history {
        runner = runner.with_history(Arc::clone(h));
    }

    // ─── 3) drop today's earlier load, then scrape ───────────────────
    if cfg.sink.purge_today {
        runner.purge_today().await?;
    }
    let summary = runner.run(targets).await;

    // ─── 4) compact the history log ──────────────────────────────────
    if let Some(h) = history {
        if let Err(e) = tokio::task::spawn_blocking(move || h.vacuum()).await? {
            warn!("history vacuum failed: {:#}", e);
        }
    }

    info!(summary = %serde_json::to_string(&summary)?, "all done");
    Ok(())
}
