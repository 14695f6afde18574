use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use tcgscraper::{
    config::{Config, Job},
    logging,
    page::open_browser,
    survey::{survey_row_counts, write_row_counts},
    targets::load_targets,
};

/// Record each target's settled row count over several rounds.
#[derive(Parser, Debug)]
struct Args {
    #[arg(long)]
    config: Option<PathBuf>,

    /// Job whose target list and selectors are surveyed
    #[arg(long, value_enum, default_value_t = Job::Cards)]
    job: Job,

    #[arg(long)]
    rounds: Option<u32>,

    #[arg(long)]
    limit: Option<usize>,

    #[arg(long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let args = Args::parse();
    let cfg = Config::load(args.config.as_deref())?;

    let mut targets = load_targets(&cfg.job(args.job).targets)?;
    if let Some(n) = args.limit {
        targets.truncate(n);
    }
    let rounds = args.rounds.unwrap_or(cfg.survey.rounds);
    let output = args.output.unwrap_or_else(|| cfg.survey.output.clone());
    info!(targets = targets.len(), rounds, "surveying row counts");

    let browser = open_browser(cfg.backend).await?;
    let poller = cfg.poller_for(args.job)?;
    let counts = survey_row_counts(&poller, browser.as_ref(), &targets, rounds).await;

    write_row_counts(&output, &counts)?;
    info!(rows = counts.len(), output = %output.display(), "done");
    Ok(())
}
