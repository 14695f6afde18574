use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use tcgscraper::{
    config::Config,
    logging,
    page::open_browser,
    sets::{discover_set_names, write_set_list_if_not_shrunk},
};

/// Refresh the set list from the price-guide index page.
#[derive(Parser, Debug)]
struct Args {
    #[arg(long)]
    config: Option<PathBuf>,

    /// Where to write the list, overriding `discovery.output`
    #[arg(long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let args = Args::parse();
    let cfg = Config::load(args.config.as_deref())?;

    let index = cfg.index_url()?;
    let output = args.output.unwrap_or_else(|| cfg.discovery.output.clone());
    info!(index = %index, output = %output.display(), "discovering sets");

    let browser = open_browser(cfg.backend).await?;
    let names = discover_set_names(
        browser.as_ref(),
        &index,
        &cfg.discovery.item_selector,
        &cfg.retry.policy(),
    )
    .await?;

    let written = write_set_list_if_not_shrunk(&output, &names, cfg.discovery.shrink_tolerance)?;
    info!(sets = names.len(), written, "done");
    Ok(())
}
