//! Run configuration.
//!
//! Loaded once from YAML (every field defaulted, so an empty file is valid),
//! then patched from `TCG_*` environment variables. Sinks and pollers are
//! built from it; nothing reads configuration globally.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use url::Url;

use crate::locate;
use crate::poll::{RetryPolicy, Stability, TablePoller};
use crate::record::RowFilter;
use crate::sink::{CsvSink, ParquetSink, Sink};

pub const DEFAULT_BASE_URL: &str =
    "https://www.tcgplayer.com/categories/trading-and-collectible-card-games/pokemon/price-guides/";

pub const ENV_BASE_URL: &str = "TCG_BASE_URL";
pub const ENV_OUTPUT_DIR: &str = "TCG_OUTPUT_DIR";

/// Which page source to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Plain HTTP GET plus HTML parsing
    #[default]
    Http,
    /// Headless Chromium; needs the `chromium` feature
    Chromium,
}

/// The two scraping jobs a run can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Job {
    /// Per-set card price tables
    Cards,
    /// Booster-pack rows from the sealed-product tables
    Packs,
}

impl Job {
    pub fn as_str(&self) -> &'static str {
        match self {
            Job::Cards => "cards",
            Job::Packs => "packs",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_secs: u64,
    pub navigation_timeout_secs: u64,
    pub quiescent_timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_secs: 5,
            navigation_timeout_secs: 180,
            quiescent_timeout_secs: 30,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_secs(self.backoff_secs)).with_timeouts(
            Duration::from_secs(self.navigation_timeout_secs),
            Duration::from_secs(self.quiescent_timeout_secs),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilityConfig {
    pub checks: u32,
    pub interval_ms: u64,
    pub max_checks: u32,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            checks: 3,
            interval_ms: 1000,
            max_checks: 30,
        }
    }
}

impl StabilityConfig {
    pub fn stability(&self) -> Stability {
        Stability {
            checks: self.checks,
            interval: Duration::from_millis(self.interval_ms),
            max_checks: self.max_checks,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    #[default]
    Parquet,
    Csv,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub kind: SinkKind,
    pub output_dir: PathBuf,
    /// Drop today's partition before loading
    pub purge_today: bool,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            kind: SinkKind::Parquet,
            output_dir: PathBuf::from("data"),
            purge_today: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterConfig {
    pub column: String,
    pub pattern: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobConfig {
    /// CSV with a `set` column and an optional `cards` column
    pub targets: PathBuf,
    /// Sink table name
    pub table: String,
    /// Tried in order; the first that yields rows wins
    pub table_selectors: Vec<String>,
    /// Column allowlist; empty keeps every column
    pub columns: Vec<String>,
    pub filter: Option<FilterConfig>,
}

impl JobConfig {
    fn cards() -> Self {
        Self {
            targets: PathBuf::from("data/card_set_dictionary.csv"),
            table: "pokemon_prices".to_string(),
            table_selectors: vec!["table tr".to_string()],
            columns: Vec::new(),
            filter: None,
        }
    }

    fn packs() -> Self {
        Self {
            targets: PathBuf::from("data/pack_set_dictionary.csv"),
            table: "pokemon_packs".to_string(),
            table_selectors: vec!["[class*='table'] tr".to_string(), "table tr".to_string()],
            columns: vec!["Product Name".to_string(), "Market Price".to_string()],
            filter: Some(FilterConfig {
                column: "Product Name".to_string(),
                pattern: r"(?i)booster\s*pack".to_string(),
            }),
        }
    }
}

/// Keys given for one job in the file. Anything absent keeps that job's
/// built-in value; `filter: null` turns the row filter off.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct JobOverrides {
    targets: Option<PathBuf>,
    table: Option<String>,
    table_selectors: Option<Vec<String>>,
    columns: Option<Vec<String>>,
    #[serde(deserialize_with = "present")]
    filter: Option<Option<FilterConfig>>,
}

fn present<'de, D>(d: D) -> std::result::Result<Option<Option<FilterConfig>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<FilterConfig>::deserialize(d).map(Some)
}

impl JobOverrides {
    fn over(self, mut base: JobConfig) -> JobConfig {
        if let Some(v) = self.targets {
            base.targets = v;
        }
        if let Some(v) = self.table {
            base.table = v;
        }
        if let Some(v) = self.table_selectors {
            base.table_selectors = v;
        }
        if let Some(v) = self.columns {
            base.columns = v;
        }
        if let Some(v) = self.filter {
            base.filter = v;
        }
        base
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobsConfig {
    pub cards: JobConfig,
    pub packs: JobConfig,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            cards: JobConfig::cards(),
            packs: JobConfig::packs(),
        }
    }
}

impl<'de> Deserialize<'de> for JobsConfig {
    fn deserialize<D>(d: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Default, Deserialize)]
        #[serde(default)]
        struct Raw {
            cards: JobOverrides,
            packs: JobOverrides,
        }
        let raw = Raw::deserialize(d)?;
        Ok(Self {
            cards: raw.cards.over(JobConfig::cards()),
            packs: raw.packs.over(JobConfig::packs()),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Page listing every set. Defaults to the base URL.
    pub index_url: Option<String>,
    pub item_selector: String,
    pub output: PathBuf,
    /// How many entries the new list may lose before it is rejected
    pub shrink_tolerance: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            index_url: None,
            item_selector: ".tcg-base-dropdown__item-content".to_string(),
            output: PathBuf::from("data/sets.csv"),
            shrink_tolerance: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SurveyConfig {
    pub rounds: u32,
    pub output: PathBuf,
}

impl Default for SurveyConfig {
    fn default() -> Self {
        Self {
            rounds: 5,
            output: PathBuf::from("row_counts.csv"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub backend: Backend,
    pub retry: RetryConfig,
    pub stability: StabilityConfig,
    /// Number of targets polled at once; 1 is sequential
    pub concurrency: usize,
    pub sink: SinkConfig,
    /// Scrape outcome log; `None` disables it
    pub history_dir: Option<PathBuf>,
    pub jobs: JobsConfig,
    pub discovery: DiscoveryConfig,
    pub survey: SurveyConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            backend: Backend::default(),
            retry: RetryConfig::default(),
            stability: StabilityConfig::default(),
            concurrency: 1,
            sink: SinkConfig::default(),
            history_dir: Some(PathBuf::from("history")),
            jobs: JobsConfig::default(),
            discovery: DiscoveryConfig::default(),
            survey: SurveyConfig::default(),
        }
    }
}

impl Config {
    /// Read `path` (or use defaults when `None`), apply environment overrides
    /// and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg = match path {
            Some(p) => {
                let text = fs::read_to_string(p)
                    .with_context(|| format!("reading config `{}`", p.display()))?;
                Self::from_yaml(&text).with_context(|| format!("parsing `{}`", p.display()))?
            }
            None => Self::default(),
        };
        cfg.apply_env_with(|k| std::env::var(k).ok());
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        // an empty document deserializes to unit, not to an empty map
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn apply_env_with<F>(&mut self, get: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = get(ENV_BASE_URL).filter(|v| !v.trim().is_empty()) {
            self.base_url = url;
        }
        if let Some(dir) = get(ENV_OUTPUT_DIR).filter(|v| !v.trim().is_empty()) {
            self.sink.output_dir = PathBuf::from(dir);
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.base_url()?;
        if self.concurrency == 0 {
            bail!("concurrency must be at least 1");
        }
        if self.retry.max_attempts == 0 {
            bail!("retry.max_attempts must be at least 1");
        }
        if self.stability.checks == 0 {
            bail!("stability.checks must be at least 1");
        }
        for job in [Job::Cards, Job::Packs] {
            let jc = self.job(job);
            if jc.table.trim().is_empty() {
                bail!("jobs.{}.table is empty", job.as_str());
            }
            if let Some(f) = &jc.filter {
                RowFilter::new(&f.column, &f.pattern)
                    .with_context(|| format!("jobs.{}.filter", job.as_str()))?;
            }
        }
        Ok(())
    }

    pub fn base_url(&self) -> Result<Url> {
        Url::parse(&self.base_url).with_context(|| format!("invalid base_url `{}`", self.base_url))
    }

    pub fn index_url(&self) -> Result<Url> {
        match &self.discovery.index_url {
            Some(u) => Url::parse(u).with_context(|| format!("invalid discovery.index_url `{}`", u)),
            None => self.base_url(),
        }
    }

    pub fn job(&self, job: Job) -> &JobConfig {
        match job {
            Job::Cards => &self.jobs.cards,
            Job::Packs => &self.jobs.packs,
        }
    }

    pub fn poller_for(&self, job: Job) -> Result<TablePoller> {
        let jc = self.job(job);
        let filter = jc
            .filter
            .as_ref()
            .map(|f| RowFilter::new(&f.column, &f.pattern))
            .transpose()?;
        Ok(
            TablePoller::new(self.base_url()?, locate::from_selectors(&jc.table_selectors))
                .with_policy(self.retry.policy())
                .with_stability(self.stability.stability())
                .with_columns(jc.columns.clone())
                .with_filter(filter),
        )
    }

    pub fn sink_for(&self, job: Job) -> Result<Arc<dyn Sink>> {
        let table = &self.job(job).table;
        let root = &self.sink.output_dir;
        Ok(match self.sink.kind {
            SinkKind::Parquet => Arc::new(ParquetSink::new(root, table)?),
            SinkKind::Csv => Arc::new(CsvSink::new(root, table)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn empty_document_is_all_defaults() {
        let cfg = Config::from_yaml("").unwrap();
        assert_eq!(cfg.base_url, DEFAULT_BASE_URL);
        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(cfg.retry.backoff_secs, 5);
        assert_eq!(cfg.retry.navigation_timeout_secs, 180);
        assert_eq!(cfg.stability.checks, 3);
        assert_eq!(cfg.concurrency, 1);
        assert_eq!(cfg.backend, Backend::Http);
        assert_eq!(cfg.jobs.packs.columns, vec!["Product Name", "Market Price"]);
        cfg.validate().unwrap();
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let cfg = Config::from_yaml(
            r##"
concurrency: 5
backend: chromium
retry:
  max_attempts: 4
sink:
  kind: csv
jobs:
  cards:
    table_selectors: ["#priceTable tr", "table tr"]
"##,
        )
        .unwrap();
        assert_eq!(cfg.concurrency, 5);
        assert_eq!(cfg.backend, Backend::Chromium);
        assert_eq!(cfg.retry.max_attempts, 4);
        assert_eq!(cfg.retry.backoff_secs, 5);
        assert_eq!(cfg.sink.kind, SinkKind::Csv);
        assert!(cfg.sink.purge_today);
        assert_eq!(cfg.jobs.cards.table_selectors.len(), 2);
        assert_eq!(cfg.jobs.cards.table, "pokemon_prices");
        assert!(cfg.jobs.packs.filter.is_some());
    }

    #[test]
    fn partial_job_block_keeps_that_jobs_defaults() {
        let cfg = Config::from_yaml("jobs:\n  packs:\n    table_selectors: [\".sealed tr\"]\n").unwrap();
        let packs = &cfg.jobs.packs;
        assert_eq!(packs.table_selectors, vec![".sealed tr"]);
        assert_eq!(packs.table, "pokemon_packs");
        assert_eq!(packs.targets, PathBuf::from("data/pack_set_dictionary.csv"));
        assert_eq!(packs.columns, vec!["Product Name", "Market Price"]);
        assert_eq!(
            packs.filter.as_ref().map(|f| f.column.as_str()),
            Some("Product Name")
        );
        assert_eq!(cfg.jobs.cards.table, "pokemon_prices");

        let cfg = Config::from_yaml("jobs:\n  packs:\n    filter: null\n").unwrap();
        assert!(cfg.jobs.packs.filter.is_none());
        assert_eq!(cfg.jobs.packs.table, "pokemon_packs");
    }

    #[test]
    fn env_overrides_win() {
        let vars: HashMap<&str, &str> = [
            (ENV_BASE_URL, "http://127.0.0.1:8080/guides/"),
            (ENV_OUTPUT_DIR, "/tmp/out"),
        ]
        .into_iter()
        .collect();
        let mut cfg = Config::default();
        cfg.apply_env_with(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.base_url, "http://127.0.0.1:8080/guides/");
        assert_eq!(cfg.sink.output_dir, PathBuf::from("/tmp/out"));

        let mut untouched = Config::default();
        untouched.apply_env_with(|_| Some("  ".to_string()));
        assert_eq!(untouched.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut cfg = Config::default();
        cfg.concurrency = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.base_url = "not a url".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.jobs.packs.filter = Some(FilterConfig {
            column: "Product Name".to_string(),
            pattern: "(unclosed".to_string(),
        });
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_reads_file() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("scraper.yaml");
        fs::write(&path, "survey:\n  rounds: 2\n").unwrap();
        let cfg = Config::load(Some(&path)).unwrap();
        assert_eq!(cfg.survey.rounds, 2);
        assert!(Config::load(Some(&tmp.path().join("missing.yaml"))).is_err());
    }

    #[tokio::test]
    async fn builds_sink_for_job() {
        let tmp = tempdir().unwrap();
        let mut cfg = Config::default();
        cfg.sink.output_dir = tmp.path().to_path_buf();
        let sink = cfg.sink_for(Job::Packs).unwrap();
        assert_eq!(sink.name(), "pokemon_packs");
        assert!(tmp.path().join("pokemon_packs").is_dir());

        let poller = cfg.poller_for(Job::Cards).unwrap();
        assert_eq!(poller.policy().max_attempts, 3);
        assert_eq!(poller.base_url().as_str(), DEFAULT_BASE_URL);
    }
}
