//! Row-count survey: observe each target's settled table size over several
//! rounds. The output is what the expected-count lists are built from.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};
use tracing::{info, warn};

use crate::page::Browser;
use crate::poll::TablePoller;
use crate::targets::Target;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowCount {
    pub url: String,
    pub row_count: usize,
}

/// `rounds` passes over `targets`, one observation per target per pass.
/// A target whose table never settles is recorded with a count of 0.
pub async fn survey_row_counts(
    poller: &TablePoller,
    browser: &dyn Browser,
    targets: &[Target],
    rounds: u32,
) -> Vec<RowCount> {
    let mut counts = Vec::with_capacity(targets.len() * rounds as usize);
    for round in 1..=rounds {
        for target in targets {
            let url = match target.url(poller.base_url()) {
                Ok(u) => u.to_string(),
                Err(e) => {
                    warn!(source = %target.source(), "skipping target: {:#}", e);
                    continue;
                }
            };
            let row_count = match poller.observe_row_count(target, browser).await {
                Some(n) => n,
                None => {
                    warn!(round, url = %url, "row count unavailable");
                    0
                }
            };
            info!(round, url = %url, row_count, "counted");
            counts.push(RowCount { url, row_count });
        }
    }
    counts
}

/// Write `url,row_count` rows with a header.
pub fn write_row_counts(path: &Path, counts: &[RowCount]) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("could not create `{}`", dir.display()))?;
    }
    let mut wtr =
        csv::Writer::from_path(path).with_context(|| format!("creating `{}`", path.display()))?;
    for c in counts {
        wtr.serialize(c)?;
    }
    wtr.flush()
        .with_context(|| format!("flushing `{}`", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locate;
    use crate::page::fixture::{card_table, Script, ScriptedBrowser};
    use crate::poll::{RetryPolicy, Stability};
    use std::time::Duration;
    use tempfile::tempdir;
    use url::Url;

    fn poller() -> TablePoller {
        TablePoller::new(
            Url::parse("https://example.test/price-guides/").unwrap(),
            locate::from_selectors(&[]),
        )
        .with_policy(RetryPolicy::new(1, Duration::ZERO))
        .with_stability(Stability {
            checks: 2,
            interval: Duration::ZERO,
            max_checks: 5,
        })
    }

    #[tokio::test]
    async fn every_round_counts_every_target() {
        let browser = ScriptedBrowser::new(vec![
            Script::Tables(vec![card_table(12)]),
            Script::FailNavigation,
            Script::Tables(vec![card_table(3), card_table(12)]),
        ]);
        let targets = vec![Target::new("sv-151", None), Target::new("base-set", None)];

        let counts = survey_row_counts(&poller(), &browser, &targets, 2).await;
        assert_eq!(
            counts,
            vec![
                RowCount {
                    url: "https://example.test/price-guides/sv-151".to_string(),
                    row_count: 12
                },
                RowCount {
                    url: "https://example.test/price-guides/base-set".to_string(),
                    row_count: 0
                },
                RowCount {
                    url: "https://example.test/price-guides/sv-151".to_string(),
                    row_count: 12
                },
                RowCount {
                    url: "https://example.test/price-guides/base-set".to_string(),
                    row_count: 12
                },
            ]
        );
    }

    #[test]
    fn csv_has_url_and_count_columns() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("row_counts.csv");
        write_row_counts(
            &path,
            &[RowCount {
                url: "https://example.test/price-guides/sv-151".to_string(),
                row_count: 207,
            }],
        )
        .unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "url,row_count\nhttps://example.test/price-guides/sv-151,207\n"
        );
    }
}
