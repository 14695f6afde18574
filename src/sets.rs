//! Set discovery: read set names off the price-guide index and keep
//! `sets.csv` current.

use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tokio::time::sleep;
use tracing::{info, warn};
use url::Url;

use crate::page::{Browser, PageHandle};
use crate::poll::RetryPolicy;

static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s]").expect("static regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));

/// URL suffix for a set's display name: lowercase, punctuation dropped,
/// whitespace runs collapsed, spaces turned into `-`.
pub fn slugify(name: &str) -> String {
    let lower = name.to_lowercase();
    let stripped = NON_WORD.replace_all(&lower, "");
    let collapsed = WHITESPACE.replace_all(&stripped, " ");
    collapsed.trim().replace(' ', "-")
}

/// Slugs of every element matching `item_selector` on the index page, in page
/// order. Retried under `policy`; an index with no items counts as a failure.
pub async fn discover_set_names(
    browser: &dyn Browser,
    index: &Url,
    item_selector: &str,
    policy: &RetryPolicy,
) -> Result<Vec<String>> {
    let mut last_err = None;
    for attempt in 1..=policy.max_attempts {
        let outcome = match browser.new_page().await.context("opening page") {
            Ok(mut page) => {
                let read = read_items(&mut *page, index.as_str(), item_selector, policy).await;
                if let Err(e) = page.close().await {
                    warn!("closing page failed: {:#}", e);
                }
                read
            }
            Err(e) => Err(e),
        };
        match outcome {
            Ok(names) => {
                info!(attempt, sets = names.len(), "set names read");
                return Ok(names);
            }
            Err(e) => {
                warn!(attempt, url = %index, "set discovery failed: {:#}", e);
                last_err = Some(e);
            }
        }
        if attempt < policy.max_attempts {
            sleep(policy.backoff).await;
        }
    }
    match last_err {
        Some(e) => Err(e.context(format!("no set names after {} attempts", policy.max_attempts))),
        None => bail!("no attempts made"),
    }
}

async fn read_items(
    page: &mut dyn PageHandle,
    url: &str,
    item_selector: &str,
    policy: &RetryPolicy,
) -> Result<Vec<String>> {
    page.navigate(url, policy.navigation_timeout).await?;
    page.wait_quiescent(policy.quiescent_timeout).await?;
    let items = page.query_rows(item_selector).await?;
    let mut names = Vec::with_capacity(items.len());
    for item in items {
        let slug = slugify(&page.row_text(item).await?);
        if !slug.is_empty() {
            names.push(slug);
        }
    }
    if names.is_empty() {
        bail!("no items match `{}`", item_selector);
    }
    Ok(names)
}

/// Entries of an existing set list; a missing file is an empty list.
pub fn read_set_list(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let mut sets = Vec::new();
    for record in rdr.records() {
        let record = record.with_context(|| format!("reading {}", path.display()))?;
        if let Some(s) = record.get(0).filter(|s| !s.is_empty()) {
            sets.push(s.to_string());
        }
    }
    Ok(sets)
}

/// Replace the list at `path` unless `sets` lost more than `tolerance`
/// entries against it. Returns whether the file was written.
pub fn write_set_list_if_not_shrunk(path: &Path, sets: &[String], tolerance: usize) -> Result<bool> {
    let old = read_set_list(path)?;
    if sets.len() + tolerance < old.len() {
        warn!(
            old = old.len(),
            new = sets.len(),
            file = %path.display(),
            "new set list is shorter; keeping the existing file"
        );
        return Ok(false);
    }

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("could not create `{}`", dir.display()))?;
    }
    let tmp = PathBuf::from(format!("{}.tmp", path.display()));
    let mut wtr = csv::Writer::from_path(&tmp)
        .with_context(|| format!("creating `{}`", tmp.display()))?;
    wtr.write_record(["set"])?;
    for s in sets {
        wtr.write_record([s])?;
    }
    wtr.flush()?;
    drop(wtr);
    fs::rename(&tmp, path)
        .with_context(|| format!("failed to rename `{}` to `{}`", tmp.display(), path.display()))?;

    info!(sets = sets.len(), file = %path.display(), "set list written");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::fixture::{table, Script, ScriptedBrowser};
    use std::time::Duration;
    use tempfile::tempdir;

    fn quick() -> RetryPolicy {
        RetryPolicy::new(2, Duration::ZERO)
    }

    fn index() -> Url {
        Url::parse("https://example.test/price-guides").unwrap()
    }

    #[test]
    fn slugs_match_site_suffixes() {
        assert_eq!(slugify("SV: Scarlet & Violet 151"), "sv-scarlet-violet-151");
        assert_eq!(slugify("  Base   Set "), "base-set");
        assert_eq!(slugify("Pokémon GO"), "pokémon-go");
        assert_eq!(slugify("--"), "");
    }

    #[tokio::test]
    async fn discovery_slugifies_and_drops_blanks() {
        let browser = ScriptedBrowser::always(Script::Tables(vec![table(&[
            &["SV: Scarlet & Violet 151"],
            &["   "],
            &["Crown Zenith"],
        ])]));
        let names = discover_set_names(&browser, &index(), ".item", &quick())
            .await
            .unwrap();
        assert_eq!(names, vec!["sv-scarlet-violet-151", "crown-zenith"]);
        assert_eq!(browser.counters.closed(), 1);
    }

    #[tokio::test]
    async fn discovery_gives_up_after_policy_attempts() {
        let browser = ScriptedBrowser::always(Script::FailNavigation);
        assert!(discover_set_names(&browser, &index(), ".item", &quick())
            .await
            .is_err());
        assert_eq!(browser.counters.opened(), 2);
        assert_eq!(browser.counters.closed(), 2);
    }

    #[tokio::test]
    async fn failing_to_open_a_page_is_retried() {
        let browser = ScriptedBrowser::new(vec![
            Script::FailOpen,
            Script::Tables(vec![table(&[&["Crown Zenith"]])]),
        ]);
        let names = discover_set_names(&browser, &index(), ".item", &quick())
            .await
            .unwrap();
        assert_eq!(names, vec!["crown-zenith"]);
        assert_eq!(browser.counters.opened(), 2);
        assert_eq!(browser.counters.closed(), 1);
    }

    #[test]
    fn shrinking_list_is_not_written() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("data/sets.csv");
        let five: Vec<String> = (0..5).map(|i| format!("set-{}", i)).collect();

        assert!(write_set_list_if_not_shrunk(&path, &five, 2).unwrap());
        assert_eq!(read_set_list(&path).unwrap(), five);
        assert!(fs::read_to_string(&path).unwrap().starts_with("set\n"));

        // losing two is tolerated, losing three is not
        assert!(!write_set_list_if_not_shrunk(&path, &five[..2], 2).unwrap());
        assert_eq!(read_set_list(&path).unwrap().len(), 5);
        assert!(write_set_list_if_not_shrunk(&path, &five[..3], 2).unwrap());
        assert_eq!(read_set_list(&path).unwrap().len(), 3);
    }
}
