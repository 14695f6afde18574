use anyhow::{Context, Result};
use serde::Deserialize;
use std::{fs::File, io::Read, path::Path};
use url::Url;

/// One unit of scraping work: a price-guide page and, optionally, how many
/// data rows its table should have.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Target {
    #[serde(rename = "set")]
    pub suffix: String,
    #[serde(rename = "cards", default)]
    pub expected_rows: Option<usize>,
}

impl Target {
    pub fn new(suffix: impl Into<String>, expected_rows: Option<usize>) -> Self {
        Self {
            suffix: suffix.into(),
            expected_rows,
        }
    }

    /// Final path segment of the suffix, used to tag every record set.
    pub fn source(&self) -> &str {
        self.suffix
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
    }

    /// Resolve the suffix against the price-guide base URL.
    pub fn url(&self, base: &Url) -> Result<Url> {
        let mut base = base.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.join(self.suffix.trim_start_matches('/'))
            .with_context(|| format!("joining `{}` onto {}", self.suffix, base))
    }
}

/// Read the target list (`set` and optional `cards` columns).
pub fn load_targets(path: impl AsRef<Path>) -> Result<Vec<Target>> {
    let path = path.as_ref();
    let file =
        File::open(path).with_context(|| format!("opening target list {}", path.display()))?;
    read_targets(file).with_context(|| format!("parsing target list {}", path.display()))
}

pub fn read_targets<R: Read>(reader: R) -> Result<Vec<Target>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut targets = Vec::new();
    for (line, record) in rdr.deserialize::<Target>().enumerate() {
        let target = record.with_context(|| format!("target row {}", line + 1))?;
        if target.suffix.is_empty() {
            continue;
        }
        targets.push(target);
    }
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str =
        "https://www.tcgplayer.com/categories/trading-and-collectible-card-games/pokemon/price-guides/";

    #[test]
    fn reads_counts_and_blank_counts() {
        let csv = "set,cards\nsv-scarlet-and-violet-151,207\nbase-set,\n,12\n";
        let targets = read_targets(csv.as_bytes()).unwrap();
        assert_eq!(
            targets,
            vec![
                Target::new("sv-scarlet-and-violet-151", Some(207)),
                Target::new("base-set", None),
            ]
        );
    }

    #[test]
    fn count_column_is_optional() {
        let csv = "set\njungle\nfossil\n";
        let targets = read_targets(csv.as_bytes()).unwrap();
        assert_eq!(targets.len(), 2);
        assert!(targets.iter().all(|t| t.expected_rows.is_none()));
    }

    #[test]
    fn bad_count_is_an_error() {
        let csv = "set,cards\njungle,lots\n";
        assert!(read_targets(csv.as_bytes()).is_err());
    }

    #[test]
    fn url_and_source() {
        let base = Url::parse(BASE).unwrap();
        let t = Target::new("sv-scarlet-and-violet-151", Some(207));
        assert_eq!(
            t.url(&base).unwrap().as_str(),
            format!("{}sv-scarlet-and-violet-151", BASE)
        );
        assert_eq!(t.source(), "sv-scarlet-and-violet-151");

        let nested = Target::new("/sealed/base-set/", None);
        assert_eq!(nested.source(), "base-set");
        assert!(nested.url(&base).unwrap().as_str().starts_with(BASE));
    }

    #[test]
    fn base_without_trailing_slash() {
        let base = Url::parse("https://example.com/price-guides").unwrap();
        let t = Target::new("jungle", None);
        assert_eq!(
            t.url(&base).unwrap().as_str(),
            "https://example.com/price-guides/jungle"
        );
    }
}
