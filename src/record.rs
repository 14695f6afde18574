use anyhow::{Context, Result};
use chrono::NaiveDate;
use regex::Regex;
use serde::Serialize;

/// Rows scraped from one page, all sharing `columns`, tagged with where and
/// when they were read. Cell text is exactly what the page rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordSet {
    pub source: String,
    pub scrape_date: NaiveDate,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RecordSet {
    /// The "nothing usable" result: callers skip the target and move on.
    pub fn empty(source: impl Into<String>, scrape_date: NaiveDate) -> Self {
        Self {
            source: source.into(),
            scrape_date,
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

/// Header name → header position, for the columns we keep.
///
/// Entries are in page (header) order. Allowlisted names missing from the
/// header are dropped rather than failing the scrape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMap {
    columns: Vec<(String, usize)>,
}

impl ColumnMap {
    /// Resolve `allowlist` against `headers`. An empty allowlist keeps every
    /// header. Header text is trimmed for matching; the first of any
    /// duplicate header wins.
    pub fn resolve(headers: &[String], allowlist: &[String]) -> Self {
        let mut columns: Vec<(String, usize)> = Vec::new();
        for (idx, raw) in headers.iter().enumerate() {
            let name = raw.trim();
            if name.is_empty() && allowlist.is_empty() {
                continue;
            }
            if columns.iter().any(|(n, _)| n == name) {
                continue;
            }
            if allowlist.is_empty() || allowlist.iter().any(|a| a.trim() == name) {
                columns.push((name.to_string(), idx));
            }
        }
        Self { columns }
    }

    /// Allowlisted names that the header did not contain.
    pub fn missing<'a>(&self, allowlist: &'a [String]) -> Vec<&'a str> {
        allowlist
            .iter()
            .map(|a| a.trim())
            .filter(|a| !self.columns.iter().any(|(n, _)| n == a))
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.columns.iter().map(|(_, i)| *i)
    }

    /// Position of `name` within a projected row.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|(n, _)| n == name.trim())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Pick the mapped cells out of a full row. `None` if the row is too short.
    pub fn project(&self, row: &[String]) -> Option<Vec<String>> {
        self.indices().map(|i| row.get(i).cloned()).collect()
    }
}

/// Keep only rows whose `column` matches `pattern`.
#[derive(Debug, Clone)]
pub struct RowFilter {
    pub column: String,
    pub pattern: Regex,
}

impl RowFilter {
    pub fn new(column: impl Into<String>, pattern: &str) -> Result<Self> {
        let pattern =
            Regex::new(pattern).with_context(|| format!("invalid row filter `{}`", pattern))?;
        Ok(Self {
            column: column.into(),
            pattern,
        })
    }

    /// `None` when the filter column is not among the projected columns.
    pub fn apply(&self, map: &ColumnMap, rows: Vec<Vec<String>>) -> Option<Vec<Vec<String>>> {
        let pos = map.position(&self.column)?;
        Some(
            rows.into_iter()
                .filter(|row| row.get(pos).is_some_and(|cell| self.pattern.is_match(cell)))
                .collect(),
        )
    }
}
