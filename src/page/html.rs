use anyhow::{anyhow, Context, Result};
use scraper::{Html, Selector};

use super::RowHandle;

/// Text of one matched element and of its `th`/`td` cells.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowSnapshot {
    pub text: String,
    pub cells: Vec<String>,
}

/// Rows captured from a rendered document by one selector query.
///
/// `scraper::Html` is not `Send`, so the document is parsed and dropped
/// inside [`RowSnapshots::capture`] and only owned strings are kept.
#[derive(Debug, Clone, Default)]
pub struct RowSnapshots {
    rows: Vec<RowSnapshot>,
}

impl RowSnapshots {
    pub fn capture(document: &str, selector: &str) -> Result<Self> {
        let row_sel = parse_selector(selector)?;
        let cell_sel = parse_selector("th, td")?;

        let html = Html::parse_document(document);
        let rows = html
            .select(&row_sel)
            .map(|row| RowSnapshot {
                text: row.text().collect(),
                cells: row
                    .select(&cell_sel)
                    .map(|cell| cell.text().collect())
                    .collect(),
            })
            .collect();

        Ok(Self { rows })
    }

    pub fn handles(&self) -> Vec<RowHandle> {
        (0..self.rows.len()).map(RowHandle).collect()
    }

    fn len(&self) -> usize {
        self.rows.len()
    }

    fn row(&self, row: RowHandle) -> Result<&RowSnapshot> {
        self.rows
            .get(row.0)
            .with_context(|| format!("stale row handle {} ({} rows captured)", row.0, self.len()))
    }

    pub fn cell_count(&self, row: RowHandle) -> Result<usize> {
        Ok(self.row(row)?.cells.len())
    }

    pub fn cell_text(&self, row: RowHandle, index: usize) -> Result<String> {
        let snapshot = self.row(row)?;
        snapshot.cells.get(index).cloned().with_context(|| {
            format!(
                "row {} has {} cells, no cell {}",
                row.0,
                snapshot.cells.len(),
                index
            )
        })
    }

    pub fn row_text(&self, row: RowHandle) -> Result<String> {
        Ok(self.row(row)?.text.clone())
    }
}

fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| anyhow!("invalid CSS selector `{}`: {:?}", selector, e))
}
