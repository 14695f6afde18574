//! Locating the price table on a page.
//!
//! The site's markup is not ours, so table discovery sits behind
//! [`TableLocator`] and can be swapped per site version.

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::page::{PageHandle, RowHandle};

#[async_trait]
pub trait TableLocator: Send + Sync {
    /// Return the table's rows, header row first. An empty vec means no table.
    async fn locate(&self, page: &mut dyn PageHandle) -> Result<Vec<RowHandle>>;
}

/// Rows are whatever one CSS selector matches, e.g. `table tr`.
#[derive(Debug, Clone)]
pub struct SelectorLocator {
    selector: String,
}

impl SelectorLocator {
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
        }
    }
}

#[async_trait]
impl TableLocator for SelectorLocator {
    async fn locate(&self, page: &mut dyn PageHandle) -> Result<Vec<RowHandle>> {
        page.query_rows(&self.selector).await
    }
}

/// Try selectors in order and take the first that matches any rows.
#[derive(Debug, Clone)]
pub struct FallbackLocator {
    selectors: Vec<String>,
}

impl FallbackLocator {
    pub fn new(selectors: Vec<String>) -> Self {
        Self { selectors }
    }
}

#[async_trait]
impl TableLocator for FallbackLocator {
    async fn locate(&self, page: &mut dyn PageHandle) -> Result<Vec<RowHandle>> {
        for selector in &self.selectors {
            let rows = page.query_rows(selector).await?;
            if !rows.is_empty() {
                debug!(selector = %selector, rows = rows.len(), "table located");
                return Ok(rows);
            }
        }
        Ok(Vec::new())
    }
}

/// One selector gets a [`SelectorLocator`], several a [`FallbackLocator`].
pub fn from_selectors(selectors: &[String]) -> Box<dyn TableLocator> {
    match selectors {
        [] => Box::new(SelectorLocator::new("table tr")),
        [one] => Box::new(SelectorLocator::new(one.clone())),
        many => Box::new(FallbackLocator::new(many.to_vec())),
    }
}
