//! Page handle abstraction.
//!
//! The poller never talks to a browser or HTTP client directly. It asks a
//! [`Browser`] for a fresh [`PageHandle`], drives it through navigate / wait /
//! query, and closes it. Backends live in submodules.

#[cfg(feature = "chromium")]
pub mod chromium;
pub mod html;
pub mod http;

#[cfg(test)]
pub(crate) mod fixture;

use anyhow::Result;
use async_trait::async_trait;
use std::{sync::Arc, time::Duration};

use crate::config::Backend;

/// Reference to one element returned by [`PageHandle::query_rows`].
///
/// Handles index into the snapshot taken by the most recent `query_rows`
/// call; a new query invalidates older handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowHandle(pub usize);

/// Something that can hand out pages. One page per poll attempt.
#[async_trait]
pub trait Browser: Send + Sync {
    async fn new_page(&self) -> Result<Box<dyn PageHandle>>;
}

/// A single page (tab, or HTTP document) owned by one poll attempt.
#[async_trait]
pub trait PageHandle: Send + Sync {
    /// Load `url`, failing if it does not complete within `timeout`.
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<()>;

    /// Wait until the document has stopped loading.
    async fn wait_quiescent(&mut self, timeout: Duration) -> Result<()>;

    /// Snapshot every element matching `selector`.
    async fn query_rows(&mut self, selector: &str) -> Result<Vec<RowHandle>>;

    /// Number of `th`/`td` cells in `row`.
    async fn cell_count(&self, row: RowHandle) -> Result<usize>;

    /// Raw text of cell `index` in `row`. Not trimmed.
    async fn cell_text(&self, row: RowHandle, index: usize) -> Result<String>;

    /// Raw text of the whole element.
    async fn row_text(&self, row: RowHandle) -> Result<String>;

    async fn close(self: Box<Self>) -> Result<()>;
}

/// Open the page source selected in the configuration.
pub async fn open_browser(backend: Backend) -> Result<Arc<dyn Browser>> {
    match backend {
        Backend::Http => Ok(Arc::new(http::HttpBrowser::new()?)),
        #[cfg(feature = "chromium")]
        Backend::Chromium => Ok(Arc::new(chromium::ChromiumBrowser::launch().await?)),
        #[cfg(not(feature = "chromium"))]
        Backend::Chromium => {
            anyhow::bail!("chromium backend requested but built without the `chromium` feature")
        }
    }
}
