// Static-HTML page backend: one GET per navigation, rows parsed with `scraper`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use super::html::RowSnapshots;
use super::{Browser, PageHandle, RowHandle};

const USER_AGENT: &str = concat!("tcgscraper/", env!("CARGO_PKG_VERSION"));

pub struct HttpBrowser {
    client: Client,
}

impl HttpBrowser {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .cookie_store(true)
            .gzip(true)
            .build()
            .context("building HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Browser for HttpBrowser {
    async fn new_page(&self) -> Result<Box<dyn PageHandle>> {
        Ok(Box::new(HttpPage {
            client: self.client.clone(),
            document: None,
            rows: RowSnapshots::default(),
        }))
    }
}

pub struct HttpPage {
    client: Client,
    document: Option<String>,
    rows: RowSnapshots,
}

#[async_trait]
impl PageHandle for HttpPage {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<()> {
        self.document = None;
        let body = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .with_context(|| format!("GET {}", url))?
            .error_for_status()?
            .text()
            .await
            .with_context(|| format!("reading body from {}", url))?;
        debug!(url, bytes = body.len(), "fetched page");
        self.document = Some(body);
        Ok(())
    }

    // A fetched static document has nothing left to load.
    async fn wait_quiescent(&mut self, _timeout: Duration) -> Result<()> {
        self.document
            .as_ref()
            .map(|_| ())
            .context("no document loaded; navigate first")
    }

    async fn query_rows(&mut self, selector: &str) -> Result<Vec<RowHandle>> {
        let document = self
            .document
            .as_deref()
            .context("no document loaded; navigate first")?;
        self.rows = RowSnapshots::capture(document, selector)?;
        Ok(self.rows.handles())
    }

    async fn cell_count(&self, row: RowHandle) -> Result<usize> {
        self.rows.cell_count(row)
    }

    async fn cell_text(&self, row: RowHandle, index: usize) -> Result<String> {
        self.rows.cell_text(row, index)
    }

    async fn row_text(&self, row: RowHandle) -> Result<String> {
        self.rows.row_text(row)
    }

    async fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn querying_before_navigation_fails() {
        let browser = HttpBrowser::new().unwrap();
        let mut page = browser.new_page().await.unwrap();
        assert!(page.wait_quiescent(Duration::from_secs(1)).await.is_err());
        assert!(page.query_rows("table tr").await.is_err());
        page.close().await.unwrap();
    }
}
