//! Headless Chromium page backend (chromiumoxide), for price-guide pages that
//! only render their tables after client-side scripts run.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser as CdpBrowser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent, RequestId,
};
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::html::RowSnapshots;
use super::{Browser, PageHandle, RowHandle};

const READY_POLL: Duration = Duration::from_millis(250);
/// No request in flight for this long counts as network idle.
const NETWORK_QUIET: Duration = Duration::from_millis(500);

/// Requests the page has started but not finished, and when that set last changed.
#[derive(Clone)]
struct NetworkActivity {
    in_flight: Arc<Mutex<HashSet<RequestId>>>,
    last_change: Arc<Mutex<Instant>>,
}

impl NetworkActivity {
    fn new() -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            last_change: Arc::new(Mutex::new(Instant::now())),
        }
    }

    fn started(&self, id: RequestId) {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id);
        self.touch();
    }

    fn finished(&self, id: &RequestId) {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
        self.touch();
    }

    fn touch(&self) {
        *self.last_change.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    fn in_flight(&self) -> usize {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn idle_for(&self, quiet: Duration) -> bool {
        self.in_flight() == 0
            && self
                .last_change
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .elapsed()
                >= quiet
    }
}

async fn watch_network(page: &Page, activity: NetworkActivity) -> Result<JoinHandle<()>> {
    let mut started = page
        .event_listener::<EventRequestWillBeSent>()
        .await
        .context("listening for requests")?;
    let mut finished = page
        .event_listener::<EventLoadingFinished>()
        .await
        .context("listening for finished loads")?;
    let mut failed = page
        .event_listener::<EventLoadingFailed>()
        .await
        .context("listening for failed loads")?;

    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(ev) = started.next() => activity.started(ev.request_id.clone()),
                Some(ev) = finished.next() => activity.finished(&ev.request_id),
                Some(ev) = failed.next() => activity.finished(&ev.request_id),
                else => break,
            }
        }
    }))
}

pub struct ChromiumBrowser {
    browser: CdpBrowser,
    handler: JoinHandle<()>,
}

impl ChromiumBrowser {
    pub async fn launch() -> Result<Self> {
        let config = BrowserConfig::builder()
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .window_size(1920, 1080)
            .build()
            .map_err(|e| anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = CdpBrowser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("chromium handler event error: {e}");
                }
            }
        });

        Ok(Self { browser, handler })
    }
}

impl Drop for ChromiumBrowser {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

#[async_trait]
impl Browser for ChromiumBrowser {
    async fn new_page(&self) -> Result<Box<dyn PageHandle>> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .context("failed to open tab")?;
        let network = NetworkActivity::new();
        let watcher = watch_network(&page, network.clone()).await?;
        Ok(Box::new(ChromiumPage {
            page,
            rows: RowSnapshots::default(),
            network,
            watcher,
        }))
    }
}

pub struct ChromiumPage {
    page: Page,
    rows: RowSnapshots,
    network: NetworkActivity,
    watcher: JoinHandle<()>,
}

impl Drop for ChromiumPage {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

#[async_trait]
impl PageHandle for ChromiumPage {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<()> {
        match tokio::time::timeout(timeout, self.page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => bail!("navigation to {url} failed: {e}"),
            Err(_) => bail!("navigation to {url} timed out after {timeout:?}"),
        }
    }

    async fn wait_quiescent(&mut self, timeout: Duration) -> Result<()> {
        let start = Instant::now();
        if tokio::time::timeout(timeout, self.page.wait_for_navigation())
            .await
            .is_err()
        {
            bail!("page did not finish navigating within {timeout:?}");
        }

        loop {
            let state: String = self
                .page
                .evaluate("document.readyState")
                .await
                .context("reading document.readyState")?
                .into_value()
                .map_err(|e| anyhow!("unexpected readyState value: {e:?}"))?;
            if state == "complete" {
                break;
            }
            if start.elapsed() >= timeout {
                bail!("document stuck in `{state}` after {timeout:?}");
            }
            tokio::time::sleep(READY_POLL).await;
        }

        // XHR-filled tables keep loading after readyState flips
        while !self.network.idle_for(NETWORK_QUIET) {
            if start.elapsed() >= timeout {
                bail!(
                    "{} requests still in flight after {timeout:?}",
                    self.network.in_flight()
                );
            }
            tokio::time::sleep(READY_POLL).await;
        }
        Ok(())
    }

    async fn query_rows(&mut self, selector: &str) -> Result<Vec<RowHandle>> {
        let html = self.page.content().await.context("reading page content")?;
        self.rows = RowSnapshots::capture(&html, selector)?;
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
        self.watcher.abort();
        if let Err(e) = self.page.clone().close().await {
            warn!("closing tab: {e}");
            return Err(anyhow!("closing tab: {e}"));
        }
        Ok(())
    }
}
