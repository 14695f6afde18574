// Scripted in-memory pages for exercising the poller without a network.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use super::{Browser, PageHandle, RowHandle};

pub(crate) type Table = Vec<Vec<String>>;

/// Build a table from string literals; the first row is the header.
pub(crate) fn table(rows: &[&[&str]]) -> Table {
    rows.iter()
        .map(|r| r.iter().map(|c| c.to_string()).collect())
        .collect()
}

/// A header row followed by `n` generated data rows.
pub(crate) fn card_table(n: usize) -> Table {
    let mut rows = vec![vec![
        "Product Name".to_string(),
        "Rarity".to_string(),
        "Market Price".to_string(),
    ]];
    for i in 0..n {
        rows.push(vec![
            format!("Card {}", i),
            "Common".to_string(),
            format!("${}.00", i),
        ]);
    }
    rows
}

/// What one page does over its lifetime.
#[derive(Clone, Debug)]
pub(crate) enum Script {
    /// `new_page` itself fails
    FailOpen,
    FailNavigation,
    /// Successive `query_rows` calls see successive tables; the last repeats.
    Tables(Vec<Table>),
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub opened: AtomicUsize,
    pub navigations: AtomicUsize,
    pub queries: AtomicUsize,
    pub closed: AtomicUsize,
}

impl Counters {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
    pub fn navigations(&self) -> usize {
        self.navigations.load(Ordering::SeqCst)
    }
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Page `i` follows `scripts[i]`; once the list runs out the last one repeats.
pub(crate) struct ScriptedBrowser {
    scripts: Vec<Script>,
    pub counters: Arc<Counters>,
}

impl ScriptedBrowser {
    pub fn new(scripts: Vec<Script>) -> Self {
        assert!(!scripts.is_empty());
        Self {
            scripts,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn always(script: Script) -> Self {
        Self::new(vec![script])
    }
}

#[async_trait]
impl Browser for ScriptedBrowser {
    async fn new_page(&self) -> Result<Box<dyn PageHandle>> {
        let idx = self.counters.opened.fetch_add(1, Ordering::SeqCst);
        let script = self.scripts[idx.min(self.scripts.len() - 1)].clone();
        if let Script::FailOpen = script {
            bail!("browser closed before tab {} opened", idx);
        }
        Ok(Box::new(ScriptedPage {
            script,
            counters: Arc::clone(&self.counters),
            next_table: 0,
            current: Vec::new(),
        }))
    }
}

struct ScriptedPage {
    script: Script,
    counters: Arc<Counters>,
    next_table: usize,
    current: Table,
}

impl ScriptedPage {
    fn row(&self, row: RowHandle) -> Result<&Vec<String>> {
        self.current.get(row.0).context("stale row handle")
    }
}

#[async_trait]
impl PageHandle for ScriptedPage {
    async fn navigate(&mut self, url: &str, _timeout: Duration) -> Result<()> {
        self.counters.navigations.fetch_add(1, Ordering::SeqCst);
        if let Script::FailNavigation = self.script {
            bail!("net::ERR_CONNECTION_REFUSED at {}", url);
        }
        Ok(())
    }

    async fn wait_quiescent(&mut self, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    async fn query_rows(&mut self, _selector: &str) -> Result<Vec<RowHandle>> {
        self.counters.queries.fetch_add(1, Ordering::SeqCst);
        let tables = match &self.script {
            Script::Tables(t) if !t.is_empty() => t,
            _ => bail!("no table on page"),
        };
        self.current = tables[self.next_table.min(tables.len() - 1)].clone();
        self.next_table += 1;
        Ok((0..self.current.len()).map(RowHandle).collect())
    }

    async fn cell_count(&self, row: RowHandle) -> Result<usize> {
        Ok(self.row(row)?.len())
    }

    async fn cell_text(&self, row: RowHandle, index: usize) -> Result<String> {
        self.row(row)?.get(index).cloned().context("no such cell")
    }

    async fn row_text(&self, row: RowHandle) -> Result<String> {
        Ok(self.row(row)?.join(" "))
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
