use std::{collections::VecDeque, fs, path::Path, time::Duration};

use anyhow::Context as _;

use crate::{
    options::ScanOptions,
    store::{SessionRecord, SessionStore},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceItem {
    Found(SessionRecord),
    /// An id from the ids file that has no row in the store.
    Missing(String),
}

/// Where the sessions under analysis come from.
#[derive(Debug)]
pub enum SessionSource {
    Scan(PagedScan),
    Ids(IdLookup),
}

impl SessionSource {
    pub fn from_options(store: &SessionStore, options: &ScanOptions) -> anyhow::Result<Self> {
        match options.ids_from.as_deref() {
            Some(path) => Ok(Self::Ids(IdLookup::from_file(store.clone(), path)?)),
            None => Ok(Self::Scan(PagedScan::new(
                store.clone(),
                options.bigger_than,
                options.batch_size,
                options.sleep_time,
            ))),
        }
    }

    pub async fn next(&mut self) -> anyhow::Result<Option<SourceItem>> {
        match self {
            Self::Scan(scan) => Ok(scan.next().await?.map(SourceItem::Found)),
            Self::Ids(lookup) => lookup.next().await,
        }
    }
}

/// Walks every row bigger than the threshold in `session_key` order, one page
/// at a time, resuming after the last key seen.
#[derive(Debug)]
pub struct PagedScan {
    store: SessionStore,
    bigger_than: u64,
    batch_size: usize,
    sleep_time: Duration,
    cursor: Option<String>,
    buffer: VecDeque<SessionRecord>,
    pages_fetched: u64,
    exhausted: bool,
}

impl PagedScan {
    pub fn new(
        store: SessionStore,
        bigger_than: u64,
        batch_size: usize,
        sleep_time: Duration,
    ) -> Self {
        Self {
            store,
            bigger_than,
            batch_size: batch_size.max(1),
            sleep_time,
            cursor: None,
            buffer: VecDeque::new(),
            pages_fetched: 0,
            exhausted: false,
        }
    }

    pub fn pages_fetched(&self) -> u64 {
        self.pages_fetched
    }

    pub async fn next(&mut self) -> anyhow::Result<Option<SessionRecord>> {
        if self.buffer.is_empty() && !self.exhausted {
            self.fetch_page().await?;
        }
        Ok(self.buffer.pop_front())
    }

    async fn fetch_page(&mut self) -> anyhow::Result<()> {
        if self.pages_fetched > 0 && !self.sleep_time.is_zero() {
            tracing::debug!(sleep_ms = self.sleep_time.as_millis() as u64, "throttling scan");
            tokio::time::sleep(self.sleep_time).await;
        }

        let page = self
            .store
            .fetch_page_bigger_than(self.bigger_than, self.cursor.as_deref(), self.batch_size)
            .await
            .with_context(|| format!("fetch page {} of sessions", self.pages_fetched + 1))?;
        self.pages_fetched += 1;

        tracing::debug!(
            page = self.pages_fetched,
            rows = page.len(),
            after = self.cursor.as_deref().unwrap_or(""),
            "fetched session page"
        );

        if page.len() < self.batch_size {
            self.exhausted = true;
        }
        if let Some(last) = page.last() {
            self.cursor = Some(last.session_key.clone());
        }
        self.buffer.extend(page);
        Ok(())
    }
}

/// Looks sessions up one at a time from a caller-supplied list of ids.
#[derive(Debug)]
pub struct IdLookup {
    store: SessionStore,
    ids: VecDeque<String>,
}

impl IdLookup {
    pub fn new(store: SessionStore, ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            store,
            ids: ids.into_iter().collect(),
        }
    }

    pub fn from_file(store: SessionStore, path: &Path) -> anyhow::Result<Self> {
        let ids = read_ids(path)?;
        tracing::debug!(path = %path.display(), ids = ids.len(), "loaded session ids");
        Ok(Self::new(store, ids))
    }

    pub fn remaining(&self) -> usize {
        self.ids.len()
    }

    pub async fn next(&mut self) -> anyhow::Result<Option<SourceItem>> {
        let Some(id) = self.ids.pop_front() else {
            return Ok(None);
        };
        let found = self
            .store
            .get(&id)
            .await
            .with_context(|| format!("look up session `{id}`"))?;
        tracing::debug!(session_key = %id, found = found.is_some(), "looked up session");

        Ok(Some(match found {
            Some(record) => SourceItem::Found(record),
            None => SourceItem::Missing(id),
        }))
    }
}

/// One id per line; surrounding whitespace is trimmed and blank lines skipped.
pub fn read_ids(path: &Path) -> anyhow::Result<Vec<String>> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read ids file {}", path.display()))?;
    Ok(parse_ids(&contents))
}

fn parse_ids(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}
