// Test mocks for the extraction pipeline.
//
// One mock per trait boundary:
// - ScriptedPage (PageSource): fixed sequence of batches, one per scroll
// - StaticSession (SessionProbe): fixed answer
// - MemoryStorage (BookmarkStorage): in-memory prior output, persisted and recovered docs
// - RecordingSink (ReportSink): captures progress events and summaries
//
// Plus builders for records, raw items and a fast config.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::json;

use bookmark_common::{
    Author, BookmarkDocument, BookmarkRecord, OpError, PipelineConfig, RawItem,
};

use crate::pipeline::stats::{ProgressEvent, RunSummary};
use crate::traits::{BookmarkStorage, PageSource, ReportSink, SessionProbe};

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// A normalized record as the pipeline would produce it.
pub fn bookmark(id: &str) -> BookmarkRecord {
    BookmarkRecord {
        id: id.to_string(),
        text: format!("bookmark {id}"),
        author: Author {
            handle: "ferris".to_string(),
            name: Some("Ferris".to_string()),
        },
        created_at: None,
        url: Some(format!("https://x.com/ferris/status/{id}")),
        metrics: BTreeMap::new(),
        has_media: false,
        extracted_at: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
    }
}

/// A raw card as the DOM scraper would return it.
pub fn raw_item(id: &str) -> RawItem {
    let value = json!({
        "id": id,
        "text": format!("bookmark {id}"),
        "author": { "handle": "ferris", "name": "Ferris" },
        "createdAt": "2024-05-01T09:30:00.000Z",
        "url": format!("https://x.com/ferris/status/{id}"),
        "metrics": { "likes": "12", "replies": "3" },
        "hasMedia": false,
    });
    match value {
        serde_json::Value::Object(map) => map,
        _ => unreachable!(),
    }
}

pub fn raw_items(ids: &[&str]) -> Vec<RawItem> {
    ids.iter().map(|id| raw_item(id)).collect()
}

/// A card the normalizer must reject (no identifier anywhere).
pub fn malformed_item() -> RawItem {
    let mut map = RawItem::new();
    map.insert("text".into(), json!("orphan card"));
    map
}

/// Defaults with no settle wait and millisecond backoff.
pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        target_count: 500,
        max_scroll_attempts: 50,
        no_new_items_limit: 3,
        retry_max_attempts: 3,
        backoff_base_ms: 1,
        backoff_max_ms: 10,
        circuit_failure_threshold: 5,
        circuit_cooldown_ms: 1_000,
        operation_timeout_ms: 1_000,
        scroll_settle_ms: 0,
        resume: true,
    }
}

// ---------------------------------------------------------------------------
// ScriptedPage
// ---------------------------------------------------------------------------

/// Shows `batches[n]` after `n` scrolls; past the end it keeps showing the
/// last batch, like a feed that has run out of items.
pub struct ScriptedPage {
    batches: Vec<Vec<RawItem>>,
    cursor: AtomicUsize,
    visible_failures: Mutex<VecDeque<OpError>>,
    scroll_failures: Mutex<VecDeque<OpError>>,
    scroll_error: Option<OpError>,
    read_latency: Duration,
    visible_calls: AtomicU32,
    scroll_calls: AtomicU32,
}

impl ScriptedPage {
    pub fn new(batches: Vec<Vec<RawItem>>) -> Self {
        Self {
            batches,
            cursor: AtomicUsize::new(0),
            visible_failures: Mutex::new(VecDeque::new()),
            scroll_failures: Mutex::new(VecDeque::new()),
            scroll_error: None,
            read_latency: Duration::ZERO,
            visible_calls: AtomicU32::new(0),
            scroll_calls: AtomicU32::new(0),
        }
    }

    /// Fail the next reads with these errors, in order, before succeeding.
    pub fn fail_visible(self, errors: Vec<OpError>) -> Self {
        *self.visible_failures.lock().unwrap() = errors.into();
        self
    }

    /// Fail the next scrolls with these errors, in order, before succeeding.
    pub fn fail_scroll(self, errors: Vec<OpError>) -> Self {
        *self.scroll_failures.lock().unwrap() = errors.into();
        self
    }

    /// Every scroll fails with `error`.
    pub fn broken_scroll(mut self, error: OpError) -> Self {
        self.scroll_error = Some(error);
        self
    }

    /// Each read takes `per_scroll` longer for every scroll already made,
    /// and asks for a matching extension of its time bound.
    pub fn slow_reads(mut self, per_scroll: Duration) -> Self {
        self.read_latency = per_scroll;
        self
    }

    fn read_delay(&self) -> Duration {
        self.read_latency * self.cursor.load(Ordering::SeqCst) as u32
    }

    pub fn visible_calls(&self) -> u32 {
        self.visible_calls.load(Ordering::SeqCst)
    }

    pub fn scroll_calls(&self) -> u32 {
        self.scroll_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageSource for ScriptedPage {
    async fn visible_items(&self) -> Result<Vec<RawItem>, OpError> {
        self.visible_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.visible_failures.lock().unwrap().pop_front() {
            return Err(e);
        }
        tokio::time::sleep(self.read_delay()).await;
        if self.batches.is_empty() {
            return Ok(Vec::new());
        }
        let idx = self.cursor.load(Ordering::SeqCst).min(self.batches.len() - 1);
        Ok(self.batches[idx].clone())
    }

    async fn scroll_or_advance(&self) -> Result<(), OpError> {
        self.scroll_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(ref e) = self.scroll_error {
            return Err(e.clone());
        }
        if let Some(e) = self.scroll_failures.lock().unwrap().pop_front() {
            return Err(e);
        }
        self.cursor.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read_timeout(&self, base: Duration) -> Duration {
        base + self.read_delay()
    }
}

// ---------------------------------------------------------------------------
// StaticSession
// ---------------------------------------------------------------------------

pub struct StaticSession(pub bool);

#[async_trait]
impl SessionProbe for StaticSession {
    async fn is_authenticated(&self) -> Result<bool, OpError> {
        Ok(self.0)
    }
}

// ---------------------------------------------------------------------------
// MemoryStorage
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryStorage {
    prior: Vec<BookmarkRecord>,
    persisted: Mutex<Vec<BookmarkDocument>>,
    recovered: Mutex<Vec<(String, BookmarkDocument)>>,
    fail_load: bool,
    fail_persist: bool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prior(prior: Vec<BookmarkRecord>) -> Self {
        Self {
            prior,
            ..Self::default()
        }
    }

    pub fn failing_load(mut self) -> Self {
        self.fail_load = true;
        self
    }

    pub fn failing_persist(mut self) -> Self {
        self.fail_persist = true;
        self
    }

    /// The most recently persisted document.
    pub fn last_persisted(&self) -> Option<BookmarkDocument> {
        self.persisted.lock().unwrap().last().cloned()
    }

    pub fn persist_count(&self) -> usize {
        self.persisted.lock().unwrap().len()
    }

    /// Documents saved beside the prior output, keyed by run id.
    pub fn recovered(&self) -> Vec<(String, BookmarkDocument)> {
        self.recovered.lock().unwrap().clone()
    }
}

#[async_trait]
impl BookmarkStorage for MemoryStorage {
    async fn load_prior_output(&self) -> Result<Vec<BookmarkRecord>> {
        if self.fail_load {
            bail!("prior output is corrupt");
        }
        Ok(self.prior.clone())
    }

    async fn persist(&self, document: &BookmarkDocument) -> Result<()> {
        if self.fail_persist {
            bail!("disk full");
        }
        self.persisted.lock().unwrap().push(document.clone());
        Ok(())
    }

    async fn persist_recovery(&self, document: &BookmarkDocument, run_id: &str) -> Result<String> {
        if self.fail_persist {
            bail!("disk full");
        }
        self.recovered
            .lock()
            .unwrap()
            .push((run_id.to_string(), document.clone()));
        Ok(format!("memory:{run_id}"))
    }
}

// ---------------------------------------------------------------------------
// RecordingSink
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
    summaries: Mutex<Vec<RunSummary>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn summaries(&self) -> Vec<RunSummary> {
        self.summaries.lock().unwrap().clone()
    }
}

impl ReportSink for RecordingSink {
    fn progress(&self, event: &ProgressEvent) {
        self.events.lock().unwrap().push(event.clone());
    }

    fn summary(&self, summary: &RunSummary) {
        self.summaries.lock().unwrap().push(summary.clone());
    }
}
