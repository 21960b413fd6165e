// Collaborator boundaries for the extraction pipeline.
//
// PageSource + SessionProbe stand in for the browser, BookmarkStorage for the
// output file, ReportSink for whoever watches progress. The core never talks
// to a browser or the filesystem directly, so every boundary has an
// in-memory mock in `testing.rs`.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use bookmark_common::{BookmarkDocument, BookmarkRecord, OpError, RawItem};

use crate::pipeline::stats::{ProgressEvent, RunSummary};

// ---------------------------------------------------------------------------
// PageSource: the page (or API surface) bookmarks are harvested from
// ---------------------------------------------------------------------------

#[async_trait]
pub trait PageSource: Send + Sync {
    /// Raw items currently rendered on the page.
    async fn visible_items(&self) -> Result<Vec<RawItem>, OpError>;

    /// Reveal more items (scroll the feed, fetch the next page).
    async fn scroll_or_advance(&self) -> Result<(), OpError>;

    /// Bound for one `visible_items` attempt. Sources whose reads get slower
    /// the further they have advanced stretch `base` accordingly.
    fn read_timeout(&self, base: Duration) -> Duration {
        base
    }
}

// ---------------------------------------------------------------------------
// SessionProbe: is there a logged-in session to harvest with?
// ---------------------------------------------------------------------------

#[async_trait]
pub trait SessionProbe: Send + Sync {
    async fn is_authenticated(&self) -> Result<bool, OpError>;
}

// ---------------------------------------------------------------------------
// BookmarkStorage: prior output in, merged output out
// ---------------------------------------------------------------------------

#[async_trait]
pub trait BookmarkStorage: Send + Sync {
    /// Records persisted by earlier runs. Empty when nothing has been written yet.
    async fn load_prior_output(&self) -> Result<Vec<BookmarkRecord>>;

    async fn persist(&self, document: &BookmarkDocument) -> Result<()>;

    /// Save a run's output somewhere that leaves the prior output untouched,
    /// for when that output could not be read back. Returns where it went.
    async fn persist_recovery(&self, document: &BookmarkDocument, run_id: &str) -> Result<String>;
}

// ---------------------------------------------------------------------------
// ReportSink: progress events and the final summary
// ---------------------------------------------------------------------------

pub trait ReportSink: Send + Sync {
    fn progress(&self, event: &ProgressEvent);

    fn summary(&self, summary: &RunSummary);
}
