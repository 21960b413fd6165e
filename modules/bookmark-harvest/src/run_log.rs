//! Run log: persisted JSON timeline of one extraction run.
//!
//! Each run produces a single `{DATA_DIR}/runs/{run_id}.json` file with the
//! ordered session events and the final summary.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::pipeline::state::SessionStatus;
use crate::pipeline::stats::{ProgressEvent, RunSummary};
use crate::traits::ReportSink;

// ---------------------------------------------------------------------------
// RunLog
// ---------------------------------------------------------------------------

pub struct RunLog {
    dir: PathBuf,
    started_at: DateTime<Utc>,
    inner: Mutex<Timeline>,
}

#[derive(Default)]
struct Timeline {
    events: Vec<RunEvent>,
    seq: u32,
    last_status: Option<SessionStatus>,
}

#[derive(Debug, Serialize)]
struct RunEvent {
    seq: u32,
    ts: DateTime<Utc>,
    #[serde(flatten)]
    kind: EventKind,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Transition {
        from: Option<SessionStatus>,
        to: SessionStatus,
        collected: usize,
    },
    Scroll {
        scroll_attempts: u32,
        collected: usize,
    },
}

impl RunLog {
    /// Logs land under `{data_dir}/runs/`.
    pub fn new(data_dir: &Path) -> Self {
        Self {
            dir: data_dir.join("runs"),
            started_at: Utc::now(),
            inner: Mutex::new(Timeline::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Timeline> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn event_count(&self) -> usize {
        self.lock().events.len()
    }

    /// Serialize the timeline with `summary` and write it to disk.
    /// Returns the file path on success.
    pub fn save(&self, summary: &RunSummary) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{}.json", summary.run_id));

        let timeline = self.lock();
        let output = SerializedRunLog {
            run_id: &summary.run_id,
            started_at: self.started_at,
            finished_at: Utc::now(),
            summary,
            events: &timeline.events,
        };

        std::fs::write(&path, serde_json::to_string_pretty(&output)?)?;
        info!(path = %path.display(), events = timeline.events.len(), "Run log saved");

        Ok(path)
    }
}

impl ReportSink for RunLog {
    fn progress(&self, event: &ProgressEvent) {
        let mut timeline = self.lock();
        let kind = if timeline.last_status != Some(event.status) {
            let from = timeline.last_status.replace(event.status);
            EventKind::Transition {
                from,
                to: event.status,
                collected: event.collected_count,
            }
        } else {
            EventKind::Scroll {
                scroll_attempts: event.scroll_attempts,
                collected: event.collected_count,
            }
        };
        let seq = timeline.seq;
        timeline.events.push(RunEvent {
            seq,
            ts: event.at,
            kind,
        });
        timeline.seq += 1;
    }

    fn summary(&self, summary: &RunSummary) {
        if let Err(e) = self.save(summary) {
            warn!(run_id = %summary.run_id, error = %e, "Failed to save run log");
        }
    }
}

// ---------------------------------------------------------------------------
// Serialization wrapper
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct SerializedRunLog<'a> {
    run_id: &'a str,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    summary: &'a RunSummary,
    events: &'a [RunEvent],
}
