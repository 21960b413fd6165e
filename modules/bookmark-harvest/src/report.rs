//! Report sinks: where progress events and the run summary go.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::pipeline::stats::{ProgressEvent, RunSummary};
use crate::traits::ReportSink;

/// Structured log lines for every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ReportSink for TracingSink {
    fn progress(&self, event: &ProgressEvent) {
        info!(
            status = %event.status,
            collected = event.collected_count,
            scroll_attempts = event.scroll_attempts,
            "Extraction progress"
        );
    }

    fn summary(&self, summary: &RunSummary) {
        if summary.is_degraded() {
            warn!(
                run_id = %summary.run_id,
                status = %summary.status,
                errors = ?summary.errors,
                "Run finished with errors"
            );
        } else {
            info!(run_id = %summary.run_id, status = %summary.status, "Run finished cleanly");
        }
    }
}

/// Publishes the latest progress and summary on watch channels, for callers
/// that poll status while the run is in flight.
pub struct WatchSink {
    progress: watch::Sender<Option<ProgressEvent>>,
    summary: watch::Sender<Option<RunSummary>>,
}

impl WatchSink {
    pub fn new() -> Self {
        Self {
            progress: watch::channel(None).0,
            summary: watch::channel(None).0,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<ProgressEvent>> {
        self.progress.subscribe()
    }

    pub fn subscribe_summary(&self) -> watch::Receiver<Option<RunSummary>> {
        self.summary.subscribe()
    }

    pub fn latest(&self) -> Option<ProgressEvent> {
        self.progress.borrow().clone()
    }
}

impl Default for WatchSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportSink for WatchSink {
    fn progress(&self, event: &ProgressEvent) {
        self.progress.send_replace(Some(event.clone()));
    }

    fn summary(&self, summary: &RunSummary) {
        self.summary.send_replace(Some(summary.clone()));
    }
}

/// Forwards every event to each inner sink, in order.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn ReportSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl ReportSink for FanoutSink {
    fn progress(&self, event: &ProgressEvent) {
        for sink in &self.sinks {
            sink.progress(event);
        }
    }

    fn summary(&self, summary: &RunSummary) {
        for sink in &self.sinks {
            sink.summary(summary);
        }
    }
}
