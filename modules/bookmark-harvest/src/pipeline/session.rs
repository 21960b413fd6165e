//! Extraction session: one scroll/harvest cycle over a page.
//!
//! `Idle → Running → {Completed, Stopped, Failed}`. Each iteration reads the
//! visible batch, normalizes and dedups it, then scrolls and waits for the
//! feed to render. The loop is strictly sequential: a scroll mutates the page
//! and must be read back before the next one.

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use bookmark_common::{OpError, PipelineConfig};

use crate::dedup::DedupStore;
use crate::normalizer::normalize;
use crate::pipeline::state::{ExtractionState, SessionStatus};
use crate::pipeline::stats::ProgressEvent;
use crate::resilience::Resilience;
use crate::traits::{PageSource, ReportSink};

/// What a session leaves behind once it reaches a terminal state.
#[derive(Debug)]
pub struct SessionOutcome {
    pub state: ExtractionState,
    pub errors: Vec<String>,
    pub skipped: usize,
}

pub struct ExtractionSession<'a> {
    page: &'a dyn PageSource,
    resilience: &'a Resilience,
    dedup: &'a mut DedupStore,
    sink: &'a dyn ReportSink,
    config: &'a PipelineConfig,
    state: ExtractionState,
    errors: Vec<String>,
    skipped: usize,
}

impl<'a> ExtractionSession<'a> {
    pub fn new(
        page: &'a dyn PageSource,
        resilience: &'a Resilience,
        dedup: &'a mut DedupStore,
        sink: &'a dyn ReportSink,
        config: &'a PipelineConfig,
    ) -> Self {
        Self {
            page,
            resilience,
            dedup,
            sink,
            config,
            state: ExtractionState::new(config.target_count),
            errors: Vec::new(),
            skipped: 0,
        }
    }

    /// Drive the session to a terminal state. `stop` is checked at the top of
    /// every iteration; flipping it to `true` ends the session as `Stopped`.
    pub async fn run(mut self, stop: watch::Receiver<bool>) -> SessionOutcome {
        self.state = ExtractionState::new(self.config.target_count);
        self.transition(SessionStatus::Running);
        info!(
            target_count = self.config.target_count,
            known_ids = self.dedup.len(),
            "Extraction session started"
        );

        loop {
            let stop_requested = *stop.borrow();
            if stop_requested {
                self.errors.push(format!(
                    "stopped by request after {} scroll attempts",
                    self.state.scroll_attempts
                ));
                self.transition(SessionStatus::Stopped);
                break;
            }
            if self.check_stop() {
                break;
            }

            if let Err(e) = self.harvest().await {
                self.fail("visible_items", e);
                break;
            }
            if self.check_stop() {
                break;
            }

            let (page, resilience) = (self.page, self.resilience);
            if let Err(e) = resilience
                .execute("scroll_or_advance", || page.scroll_or_advance())
                .await
            {
                self.fail("scroll_or_advance", e);
                break;
            }

            // Lazy-loaded cards need time to render before the next read.
            tokio::time::sleep(self.config.scroll_settle()).await;
            self.state.scroll_attempts += 1;
            self.emit();
        }

        info!(
            status = %self.state.status,
            collected = self.state.collected.len(),
            scroll_attempts = self.state.scroll_attempts,
            skipped = self.skipped,
            "Extraction session finished"
        );

        SessionOutcome {
            state: self.state,
            errors: self.errors,
            skipped: self.skipped,
        }
    }

    /// Read the visible batch and merge it. Returns the number of new records.
    async fn harvest(&mut self) -> Result<usize, OpError> {
        let (page, resilience) = (self.page, self.resilience);
        let timeout = page.read_timeout(resilience.operation_timeout());
        let batch = resilience
            .execute_with_timeout("visible_items", timeout, || page.visible_items())
            .await?;

        let extracted_at = Utc::now();
        let mut new_records = 0usize;

        for (idx, raw) in batch.iter().enumerate() {
            // Over-shoot is truncated: the rest of the batch is left unseen so
            // a later run can still pick it up.
            if self.state.target_reached() {
                debug!(dropped = batch.len() - idx, "Target reached mid-batch, truncating");
                break;
            }
            match normalize(raw, extracted_at) {
                Ok(record) => {
                    if self.dedup.accept(&record).is_new {
                        self.state.collected.push(record);
                        new_records += 1;
                    }
                }
                Err(e) => {
                    self.skipped += 1;
                    warn!(error = %e, "Skipping malformed item");
                }
            }
        }

        if new_records == 0 {
            self.state.consecutive_no_new_items += 1;
        } else {
            self.state.consecutive_no_new_items = 0;
        }

        debug!(
            batch_size = batch.len(),
            new_records,
            collected = self.state.collected.len(),
            no_new_streak = self.state.consecutive_no_new_items,
            "Harvested batch"
        );
        Ok(new_records)
    }

    /// Apply the stop conditions, first match wins. Returns true once terminal.
    fn check_stop(&mut self) -> bool {
        let next = if self.state.target_reached() {
            Some(SessionStatus::Completed)
        } else if self.state.consecutive_no_new_items >= self.config.no_new_items_limit {
            info!(
                streak = self.state.consecutive_no_new_items,
                "No new items after repeated scrolls, end of list"
            );
            Some(SessionStatus::Completed)
        } else if self.state.scroll_attempts >= self.config.max_scroll_attempts {
            self.errors.push(format!(
                "scroll cap of {} attempts reached before the list was exhausted",
                self.config.max_scroll_attempts
            ));
            Some(SessionStatus::Stopped)
        } else if self.resilience.is_open() {
            self.errors.push(OpError::CircuitOpen.to_string());
            Some(SessionStatus::Failed)
        } else {
            None
        };

        match next {
            Some(status) => {
                self.transition(status);
                true
            }
            None => false,
        }
    }

    fn fail(&mut self, op: &str, error: OpError) {
        warn!(op, error = %error, "Extraction session failed");
        self.errors.push(format!("{op}: {error}"));
        self.transition(SessionStatus::Failed);
    }

    fn transition(&mut self, status: SessionStatus) {
        debug!(from = %self.state.status, to = %status, "Session transition");
        self.state.status = status;
        self.emit();
    }

    fn emit(&self) {
        self.sink.progress(&ProgressEvent {
            collected_count: self.state.collected.len(),
            scroll_attempts: self.state.scroll_attempts,
            status: self.state.status,
            at: Utc::now(),
        });
    }
}
