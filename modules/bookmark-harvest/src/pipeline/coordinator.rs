use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use bookmark_common::{BookmarkDocument, OpError, PipelineConfig, PipelineError};

use crate::dedup::DedupStore;
use crate::pipeline::session::ExtractionSession;
use crate::pipeline::stats::RunSummary;
use crate::resilience::Resilience;
use crate::traits::{BookmarkStorage, PageSource, ReportSink, SessionProbe};

/// Orchestrates a full run: session check → prime dedup → extract → persist → summarize.
///
/// The only component that talks to collaborators. Each `run` builds its own
/// dedup store and resilience controller, so independent pipelines share no
/// mutable state.
pub struct Pipeline {
    page: Arc<dyn PageSource>,
    session: Arc<dyn SessionProbe>,
    storage: Arc<dyn BookmarkStorage>,
    sink: Arc<dyn ReportSink>,
}

impl Pipeline {
    pub fn new(
        page: Arc<dyn PageSource>,
        session: Arc<dyn SessionProbe>,
        storage: Arc<dyn BookmarkStorage>,
        sink: Arc<dyn ReportSink>,
    ) -> Self {
        Self {
            page,
            session,
            storage,
            sink,
        }
    }

    /// Run to completion. Only precondition failures come back as `Err`;
    /// everything after the session check is reported in the summary, and
    /// whatever was collected is persisted.
    pub async fn run(
        &self,
        config: &PipelineConfig,
        stop: watch::Receiver<bool>,
    ) -> Result<RunSummary, PipelineError> {
        config.validate()?;

        let started = Instant::now();
        let run_id = Uuid::new_v4().to_string();
        let resilience = Resilience::new(config);

        let probe = self.session.as_ref();
        match resilience
            .execute("is_authenticated", || probe.is_authenticated())
            .await
        {
            Ok(true) => info!(run_id, "Session authenticated"),
            Ok(false) | Err(OpError::AuthenticationRequired) => {
                warn!(run_id, "No logged-in session, aborting before extraction");
                return Err(PipelineError::NotAuthenticated);
            }
            Err(e) => return Err(PipelineError::SessionCheck(e)),
        }

        let mut errors = Vec::new();
        let mut prior_unreadable = false;

        let prior = if config.resume {
            match self.storage.load_prior_output().await {
                Ok(records) => {
                    info!(run_id, prior = records.len(), "Loaded prior output");
                    records
                }
                Err(e) => {
                    warn!(run_id, error = %e, "Could not load prior output, starting fresh");
                    errors.push(format!("load prior output: {e:#}"));
                    prior_unreadable = true;
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let mut dedup = DedupStore::primed(&prior);
        let outcome = ExtractionSession::new(
            self.page.as_ref(),
            &resilience,
            &mut dedup,
            self.sink.as_ref(),
            config,
        )
        .run(stop)
        .await;
        errors.extend(outcome.errors);

        let status = outcome.state.status;
        let new_in_this_run = outcome.state.collected.len();

        let mut bookmarks = prior;
        bookmarks.extend(outcome.state.collected);
        let document = BookmarkDocument::new(bookmarks, Utc::now());

        // Never write over output that could not be read back.
        let saved = if prior_unreadable {
            self.storage
                .persist_recovery(&document, &run_id)
                .await
                .map(|location| {
                    errors.push(format!(
                        "prior output left untouched, this run saved to {location}"
                    ));
                })
        } else {
            self.storage.persist(&document).await
        };
        if let Err(e) = saved {
            warn!(run_id, error = %e, "Failed to persist bookmarks");
            errors.push(format!("persist: {e:#}"));
        }

        let summary = RunSummary {
            run_id,
            total_extracted: document.count,
            new_in_this_run,
            skipped: outcome.skipped,
            status,
            duration_ms: started.elapsed().as_millis() as u64,
            errors,
            health: resilience.health(),
        };

        info!(
            run_id = %summary.run_id,
            status = %summary.status,
            new = summary.new_in_this_run,
            total = summary.total_extracted,
            errors = summary.errors.len(),
            "Run complete"
        );
        self.sink.summary(&summary);

        Ok(summary)
    }
}
