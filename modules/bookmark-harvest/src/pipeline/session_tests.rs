use std::time::Duration;

use tokio::sync::watch;

use bookmark_common::{OpError, PipelineConfig};

use crate::dedup::DedupStore;
use crate::pipeline::session::{ExtractionSession, SessionOutcome};
use crate::pipeline::state::SessionStatus;
use crate::pipeline::stats::ProgressEvent;
use crate::resilience::Resilience;
use crate::testing::*;
use crate::traits::ReportSink;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn run_with(
    page: &ScriptedPage,
    dedup: &mut DedupStore,
    sink: &dyn ReportSink,
    config: &PipelineConfig,
) -> SessionOutcome {
    let resilience = Resilience::new(config);
    let (_tx, rx) = watch::channel(false);
    ExtractionSession::new(page, &resilience, dedup, sink, config)
        .run(rx)
        .await
}

async fn run(page: &ScriptedPage, config: &PipelineConfig) -> SessionOutcome {
    let sink = RecordingSink::new();
    run_with(page, &mut DedupStore::new(), &sink, config).await
}

fn ids(outcome: &SessionOutcome) -> Vec<&str> {
    outcome
        .state
        .collected
        .iter()
        .map(|r| r.id.as_str())
        .collect()
}

/// Flips the stop signal once `after` records have been collected.
struct StopAfter {
    after: usize,
    stop: watch::Sender<bool>,
}

impl ReportSink for StopAfter {
    fn progress(&self, event: &ProgressEvent) {
        if event.collected_count >= self.after {
            self.stop.send_replace(true);
        }
    }

    fn summary(&self, _summary: &crate::pipeline::stats::RunSummary) {}
}

// ---------------------------------------------------------------------------
// Stop conditions
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn overlapping_batches_collect_each_record_once() {
    let page = ScriptedPage::new(vec![raw_items(&["1", "2", "3"]), raw_items(&["2", "3", "4"])]);

    let outcome = run(&page, &test_config()).await;

    assert_eq!(ids(&outcome), vec!["1", "2", "3", "4"]);
    assert_eq!(outcome.state.status, SessionStatus::Completed);
    assert!(outcome.errors.is_empty(), "end of list is not an error");
}

#[tokio::test(start_paused = true)]
async fn end_of_list_after_no_new_limit() {
    let page = ScriptedPage::new(vec![raw_items(&["1", "2"])]);
    let config = PipelineConfig {
        no_new_items_limit: 3,
        ..test_config()
    };

    let outcome = run(&page, &config).await;

    assert_eq!(outcome.state.status, SessionStatus::Completed);
    assert_eq!(outcome.state.consecutive_no_new_items, 3);
    // One productive read plus three empty ones.
    assert_eq!(page.visible_calls(), 4);
    assert_eq!(ids(&outcome), vec!["1", "2"]);
}

#[tokio::test(start_paused = true)]
async fn target_reached_mid_batch_truncates() {
    let page = ScriptedPage::new(vec![raw_items(&["1", "2", "3"])]);
    let config = PipelineConfig {
        target_count: 2,
        ..test_config()
    };
    let mut dedup = DedupStore::new();
    let sink = RecordingSink::new();

    let outcome = run_with(&page, &mut dedup, &sink, &config).await;

    assert_eq!(outcome.state.status, SessionStatus::Completed);
    assert_eq!(ids(&outcome), vec!["1", "2"]);
    assert!(!dedup.has("3"), "truncated items stay unseen");
    assert_eq!(page.scroll_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn scroll_cap_stops_session() {
    let page = ScriptedPage::new(vec![
        raw_items(&["1"]),
        raw_items(&["2"]),
        raw_items(&["3"]),
        raw_items(&["4"]),
        raw_items(&["5"]),
    ]);
    let config = PipelineConfig {
        max_scroll_attempts: 3,
        no_new_items_limit: 10,
        ..test_config()
    };

    let outcome = run(&page, &config).await;

    assert_eq!(outcome.state.status, SessionStatus::Stopped);
    assert_eq!(outcome.state.scroll_attempts, 3);
    assert_eq!(ids(&outcome), vec!["1", "2", "3"]);
    assert!(outcome.errors.iter().any(|e| e.contains("scroll cap")));
}

#[tokio::test(start_paused = true)]
async fn stop_signal_before_start() {
    let page = ScriptedPage::new(vec![raw_items(&["1"])]);
    let config = test_config();
    let resilience = Resilience::new(&config);
    let sink = RecordingSink::new();
    let mut dedup = DedupStore::new();
    let (tx, rx) = watch::channel(false);
    tx.send_replace(true);

    let outcome = ExtractionSession::new(&page, &resilience, &mut dedup, &sink, &config)
        .run(rx)
        .await;

    assert_eq!(outcome.state.status, SessionStatus::Stopped);
    assert!(outcome.state.collected.is_empty());
    assert_eq!(page.visible_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn stop_signal_mid_run_keeps_collected() {
    let page = ScriptedPage::new(vec![raw_items(&["1", "2"]), raw_items(&["3"]), raw_items(&["4"])]);
    let config = test_config();
    let resilience = Resilience::new(&config);
    let mut dedup = DedupStore::new();
    let (tx, rx) = watch::channel(false);
    let sink = StopAfter { after: 2, stop: tx };

    let outcome = ExtractionSession::new(&page, &resilience, &mut dedup, &sink, &config)
        .run(rx)
        .await;

    assert_eq!(outcome.state.status, SessionStatus::Stopped);
    assert_eq!(ids(&outcome), vec!["1", "2"]);
    assert!(outcome.errors.iter().any(|e| e.contains("stopped by request")));
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn permanent_scroll_error_fails_with_partial_results() {
    let page = ScriptedPage::new(vec![raw_items(&["1", "2"]), raw_items(&["3"])])
        .broken_scroll(OpError::AuthenticationRequired);

    let outcome = run(&page, &test_config()).await;

    assert_eq!(outcome.state.status, SessionStatus::Failed);
    assert_eq!(ids(&outcome), vec!["1", "2"]);
    assert_eq!(page.scroll_calls(), 1, "permanent errors are not retried");
    assert!(outcome.errors[0].starts_with("scroll_or_advance"));
}

#[tokio::test(start_paused = true)]
async fn transient_read_errors_are_retried() {
    let page = ScriptedPage::new(vec![raw_items(&["1"])]).fail_visible(vec![
        OpError::Network("connection reset".into()),
        OpError::Detached("article[0]".into()),
    ]);

    let outcome = run(&page, &test_config()).await;

    assert_eq!(outcome.state.status, SessionStatus::Completed);
    assert_eq!(ids(&outcome), vec!["1"]);
    assert!(outcome.errors.is_empty());
}

#[tokio::test(start_paused = true)]
async fn deep_reads_get_a_longer_time_bound() {
    // By the fifth batch a read takes 4 x 400ms, past the 1s base bound.
    let page = ScriptedPage::new(vec![
        raw_items(&["1"]),
        raw_items(&["2"]),
        raw_items(&["3"]),
        raw_items(&["4"]),
        raw_items(&["5"]),
    ])
    .slow_reads(Duration::from_millis(400));
    let config = PipelineConfig {
        operation_timeout_ms: 1_000,
        retry_max_attempts: 1,
        no_new_items_limit: 1,
        ..test_config()
    };

    let outcome = run(&page, &config).await;

    assert_eq!(outcome.state.status, SessionStatus::Completed);
    assert_eq!(ids(&outcome), vec!["1", "2", "3", "4", "5"]);
    assert!(outcome.errors.is_empty());
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_fail_session() {
    let page = ScriptedPage::new(vec![raw_items(&["1"]), raw_items(&["2"])])
        .broken_scroll(OpError::Timeout("scroll".into()));

    let outcome = run(&page, &test_config()).await;

    assert_eq!(outcome.state.status, SessionStatus::Failed);
    assert_eq!(page.scroll_calls(), 3);
    assert_eq!(ids(&outcome), vec!["1"]);
}

#[tokio::test(start_paused = true)]
async fn breaker_tripping_mid_retry_fails_session() {
    let page = ScriptedPage::new(vec![raw_items(&["1"])]).fail_visible(vec![
        OpError::Network("503".into()),
        OpError::Network("503".into()),
    ]);
    let config = PipelineConfig {
        retry_max_attempts: 5,
        circuit_failure_threshold: 2,
        ..test_config()
    };

    let outcome = run(&page, &config).await;

    assert_eq!(outcome.state.status, SessionStatus::Failed);
    assert!(outcome.errors[0].contains("Circuit open"));
    assert_eq!(page.visible_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn open_circuit_fails_before_touching_page() {
    let config = PipelineConfig {
        retry_max_attempts: 1,
        circuit_failure_threshold: 1,
        ..test_config()
    };
    let resilience = Resilience::new(&config);
    let _ = resilience
        .execute("is_authenticated", || async {
            Err::<(), _>(OpError::Network("refused".into()))
        })
        .await;
    assert!(resilience.is_open());

    let page = ScriptedPage::new(vec![raw_items(&["1"])]);
    let sink = RecordingSink::new();
    let mut dedup = DedupStore::new();
    let (_tx, rx) = watch::channel(false);
    let outcome = ExtractionSession::new(&page, &resilience, &mut dedup, &sink, &config)
        .run(rx)
        .await;

    assert_eq!(outcome.state.status, SessionStatus::Failed);
    assert_eq!(page.visible_calls(), 0);
}

// ---------------------------------------------------------------------------
// Normalization and dedup
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn malformed_items_are_skipped() {
    let mut batch = raw_items(&["1"]);
    batch.push(malformed_item());
    batch.extend(raw_items(&["2"]));
    let page = ScriptedPage::new(vec![batch]);

    let outcome = run(&page, &test_config()).await;

    assert_eq!(ids(&outcome), vec!["1", "2"]);
    // Re-read on every empty iteration, skipped again each time.
    assert_eq!(outcome.skipped, page.visible_calls() as usize);
}

#[tokio::test(start_paused = true)]
async fn primed_store_suppresses_known_records() {
    let page = ScriptedPage::new(vec![raw_items(&["1", "2", "3"])]);
    let mut dedup = DedupStore::primed(&[bookmark("1"), bookmark("3")]);
    let sink = RecordingSink::new();

    let outcome = run_with(&page, &mut dedup, &sink, &test_config()).await;

    assert_eq!(ids(&outcome), vec!["2"]);
    assert_eq!(dedup.len(), 3);
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn progress_tracks_transitions_and_scrolls() {
    let page = ScriptedPage::new(vec![raw_items(&["1", "2"]), raw_items(&["3"])]);
    let sink = RecordingSink::new();

    let outcome = run_with(&page, &mut DedupStore::new(), &sink, &test_config()).await;
    let events = sink.events();

    assert_eq!(events.first().map(|e| e.status), Some(SessionStatus::Running));
    assert_eq!(events.last().map(|e| e.status), Some(SessionStatus::Completed));
    assert_eq!(events.last().map(|e| e.collected_count), Some(3));
    assert!(events
        .windows(2)
        .all(|w| w[0].collected_count <= w[1].collected_count));
    // Running + one per scroll + terminal.
    assert_eq!(events.len(), outcome.state.scroll_attempts as usize + 2);
}
