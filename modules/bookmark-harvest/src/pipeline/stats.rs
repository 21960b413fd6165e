use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::pipeline::state::SessionStatus;
use crate::resilience::HealthState;

/// Emitted on every session transition and after every scroll iteration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub collected_count: usize,
    pub scroll_attempts: u32,
    pub status: SessionStatus,
    pub at: DateTime<Utc>,
}

/// Outcome of one pipeline run. Always produced once the session check passes,
/// whatever happened afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    /// Records in the persisted dataset (prior output plus this run).
    pub total_extracted: usize,
    pub new_in_this_run: usize,
    /// Raw items dropped by the normalizer.
    pub skipped: usize,
    pub status: SessionStatus,
    pub duration_ms: u64,
    pub errors: Vec<String>,
    pub health: HealthState,
}

impl RunSummary {
    pub fn is_degraded(&self) -> bool {
        !self.errors.is_empty()
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Bookmark Harvest Complete ===")?;
        writeln!(f, "Run:              {}", self.run_id)?;
        writeln!(f, "Status:           {}", self.status)?;
        writeln!(f, "New this run:     {}", self.new_in_this_run)?;
        writeln!(f, "Total in dataset: {}", self.total_extracted)?;
        writeln!(f, "Skipped items:    {}", self.skipped)?;
        writeln!(
            f,
            "Duration:         {:.1}s",
            self.duration_ms as f64 / 1000.0
        )?;
        writeln!(
            f,
            "Circuit:          {:?} ({} consecutive failures)",
            self.health.circuit_state, self.health.consecutive_failures
        )?;
        if !self.errors.is_empty() {
            writeln!(f, "\nErrors:")?;
            for error in &self.errors {
                writeln!(f, "  - {error}")?;
            }
        }
        Ok(())
    }
}
