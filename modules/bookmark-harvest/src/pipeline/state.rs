use serde::Serialize;

use bookmark_common::BookmarkRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Running,
    Completed,
    Stopped,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Stopped | SessionStatus::Failed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Stopped => "stopped",
            SessionStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-session progress. Owned and mutated by one `ExtractionSession` only.
#[derive(Debug, Clone)]
pub struct ExtractionState {
    /// Accepted records in extraction order.
    pub collected: Vec<BookmarkRecord>,
    pub scroll_attempts: u32,
    pub consecutive_no_new_items: u32,
    pub target_count: usize,
    pub status: SessionStatus,
}

impl ExtractionState {
    pub fn new(target_count: usize) -> Self {
        Self {
            collected: Vec::new(),
            scroll_attempts: 0,
            consecutive_no_new_items: 0,
            target_count,
            status: SessionStatus::Idle,
        }
    }

    pub fn target_reached(&self) -> bool {
        self.collected.len() >= self.target_count
    }

    pub fn remaining(&self) -> usize {
        self.target_count.saturating_sub(self.collected.len())
    }
}
