pub mod coordinator;
pub mod session;
pub mod state;
pub mod stats;

#[cfg(test)]
mod session_tests;

pub use coordinator::Pipeline;
pub use session::{ExtractionSession, SessionOutcome};
pub use state::{ExtractionState, SessionStatus};
pub use stats::{ProgressEvent, RunSummary};
