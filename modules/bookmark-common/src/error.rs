use thiserror::Error;

/// A raw item could not be turned into a bookmark record. The item is skipped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizationError {
    #[error("Item has no identifier")]
    MissingIdentity,

    #[error("Item {id} has neither text nor media")]
    EmptyContent { id: String },
}

/// Failure of an externally-facing operation (page action, API call).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OpError {
    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Element detached: {0}")]
    Detached(String),

    #[error("Authentication required")]
    AuthenticationRequired,

    #[error("Malformed page: {0}")]
    MalformedPage(String),

    #[error("Circuit open: failing fast")]
    CircuitOpen,

    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<OpError> },
}

impl OpError {
    /// Timeouts, transport failures and detached references are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            OpError::Timeout(_) | OpError::Network(_) | OpError::Detached(_)
        )
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, OpError::CircuitOpen)
    }
}

/// Precondition failures. Everything else surfaces inside the run summary.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("No authenticated browsing session")]
    NotAuthenticated,

    #[error("Session check failed: {0}")]
    SessionCheck(OpError),

    #[error("Configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_kinds() {
        assert!(OpError::Timeout("nav".into()).is_transient());
        assert!(OpError::Network("reset".into()).is_transient());
        assert!(OpError::Detached("article".into()).is_transient());
        assert!(!OpError::AuthenticationRequired.is_transient());
        assert!(!OpError::MalformedPage("no timeline".into()).is_transient());
        assert!(!OpError::CircuitOpen.is_transient());
    }
}
