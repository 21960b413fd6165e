use thiserror::Error;

pub type Result<T> = std::result::Result<T, BrowserlessError>;

#[derive(Debug, Error)]
pub enum BrowserlessError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response body: {0}")]
    Decode(String),
}

impl BrowserlessError {
    /// Rate limiting, server-side failures and timeouts usually clear up on their own.
    pub fn is_transient(&self) -> bool {
        match self {
            BrowserlessError::Network(_) | BrowserlessError::Timeout(_) => true,
            BrowserlessError::Api { status, .. } => *status == 408 || *status == 429 || *status >= 500,
            BrowserlessError::Decode(_) => false,
        }
    }
}

/// The request URL carries the API token, so it never makes it into the message.
impl From<reqwest::Error> for BrowserlessError {
    fn from(err: reqwest::Error) -> Self {
        let err = err.without_url();
        if err.is_timeout() {
            BrowserlessError::Timeout(err.to_string())
        } else if err.is_decode() {
            BrowserlessError::Decode(err.to_string())
        } else {
            BrowserlessError::Network(err.to_string())
        }
    }
}
