use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Once;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::error::PipelineError;

/// Knobs recognized by the extraction pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Soft cap on records collected per run.
    pub target_count: usize,
    /// Safety cap on scroll iterations.
    pub max_scroll_attempts: u32,
    /// Consecutive iterations without a new record before the list counts as exhausted.
    pub no_new_items_limit: u32,
    pub retry_max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub circuit_failure_threshold: u32,
    pub circuit_cooldown_ms: u64,
    /// Upper bound for a single page action or API call.
    pub operation_timeout_ms: u64,
    /// Wait for lazy-loaded content after each scroll.
    pub scroll_settle_ms: u64,
    /// Prime the dedup store from prior output and extend that dataset.
    pub resume: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_count: 500,
            max_scroll_attempts: 200,
            no_new_items_limit: 5,
            retry_max_attempts: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 10_000,
            circuit_failure_threshold: 5,
            circuit_cooldown_ms: 30_000,
            operation_timeout_ms: 30_000,
            scroll_settle_ms: 1_500,
            resume: true,
        }
    }
}

impl PipelineConfig {
    /// Defaults overlaid with `HARVEST_*` environment variables.
    pub fn from_env() -> Result<Self> {
        load_dotenv();
        let d = Self::default();
        let config = Self {
            target_count: env_or("HARVEST_TARGET_COUNT", d.target_count)?,
            max_scroll_attempts: env_or("HARVEST_MAX_SCROLL_ATTEMPTS", d.max_scroll_attempts)?,
            no_new_items_limit: env_or("HARVEST_NO_NEW_ITEMS_LIMIT", d.no_new_items_limit)?,
            retry_max_attempts: env_or("HARVEST_RETRY_MAX_ATTEMPTS", d.retry_max_attempts)?,
            backoff_base_ms: env_or("HARVEST_BACKOFF_BASE_MS", d.backoff_base_ms)?,
            backoff_max_ms: env_or("HARVEST_BACKOFF_MAX_MS", d.backoff_max_ms)?,
            circuit_failure_threshold: env_or(
                "HARVEST_CIRCUIT_FAILURE_THRESHOLD",
                d.circuit_failure_threshold,
            )?,
            circuit_cooldown_ms: env_or("HARVEST_CIRCUIT_COOLDOWN_MS", d.circuit_cooldown_ms)?,
            operation_timeout_ms: env_or("HARVEST_OPERATION_TIMEOUT_MS", d.operation_timeout_ms)?,
            scroll_settle_ms: env_or("HARVEST_SCROLL_SETTLE_MS", d.scroll_settle_ms)?,
            resume: env_or("HARVEST_RESUME", d.resume)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), PipelineError> {
        if self.target_count == 0 {
            return Err(PipelineError::Config("target_count must be at least 1".into()));
        }
        if self.no_new_items_limit == 0 {
            return Err(PipelineError::Config("no_new_items_limit must be at least 1".into()));
        }
        if self.retry_max_attempts == 0 {
            return Err(PipelineError::Config("retry_max_attempts must be at least 1".into()));
        }
        if self.circuit_failure_threshold == 0 {
            return Err(PipelineError::Config(
                "circuit_failure_threshold must be at least 1".into(),
            ));
        }
        if self.backoff_max_ms < self.backoff_base_ms {
            return Err(PipelineError::Config(format!(
                "backoff_max_ms ({}) is below backoff_base_ms ({})",
                self.backoff_max_ms, self.backoff_base_ms
            )));
        }
        Ok(())
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    pub fn circuit_cooldown(&self) -> Duration {
        Duration::from_millis(self.circuit_cooldown_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn scroll_settle(&self) -> Duration {
        Duration::from_millis(self.scroll_settle_ms)
    }
}

/// Process-level configuration: where the browser lives and which session to use.
/// Secrets come from the environment (or `.env`), never from flags.
#[derive(Debug, Clone)]
pub struct AppConfig {
    // Browser
    pub browserless_url: String,
    pub browserless_token: Option<String>,

    // Session
    pub session_cookie: String,
    pub bookmarks_url: String,

    // Output
    pub data_dir: PathBuf,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        load_dotenv();

        let config = Self {
            browserless_url: required_env("BROWSERLESS_URL")?,
            browserless_token: env::var("BROWSERLESS_TOKEN").ok().filter(|t| !t.is_empty()),
            session_cookie: required_env("SESSION_COOKIE")?,
            bookmarks_url: env::var("BOOKMARKS_URL")
                .unwrap_or_else(|_| "https://x.com/i/bookmarks".to_string()),
            data_dir: data_dir(),
        };

        config.log_redacted();
        Ok(config)
    }

    /// Default location of the persisted bookmark document.
    pub fn output_path(&self) -> PathBuf {
        bookmarks_path(&self.data_dir)
    }

    pub fn log_redacted(&self) {
        fn preview(val: &str) -> String {
            let n = val.len().min(5);
            format!("{}...({} chars)", val.get(..n).unwrap_or_default(), val.len())
        }

        tracing::info!("Config loaded:");
        tracing::info!("  BROWSERLESS_URL: {}", self.browserless_url);
        tracing::info!(
            "  BROWSERLESS_TOKEN: {}",
            self.browserless_token
                .as_deref()
                .map(preview)
                .unwrap_or_else(|| "<not set>".to_string())
        );
        tracing::info!("  SESSION_COOKIE: {}", preview(&self.session_cookie));
        tracing::info!("  BOOKMARKS_URL: {}", self.bookmarks_url);
        tracing::info!("  DATA_DIR: {}", self.data_dir.display());
    }
}

/// Root data directory, controlled by `DATA_DIR` (default: `"data"`).
pub fn data_dir() -> PathBuf {
    load_dotenv();
    PathBuf::from(env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string()))
}

/// Where the bookmark document lives under a data directory.
pub fn bookmarks_path(data_dir: &Path) -> PathBuf {
    data_dir.join("bookmarks.json")
}

/// Load `.env` into the process environment, once.
fn load_dotenv() {
    static DOTENV: Once = Once::new();
    DOTENV.call_once(|| {
        dotenvy::dotenv().ok();
    });
}

fn required_env(key: &str) -> Result<String> {
    env::var(key).with_context(|| format!("{key} environment variable is required"))
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{key}={raw:?} is not valid: {e}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = PipelineConfig::default();
        assert_eq!(config.target_count, 500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_inverted_backoff_bounds() {
        let config = PipelineConfig {
            backoff_base_ms: 5_000,
            backoff_max_ms: 100,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));
    }

    #[test]
    fn output_path_shares_the_bookmarks_location() {
        let config = AppConfig {
            browserless_url: "http://chrome:3000".into(),
            browserless_token: None,
            session_cookie: "abc".into(),
            bookmarks_url: "https://x.com/i/bookmarks".into(),
            data_dir: PathBuf::from("/var/lib/harvest"),
        };
        assert_eq!(config.output_path(), bookmarks_path(Path::new("/var/lib/harvest")));
        assert_eq!(
            config.output_path(),
            PathBuf::from("/var/lib/harvest/bookmarks.json")
        );
    }

    #[test]
    fn rejects_zero_target() {
        let config = PipelineConfig {
            target_count: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
