pub mod config;
pub mod error;
pub mod types;

pub use config::{AppConfig, PipelineConfig};
pub use error::{NormalizationError, OpError, PipelineError};
pub use types::*;
