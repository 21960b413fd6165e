pub mod browser;
pub mod dedup;
pub mod normalizer;
pub mod pipeline;
pub mod report;
pub mod resilience;
pub mod run_log;
pub mod storage;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;
