use thiserror::Error;

/// Errors surfaced by the simulation core.
///
/// Recoverable per-bar conditions (an entry the balance cannot support, a
/// skipped walk-forward window) are modeled as values on the relevant result
/// types, not as errors. Everything here is fatal for the single run that
/// raised it; batch layers contain these per worker.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad market data: empty series, non-monotonic timestamps, duplicate
    /// timestamps or non-finite prices.
    #[error("data error: {0}")]
    Data(String),

    /// Invalid configuration detected before any simulation work starts.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The run exceeded its deadline. Optimizer workers record this as a
    /// failed combination.
    #[error("run deadline exceeded")]
    Deadline,
}

pub type Result<T> = std::result::Result<T, EngineError>;
