//! Error taxonomy for the diagnostics pipeline.
//!
//! Kinds mirror the failure classes of the pipeline, not Rust type names:
//! recoverable ones (`InputInsufficient`, `DependencyUnavailable`,
//! `RepositoryError`) let a caller continue with a partial result;
//! `Misconfiguration` is fatal at process start; `InvariantViolation` means a
//! pipeline stage produced an internally-inconsistent value and must halt the
//! pass immediately.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiagnosticsError {
    /// Fewer bars than the stage's warm-up requires.
    #[error("insufficient input: {0}")]
    InputInsufficient(String),

    /// OHLC invariant violated or timestamps not strictly ascending. Rejected
    /// at the ingest boundary; should never reach pipeline stages.
    #[error("malformed input: {0}")]
    InputMalformed(String),

    /// An optional external collaborator (derivatives, spot price) failed.
    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),

    /// Persistence read or write failed.
    #[error("repository error: {0}")]
    RepositoryError(String),

    /// Configuration is internally inconsistent (weights not summing to 1.0,
    /// unknown timeframe in the target-TF matrix, etc). Surfaced at load
    /// time only.
    #[error("misconfiguration: {0}")]
    Misconfiguration(String),

    /// A stage produced a value outside its documented range. Indicates an
    /// internal bug; the pass must halt rather than persist the result.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

pub type DiagResult<T> = Result<T, DiagnosticsError>;
