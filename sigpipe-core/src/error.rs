//! Error types for pipeline construction.

use thiserror::Error;

/// Errors raised while building a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipeError {
    /// `skip` or `take` was given a count of zero.
    #[error("{operator}({count}): count must be greater than zero")]
    InvalidCount {
        /// Operator that rejected the count.
        operator: &'static str,
        /// The count that was passed.
        count: usize,
    },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PipeError>;

/// Reject a zero count for `operator`.
pub(crate) fn positive_count(operator: &'static str, count: usize) -> Result<usize> {
    if count == 0 {
        return Err(PipeError::InvalidCount { operator, count });
    }
    Ok(count)
}
