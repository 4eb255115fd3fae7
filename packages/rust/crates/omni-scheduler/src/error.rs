//! Error types for scheduling operations.
//!
//! Follows ODF-REP: Library crates use `thiserror` for explicit error enums.

use thiserror::Error;

/// Errors reported by one scheduling operation.
///
/// `E` is the error type produced by the scheduled jobs. Job failures are
/// kept as values so a multi-failure run can be diagnosed without re-running.
#[derive(Error, Debug)]
pub enum SchedulerError<E> {
    /// Exactly one job failed.
    #[error("job failed: {0}")]
    Job(E),

    /// Several jobs failed. `primary` is the last failure observed.
    #[error("{primary} (and {} other job failures)", .secondary.len())]
    Aggregate {
        /// Reported failure.
        primary: E,
        /// Remaining failures, in observation order.
        secondary: Vec<E>,
    },

    /// The caller cancelled the operation before it completed.
    #[error("scheduling operation cancelled")]
    Cancelled,

    /// A job or the job source panicked.
    #[error("job panicked: {0}")]
    Panicked(String),

    /// Concurrency limit of zero.
    #[error("invalid concurrency limit {0}: must be at least 1")]
    InvalidLimit(usize),
}

impl<E> SchedulerError<E> {
    /// The reported job failure, if this error carries one.
    #[must_use]
    pub fn primary(&self) -> Option<&E> {
        match self {
            Self::Job(error) | Self::Aggregate { primary: error, .. } => Some(error),
            _ => None,
        }
    }

    /// Every job failure carried by this error, primary last.
    #[must_use]
    pub fn failures(&self) -> Vec<&E> {
        match self {
            Self::Job(error) => vec![error],
            Self::Aggregate { primary, secondary } => {
                secondary.iter().chain(std::iter::once(primary)).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Whether the operation was cancelled by the caller.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
