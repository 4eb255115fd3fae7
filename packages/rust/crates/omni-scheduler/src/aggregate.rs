//! Folding the failures of one operation into a single reported error.
//!
//! The last failure observed is reported; earlier ones ride along as
//! secondary entries and are logged, never dropped. Caller cancellation
//! outranks a panic, which outranks plain job failures.

use std::fmt::Display;

use crate::error::SchedulerError;

/// Fold `failures` (in observation order) into one error.
///
/// Returns `None` when nothing failed.
pub fn aggregate<E: Display>(mut failures: Vec<E>) -> Option<SchedulerError<E>> {
    let primary = failures.pop()?;
    if failures.is_empty() {
        return Some(SchedulerError::Job(primary));
    }
    tracing::warn!(
        primary = %primary,
        secondary = ?render(&failures),
        "scheduler got multiple errors"
    );
    Some(SchedulerError::Aggregate {
        primary,
        secondary: failures,
    })
}

/// Pick the error an operation reports, applying reporting priority.
pub(crate) fn report<E: Display>(
    failures: Vec<E>,
    panic: Option<String>,
    cancelled: bool,
) -> Option<SchedulerError<E>> {
    let outranking = if cancelled {
        SchedulerError::Cancelled
    } else if let Some(message) = panic {
        SchedulerError::Panicked(message)
    } else {
        return aggregate(failures);
    };

    if !failures.is_empty() {
        tracing::warn!(
            reported = %outranking,
            failures = ?render(&failures),
            "job failures outranked"
        );
    }
    Some(outranking)
}

fn render<E: Display>(failures: &[E]) -> Vec<String> {
    failures.iter().map(ToString::to_string).collect()
}
