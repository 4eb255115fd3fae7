//! Scheduler configuration.
//!
//! Resolution order mirrors the rest of the workspace: explicit value, then
//! environment variable, then built-in default.

use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;

/// Environment variable overriding the concurrency limit.
pub const LIMIT_ENV: &str = "OMNI_SCHEDULER_LIMIT";

/// Environment variable enabling fail-fast cancellation.
pub const CANCEL_ON_FIRST_FAILURE_ENV: &str = "OMNI_SCHEDULER_CANCEL_ON_FIRST_FAILURE";

/// Most workers one operation spawns. Larger limits run with this many,
/// which keeps concurrency below the requested ceiling.
pub const MAX_WORKERS: usize = 65_536;

/// Default concurrency limit: a quarter of the CPUs, never below 12.
#[must_use]
pub fn default_limit() -> usize {
    (num_cpus::get().max(4) / 4).max(12)
}

/// Knobs for one scheduling operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum number of jobs executing at once; also the admission queue capacity.
    pub limit: usize,
    /// Stop launching and executing remaining jobs once one fails.
    pub cancel_on_first_failure: bool,
    /// Streaming only: keep yielding after a failure instead of ending the stream.
    ///
    /// The batch calls ignore it; use [`crate::Scheduler::run_all_outcomes`]
    /// to collect failures in batch mode.
    pub collect_failures: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            cancel_on_first_failure: false,
            collect_failures: false,
        }
    }
}

impl SchedulerConfig {
    /// Default config with an explicit limit.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    /// Default config overridden by `OMNI_SCHEDULER_*` environment variables.
    ///
    /// Missing or malformed values fall back to the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(limit) = lookup(LIMIT_ENV).as_deref().and_then(parse_positive_usize) {
            config.limit = limit;
        }
        if let Some(flag) = lookup(CANCEL_ON_FIRST_FAILURE_ENV)
            .as_deref()
            .and_then(parse_flag)
        {
            config.cancel_on_first_failure = flag;
        }
        config
    }

    /// Number of workers (and queue slots) to run with.
    pub(crate) fn worker_count<E>(&self) -> Result<usize, SchedulerError<E>> {
        if self.limit == 0 {
            return Err(SchedulerError::InvalidLimit(self.limit));
        }
        Ok(self.limit.min(MAX_WORKERS))
    }
}

fn parse_positive_usize(raw: &str) -> Option<usize> {
    raw.trim().parse::<usize>().ok().filter(|value| *value > 0)
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
