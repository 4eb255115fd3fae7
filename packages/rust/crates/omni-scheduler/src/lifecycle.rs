//! Lifecycle coordinator for the background tasks of one operation.
//!
//! A [`TaskScope`] owns the feeder and worker tasks together with the
//! cancellation signal they watch. Teardown always cancels, aborts and joins
//! every task; dropping the scope is the cleanup path for exits that cannot
//! await (early consumer drop, `?` propagation, unwinding, the outer future
//! being dropped).

use std::any::Any;
use std::future::Future;

use thiserror::Error;
use tokio::task::{AbortHandle, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

/// A tracked task panicked instead of finishing or being cancelled.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("background task panicked: {message}")]
pub struct TaskPanic {
    /// Panic payload rendered as text.
    pub message: String,
}

impl TaskPanic {
    fn from_join_error(error: JoinError) -> Self {
        let message = match error.try_into_panic() {
            Ok(payload) => panic_message(payload.as_ref()),
            Err(error) => error.to_string(),
        };
        Self { message }
    }
}

/// Render a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Owns every background task of one scheduling operation.
#[derive(Debug)]
pub struct TaskScope {
    cancel: CancellationToken,
    tasks: JoinSet<()>,
    shutdown: Option<Result<(), TaskPanic>>,
}

impl Default for TaskScope {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskScope {
    /// Create a scope with its own cancellation signal.
    #[must_use]
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    /// Create a scope cancelled whenever `parent` is.
    ///
    /// Shutting the scope down never cancels `parent`.
    #[must_use]
    pub fn with_parent(parent: &CancellationToken) -> Self {
        Self::with_token(parent.child_token())
    }

    fn with_token(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            tasks: JoinSet::new(),
            shutdown: None,
        }
    }

    /// Cancellation signal shared with the tracked tasks.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Register and start one background task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<F>(&mut self, task: F) -> AbortHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(task)
    }

    /// Number of tracked tasks not yet joined.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether every tracked task has been joined.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Whether [`TaskScope::shutdown`] has completed.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_some()
    }

    /// Wait for the next tracked task to finish.
    ///
    /// Cancelled tasks count as finished. Returns `None` once nothing is tracked.
    pub async fn join_next(&mut self) -> Option<Result<(), TaskPanic>> {
        let joined = self.tasks.join_next().await?;
        Some(match joined {
            Ok(()) => Ok(()),
            Err(error) if error.is_cancelled() => Ok(()),
            Err(error) => Err(TaskPanic::from_join_error(error)),
        })
    }

    /// Cancel every tracked task and wait until all of them have terminated.
    ///
    /// Cancellation-induced terminations are swallowed; the first panic is
    /// reported. Later calls return the result of the first one.
    ///
    /// # Errors
    ///
    /// Returns [`TaskPanic`] when a tracked task panicked.
    pub async fn shutdown(&mut self) -> Result<(), TaskPanic> {
        if let Some(result) = &self.shutdown {
            return result.clone();
        }

        self.cancel.cancel();
        self.tasks.abort_all();

        let mut first_panic = None;
        while let Some(joined) = self.join_next().await {
            if let Err(panic) = joined {
                tracing::error!(error = %panic, "scheduler task crashed");
                first_panic.get_or_insert(panic);
            }
        }

        let result = first_panic.map_or(Ok(()), Err);
        self.shutdown = Some(result.clone());
        result
    }
}

impl Drop for TaskScope {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.tasks.abort_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_variants() {
        let text: Box<dyn Any + Send> = Box::new("static");
        let owned: Box<dyn Any + Send> = Box::new("owned".to_string());
        let other: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(text.as_ref()), "static");
        assert_eq!(panic_message(owned.as_ref()), "owned");
        assert_eq!(panic_message(other.as_ref()), "unknown panic payload");
    }

    #[tokio::test]
    async fn test_child_scope_follows_parent() {
        let parent = CancellationToken::new();
        let mut scope = TaskScope::with_parent(&parent);
        parent.cancel();
        assert!(scope.token().is_cancelled());
        assert_eq!(scope.shutdown().await, Ok(()));
    }

    #[tokio::test]
    async fn test_shutdown_does_not_cancel_parent() {
        let parent = CancellationToken::new();
        let mut scope = TaskScope::with_parent(&parent);
        scope.spawn(async {});
        assert_eq!(scope.shutdown().await, Ok(()));
        assert!(!parent.is_cancelled());
    }
}
