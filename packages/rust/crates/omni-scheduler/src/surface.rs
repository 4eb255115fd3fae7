//! Completion surface: batch and streaming entry points.
//!
//! Every entry point runs the same pipeline:
//!
//! ```text
//! job source ─feed─▶ admission queue (L) ─get─▶ L workers ─send─▶ result sink (L)
//!                                                                       │
//!                           run_all / run_all_outcomes / Completions ◀──┘
//! ```
//!
//! The [`TaskScope`] owning the feeder and workers is torn down on every exit
//! path before the operation reports its result.

use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use futures::Stream;
use futures::future::BoxFuture;
use futures::stream::FusedStream;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use crate::aggregate;
use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::lifecycle::TaskScope;
use crate::outcome::Outcome;
use crate::queue::admission_queue;
use crate::worker::{Settlement, feed, run_worker};

/// Runs batches of jobs under one configuration.
///
/// A job is any `Send` future resolving to `Result<T, E>`. Jobs are pulled
/// lazily from the source, so it may be long or unbounded.
#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    config: SchedulerConfig,
    cancel: Option<CancellationToken>,
}

impl Scheduler {
    /// Create a scheduler.
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            cancel: None,
        }
    }

    /// Tie every operation to `token`: cancelling it aborts the operation
    /// with [`SchedulerError::Cancelled`].
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Run every job and return their values in completion order.
    ///
    /// `collect_failures` has no effect here; any job failure fails the call.
    ///
    /// # Errors
    ///
    /// Fails with the aggregated job failures once everything has settled
    /// (or unwound, with `cancel_on_first_failure`), with
    /// [`SchedulerError::Cancelled`] on caller cancellation, with
    /// [`SchedulerError::Panicked`] if a job panicked, and with
    /// [`SchedulerError::InvalidLimit`] for a bad limit.
    pub async fn run_all<I, F, T, E>(&self, jobs: I) -> Result<Vec<T>, SchedulerError<E>>
    where
        I: IntoIterator<Item = F>,
        I::IntoIter: Send + 'static,
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Display + Send + 'static,
    {
        let outcomes = self.collect(jobs, true).await?;
        Ok(outcomes.into_iter().filter_map(Outcome::value).collect())
    }

    /// Run every job and return every outcome, failures included, in
    /// completion order.
    ///
    /// With `cancel_on_first_failure` the list stops at the first failure.
    /// Failures are always collected, whatever `collect_failures` says.
    ///
    /// # Errors
    ///
    /// Job failures never produce an error here; only caller cancellation,
    /// a panicking job, or an invalid limit do. A panic is reported once
    /// every other job has settled.
    pub async fn run_all_outcomes<I, F, T, E>(
        &self,
        jobs: I,
    ) -> Result<Vec<Outcome<T, E>>, SchedulerError<E>>
    where
        I: IntoIterator<Item = F>,
        I::IntoIter: Send + 'static,
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Display + Send + 'static,
    {
        self.collect(jobs, false).await
    }

    /// Start the jobs and yield each value as soon as it is produced.
    ///
    /// Must be called from within a Tokio runtime. See [`Completions`] for
    /// how failures and early exit behave.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidLimit`] for a bad limit.
    pub fn stream<I, F, T, E>(&self, jobs: I) -> Result<Completions<T, E>, SchedulerError<E>>
    where
        I: IntoIterator<Item = F>,
        I::IntoIter: Send + 'static,
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Display + Send + 'static,
    {
        let state = match self.launch(jobs)? {
            Some(run) => {
                let cancelled = Box::pin(run.scope.token().clone().cancelled_owned());
                StreamState::Running { run, cancelled }
            }
            None => StreamState::Done,
        };
        Ok(Completions {
            state,
            collect_failures: self.config.collect_failures,
            cancel_on_first_failure: self.config.cancel_on_first_failure,
        })
    }

    async fn collect<I, F, T, E>(
        &self,
        jobs: I,
        raise: bool,
    ) -> Result<Vec<Outcome<T, E>>, SchedulerError<E>>
    where
        I: IntoIterator<Item = F>,
        I::IntoIter: Send + 'static,
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Display + Send + 'static,
    {
        let Some(mut run) = self.launch(jobs)? else {
            return Ok(Vec::new());
        };

        let mut outcomes = Vec::new();
        let mut failures = Vec::new();
        let mut panic = None;
        while let Some(settlement) = run.next_settlement().await {
            let outcome = match settlement {
                Settlement::Finished(outcome) => outcome,
                Settlement::Panicked(message) => {
                    panic.get_or_insert(message);
                    if self.config.cancel_on_first_failure {
                        tracing::debug!("cancelling remaining jobs after a panic");
                        run.scope.token().cancel();
                        break;
                    }
                    continue;
                }
            };

            let failed = outcome.is_failure();
            match outcome {
                Outcome::Failure(error) if raise => {
                    tracing::debug!(error = %error, "job failed");
                    failures.push(error);
                }
                outcome => outcomes.push(outcome),
            }

            if failed && self.config.cancel_on_first_failure {
                tracing::debug!("cancelling remaining jobs after first failure");
                run.scope.token().cancel();
                break;
            }
        }

        match run.finish(failures, panic).await {
            Some(error) => Err(error),
            None => Ok(outcomes),
        }
    }

    /// Spawn the feeder and the worker pool. `None` when there are no jobs.
    fn launch<I, F, T, E>(&self, jobs: I) -> Result<Option<Run<T, E>>, SchedulerError<E>>
    where
        I: IntoIterator<Item = F>,
        I::IntoIter: Send + 'static,
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let workers = self.config.worker_count()?;
        let mut jobs = jobs.into_iter().peekable();
        if jobs.peek().is_none() {
            return Ok(None);
        }

        let mut scope = match &self.cancel {
            Some(parent) => TaskScope::with_parent(parent),
            None => TaskScope::new(),
        };
        let token = scope.token().clone();
        let (queue_tx, queue_rx) = admission_queue(workers, token.clone());
        let (sink, results) = mpsc::channel(workers);

        scope.spawn(feed(jobs, queue_tx));
        for worker in 0..workers {
            scope.spawn(run_worker(
                worker,
                queue_rx.clone(),
                sink.clone(),
                token.clone(),
            ));
        }
        tracing::debug!(limit = self.config.limit, workers, "scheduler launched");

        Ok(Some(Run {
            scope,
            results,
            caller: self.cancel.clone(),
        }))
    }
}

/// One in-flight operation: its tasks and the receiving end of the sink.
struct Run<T, E> {
    scope: TaskScope,
    results: mpsc::Receiver<Settlement<T, E>>,
    caller: Option<CancellationToken>,
}

impl<T, E: Display> Run<T, E> {
    /// Next settlement; `None` once the workers are done or the operation
    /// was cancelled.
    async fn next_settlement(&mut self) -> Option<Settlement<T, E>> {
        tokio::select! {
            biased;
            () = self.scope.token().cancelled() => None,
            settlement = self.results.recv() => settlement,
        }
    }

    /// Tear down every task, then pick the error to report.
    async fn finish(mut self, failures: Vec<E>, panic: Option<String>) -> Option<SchedulerError<E>> {
        let cancelled = self
            .caller
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled);
        let panic = match self.scope.shutdown().await {
            Ok(()) => panic,
            Err(task_panic) => panic.or(Some(task_panic.message)),
        };
        tracing::debug!(cancelled, failures = failures.len(), "scheduler torn down");
        aggregate::report(failures, panic, cancelled)
    }
}

/// Values of a streaming operation, in completion order.
///
/// Each job failure is yielded as `Err(SchedulerError::Job(..))` at the point
/// its value would have been. Without `collect_failures` (or with
/// `cancel_on_first_failure`) the stream then tears down and ends; with it,
/// iteration continues and a panicking job is yielded as
/// `Err(SchedulerError::Panicked(..))` the same way. Otherwise a cancellation
/// or panic is yielded as a final `Err`.
///
/// The stream is fused: once exhausted it keeps returning `None`. Dropping it
/// early cancels and aborts the feeder and every worker;
/// [`Completions::close`] does the same and waits for them to terminate.
pub struct Completions<T, E> {
    state: StreamState<T, E>,
    collect_failures: bool,
    cancel_on_first_failure: bool,
}

enum StreamState<T, E> {
    Running {
        run: Run<T, E>,
        cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
    },
    Finishing(BoxFuture<'static, Option<SchedulerError<E>>>),
    Done,
}

enum Step<E> {
    Finish(Option<String>),
    Fail(SchedulerError<E>),
}

impl<T, E> std::fmt::Debug for Completions<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            StreamState::Running { .. } => "running",
            StreamState::Finishing(_) => "finishing",
            StreamState::Done => "done",
        };
        f.debug_struct("Completions")
            .field("state", &state)
            .field("collect_failures", &self.collect_failures)
            .field("cancel_on_first_failure", &self.cancel_on_first_failure)
            .finish()
    }
}

impl<T, E> Completions<T, E>
where
    T: Send + 'static,
    E: Display + Send + 'static,
{
    /// Stop consuming: cancel outstanding work and wait for every background
    /// task to terminate.
    ///
    /// # Errors
    ///
    /// Reports a panic from a background task, or an error the stream had
    /// already started reporting.
    pub async fn close(mut self) -> Result<(), SchedulerError<E>> {
        match std::mem::replace(&mut self.state, StreamState::Done) {
            StreamState::Running { mut run, .. } => run
                .scope
                .shutdown()
                .await
                .map_err(|panic| SchedulerError::Panicked(panic.message)),
            StreamState::Finishing(finish) => finish.await.map_or(Ok(()), Err),
            StreamState::Done => Ok(()),
        }
    }

    fn keeps_going(&self) -> bool {
        self.collect_failures && !self.cancel_on_first_failure
    }

    fn begin_finish(&mut self, panic: Option<String>) {
        if let StreamState::Running { run, .. } =
            std::mem::replace(&mut self.state, StreamState::Done)
        {
            run.scope.token().cancel();
            self.state = StreamState::Finishing(Box::pin(run.finish(Vec::new(), panic)));
        }
    }
}

impl<T, E> Stream for Completions<T, E>
where
    T: Send + 'static,
    E: Display + Send + 'static,
{
    type Item = Result<T, SchedulerError<E>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let keeps_going = this.keeps_going();
        loop {
            let step = match &mut this.state {
                StreamState::Done => return Poll::Ready(None),
                StreamState::Finishing(finish) => {
                    let reported = ready!(finish.as_mut().poll(cx));
                    this.state = StreamState::Done;
                    return Poll::Ready(reported.map(Err));
                }
                StreamState::Running { run, cancelled } => {
                    if cancelled.as_mut().poll(cx).is_ready() {
                        Step::Finish(None)
                    } else {
                        match ready!(run.results.poll_recv(cx)) {
                            None => Step::Finish(None),
                            Some(Settlement::Panicked(message)) if keeps_going => {
                                Step::Fail(SchedulerError::Panicked(message))
                            }
                            Some(Settlement::Panicked(message)) => Step::Finish(Some(message)),
                            Some(Settlement::Finished(Outcome::Value(value))) => {
                                return Poll::Ready(Some(Ok(value)));
                            }
                            Some(Settlement::Finished(Outcome::Failure(error))) => {
                                Step::Fail(SchedulerError::Job(error))
                            }
                        }
                    }
                }
            };

            match step {
                Step::Finish(panic) => this.begin_finish(panic),
                Step::Fail(error) => {
                    if !keeps_going {
                        this.begin_finish(None);
                    }
                    return Poll::Ready(Some(Err(error)));
                }
            }
        }
    }
}

impl<T, E> FusedStream for Completions<T, E>
where
    T: Send + 'static,
    E: Display + Send + 'static,
{
    fn is_terminated(&self) -> bool {
        matches!(self.state, StreamState::Done)
    }
}

/// Run `jobs` with at most `limit` executing at once; values in completion order.
///
/// # Errors
///
/// See [`Scheduler::run_all`].
pub async fn run_all<I, F, T, E>(jobs: I, limit: usize) -> Result<Vec<T>, SchedulerError<E>>
where
    I: IntoIterator<Item = F>,
    I::IntoIter: Send + 'static,
    F: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Display + Send + 'static,
{
    Scheduler::new(SchedulerConfig::with_limit(limit))
        .run_all(jobs)
        .await
}

/// Run `jobs` with at most `limit` executing at once; every outcome, failures included.
///
/// # Errors
///
/// See [`Scheduler::run_all_outcomes`].
pub async fn run_all_outcomes<I, F, T, E>(
    jobs: I,
    limit: usize,
) -> Result<Vec<Outcome<T, E>>, SchedulerError<E>>
where
    I: IntoIterator<Item = F>,
    I::IntoIter: Send + 'static,
    F: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Display + Send + 'static,
{
    Scheduler::new(SchedulerConfig::with_limit(limit))
        .run_all_outcomes(jobs)
        .await
}

/// Stream the values of `jobs` as they complete, at most `limit` at once.
///
/// # Errors
///
/// See [`Scheduler::stream`].
pub fn run_streaming<I, F, T, E>(jobs: I, limit: usize) -> Result<Completions<T, E>, SchedulerError<E>>
where
    I: IntoIterator<Item = F>,
    I::IntoIter: Send + 'static,
    F: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Display + Send + 'static,
{
    Scheduler::new(SchedulerConfig::with_limit(limit)).stream(jobs)
}
