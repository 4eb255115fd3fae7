//! Worker loop and the result sink it feeds.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::lifecycle::panic_message;
use crate::outcome::Outcome;
use crate::queue::{QueueReceiver, QueueSender};

/// What a worker deposits into the result sink for one executed job.
#[derive(Debug)]
pub(crate) enum Settlement<T, E> {
    /// The job ran to completion.
    Finished(Outcome<T, E>),
    /// The job panicked; the worker survived.
    Panicked(String),
}

/// Pull jobs from `jobs` until end-of-input, handing each to the queue.
pub(crate) async fn feed<I, F>(jobs: I, queue: QueueSender<F>)
where
    I: Iterator<Item = F>,
{
    let mut fed = 0_usize;
    for job in jobs {
        if queue.put(job).await.is_err() {
            tracing::debug!(fed, "job feeder stopped early");
            return;
        }
        fed += 1;
    }
    tracing::trace!(fed, "job source exhausted");
}

/// Execute jobs one at a time until end-of-input or cancellation.
///
/// A job's failure or panic never ends the loop. Outcomes settled after
/// cancellation are discarded.
pub(crate) async fn run_worker<F, T, E>(
    worker: usize,
    queue: QueueReceiver<F>,
    sink: mpsc::Sender<Settlement<T, E>>,
    cancel: CancellationToken,
) where
    F: Future<Output = Result<T, E>>,
{
    let mut executed = 0_usize;
    while let Some(job) = queue.get().await {
        let settled = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            settled = AssertUnwindSafe(job).catch_unwind() => settled,
        };
        executed += 1;

        let settlement = match settled {
            Ok(result) => Settlement::Finished(Outcome::from(result)),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::warn!(worker, panic = %message, "job panicked");
                Settlement::Panicked(message)
            }
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            sent = sink.send(settlement) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }
    tracing::trace!(worker, executed, "worker exiting");
}
