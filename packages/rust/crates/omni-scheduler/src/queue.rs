//! Bounded admission queue between the job feeder and the worker pool.
//!
//! Capacity equals the concurrency limit, so a slow pool suspends the
//! feeder instead of buffering the whole job source. Closing the sending side
//! is the end-of-input signal: a closed channel stays closed, so every idle
//! worker observes it.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

/// Build a queue of `capacity` slots. `capacity` must be at least 1.
pub(crate) fn admission_queue<J>(
    capacity: usize,
    cancel: CancellationToken,
) -> (QueueSender<J>, QueueReceiver<J>) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        QueueSender {
            tx,
            cancel: cancel.clone(),
        },
        QueueReceiver {
            rx: Arc::new(Mutex::new(rx)),
            cancel,
        },
    )
}

/// Feeder side. Dropping it broadcasts end-of-input.
pub(crate) struct QueueSender<J> {
    tx: mpsc::Sender<J>,
    cancel: CancellationToken,
}

impl<J> QueueSender<J> {
    /// Enqueue `job`, suspending while the queue is full.
    ///
    /// Hands the job back when it can never run: cancellation fired or every
    /// worker is gone.
    pub(crate) async fn put(&self, job: J) -> Result<(), J> {
        let permit = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(job),
            permit = self.tx.reserve() => permit,
        };
        match permit {
            Ok(permit) => {
                permit.send(job);
                Ok(())
            }
            Err(_) => Err(job),
        }
    }
}

/// Worker side, shared by every worker of one operation.
pub(crate) struct QueueReceiver<J> {
    rx: Arc<Mutex<mpsc::Receiver<J>>>,
    cancel: CancellationToken,
}

impl<J> Clone for QueueReceiver<J> {
    fn clone(&self) -> Self {
        Self {
            rx: Arc::clone(&self.rx),
            cancel: self.cancel.clone(),
        }
    }
}

impl<J> QueueReceiver<J> {
    /// Next job in FIFO order; `None` on end-of-input or cancellation.
    pub(crate) async fn get(&self) -> Option<J> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            job = async { self.rx.lock().await.recv().await } => job,
        }
    }
}
