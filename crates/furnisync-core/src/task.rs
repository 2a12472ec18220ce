//! Cancellable background workers.
//!
//! A [`Worker`] owns a Tokio task and the sending half of a shutdown
//! [`watch`] channel; the task receives a [`Shutdown`] token and must make
//! every sleep and wait through it, so cancelling interrupts a worker parked
//! in a delay instead of letting it wake up and act on state that has moved
//! on. Dropping a worker cancels it.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::SyncError;

/// The worker was asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("worker cancelled")]
pub struct Cancelled;

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

/// Cancellation token handed to a worker task.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation is requested or the owning [`Worker`] is gone.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Sleep for `duration` unless cancelled first.
    pub async fn sleep(&mut self, duration: Duration) -> Result<(), Cancelled> {
        self.sleep_until(Instant::now() + duration).await
    }

    /// Sleep until `deadline` unless cancelled first.
    pub async fn sleep_until(&mut self, deadline: Instant) -> Result<(), Cancelled> {
        self.run(tokio::time::sleep_until(deadline)).await
    }

    /// Drive `future` to completion unless cancelled first.
    pub async fn run<F: Future>(&mut self, future: F) -> Result<F::Output, Cancelled> {
        if self.is_cancelled() {
            return Err(Cancelled);
        }
        tokio::select! {
            output = future => Ok(output),
            _ = self.cancelled() => Err(Cancelled),
        }
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Handle to a cancellable background task.
pub struct Worker<T> {
    name: &'static str,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<T>,
}

impl<T: Send + 'static> Worker<T> {
    /// Spawn `task` on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn spawn<F, Fut>(name: &'static str, task: F) -> Self
    where
        F: FnOnce(Shutdown) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (shutdown_tx, rx) = watch::channel(false);
        let handle = tokio::spawn(task(Shutdown { rx }));
        tracing::trace!("Spawned worker '{}'", name);
        Self {
            name,
            shutdown_tx,
            handle,
        }
    }
}

impl<T> Worker<T> {
    /// Name given at spawn time.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Ask the task to stop at its next suspension point.
    pub fn cancel(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Whether the task has returned.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the task to return.
    pub async fn join(self) -> Result<T, SyncError> {
        let Worker {
            name,
            shutdown_tx: _shutdown_tx,
            handle,
        } = self;
        handle.await.map_err(|e| {
            if e.is_panic() {
                SyncError::WorkerPanicked(name)
            } else {
                SyncError::Cancelled
            }
        })
    }

    /// Cancel the task and wait until it has released everything it holds.
    pub async fn cancel_and_wait(self) -> Result<T, SyncError> {
        self.cancel();
        self.join().await
    }
}

// ---------------------------------------------------------------------------
// Pacer
// ---------------------------------------------------------------------------

/// Enforces a minimum spacing between consecutive requests.
#[derive(Debug, Clone)]
pub struct Pacer {
    spacing: Duration,
    last: Option<Instant>,
}

impl Pacer {
    /// Create a pacer whose first turn is immediate.
    pub fn new(spacing: Duration) -> Self {
        Self {
            spacing,
            last: None,
        }
    }

    /// Wait until `spacing` has passed since the previous turn, then take
    /// the turn.
    pub async fn wait_turn(&mut self, shutdown: &mut Shutdown) -> Result<(), Cancelled> {
        if let Some(last) = self.last {
            shutdown.sleep_until(last + self.spacing).await?;
        } else if shutdown.is_cancelled() {
            return Err(Cancelled);
        }
        self.last = Some(Instant::now());
        Ok(())
    }
}
