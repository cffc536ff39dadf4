//! Cancellable background tasks.
//!
//! A [`TaskHandle`] pairs a spawned tokio task with a one-shot shutdown signal.
//! `stop().await` fires the signal and then waits for the task to finish, so once
//! it returns the task body can no longer run. Stopping twice is a no-op.
//!
//! Task bodies race every await point against [`Shutdown::wait`]:
//!
//! ```rust,ignore
//! let handle = TaskHandle::spawn("ticker", |mut shutdown| async move {
//!     let mut interval = tokio::time::interval(period);
//!     loop {
//!         tokio::select! {
//!             biased;
//!             _ = shutdown.wait() => break,
//!             _ = interval.tick() => on_tick(),
//!         }
//!     }
//! });
//! ```

use std::future::Future;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Receiving side of a task's shutdown signal.
#[derive(Debug)]
pub struct Shutdown {
    rx: oneshot::Receiver<()>,
    fired: bool,
}

impl Shutdown {
    /// Resolves once shutdown was requested (or the handle was dropped).
    ///
    /// Safe to await repeatedly; after the first completion it resolves immediately.
    pub async fn wait(&mut self) {
        if self.fired {
            return;
        }
        // A dropped sender means the owner is gone, which is also a shutdown.
        let _ = (&mut self.rx).await;
        self.fired = true;
    }
}

/// Owner of one spawned task and its shutdown signal.
#[derive(Debug)]
pub struct TaskHandle {
    name: &'static str,
    shutdown: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl TaskHandle {
    /// Spawns `body` on the current tokio runtime.
    pub fn spawn<F, Fut>(name: &'static str, body: F) -> Self
    where
        F: FnOnce(Shutdown) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let join = tokio::spawn(body(Shutdown { rx, fired: false }));
        debug!(task = name, "Task spawned");
        Self {
            name,
            shutdown: Some(tx),
            join: Some(join),
        }
    }

    /// True until `stop` has completed or the task ended on its own.
    pub fn is_active(&self) -> bool {
        self.join.as_ref().is_some_and(|join| !join.is_finished())
    }

    /// Signals shutdown and waits for the task to exit.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            // The task may already have exited; nothing to signal then.
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            match join.await {
                Ok(()) => debug!(task = self.name, "Task stopped"),
                Err(err) if err.is_cancelled() => debug!(task = self.name, "Task cancelled"),
                Err(err) => warn!(task = self.name, error = %err, "Task ended abnormally"),
            }
        }
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            join.abort();
        }
    }
}
