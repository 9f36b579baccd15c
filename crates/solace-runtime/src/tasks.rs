//! Tracked fire-and-forget work.
//!
//! Alert delivery and portrait persistence must not hold up a user request,
//! but they should not be lost silently either. Tasks spawned here are kept
//! in a [`JoinSet`]: finished ones are reaped on every spawn, panics are
//! logged, and shutdown can wait for (or abort) what is still running.

use parking_lot::Mutex;
use std::future::Future;
use tokio::task::{JoinError, JoinSet};
use tracing::Instrument;

#[derive(Debug, Default)]
pub struct BackgroundTasks {
    set: Mutex<JoinSet<()>>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `fut` on the current runtime under a `background` span.
    pub fn spawn<F>(&self, label: &'static str, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut set = self.set.lock();
        while let Some(outcome) = set.try_join_next() {
            log_outcome(outcome);
        }
        set.spawn(fut.instrument(tracing::debug_span!("background", task = label)));
    }

    /// Number of tasks not yet reaped.
    pub fn len(&self) -> usize {
        self.set.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait for every in-flight task, including ones spawned meanwhile.
    pub async fn drain(&self) {
        loop {
            let mut set = std::mem::take(&mut *self.set.lock());
            if set.is_empty() {
                return;
            }
            while let Some(outcome) = set.join_next().await {
                log_outcome(outcome);
            }
        }
    }

    /// Abort whatever is still running and wait for it to unwind.
    pub async fn shutdown(&self) {
        let mut set = std::mem::take(&mut *self.set.lock());
        set.abort_all();
        while let Some(outcome) = set.join_next().await {
            log_outcome(outcome);
        }
    }
}

fn log_outcome(outcome: Result<(), JoinError>) {
    match outcome {
        Ok(()) => {}
        Err(err) if err.is_cancelled() => {
            tracing::debug!("Background task cancelled");
        }
        Err(err) => {
            tracing::error!(error = %err, "Background task panicked");
        }
    }
}
