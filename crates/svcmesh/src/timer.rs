//! # Timer Service
//!
//! One-shot delayed tasks on the tokio runtime, cancelled by handle.
//!
//! Cancelling only stops tasks that have not run yet. Anything a task already
//! queued elsewhere (e.g. a synthetic timeout on a lane) stays queued; consumers
//! must tolerate that.

use std::time::Duration;

use tokio::task::JoinHandle;

/// Schedules delayed tasks.
#[derive(Clone, Copy, Debug, Default)]
pub struct Timer;

impl Timer {
    pub fn new() -> Self {
        Self
    }

    /// Runs `task` after `delay` unless cancelled first.
    pub fn schedule<F>(&self, delay: Duration, task: F) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let join = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task();
        });
        TimerHandle { join }
    }
}

/// A scheduled task. Dropping the handle does not cancel it.
#[derive(Debug)]
pub struct TimerHandle {
    join: JoinHandle<()>,
}

impl TimerHandle {
    pub fn cancel(&self) {
        self.join.abort();
    }

    /// True once the task ran or was cancelled.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}
