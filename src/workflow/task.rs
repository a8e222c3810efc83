//! Cancellable periodic background task.

use std::future::Future;
use std::ops::ControlFlow;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::debug;

/// Handle to a periodic task.
///
/// The task stops when its tick returns `ControlFlow::Break`, when
/// [`cancel`](Self::cancel) is called, or when the handle is dropped.
#[derive(Debug)]
pub struct TaskHandle {
    name: &'static str,
    join: JoinHandle<()>,
}

impl TaskHandle {
    /// Run `tick` every `period`, first after one full period.
    pub fn spawn_periodic<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send + 'static,
    {
        let join = tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if tick().await.is_break() {
                    break;
                }
            }
            debug!(task = name, "Periodic task finished");
        });

        Self { name, join }
    }

    /// Stop the task. No tick starts after this returns.
    pub fn cancel(&self) {
        if !self.join.is_finished() {
            debug!(task = self.name, "Cancelling periodic task");
        }
        self.join.abort();
    }

    /// Cancel and wait until the task is gone.
    pub async fn shutdown(&mut self) {
        self.cancel();
        let _ = (&mut self.join).await;
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.join.abort();
    }
}
