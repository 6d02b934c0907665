//! Cancellable recurring task with a changeable period.
//!
//! The period lives in a `watch` channel. Changing it restarts the pending
//! wait; sending `None` stops the loop after any tick already running.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

pub struct ScheduledTask {
    name: &'static str,
    period_tx: watch::Sender<Option<Duration>>,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Spawn on the current runtime. The first tick fires one `period` from now.
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, tick: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (period_tx, mut period_rx) = watch::channel(Some(period));

        let handle = tokio::spawn(async move {
            loop {
                let Some(period) = *period_rx.borrow_and_update() else {
                    break;
                };

                tokio::select! {
                    _ = tokio::time::sleep(period) => {
                        tick().await;
                    }
                    changed = period_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!(task = name, "Scheduled task stopped");
        });

        debug!(task = name, period_ms = period.as_millis() as u64, "Scheduled task started");
        Self { name, period_tx, handle }
    }

    /// Change the period. A no-op if unchanged, so the pending wait is kept.
    pub fn set_period(&self, period: Duration) {
        let changed = self.period_tx.send_if_modified(|current| {
            if *current == Some(period) {
                false
            } else {
                *current = Some(period);
                true
            }
        });
        if changed {
            debug!(task = self.name, period_ms = period.as_millis() as u64, "Rescheduled");
        }
    }

    #[must_use]
    pub fn period(&self) -> Option<Duration> {
        *self.period_tx.borrow()
    }

    /// Stop after the current tick, if any.
    pub fn cancel(&self) {
        self.period_tx.send_replace(None);
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.period_tx.send_replace(None);
    }
}

impl std::fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("name", &self.name)
            .field("period", &self.period())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_task(period: Duration) -> (ScheduledTask, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let task = ScheduledTask::spawn("test", period, move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });
        (task, count)
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_at_period() {
        let (_task, count) = counting_task(Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_period_restarts_wait() {
        let (task, count) = counting_task(Duration::from_secs(60));

        tokio::time::sleep(Duration::from_secs(5)).await;
        task.set_period(Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(task.period(), Some(Duration::from_secs(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_loop() {
        let (task, count) = counting_task(Duration::from_secs(10));

        task.cancel();
        tokio::time::sleep(Duration::from_secs(100)).await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!task.is_running());
        assert_eq!(task.period(), None);
    }
}
