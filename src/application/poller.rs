use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::debug;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// A spawned background task that is cancelled when its handle goes away.
///
/// The owner decides the lifetime: dropping the handle (or calling
/// [`ScheduledTask::cancel`]) aborts the task at its next await point.
#[derive(Debug)]
pub struct ScheduledTask {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    pub fn spawn<F>(name: &'static str, future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            name,
            handle: tokio::spawn(future),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        if !self.handle.is_finished() {
            debug!(task = self.name, "cancelling scheduled task");
            self.handle.abort();
        }
    }
}

/// Holds at most one [`ScheduledTask`].
///
/// Installing a task cancels whatever was there before.
#[derive(Debug, Default)]
pub struct TaskSlot {
    current: Option<ScheduledTask>,
}

impl TaskSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&mut self, task: ScheduledTask) {
        if let Some(previous) = self.current.replace(task) {
            previous.cancel();
        }
    }

    /// Cancels the current task. Returns whether one was still running.
    pub fn cancel(&mut self) -> bool {
        match self.current.take() {
            Some(task) => {
                let running = !task.is_finished();
                task.cancel();
                running
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.current.as_ref().is_some_and(|task| !task.is_finished())
    }
}

/// Timing policy for status polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    pub interval: Duration,
    /// Give up after this long. `None` polls until the provider resolves.
    pub max_wait: Option<Duration>,
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_wait: None,
        }
    }
}

impl PollSchedule {
    pub fn start(&self) -> PollTicks {
        let now = Instant::now();
        let mut interval = tokio::time::interval_at(now + self.interval, self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        PollTicks {
            interval,
            deadline: self.max_wait.map(|wait| now + wait),
        }
    }
}

/// Fixed-period ticks. The first fires one interval after [`PollSchedule::start`].
#[derive(Debug)]
pub struct PollTicks {
    interval: Interval,
    deadline: Option<Instant>,
}

impl PollTicks {
    /// Waits for the next read. Returns `false` once the deadline has passed.
    pub async fn next(&mut self) -> bool {
        let at = self.interval.tick().await;
        self.deadline.is_none_or(|deadline| at <= deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_ticks_follow_interval() {
        let start = Instant::now();
        let mut ticks = PollSchedule::default().start();
        assert!(ticks.next().await);
        assert_eq!(start.elapsed(), Duration::from_secs(5));
        assert!(ticks.next().await);
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_stop_after_max_wait() {
        let schedule = PollSchedule {
            interval: Duration::from_secs(5),
            max_wait: Some(Duration::from_secs(12)),
        };
        let mut ticks = schedule.start();
        assert!(ticks.next().await);
        assert!(ticks.next().await);
        assert!(!ticks.next().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slot_keeps_a_single_task() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut slot = TaskSlot::new();

        for _ in 0..3 {
            let counter = counter.clone();
            slot.replace(ScheduledTask::spawn("tick", async move {
                let mut ticks = PollSchedule::default().start();
                while ticks.next().await {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }

        tokio::time::sleep(Duration::from_millis(5001)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(slot.is_active());

        assert!(slot.cancel());
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(!slot.is_active());
    }
}
