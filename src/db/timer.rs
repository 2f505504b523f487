//! Periodic task scheduling.
//!
//! Heartbeat probes are driven by a [`TimerService`]. Cancelling a scheduled
//! task only stops future firings; a firing that is already running is left
//! to finish on its own.

use futures_util::future::BoxFuture;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::warn;

/// A task body; invoked once per firing.
pub type TimerTask = Box<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Handle to a scheduled task.
pub trait ScheduledTask: Send + Sync {
    /// Stop future firings. Idempotent.
    fn cancel(&self);

    fn is_cancelled(&self) -> bool;
}

/// Scheduler for periodic background work.
pub trait TimerService: Send + Sync {
    /// Run `task` after `initial_delay`, then again `period` after each
    /// firing completes. A zero `period` schedules nothing and returns an
    /// already-cancelled handle.
    fn schedule_with_fixed_delay(
        &self,
        task: TimerTask,
        initial_delay: Duration,
        period: Duration,
    ) -> Arc<dyn ScheduledTask>;
}

/// [`TimerService`] backed by the current tokio runtime.
#[derive(Debug, Clone, Default)]
pub struct TokioTimerService;

impl TokioTimerService {
    pub fn new() -> Self {
        Self
    }
}

struct TokioScheduledTask {
    cancelled: AtomicBool,
    wake: Notify,
}

impl ScheduledTask for TokioScheduledTask {
    fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            // notify_one stores a permit if the loop is busy running a firing
            self.wake.notify_one();
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl TimerService for TokioTimerService {
    fn schedule_with_fixed_delay(
        &self,
        task: TimerTask,
        initial_delay: Duration,
        period: Duration,
    ) -> Arc<dyn ScheduledTask> {
        let handle = Arc::new(TokioScheduledTask {
            cancelled: AtomicBool::new(false),
            wake: Notify::new(),
        });

        if period.is_zero() {
            warn!("Refusing to schedule a task with a zero period");
            handle.cancel();
            return handle;
        }

        let control = Arc::clone(&handle);
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(initial_delay) => {}
                _ = control.wake.notified() => return,
            }
            loop {
                if control.is_cancelled() {
                    break;
                }
                task().await;
                tokio::select! {
                    _ = tokio::time::sleep(period) => {}
                    _ = control.wake.notified() => break,
                }
            }
        });

        handle
    }
}
