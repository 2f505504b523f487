//! Keep-alive probing for idle checked-out connections.
//!
//! A connection held by application code can sit idle long enough for the
//! server or a middlebox to drop it. The probe issues a trivial query whenever
//! the connection has been idle for longer than its threshold.
//!
//! The probe and foreground statements never use the physical connection at
//! the same time: both go through the same connection lock, and the probe only
//! ever *tries* that lock. A connection that is busy is not idle, so the probe
//! simply skips that firing. Foreground `touch()` is a single atomic store and
//! never waits on the probe.

use crate::db::driver::DriverConnection;
use crate::db::timer::{ScheduledTask, TimerService, TimerTask};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// The physical connection slot shared between a wrapper and its probe.
/// `None` once the wrapper has handed the connection back.
pub type SharedConnection<C> = Arc<tokio::sync::Mutex<Option<C>>>;

pub struct HeartbeatProbe {
    connection_id: String,
    origin: Instant,
    /// Milliseconds since `origin` of the last foreground or probe activity.
    last_accessed_ms: AtomicU64,
    max_idle: Duration,
    interval: Duration,
    probes: AtomicU64,
    task: Mutex<Option<Arc<dyn ScheduledTask>>>,
}

impl HeartbeatProbe {
    fn new(connection_id: String, max_idle: Duration, interval: Duration) -> Self {
        Self {
            connection_id,
            origin: Instant::now(),
            last_accessed_ms: AtomicU64::new(0),
            max_idle,
            interval,
            probes: AtomicU64::new(0),
            task: Mutex::new(None),
        }
    }

    /// Create a probe for `conn` and schedule it on `timer`.
    pub fn start<C: DriverConnection>(
        connection_id: impl Into<String>,
        conn: SharedConnection<C>,
        timer: &dyn TimerService,
        max_idle: Duration,
        interval: Duration,
    ) -> Arc<Self> {
        let probe = Arc::new(Self::new(connection_id.into(), max_idle, interval));

        let cycle_probe = Arc::clone(&probe);
        let task: TimerTask = Box::new(move || {
            let probe = Arc::clone(&cycle_probe);
            let conn = Arc::clone(&conn);
            Box::pin(async move { probe.run_cycle(&conn).await })
        });
        let handle = timer.schedule_with_fixed_delay(task, interval, interval);
        *probe.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        debug!(
            connection_id = %probe.connection_id,
            max_idle_ms = max_idle.as_millis() as u64,
            interval_ms = interval.as_millis() as u64,
            "Heartbeat started"
        );
        probe
    }

    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    /// Record activity on the connection.
    pub fn touch(&self) {
        self.last_accessed_ms.fetch_max(self.now_ms(), Ordering::AcqRel);
    }

    /// Time since the last recorded activity.
    pub fn idle_time(&self) -> Duration {
        let last = self.last_accessed_ms.load(Ordering::Acquire);
        Duration::from_millis(self.now_ms().saturating_sub(last))
    }

    /// True once the connection has been idle for longer than the threshold.
    pub fn is_due(&self) -> bool {
        self.idle_time() > self.max_idle
    }

    pub fn max_idle(&self) -> Duration {
        self.max_idle
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Number of keep-alive queries issued so far.
    pub fn probe_count(&self) -> u64 {
        self.probes.load(Ordering::Acquire)
    }

    /// Stop future firings. A cycle already running finishes normally.
    pub fn stop(&self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.cancel();
            debug!(connection_id = %self.connection_id, "Heartbeat stopped");
        }
    }

    async fn run_cycle<C: DriverConnection>(&self, conn: &tokio::sync::Mutex<Option<C>>) {
        if !self.is_due() {
            return;
        }
        let Ok(mut guard) = conn.try_lock() else {
            trace!(connection_id = %self.connection_id, "Connection busy; skipping heartbeat");
            return;
        };
        // Activity may have happened while we waited for the lock
        if !self.is_due() {
            return;
        }
        let Some(physical) = guard.as_mut() else {
            return;
        };
        if physical.is_internally_closed() {
            return;
        }

        match physical.keep_alive().await {
            Ok(()) => {
                self.touch();
                self.probes.fetch_add(1, Ordering::AcqRel);
                trace!(connection_id = %self.connection_id, "Heartbeat query sent");
            }
            // The next real use surfaces the actual connection state
            Err(e) => {
                trace!(connection_id = %self.connection_id, error = %e, "Heartbeat query failed");
            }
        }
    }
}

impl Drop for HeartbeatProbe {
    fn drop(&mut self) {
        self.stop();
    }
}
