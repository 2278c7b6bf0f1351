//! Retry Scheduler: detached tokio tasks bound to the window they were launched for.
//!
//! Cancellation is cooperative: task bodies check `Reconciler::should_yield` before each
//! attempt. The scheduler only adds the wall-clock cap so every task terminates even
//! without a window change.

use crate::telemetry::{EventKind, SharedTelemetry};
use crate::types::WindowId;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct RetryScheduler {
    default_cap: Duration,
    active: Arc<ActiveTasks>,
    telemetry: SharedTelemetry,
}

#[derive(Default)]
struct ActiveTasks {
    count: AtomicUsize,
    idle: Notify,
}

struct ActiveGuard(Arc<ActiveTasks>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

impl RetryScheduler {
    pub fn new(default_cap: Duration, telemetry: SharedTelemetry) -> Self {
        Self {
            default_cap,
            active: Arc::new(ActiveTasks::default()),
            telemetry,
        }
    }

    pub fn default_cap(&self) -> Duration {
        self.default_cap
    }

    /// Launch `task` off the tick path with the default cap.
    pub fn schedule<F>(&self, window_id: &WindowId, label: &'static str, task: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.schedule_with_cap(window_id, label, self.default_cap, task)
    }

    /// Launch `task` with an explicit cap. The future is dropped when the cap elapses,
    /// so bodies must leave shared state consistent on drop.
    pub fn schedule_with_cap<F>(
        &self,
        window_id: &WindowId,
        label: &'static str,
        cap: Duration,
        task: F,
    ) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.active.count.fetch_add(1, Ordering::SeqCst);
        let guard = ActiveGuard(self.active.clone());
        let telemetry = self.telemetry.clone();
        let window_id = window_id.clone();
        debug!(window = %window_id, task = label, cap_ms = cap.as_millis() as u64, "task scheduled");
        tokio::spawn(async move {
            let _guard = guard;
            if tokio::time::timeout(cap, task).await.is_err() {
                warn!(window = %window_id, task = label, cap_ms = cap.as_millis() as u64, "task abandoned at wall-clock cap");
                telemetry.append_event(
                    EventKind::TaskAbandoned,
                    serde_json::json!({
                        "window": window_id.as_str(),
                        "task": label,
                        "cap_ms": cap.as_millis() as u64,
                    }),
                );
            }
        })
    }

    /// Tasks currently running.
    pub fn active(&self) -> usize {
        self.active.count.load(Ordering::SeqCst)
    }

    /// Wait until no task is running, up to `within`. True if drained.
    pub async fn drain(&self, within: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            // Registered before the check so a wakeup between the two is not lost.
            let idle = self.active.idle.notified();
            if self.active() == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, idle).await.is_err() {
                return self.active() == 0;
            }
        }
    }
}
