//! Unified "scoped periodic task" (DESIGN NOTES §9): every background loop
//! in the crate — registrar heartbeat/cleanup, Consul TTL renewal, discovery
//! refresh — starts through this one abstraction and is released through it,
//! instead of each owning a bespoke `tokio::spawn` + shutdown-signal pair.
//!
//! Grounded on the teacher's `run_health_checker` shape in
//! `src/backend/health.rs`: a loop selecting between an interval tick and a
//! shutdown [`Notify`], coalescing missed ticks (a `tokio::time::interval`
//! never queues multiple catch-up ticks past the first).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Handle to a running periodic task. Dropping it (or calling
/// [`PeriodicTask::stop`]) signals shutdown and detaches the background
/// task; `stop` additionally awaits its exit, guaranteeing the release is
/// visible before it returns (spec §5's resource-acquisition rule, and
/// testable property P6: "after deregister()/close(), no background timer
/// fires").
pub struct PeriodicTask {
    shutdown: Arc<Notify>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    /// Spawn a task that calls `body()` every `period`, starting after the
    /// first tick (never immediately on start), until stopped.
    pub fn start<F, Fut>(period: Duration, mut body: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let shutdown = Arc::new(Notify::new());
        let shutdown_for_task = Arc::clone(&shutdown);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // Consume the immediate first tick so `body` runs on a cadence,
            // not synchronously at spawn time.
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        body().await;
                    }
                    _ = shutdown_for_task.notified() => {
                        return;
                    }
                }
            }
        });

        Self {
            shutdown,
            handle: Some(handle),
        }
    }

    /// Signal shutdown and wait for the task to exit. Idempotent.
    pub async fn stop(&mut self) {
        self.shutdown.notify_one();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.shutdown.notify_one();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn fires_on_cadence_not_immediately() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let mut task = PeriodicTask::start(Duration::from_millis(20), move || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });

        // Immediately after spawn, body must not have run yet.
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(70)).await;
        assert!(count.load(Ordering::SeqCst) >= 2);

        task.stop().await;
    }

    #[tokio::test]
    async fn stop_prevents_further_firing() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let mut task = PeriodicTask::start(Duration::from_millis(15), move || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(40)).await;
        task.stop().await;
        let after_stop = count.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test]
    async fn drop_stops_task() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let task = PeriodicTask::start(Duration::from_millis(15), move || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });
        tokio::time::sleep(Duration::from_millis(40)).await;
        drop(task);
        let after_drop = count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), after_drop);
    }
}
