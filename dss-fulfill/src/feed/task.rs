//! Cancellable background tasks
//!
//! Thin owner around a `JoinHandle` used for the reconnect and freshness
//! timers. Dropping the owner aborts the task.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

pub struct CancellableTask {
    name: &'static str,
    handle: Option<JoinHandle<()>>,
}

impl CancellableTask {
    /// Run `fut` on the runtime
    pub fn spawn<F>(name: &'static str, fut: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            name,
            handle: Some(tokio::spawn(fut)),
        }
    }

    /// Run `fut` once `delay` has elapsed
    pub fn delayed<F>(name: &'static str, delay: Duration, fut: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self::spawn(name, async move {
            tokio::time::sleep(delay).await;
            fut.await;
        })
    }

    /// Run `f` every `period`, starting one period from now
    pub fn interval<F, Fut>(name: &'static str, period: Duration, mut f: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        Self::spawn(name, async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            loop {
                ticker.tick().await;
                if !f().await {
                    break;
                }
            }
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Abort the task if still pending
    ///
    /// Returns true when a pending task was aborted. Safe to call repeatedly.
    pub fn cancel(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                trace!(task = self.name, "Cancelled");
                true
            }
            _ => false,
        }
    }

    /// Wait up to `grace` for the task to end on its own, then abort it
    pub async fn finish(mut self, grace: Duration) {
        if let Some(mut handle) = self.handle.take() {
            if tokio::time::timeout(grace, &mut handle).await.is_err() {
                debug!(task = self.name, "Did not finish in time; aborting");
                handle.abort();
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for CancellableTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_delayed_runs_after_delay() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let task = CancellableTask::delayed("t", Duration::from_secs(5), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(task.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_run() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let mut task = CancellableTask::delayed("t", Duration::from_secs(5), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(task.cancel());
        assert!(!task.cancel());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replacing_slot_debounces() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut slot: Option<CancellableTask> = None;

        // Three schedules in quick succession; each replaces the last
        for _ in 0..3 {
            let counter = fired.clone();
            slot = Some(CancellableTask::delayed("t", Duration::from_secs(5), async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        drop(slot);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_stops_when_closure_returns_false() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let task = CancellableTask::interval("tick", Duration::from_secs(60), move || {
            let counter = counter.clone();
            async move { counter.fetch_add(1, Ordering::SeqCst) + 1 < 3 }
        });

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
        assert!(task.is_finished());
    }
}
