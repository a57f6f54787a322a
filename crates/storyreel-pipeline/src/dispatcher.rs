//! Bounded task dispatcher shared by every run in the process.
//!
//! Two kinds of work are accepted, both without blocking:
//!
//! - units of work ([`TaskDispatcher::submit`], [`TaskDispatcher::submit_unit`])
//!   run while holding one of `max_workers` permits. A unit's hand-off runs
//!   after its permit is released, so a unit waiting on a slow consumer never
//!   starves other units.
//! - stage bodies ([`TaskDispatcher::submit_stage`]) spend their life parked on
//!   queues and never take a permit.
//!
//! Once `max_workers + max_backlog` tasks of either kind are outstanding, or
//! after [`TaskDispatcher::shutdown`], submissions are rejected with
//! [`PipelineError::Submission`].

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, error, info};

use crate::error::{PipelineError, PipelineResult};

/// Dispatcher statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub max_workers: usize,
    pub max_backlog: usize,
    /// Units holding a worker permit
    pub running: usize,
    /// Units waiting for a worker permit
    pub queued: usize,
    /// Stage bodies and units handing off their result
    pub parked: usize,
    pub completed: u64,
    pub panicked: u64,
}

struct Inner {
    semaphore: Arc<Semaphore>,
    max_workers: usize,
    max_backlog: usize,
    outstanding: AtomicUsize,
    running: AtomicUsize,
    queued: AtomicUsize,
    parked: AtomicUsize,
    completed: AtomicU64,
    panicked: AtomicU64,
    shut_down: AtomicBool,
    idle: Notify,
}

impl Inner {
    fn running(&self) -> &AtomicUsize {
        &self.running
    }

    fn queued(&self) -> &AtomicUsize {
        &self.queued
    }

    fn parked(&self) -> &AtomicUsize {
        &self.parked
    }

    fn record_panic(&self, name: &'static str) {
        self.panicked.fetch_add(1, Ordering::Relaxed);
        error!(task = name, "Dispatched task panicked");
    }
}

/// Releases a task's slot however the task ends.
struct TaskSlot {
    inner: Arc<Inner>,
}

impl Drop for TaskSlot {
    fn drop(&mut self) {
        self.inner.completed.fetch_add(1, Ordering::Relaxed);
        if self.inner.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}

/// Counts a task in one of the stats gauges while alive.
struct Gauge {
    inner: Arc<Inner>,
    counter: fn(&Inner) -> &AtomicUsize,
}

impl Gauge {
    fn enter(inner: &Arc<Inner>, counter: fn(&Inner) -> &AtomicUsize) -> Self {
        counter(inner.as_ref()).fetch_add(1, Ordering::SeqCst);
        Self {
            inner: Arc::clone(inner),
            counter,
        }
    }
}

impl Drop for Gauge {
    fn drop(&mut self) {
        (self.counter)(self.inner.as_ref()).fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct TaskDispatcher {
    inner: Arc<Inner>,
}

impl TaskDispatcher {
    pub fn new(max_workers: usize, max_backlog: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            inner: Arc::new(Inner {
                semaphore: Arc::new(Semaphore::new(max_workers)),
                max_workers,
                max_backlog,
                outstanding: AtomicUsize::new(0),
                running: AtomicUsize::new(0),
                queued: AtomicUsize::new(0),
                parked: AtomicUsize::new(0),
                completed: AtomicU64::new(0),
                panicked: AtomicU64::new(0),
                shut_down: AtomicBool::new(false),
                idle: Notify::new(),
            }),
        }
    }

    fn accept(&self, name: &'static str) -> PipelineResult<TaskSlot> {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return Err(PipelineError::submission(format!(
                "dispatcher is shut down, rejected '{}'",
                name
            )));
        }

        let capacity = self.inner.max_workers + self.inner.max_backlog;
        let reserved = self
            .inner
            .outstanding
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < capacity).then_some(n + 1)
            });
        if reserved.is_err() {
            return Err(PipelineError::submission(format!(
                "dispatcher at capacity ({} tasks outstanding), rejected '{}'",
                capacity, name
            )));
        }

        debug!(task = name, "Task submitted");
        Ok(TaskSlot {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Accept a unit of work for execution or reject it immediately.
    ///
    /// Must be called from within a tokio runtime. A panicking task is
    /// logged and counted; it never takes the dispatcher down.
    pub fn submit<F>(&self, name: &'static str, task: F) -> PipelineResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.submit_unit(name, task, |()| async {})
    }

    /// Accept a unit of work whose output is handed to `handoff` once the
    /// worker permit has been released.
    pub fn submit_unit<W, H, HF>(&self, name: &'static str, work: W, handoff: H) -> PipelineResult<()>
    where
        W: Future + Send + 'static,
        W::Output: Send + 'static,
        H: FnOnce(W::Output) -> HF + Send + 'static,
        HF: Future<Output = ()> + Send + 'static,
    {
        let slot = self.accept(name)?;
        let queued = Gauge::enter(&self.inner, Inner::queued);
        let inner = Arc::clone(&self.inner);

        tokio::spawn(async move {
            let _slot = slot;
            let Ok(permit) = inner.semaphore.clone().acquire_owned().await else {
                return;
            };
            drop(queued);

            let running = Gauge::enter(&inner, Inner::running);
            let output = AssertUnwindSafe(work).catch_unwind().await;
            drop(running);
            drop(permit);

            match output {
                Ok(output) => {
                    let _parked = Gauge::enter(&inner, Inner::parked);
                    if AssertUnwindSafe(handoff(output)).catch_unwind().await.is_err() {
                        inner.record_panic(name);
                    }
                }
                Err(_) => inner.record_panic(name),
            }
        });
        Ok(())
    }

    /// Accept a long-lived stage body. It counts against capacity but never
    /// holds a worker permit.
    pub fn submit_stage<F>(&self, name: &'static str, body: F) -> PipelineResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let slot = self.accept(name)?;
        let parked = Gauge::enter(&self.inner, Inner::parked);
        let inner = Arc::clone(&self.inner);

        tokio::spawn(async move {
            let _slot = slot;
            let _parked = parked;
            if AssertUnwindSafe(body).catch_unwind().await.is_err() {
                inner.record_panic(name);
            }
        });
        Ok(())
    }

    /// Stop accepting work. Tasks already accepted still run.
    pub fn shutdown(&self) {
        if !self.inner.shut_down.swap(true, Ordering::SeqCst) {
            info!("Task dispatcher shutting down");
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    /// Wait until no accepted task is left, up to `timeout`.
    ///
    /// Returns `false` if tasks were still outstanding at the deadline.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.inner.idle.notified();
                if self.inner.outstanding.load(Ordering::SeqCst) == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            max_workers: self.inner.max_workers,
            max_backlog: self.inner.max_backlog,
            running: self.inner.running.load(Ordering::SeqCst),
            queued: self.inner.queued.load(Ordering::SeqCst),
            parked: self.inner.parked.load(Ordering::SeqCst),
            completed: self.inner.completed.load(Ordering::Relaxed),
            panicked: self.inner.panicked.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_runs_submitted_work() {
        let dispatcher = TaskDispatcher::new(2, 2);
        let (tx, rx) = oneshot::channel();
        dispatcher
            .submit("answer", async move {
                let _ = tx.send(42);
            })
            .unwrap();
        assert_eq!(rx.await.unwrap(), 42);
        assert!(dispatcher.wait_idle(Duration::from_secs(1)).await);
        assert_eq!(dispatcher.stats().completed, 1);
    }

    #[tokio::test]
    async fn test_rejects_when_capacity_exhausted() {
        let dispatcher = TaskDispatcher::new(1, 1);
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let (second_tx, second_rx) = oneshot::channel::<()>();

        dispatcher
            .submit("blocker", async move {
                let _ = release_rx.await;
            })
            .unwrap();
        dispatcher
            .submit("queued", async move {
                let _ = second_tx.send(());
            })
            .unwrap();

        let err = dispatcher.submit("overflow", async {}).unwrap_err();
        assert!(matches!(err, PipelineError::Submission(_)));

        release_tx.send(()).unwrap();
        second_rx.await.unwrap();
        assert!(dispatcher.wait_idle(Duration::from_secs(1)).await);
        assert!(dispatcher.submit("after", async {}).is_ok());
    }

    #[tokio::test]
    async fn test_rejects_after_shutdown() {
        let dispatcher = TaskDispatcher::new(4, 0);
        dispatcher.shutdown();
        assert!(dispatcher.is_shut_down());
        assert!(matches!(
            dispatcher.submit("late", async {}),
            Err(PipelineError::Submission(_))
        ));
    }

    #[tokio::test]
    async fn test_panicking_task_releases_its_slot() {
        let dispatcher = TaskDispatcher::new(1, 0);
        dispatcher
            .submit("boom", async {
                panic!("task failure");
            })
            .unwrap();

        assert!(dispatcher.wait_idle(Duration::from_secs(1)).await);
        let stats = dispatcher.stats();
        assert_eq!(stats.panicked, 1);
        assert_eq!(stats.running, 0);
        assert!(dispatcher.submit("next", async {}).is_ok());
    }

    #[tokio::test]
    async fn test_stage_bodies_do_not_take_worker_permits() {
        let dispatcher = TaskDispatcher::new(1, 4);
        let (release_tx, release_rx) = oneshot::channel::<()>();
        dispatcher
            .submit_stage("parked", async move {
                let _ = release_rx.await;
            })
            .unwrap();

        let (tx, rx) = oneshot::channel();
        dispatcher
            .submit("unit", async move {
                let _ = tx.send(7);
            })
            .unwrap();
        assert_eq!(tokio::time::timeout(Duration::from_secs(1), rx).await.unwrap().unwrap(), 7);

        let stats = dispatcher.stats();
        assert_eq!(stats.parked, 1);
        assert_eq!(stats.running, 0);

        release_tx.send(()).unwrap();
        assert!(dispatcher.wait_idle(Duration::from_secs(1)).await);
        assert_eq!(dispatcher.stats().parked, 0);
    }

    #[tokio::test]
    async fn test_handoff_runs_after_permit_is_released() {
        let dispatcher = TaskDispatcher::new(1, 4);
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let (delivered_tx, delivered_rx) = oneshot::channel();
        dispatcher
            .submit_unit("slow_consumer", async { 5u32 }, move |value| async move {
                let _ = release_rx.await;
                let _ = delivered_tx.send(value);
            })
            .unwrap();

        let (tx, rx) = oneshot::channel();
        dispatcher
            .submit("next", async move {
                let _ = tx.send(());
            })
            .unwrap();
        assert!(tokio::time::timeout(Duration::from_secs(1), rx).await.is_ok());

        release_tx.send(()).unwrap();
        assert_eq!(delivered_rx.await.unwrap(), 5);
        assert!(dispatcher.wait_idle(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_stage_bodies_count_against_capacity() {
        let dispatcher = TaskDispatcher::new(1, 1);
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let release_rx = Arc::new(tokio::sync::Mutex::new(Some(release_rx)));

        for _ in 0..2 {
            let release_rx = Arc::clone(&release_rx);
            dispatcher
                .submit_stage("parked", async move {
                    let rx = release_rx.lock().await.take();
                    if let Some(rx) = rx {
                        let _ = rx.await;
                    }
                })
                .unwrap();
        }
        assert!(matches!(
            dispatcher.submit_stage("overflow", async {}),
            Err(PipelineError::Submission(_))
        ));

        release_tx.send(()).unwrap();
        assert!(dispatcher.wait_idle(Duration::from_secs(1)).await);
    }
}
