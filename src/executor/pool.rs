//! Fixed-size pool of OS threads for blocking engine calls.
//!
//! Jobs travel over a crossbeam channel and hand their result back through a
//! oneshot, so async callers await completion without occupying a runtime
//! worker. A panicking job is contained and reported as an error.

use std::panic::{self, AssertUnwindSafe};
use std::thread;

use crossbeam::channel::{unbounded, Sender};
use tokio::sync::oneshot;
use tracing::{debug, error};

use crate::error::{Error, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug)]
pub struct WorkerPool {
    tx: Sender<Job>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::Config("worker pool needs at least one thread".into()));
        }

        let (tx, rx) = unbounded::<Job>();
        for index in 0..size {
            let rx = rx.clone();
            thread::Builder::new()
                .name(format!("chargeflow-worker-{}", index))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        job();
                    }
                    debug!(worker = index, "Worker pool thread exiting");
                })?;
        }

        Ok(Self { tx, size })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Run `f` on a pool thread and wait for its result.
    pub async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (resp_tx, resp_rx) = oneshot::channel();

        self.tx
            .send(Box::new(move || {
                match panic::catch_unwind(AssertUnwindSafe(f)) {
                    Ok(value) => {
                        let _ = resp_tx.send(value);
                    }
                    Err(_) => error!("Worker pool job panicked"),
                }
            }))
            .map_err(|_| Error::Internal("worker pool is shut down".into()))?;

        resp_rx
            .await
            .map_err(|_| Error::Internal("worker pool job panicked".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_zero_size_rejected() {
        assert!(matches!(WorkerPool::new(0), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_runs_on_named_worker_thread() {
        let pool = WorkerPool::new(2).unwrap();
        let name = pool
            .run(|| thread::current().name().map(String::from))
            .await
            .unwrap();
        assert!(name.unwrap().starts_with("chargeflow-worker-"));
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let pool = WorkerPool::new(1).unwrap();
        let result: Result<()> = pool.run(|| panic!("engine crashed")).await;
        assert!(matches!(result, Err(Error::Internal(_))));

        // The thread survives and keeps serving jobs.
        assert_eq!(pool.run(|| 7).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_concurrency_bounded_by_size() {
        let pool = Arc::new(WorkerPool::new(2).unwrap());
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let pool = pool.clone();
            let running = running.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                pool.run(move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(20));
                    running.fetch_sub(1, Ordering::SeqCst);
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
