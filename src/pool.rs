use std::{
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use futures::{future::BoxFuture, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::{Error, Result};

pub type Job = BoxFuture<'static, ()>;

/// A bounded set of workers fed from an unbounded job queue.
///
/// Submission never blocks. At most `workers` jobs run at once, each on its
/// own tokio task so that a slow or panicking job does not stall the others.
pub struct WorkerPool {
    name: &'static str,
    sender: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    driver: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(name: &'static str, workers: usize) -> Result<Self> {
        if workers == 0 {
            return Err(Error::Config(format!("{} pool needs at least one worker", name)));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|err| Error::Internal(format!("{} pool: {}", name, err)))?;

        let (sender, receiver) = mpsc::unbounded_channel::<Job>();
        let driver = runtime.spawn(async move {
            UnboundedReceiverStream::new(receiver)
                .for_each_concurrent(workers, |job| async move {
                    if let Err(err) = tokio::spawn(job).await {
                        tracing::error!(pool = name, "job failed: {}", err);
                    }
                })
                .await;
            tracing::debug!(pool = name, "worker pool drained");
        });
        tracing::debug!(pool = name, workers, "worker pool started");

        Ok(Self {
            name,
            sender: Mutex::new(Some(sender)),
            driver: tokio::sync::Mutex::new(Some(driver)),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Queues `job`. After `close`, or once the driver is gone, the job is
    /// dropped without running.
    pub fn submit(&self, job: Job) -> Result<()> {
        let rejected = {
            let mut sender = self.sender();
            let sent = match sender.as_ref() {
                Some(sender) => sender.send(job).map_err(|mpsc::error::SendError(job)| job),
                None => Err(job),
            };
            match sent {
                Ok(()) => return Ok(()),
                Err(job) => {
                    if sender.take().is_some() {
                        tracing::debug!(pool = self.name, "worker pool driver is gone");
                    }
                    job
                }
            }
        };
        // dropping a job may re-enter the pool, so only after the lock is released
        drop(rejected);
        Err(Error::PoolClosed(self.name))
    }

    pub fn is_closed(&self) -> bool {
        self.sender().is_none()
    }

    /// Stops accepting jobs. Jobs already queued still run.
    pub fn close(&self) {
        if self.sender().take().is_some() {
            tracing::debug!(pool = self.name, "worker pool closed");
        }
    }

    /// Waits up to `timeout` for queued and running jobs to finish.
    /// Returns `false` if the pool was still busy when the timeout elapsed.
    pub async fn await_termination(&self, timeout: Duration) -> bool {
        let mut driver = self.driver.lock().await;
        let Some(handle) = driver.as_mut() else {
            return true;
        };
        match tokio::time::timeout(timeout, handle).await {
            Ok(_) => {
                *driver = None;
                true
            }
            Err(_) => false,
        }
    }

    fn sender(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<Job>>> {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use futures::FutureExt;

    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn runs_at_most_workers_jobs_at_once() {
        let pool = WorkerPool::new("test", 2).unwrap();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            let done = Arc::clone(&done);
            pool.submit(
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    done.fetch_add(1, Ordering::SeqCst);
                }
                .boxed(),
            )
            .unwrap();
        }

        pool.close();
        assert!(pool.await_termination(Duration::from_secs(5)).await);
        assert_eq!(done.load(Ordering::SeqCst), 8);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn submit_after_close_fails() {
        let pool = WorkerPool::new("closed", 1).unwrap();
        pool.close();
        assert!(pool.is_closed());
        let err = pool.submit(async {}.boxed()).unwrap_err();
        assert!(matches!(err, Error::PoolClosed("closed")));
        assert!(pool.await_termination(Duration::from_secs(1)).await);
        // a second wait is a no-op
        assert!(pool.await_termination(Duration::from_millis(1)).await);
    }

    #[tokio::test]
    async fn await_termination_times_out_on_busy_pool() {
        let pool = WorkerPool::new("busy", 1).unwrap();
        pool.submit(tokio::time::sleep(Duration::from_secs(60)).boxed())
            .unwrap();
        pool.close();
        assert!(!pool.await_termination(Duration::from_millis(20)).await);
    }

    struct Resubmit {
        pool: Arc<WorkerPool>,
        closed_seen: Arc<AtomicUsize>,
    }

    impl Drop for Resubmit {
        fn drop(&mut self) {
            if self.pool.is_closed() {
                self.closed_seen.fetch_add(1, Ordering::SeqCst);
            }
            let _ = self.pool.submit(async {}.boxed());
        }
    }

    #[tokio::test]
    async fn rejected_job_may_reenter_the_pool_when_dropped() {
        let pool = Arc::new(WorkerPool::new("gone", 1).unwrap());
        if let Some(driver) = pool.driver.lock().await.take() {
            driver.abort();
            let _ = driver.await;
        }
        assert!(!pool.is_closed());

        let closed_seen = Arc::new(AtomicUsize::new(0));
        let guard = Resubmit {
            pool: Arc::clone(&pool),
            closed_seen: Arc::clone(&closed_seen),
        };
        let (done, finished) = std::sync::mpsc::channel();
        let submitter = Arc::clone(&pool);
        std::thread::spawn(move || {
            let submitted = submitter.submit(
                async move {
                    let _guard = guard;
                }
                .boxed(),
            );
            let _ = done.send(submitted.is_err());
        });

        let rejected = finished
            .recv_timeout(Duration::from_secs(5))
            .expect("submit hung while dropping the rejected job");
        assert!(rejected);
        assert!(pool.is_closed());
        assert_eq!(closed_seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn needs_a_runtime_and_workers() {
        assert!(matches!(WorkerPool::new("none", 1), Err(Error::Internal(_))));
        assert!(matches!(WorkerPool::new("zero", 0), Err(Error::Config(_))));
    }
}
