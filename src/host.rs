use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use url::Url;

use crate::{
    pool::{Job, WorkerPool},
    Error, Result,
};

/// Returns the host part of `link`, failing for anything that does not parse
/// as an absolute URL with a host.
pub fn host_of(link: &str) -> Result<String> {
    let url = Url::parse(link).map_err(|err| Error::malformed(link, err))?;
    url.host_str()
        .map(str::to_string)
        .ok_or_else(|| Error::malformed(link, "URL has no host"))
}

/// Admission gate for one host: never lets more than `limit` of its tasks run
/// on the download pool at the same time.
pub struct HostProcessor {
    host: String,
    limit: usize,
    pool: Arc<WorkerPool>,
    state: Mutex<HostState>,
}

#[derive(Default)]
struct HostState {
    queue: VecDeque<Job>,
    running: usize,
}

/// Occupied slot; dropping it frees the slot and admits the next task.
struct HostSlot {
    processor: Arc<HostProcessor>,
}

impl HostProcessor {
    pub fn new(host: impl Into<String>, limit: usize, pool: Arc<WorkerPool>) -> Self {
        Self {
            host: host.into(),
            limit,
            pool,
            state: Mutex::new(HostState::default()),
        }
    }

    pub fn running(&self) -> usize {
        self.state().running
    }

    pub fn queued(&self) -> usize {
        self.state().queue.len()
    }

    pub fn submit(self: &Arc<Self>, task: Job) {
        self.state().queue.push_back(task);
        self.admit();
    }

    fn admit(self: &Arc<Self>) {
        loop {
            if self.pool.is_closed() {
                self.abandon_queue();
                return;
            }
            let task = {
                let mut state = self.state();
                if state.running >= self.limit {
                    return;
                }
                let Some(task) = state.queue.pop_front() else {
                    return;
                };
                state.running += 1;
                task
            };

            let slot = HostSlot {
                processor: Arc::clone(self),
            };
            let job: Job = Box::pin(async move {
                let _slot = slot;
                task.await;
            });
            if let Err(err) = self.pool.submit(job) {
                // the rejected job already released its slot
                tracing::debug!(host = %self.host, "task not admitted: {}", err);
                return;
            }
        }
    }

    fn release(self: &Arc<Self>) {
        self.state().running -= 1;
        self.admit();
    }

    fn abandon_queue(&self) {
        let abandoned = std::mem::take(&mut self.state().queue);
        if !abandoned.is_empty() {
            tracing::debug!(
                host = %self.host,
                tasks = abandoned.len(),
                "dropping queued tasks, download pool is closed"
            );
        }
    }

    fn state(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for HostSlot {
    fn drop(&mut self) {
        self.processor.release();
    }
}
