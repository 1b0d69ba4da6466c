use std::sync::Arc;

use tokio::sync::watch;

/// Wait-group for one crawl round.
///
/// Every unit of work holds a [`RoundTicket`] from before it is handed to a
/// pool until it has finished. Work spawned by other work must take its
/// ticket while the parent still holds its own, otherwise the count can reach
/// zero with the child still pending.
#[derive(Clone, Debug)]
pub struct RoundBarrier {
    pending: Arc<watch::Sender<usize>>,
}

#[derive(Debug)]
#[must_use = "dropping a ticket marks its work as finished"]
pub struct RoundTicket {
    pending: Arc<watch::Sender<usize>>,
}

impl RoundBarrier {
    pub fn new() -> Self {
        let (pending, _) = watch::channel(0);
        Self {
            pending: Arc::new(pending),
        }
    }

    pub fn register(&self) -> RoundTicket {
        self.pending.send_modify(|pending| *pending += 1);
        RoundTicket {
            pending: Arc::clone(&self.pending),
        }
    }

    pub fn pending(&self) -> usize {
        *self.pending.borrow()
    }

    /// Resolves once every ticket handed out so far has been dropped.
    pub async fn wait(&self) {
        let mut pending = self.pending.subscribe();
        // the sender lives in `self`, so the channel cannot close while we wait
        let _ = pending.wait_for(|pending| *pending == 0).await;
    }
}

impl Default for RoundBarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RoundTicket {
    fn drop(&mut self) {
        self.pending.send_modify(|pending| *pending -= 1);
    }
}
