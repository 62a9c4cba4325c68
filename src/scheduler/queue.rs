use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Semaphore;

use crate::error::{Result, RunnerError};
use crate::scheduler::job::{JobDescriptor, JobId};

/// Item handed to a worker by [`SubmissionQueue::dequeue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueItem {
    Job { id: JobId, descriptor: JobDescriptor },
    /// Tells exactly one worker to exit its loop
    Shutdown,
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<QueueItem>,
    /// Jobs waiting in `items`; sentinels are not counted
    pending_jobs: usize,
    closed: bool,
}

/// Fixed-capacity FIFO between submitters and workers.
///
/// `enqueue` never waits: it fails with [`RunnerError::QueueFull`] as soon as
/// `capacity` jobs are pending. `dequeue` waits for an item. The semaphore
/// holds one permit per item in the deque, so a worker that wins a permit is
/// guaranteed an item to pop.
#[derive(Debug)]
pub struct SubmissionQueue {
    state: Mutex<QueueState>,
    available: Semaphore,
    capacity: usize,
}

impl SubmissionQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            available: Semaphore::new(0),
            capacity,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        // The critical sections below never panic, but don't take the
        // whole pool down if one somehow did.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a job. Fails immediately when full or closed.
    pub fn enqueue(&self, id: JobId, descriptor: JobDescriptor) -> Result<()> {
        {
            let mut state = self.lock();
            if state.closed {
                return Err(RunnerError::ShuttingDown);
            }
            if state.pending_jobs >= self.capacity {
                return Err(RunnerError::QueueFull {
                    capacity: self.capacity,
                });
            }
            state.items.push_back(QueueItem::Job { id, descriptor });
            state.pending_jobs += 1;
        }
        self.available.add_permits(1);
        Ok(())
    }

    /// Append a shutdown sentinel. Ignores capacity and the closed flag.
    pub fn push_shutdown(&self) {
        self.lock().items.push_back(QueueItem::Shutdown);
        self.available.add_permits(1);
    }

    /// Wait for the next item in FIFO order.
    pub async fn dequeue(&self) -> QueueItem {
        match self.available.acquire().await {
            Ok(permit) => permit.forget(),
            // The semaphore is never closed; treat it as a stop request.
            Err(_) => return QueueItem::Shutdown,
        }

        let mut state = self.lock();
        match state.items.pop_front() {
            Some(item) => {
                if matches!(item, QueueItem::Job { .. }) {
                    state.pending_jobs -= 1;
                }
                item
            }
            None => QueueItem::Shutdown,
        }
    }

    /// Refuse further submissions. Jobs already queued stay queued.
    pub fn close(&self) {
        self.lock().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of pending jobs.
    pub fn len(&self) -> usize {
        self.lock().pending_jobs
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
