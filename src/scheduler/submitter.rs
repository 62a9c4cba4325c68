use std::sync::Arc;

use uuid::Uuid;

use crate::error::Result;
use crate::scheduler::job::{JobDescriptor, JobId, JobRecord};
use crate::scheduler::queue::SubmissionQueue;
use crate::scheduler::store::JobStore;

/// Submission and status entry point handed to outer layers.
///
/// Cheap to clone; every clone talks to the same store and queue.
#[derive(Debug, Clone)]
pub struct Submitter {
    store: Arc<JobStore>,
    queue: Arc<SubmissionQueue>,
}

impl Submitter {
    pub fn new(store: Arc<JobStore>, queue: Arc<SubmissionQueue>) -> Self {
        Self { store, queue }
    }

    /// Admit a job. The record exists before the job is visible to workers,
    /// so a status query right after this returns never misses it.
    pub async fn submit(&self, descriptor: JobDescriptor) -> Result<JobId> {
        let id = Uuid::new_v4();
        self.store.create(id).await?;

        if let Err(e) = self.queue.enqueue(id, descriptor) {
            self.store.remove(&id).await;
            tracing::warn!(job_id = %id, error = %e, "Job rejected");
            return Err(e);
        }

        tracing::debug!(job_id = %id, pending = self.queue.len(), "Job queued");
        Ok(id)
    }

    pub async fn status(&self, id: &JobId) -> Option<JobRecord> {
        self.store.get(id).await
    }

    pub async fn list(&self) -> Vec<JobRecord> {
        self.store.list().await
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }
}
