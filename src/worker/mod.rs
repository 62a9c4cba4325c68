//! Sandbox-bound workers.
//!
//! Each [`Worker`] owns one sandbox slot for the life of the process and
//! handles jobs from the submission queue one at a time:
//!
//! 1. Block on [`SubmissionQueue::dequeue`]
//! 2. Mark the job `running` with the worker's slot id
//! 3. Hand it to [`JobExecutor`] (reset, compile, run, cleanup)
//! 4. Record the terminal outcome
//!
//! A shutdown sentinel ends the loop. The external tools sit behind the
//! [`Compiler`](toolchain::Compiler) and
//! [`SandboxRuntime`](runtime::SandboxRuntime) traits.

pub mod executor;
pub mod isolate;
pub mod local;
pub mod process;
pub mod runtime;
pub mod slot;
pub mod toolchain;

use std::sync::Arc;

pub use executor::JobExecutor;
pub use isolate::IsolateRuntime;
pub use local::LocalRuntime;
pub use runtime::{Runtime, SandboxRuntime};
pub use slot::{Slot, SlotId};
pub use toolchain::{CcCompiler, Compiler};

use crate::scheduler::job::{JobDescriptor, JobId, JobUpdate};
use crate::scheduler::queue::{QueueItem, SubmissionQueue};
use crate::scheduler::store::JobStore;

pub struct Worker<R, C> {
    slot_id: SlotId,
    queue: Arc<SubmissionQueue>,
    store: Arc<JobStore>,
    executor: JobExecutor<R, C>,
}

impl<R: SandboxRuntime, C: Compiler> Worker<R, C> {
    pub fn new(
        slot_id: SlotId,
        queue: Arc<SubmissionQueue>,
        store: Arc<JobStore>,
        executor: JobExecutor<R, C>,
    ) -> Self {
        Self {
            slot_id,
            queue,
            store,
            executor,
        }
    }

    /// Process jobs until a shutdown sentinel arrives.
    pub async fn run(self) {
        tracing::info!(slot_id = self.slot_id, "Worker started");

        loop {
            match self.queue.dequeue().await {
                QueueItem::Shutdown => break,
                QueueItem::Job { id, descriptor } => self.process(id, descriptor).await,
            }
        }

        tracing::info!(slot_id = self.slot_id, "Worker stopped");
    }

    async fn process(&self, job_id: JobId, descriptor: JobDescriptor) {
        let slot_id = self.slot_id;
        if let Err(e) = self
            .store
            .update(&job_id, JobUpdate::Started { slot_id })
            .await
        {
            tracing::warn!(job_id = %job_id, slot_id, error = %e, "Could not claim job, skipping");
            return;
        }
        tracing::info!(job_id = %job_id, slot_id, "Job claimed");

        let outcome = self.executor.execute(job_id, slot_id, descriptor).await;
        let status = outcome.status();

        match self
            .store
            .update(&job_id, JobUpdate::Completed(outcome))
            .await
        {
            Ok(_) => tracing::info!(job_id = %job_id, slot_id, status = %status, "Job completed"),
            Err(e) => {
                tracing::warn!(job_id = %job_id, slot_id, error = %e, "Failed to record job result")
            }
        }
    }
}
