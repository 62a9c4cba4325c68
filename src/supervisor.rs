use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::config::RunnerConfig;
use crate::error::Result;
use crate::scheduler::job::{JobDescriptor, JobId, JobRecord};
use crate::scheduler::queue::SubmissionQueue;
use crate::scheduler::store::JobStore;
use crate::scheduler::submitter::Submitter;
use crate::worker::{Compiler, JobExecutor, SandboxRuntime, SlotId, Worker};

struct WorkerHandle {
    slot_id: SlotId,
    handle: JoinHandle<()>,
}

/// What happened to the workers during [`Pool::shutdown`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Workers that exited before the deadline
    pub stopped: usize,
    /// Slots whose worker was still busy at the deadline
    pub timed_out: Vec<SlotId>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.timed_out.is_empty()
    }
}

/// Fixed pool of sandbox-bound workers plus the store and queue they share.
///
/// Constructed once at startup. Outer layers get a [`Submitter`] from
/// [`Pool::submitter`]; the pool itself is consumed by [`Pool::shutdown`].
pub struct Pool {
    store: Arc<JobStore>,
    queue: Arc<SubmissionQueue>,
    workers: Vec<WorkerHandle>,
    shutdown_timeout: Duration,
}

impl Pool {
    /// Create one slot and one worker per configured worker and start them.
    /// Must be called from within a tokio runtime.
    pub fn start<R, C>(config: &RunnerConfig, runtime: R, compiler: C) -> Result<Self>
    where
        R: SandboxRuntime,
        C: Compiler,
    {
        config.validate()?;

        let store = Arc::new(JobStore::new());
        let queue = Arc::new(SubmissionQueue::new(config.queue_capacity));
        let executor = JobExecutor::new(
            Arc::new(runtime),
            Arc::new(compiler),
            config.limits.clone(),
        );

        let workers = (0..config.workers)
            .map(|slot_id| {
                let worker = Worker::new(slot_id, queue.clone(), store.clone(), executor.clone());
                WorkerHandle {
                    slot_id,
                    handle: tokio::spawn(worker.run()),
                }
            })
            .collect();

        tracing::info!(
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            cpu_time = ?config.limits.cpu_time,
            memory_kib = config.limits.memory_kib,
            "Worker pool started"
        );

        Ok(Self {
            store,
            queue,
            workers,
            shutdown_timeout: config.shutdown_timeout,
        })
    }

    pub fn submitter(&self) -> Submitter {
        Submitter::new(self.store.clone(), self.queue.clone())
    }

    pub async fn submit(&self, descriptor: JobDescriptor) -> Result<JobId> {
        self.submitter().submit(descriptor).await
    }

    pub async fn status(&self, id: &JobId) -> Option<JobRecord> {
        self.store.get(id).await
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Stop the pool.
    ///
    /// New submissions are refused, one sentinel per worker is queued behind
    /// any pending jobs, and each worker is awaited against a shared
    /// deadline. Workers still busy at the deadline are left running and
    /// reported. The store is closed last.
    pub async fn shutdown(self) -> ShutdownReport {
        tracing::info!(
            workers = self.workers.len(),
            pending = self.queue.len(),
            "Shutting down worker pool"
        );

        self.queue.close();
        for _ in &self.workers {
            self.queue.push_shutdown();
        }

        let deadline = tokio::time::Instant::now() + self.shutdown_timeout;
        let mut report = ShutdownReport::default();

        for WorkerHandle { slot_id, handle } in self.workers {
            match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok(())) => report.stopped += 1,
                Ok(Err(e)) => {
                    tracing::error!(slot_id, error = %e, "Worker task ended abnormally");
                    report.stopped += 1;
                }
                Err(_) => {
                    tracing::warn!(slot_id, "Worker did not stop before the shutdown deadline");
                    report.timed_out.push(slot_id);
                }
            }
        }

        self.store.close().await;

        tracing::info!(
            stopped = report.stopped,
            timed_out = report.timed_out.len(),
            "Worker pool stopped"
        );
        report
    }
}
