use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::{Result, RunnerError};
use crate::scheduler::job::{JobId, JobRecord, JobStatus, JobUpdate};

#[derive(Debug, Default)]
struct StoreInner {
    jobs: HashMap<JobId, JobRecord>,
    closed: bool,
}

/// Concurrent map from job id to its record.
///
/// Readers always get a cloned snapshot. Writers go through [`JobStore::update`],
/// which applies the whole change under the write lock and refuses any
/// transition that is not strictly forward.
#[derive(Debug, Default)]
pub struct JobStore {
    inner: RwLock<StoreInner>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fresh `queued` record.
    pub async fn create(&self, id: JobId) -> Result<JobRecord> {
        let mut inner = self.inner.write().await;
        if inner.closed {
            return Err(RunnerError::StoreClosed);
        }
        if inner.jobs.contains_key(&id) {
            return Err(RunnerError::Internal(format!("duplicate job id {}", id)));
        }
        let record = JobRecord::new(id);
        inner.jobs.insert(id, record.clone());
        Ok(record)
    }

    /// Apply a worker-side change. Returns the record as written.
    pub async fn update(&self, id: &JobId, update: JobUpdate) -> Result<JobRecord> {
        let mut inner = self.inner.write().await;
        if inner.closed {
            return Err(RunnerError::StoreClosed);
        }
        let record = inner
            .jobs
            .get_mut(id)
            .ok_or(RunnerError::JobNotFound(*id))?;

        let to = update.target_status();
        let allowed = matches!(
            (record.status, &update),
            (JobStatus::Queued, JobUpdate::Started { .. })
                | (JobStatus::Running, JobUpdate::Completed(_))
        );
        if !allowed {
            return Err(RunnerError::InvalidTransition {
                job_id: *id,
                from: record.status,
                to,
            });
        }

        match update {
            JobUpdate::Started { slot_id } => {
                record.slot_id = Some(slot_id);
                record.started_at = Some(Utc::now());
            }
            JobUpdate::Completed(outcome) => {
                record.outcome = Some(outcome);
                record.completed_at = Some(Utc::now());
            }
        }
        record.status = to;
        Ok(record.clone())
    }

    /// Snapshot of a single record.
    pub async fn get(&self, id: &JobId) -> Option<JobRecord> {
        self.inner.read().await.jobs.get(id).cloned()
    }

    /// Drop a record that never made it onto the queue.
    pub async fn remove(&self, id: &JobId) -> Option<JobRecord> {
        self.inner.write().await.jobs.remove(id)
    }

    /// Snapshots of every record, oldest first.
    pub async fn list(&self) -> Vec<JobRecord> {
        let inner = self.inner.read().await;
        let mut jobs: Vec<JobRecord> = inner.jobs.values().cloned().collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.jobs.is_empty()
    }

    /// Stop accepting writes. Reads keep working.
    pub async fn close(&self) {
        self.inner.write().await.closed = true;
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.read().await.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::job::{JobOutcome, ResourceUsage, Verdict};
    use uuid::Uuid;

    fn finished(stdout: &str) -> JobOutcome {
        JobOutcome::Finished {
            stdout: stdout.to_string(),
            stderr: String::new(),
            sandbox_diagnostic: String::new(),
            verdict: Verdict::Exited { code: 0 },
            usage: ResourceUsage::default(),
        }
    }

    #[tokio::test]
    async fn create_then_get_returns_queued() {
        let store = JobStore::new();
        let id = Uuid::new_v4();
        store.create(id).await.unwrap();

        let record = store.get(&id).await.unwrap();
        assert_eq!(record.status, JobStatus::Queued);
        assert!(record.slot_id.is_none());
        assert!(record.outcome.is_none());
    }

    #[tokio::test]
    async fn get_unknown_is_none() {
        let store = JobStore::new();
        assert!(store.get(&Uuid::new_v4()).await.is_none());
    }

    #[tokio::test]
    async fn forward_transitions_are_applied() {
        let store = JobStore::new();
        let id = Uuid::new_v4();
        store.create(id).await.unwrap();

        let running = store
            .update(&id, JobUpdate::Started { slot_id: 2 })
            .await
            .unwrap();
        assert_eq!(running.status, JobStatus::Running);
        assert_eq!(running.slot_id, Some(2));
        assert!(running.started_at.is_some());

        let done = store
            .update(&id, JobUpdate::Completed(finished("hi")))
            .await
            .unwrap();
        assert_eq!(done.status, JobStatus::Finished);
        assert_eq!(done.stdout(), Some("hi"));
        assert_eq!(done.slot_id, Some(2));
        assert!(done.completed_at.is_some());
    }

    #[tokio::test]
    async fn completing_a_queued_job_is_rejected() {
        let store = JobStore::new();
        let id = Uuid::new_v4();
        store.create(id).await.unwrap();

        let err = store
            .update(&id, JobUpdate::Completed(finished("x")))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RunnerError::InvalidTransition {
                from: JobStatus::Queued,
                to: JobStatus::Finished,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn terminal_records_are_never_rewritten() {
        let store = JobStore::new();
        let id = Uuid::new_v4();
        store.create(id).await.unwrap();
        store
            .update(&id, JobUpdate::Started { slot_id: 0 })
            .await
            .unwrap();
        store
            .update(
                &id,
                JobUpdate::Completed(JobOutcome::CompileFailed {
                    compile_error: "boom".to_string(),
                }),
            )
            .await
            .unwrap();

        assert!(store
            .update(&id, JobUpdate::Completed(finished("late")))
            .await
            .is_err());
        assert!(store
            .update(&id, JobUpdate::Started { slot_id: 1 })
            .await
            .is_err());

        let record = store.get(&id).await.unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.compile_error(), Some("boom"));
        assert_eq!(record.slot_id, Some(0));
    }

    #[tokio::test]
    async fn update_unknown_job_is_not_found() {
        let store = JobStore::new();
        let id = Uuid::new_v4();
        let err = store
            .update(&id, JobUpdate::Started { slot_id: 0 })
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::JobNotFound(missing) if missing == id));
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let store = JobStore::new();
        let id = Uuid::new_v4();
        store.create(id).await.unwrap();
        assert!(store.create(id).await.is_err());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn remove_drops_the_record() {
        let store = JobStore::new();
        let id = Uuid::new_v4();
        store.create(id).await.unwrap();
        assert!(store.remove(&id).await.is_some());
        assert!(store.get(&id).await.is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn snapshots_are_detached_from_the_store() {
        let store = JobStore::new();
        let id = Uuid::new_v4();
        store.create(id).await.unwrap();

        let before = store.get(&id).await.unwrap();
        store
            .update(&id, JobUpdate::Started { slot_id: 1 })
            .await
            .unwrap();
        assert_eq!(before.status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn list_is_sorted_by_creation() {
        let store = JobStore::new();
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            store.create(*id).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        let listed: Vec<Uuid> = store.list().await.into_iter().map(|r| r.id).collect();
        assert_eq!(listed, ids);
    }

    #[tokio::test]
    async fn closed_store_rejects_writes_but_serves_reads() {
        let store = JobStore::new();
        let id = Uuid::new_v4();
        store.create(id).await.unwrap();
        store.close().await;
        assert!(store.is_closed().await);

        assert!(matches!(
            store.create(Uuid::new_v4()).await,
            Err(RunnerError::StoreClosed)
        ));
        assert!(matches!(
            store.update(&id, JobUpdate::Started { slot_id: 0 }).await,
            Err(RunnerError::StoreClosed)
        ));
        assert_eq!(store.get(&id).await.unwrap().status, JobStatus::Queued);
    }
}
