use std::sync::Arc;

use box_runner::error::RunnerError;
use box_runner::scheduler::job::JobUpdate;
use box_runner::scheduler::{
    JobDescriptor, JobOutcome, JobStatus, JobStore, QueueItem, SubmissionQueue, Submitter,
};

fn submitter(capacity: usize) -> (Submitter, Arc<JobStore>, Arc<SubmissionQueue>) {
    let store = Arc::new(JobStore::new());
    let queue = Arc::new(SubmissionQueue::new(capacity));
    (Submitter::new(store.clone(), queue.clone()), store, queue)
}

#[tokio::test]
async fn test_submit_creates_queued_record_and_enqueues() {
    let (submitter, _store, queue) = submitter(4);

    let id = submitter
        .submit(JobDescriptor::new("int main(){}").with_stdin("1 2\n"))
        .await
        .unwrap();

    let record = submitter.status(&id).await.unwrap();
    assert_eq!(record.status, JobStatus::Queued);
    assert!(record.slot_id.is_none());
    assert_eq!(submitter.pending(), 1);

    match queue.dequeue().await {
        QueueItem::Job { id: got, descriptor } => {
            assert_eq!(got, id);
            assert_eq!(descriptor.code, "int main(){}");
            assert_eq!(descriptor.stdin.as_deref(), Some("1 2\n"));
        }
        QueueItem::Shutdown => panic!("expected a job"),
    }
}

#[tokio::test]
async fn test_job_ids_are_unique() {
    let (submitter, _store, _queue) = submitter(100);
    let mut ids = std::collections::HashSet::new();
    for _ in 0..100 {
        ids.insert(submitter.submit(JobDescriptor::new("x")).await.unwrap());
    }
    assert_eq!(ids.len(), 100);
}

#[tokio::test]
async fn test_rejected_submission_is_rolled_back() {
    let (submitter, store, _queue) = submitter(1);

    submitter.submit(JobDescriptor::new("a")).await.unwrap();
    let err = submitter.submit(JobDescriptor::new("b")).await.unwrap_err();

    assert!(matches!(err, RunnerError::QueueFull { capacity: 1 }));
    assert_eq!(err.to_string(), "Submission queue is full (capacity 1)");
    assert_eq!(store.len().await, 1);
    assert_eq!(submitter.capacity(), 1);
}

#[tokio::test]
async fn test_capacity_frees_up_after_dequeue() {
    let (submitter, _store, queue) = submitter(2);

    submitter.submit(JobDescriptor::new("a")).await.unwrap();
    submitter.submit(JobDescriptor::new("b")).await.unwrap();
    assert!(submitter.submit(JobDescriptor::new("c")).await.is_err());

    let _ = queue.dequeue().await;
    assert!(submitter.submit(JobDescriptor::new("d")).await.is_ok());
    assert!(submitter.submit(JobDescriptor::new("e")).await.is_err());
}

#[tokio::test]
async fn test_closed_queue_rejects_with_shutting_down() {
    let (submitter, store, queue) = submitter(4);
    queue.close();

    let err = submitter.submit(JobDescriptor::new("a")).await.unwrap_err();
    assert!(matches!(err, RunnerError::ShuttingDown));
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_concurrent_submitters_respect_capacity() {
    let (submitter, store, queue) = submitter(10);

    let mut handles = Vec::new();
    for i in 0..40 {
        let submitter = submitter.clone();
        handles.push(tokio::spawn(async move {
            submitter
                .submit(JobDescriptor::new(format!("job {}", i)))
                .await
        }));
    }

    let mut accepted = Vec::new();
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(id) => accepted.push(id),
            Err(RunnerError::QueueFull { .. }) => rejected += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(accepted.len(), 10);
    assert_eq!(rejected, 30);
    assert_eq!(queue.len(), 10);
    assert_eq!(store.len().await, 10);
    for id in &accepted {
        assert!(store.get(id).await.is_some());
    }
}

#[tokio::test]
async fn test_record_lifecycle_through_store() {
    let (submitter, store, _queue) = submitter(4);
    let id = submitter.submit(JobDescriptor::new("x")).await.unwrap();

    store
        .update(&id, JobUpdate::Started { slot_id: 1 })
        .await
        .unwrap();
    assert_eq!(
        submitter.status(&id).await.unwrap().status,
        JobStatus::Running
    );

    store
        .update(
            &id,
            JobUpdate::Completed(JobOutcome::InternalError {
                message: "disk full".to_string(),
            }),
        )
        .await
        .unwrap();

    let record = submitter.status(&id).await.unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.internal_error(), Some("disk full"));
    assert!(record.stdout().is_none());

    let err = store
        .update(&id, JobUpdate::Started { slot_id: 2 })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RunnerError::InvalidTransition {
            from: JobStatus::Failed,
            to: JobStatus::Running,
            ..
        }
    ));
}
