use thiserror::Error;
use uuid::Uuid;

use crate::scheduler::JobStatus;

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Submission queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("Runner is shutting down")]
    ShuttingDown,

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Job store is closed")]
    StoreClosed,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, RunnerError>;
