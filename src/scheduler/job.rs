use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::worker::slot::SlotId;

pub type JobId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Finished,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Finished => write!(f, "finished"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Payload carried on the submission queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub code: String,
    pub stdin: Option<String>,
}

impl JobDescriptor {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            stdin: None,
        }
    }

    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }
}

/// How the submitted program ended, as reported by the sandbox runtime.
///
/// None of these fail the job: a program that crashes or runs out of time
/// still produces a `finished` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Verdict {
    Exited { code: i32 },
    Signaled { signal: i32 },
    TimeLimitExceeded,
    MemoryLimitExceeded,
    /// The runtime itself reported an internal failure while running
    SandboxError,
    /// The runtime produced no usable report
    Unknown,
}

impl Verdict {
    pub fn is_limit_exceeded(self) -> bool {
        matches!(
            self,
            Verdict::TimeLimitExceeded | Verdict::MemoryLimitExceeded
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu_time_ms: Option<u64>,
    pub wall_time_ms: Option<u64>,
    pub max_rss_kib: Option<u64>,
}

/// Terminal result of a job. The variant decides the terminal status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobOutcome {
    Finished {
        stdout: String,
        stderr: String,
        sandbox_diagnostic: String,
        verdict: Verdict,
        usage: ResourceUsage,
    },
    CompileFailed {
        compile_error: String,
    },
    SandboxInitFailed {
        sandbox_diagnostic: String,
    },
    InternalError {
        message: String,
    },
}

impl JobOutcome {
    pub fn status(&self) -> JobStatus {
        match self {
            JobOutcome::Finished { .. } => JobStatus::Finished,
            _ => JobStatus::Failed,
        }
    }
}

/// Change applied to a record by the worker that owns the job.
#[derive(Debug, Clone)]
pub enum JobUpdate {
    Started { slot_id: SlotId },
    Completed(JobOutcome),
}

impl JobUpdate {
    pub fn target_status(&self) -> JobStatus {
        match self {
            JobUpdate::Started { .. } => JobStatus::Running,
            JobUpdate::Completed(outcome) => outcome.status(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub status: JobStatus,
    pub slot_id: Option<SlotId>,
    pub outcome: Option<JobOutcome>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn new(id: JobId) -> Self {
        Self {
            id,
            status: JobStatus::Queued,
            slot_id: None,
            outcome: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn stdout(&self) -> Option<&str> {
        match &self.outcome {
            Some(JobOutcome::Finished { stdout, .. }) => Some(stdout),
            _ => None,
        }
    }

    pub fn stderr(&self) -> Option<&str> {
        match &self.outcome {
            Some(JobOutcome::Finished { stderr, .. }) => Some(stderr),
            _ => None,
        }
    }

    pub fn compile_error(&self) -> Option<&str> {
        match &self.outcome {
            Some(JobOutcome::CompileFailed { compile_error }) => Some(compile_error),
            _ => None,
        }
    }

    pub fn sandbox_diagnostic(&self) -> Option<&str> {
        match &self.outcome {
            Some(JobOutcome::Finished {
                sandbox_diagnostic, ..
            })
            | Some(JobOutcome::SandboxInitFailed { sandbox_diagnostic }) => {
                Some(sandbox_diagnostic)
            }
            _ => None,
        }
    }

    pub fn internal_error(&self) -> Option<&str> {
        match &self.outcome {
            Some(JobOutcome::InternalError { message }) => Some(message),
            _ => None,
        }
    }

    pub fn verdict(&self) -> Option<Verdict> {
        match &self.outcome {
            Some(JobOutcome::Finished { verdict, .. }) => Some(*verdict),
            _ => None,
        }
    }
}
