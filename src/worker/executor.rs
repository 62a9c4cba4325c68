use std::any::Any;
use std::sync::Arc;

use crate::config::RunLimits;
use crate::scheduler::job::{JobDescriptor, JobId, JobOutcome};
use crate::worker::process::Invocation;
use crate::worker::runtime::{RunRequest, SandboxError, SandboxRuntime};
use crate::worker::slot::{SlotId, STDERR_FILE, STDOUT_FILE};
use crate::worker::toolchain::Compiler;

/// Runs one job against one slot: reset, materialize, compile, run, and
/// always clean up.
///
/// Every path ends in a [`JobOutcome`]; nothing escapes as an error or a
/// panic. A non-zero exit of the submitted program is still `Finished`.
pub struct JobExecutor<R, C> {
    runtime: Arc<R>,
    compiler: Arc<C>,
    limits: RunLimits,
}

impl<R, C> Clone for JobExecutor<R, C> {
    fn clone(&self) -> Self {
        Self {
            runtime: self.runtime.clone(),
            compiler: self.compiler.clone(),
            limits: self.limits.clone(),
        }
    }
}

impl<R: SandboxRuntime, C: Compiler> JobExecutor<R, C> {
    pub fn new(runtime: Arc<R>, compiler: Arc<C>, limits: RunLimits) -> Self {
        Self {
            runtime,
            compiler,
            limits,
        }
    }

    /// Execute `descriptor` in `slot_id` and return its terminal outcome.
    pub async fn execute(
        &self,
        job_id: JobId,
        slot_id: SlotId,
        descriptor: JobDescriptor,
    ) -> JobOutcome {
        // Steps 1-4 run in their own task so a panic is contained and
        // reported instead of killing the worker.
        let lifecycle = {
            let this = self.clone();
            tokio::spawn(async move { this.lifecycle(slot_id, descriptor).await })
        };

        let outcome = match lifecycle.await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                tracing::error!(job_id = %job_id, slot_id, error = %e, "Job hit an internal error");
                JobOutcome::InternalError {
                    message: e.to_string(),
                }
            }
            Err(e) if e.is_panic() => {
                let message = panic_message(e.into_panic());
                tracing::error!(job_id = %job_id, slot_id, panic = %message, "Job lifecycle panicked");
                JobOutcome::InternalError {
                    message: format!("internal panic: {}", message),
                }
            }
            Err(e) => JobOutcome::InternalError {
                message: e.to_string(),
            },
        };

        if let Err(e) = self.runtime.cleanup(slot_id).await {
            tracing::warn!(job_id = %job_id, slot_id, error = %e, "Slot cleanup failed");
        }

        outcome
    }

    async fn lifecycle(
        &self,
        slot_id: SlotId,
        descriptor: JobDescriptor,
    ) -> Result<JobOutcome, SandboxError> {
        let slot = match self.runtime.init(slot_id).await {
            Ok(slot) => slot,
            Err(e) => {
                tracing::warn!(slot_id, error = %e, "Slot init failed");
                return Ok(JobOutcome::SandboxInitFailed {
                    sandbox_diagnostic: e.to_string(),
                });
            }
        };

        let with_stdin = slot.materialize(&descriptor).await?;

        let binary = slot.binary_path();
        match self.compiler.compile(&slot.source_path(), &binary).await {
            Invocation::Completed(out) if out.success() => {
                if !tokio::fs::try_exists(&binary).await.unwrap_or(false) {
                    return Ok(JobOutcome::CompileFailed {
                        compile_error: "compile failed: output binary not found".to_string(),
                    });
                }
            }
            Invocation::Completed(out) => {
                tracing::debug!(slot_id, exit_code = ?out.exit_code, "Compilation failed");
                return Ok(JobOutcome::CompileFailed {
                    compile_error: out.diagnostic(),
                });
            }
            Invocation::TimedOut { after } => {
                return Ok(JobOutcome::CompileFailed {
                    compile_error: format!("compilation timed out after {:?}", after),
                });
            }
            Invocation::SpawnFailed { program, error } => {
                return Err(SandboxError::Spawn {
                    program,
                    message: error,
                });
            }
        }

        let request = RunRequest::standard(with_stdin, self.limits.clone());
        let report = self.runtime.run(&slot, &request).await?;

        Ok(JobOutcome::Finished {
            stdout: slot.read_capture(STDOUT_FILE).await?,
            stderr: slot.read_capture(STDERR_FILE).await?,
            sandbox_diagnostic: report.diagnostic,
            verdict: report.verdict,
            usage: report.usage,
        })
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
