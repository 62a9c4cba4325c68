use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

/// Captured result of an external process that ran to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Best diagnostic text: stderr, else stdout, else a description of the
    /// exit status.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        match (self.exit_code, self.signal) {
            (Some(code), _) => format!("exited with status {}", code),
            (None, Some(sig)) => format!("killed by signal {}", sig),
            (None, None) => "exited abnormally".to_string(),
        }
    }
}

/// Outcome of invoking an external tool.
///
/// `SpawnFailed` is kept apart from a non-zero exit so that a missing
/// compiler or sandbox binary cannot be mistaken for a rejected submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Completed(ProcessOutput),
    TimedOut { after: Duration },
    SpawnFailed { program: String, error: String },
}

impl Invocation {
    /// Run `cmd` to completion, capturing stdout and stderr. The child is
    /// killed if `timeout` elapses first.
    pub async fn run(mut cmd: Command, timeout: Option<Duration>) -> Self {
        let program = cmd.as_std().get_program().to_string_lossy().into_owned();

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(program = %program, error = %e, "Failed to spawn process");
                return Invocation::SpawnFailed {
                    program,
                    error: e.to_string(),
                };
            }
        };

        let waited = match timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(program = %program, timeout = ?limit, "Process timed out");
                    return Invocation::TimedOut { after: limit };
                }
            },
            None => child.wait_with_output().await,
        };

        match waited {
            Ok(output) => Invocation::Completed(ProcessOutput {
                exit_code: output.status.code(),
                signal: output.status.signal(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }),
            Err(e) => Invocation::SpawnFailed {
                program,
                error: e.to_string(),
            },
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, Invocation::Completed(out) if out.success())
    }
}
