use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use tokio::fs::File;
use tokio::process::Command;

use crate::scheduler::job::{ResourceUsage, Verdict};
use crate::worker::runtime::{RunReport, RunRequest, SandboxError, SandboxRuntime};
use crate::worker::slot::{Slot, SlotId};

/// Unsandboxed runtime: each slot is a plain directory and the program runs
/// as a child of this process with only a wall-clock limit.
///
/// Meant for development machines without `isolate` and for tests.
#[derive(Debug, Clone)]
pub struct LocalRuntime {
    root: PathBuf,
}

impl LocalRuntime {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn workspace(&self, slot_id: SlotId) -> PathBuf {
        self.root.join(format!("slot-{}", slot_id))
    }
}

async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

impl SandboxRuntime for LocalRuntime {
    async fn init(&self, slot_id: SlotId) -> Result<Slot, SandboxError> {
        let workspace = self.workspace(slot_id);
        let prepared = async {
            remove_if_exists(&workspace).await?;
            tokio::fs::create_dir_all(&workspace).await
        };
        prepared.await.map_err(|e| SandboxError::Init {
            slot_id,
            message: format!("cannot prepare {}: {}", workspace.display(), e),
        })?;
        Ok(Slot::new(slot_id, workspace))
    }

    async fn run(&self, slot: &Slot, request: &RunRequest) -> Result<RunReport, SandboxError> {
        let stdin = match &request.stdin {
            Some(name) => Stdio::from(File::open(slot.path(name)).await?.into_std().await),
            None => Stdio::null(),
        };
        let stdout = File::create(slot.path(&request.stdout)).await?.into_std().await;
        let stderr = File::create(slot.path(&request.stderr)).await?.into_std().await;

        let program = slot.path(&request.binary);
        let mut cmd = Command::new(&program);
        cmd.current_dir(&slot.workspace)
            .stdin(stdin)
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true);

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|e| SandboxError::Spawn {
            program: program.display().to_string(),
            message: e.to_string(),
        })?;

        let limit = request.limits.wall_time;
        let waited = tokio::time::timeout(limit, child.wait()).await;
        let usage = ResourceUsage {
            wall_time_ms: Some(started.elapsed().as_millis() as u64),
            ..ResourceUsage::default()
        };

        let status = match waited {
            Ok(status) => status?,
            Err(_) => {
                if let Err(e) = child.kill().await {
                    tracing::warn!(slot_id = slot.id, error = %e, "Failed to kill timed out program");
                }
                return Ok(RunReport {
                    diagnostic: format!("Time limit exceeded (wall clock {:?})", limit),
                    verdict: Verdict::TimeLimitExceeded,
                    usage,
                });
            }
        };

        let verdict = match (status.code(), status.signal()) {
            (Some(code), _) => Verdict::Exited { code },
            (None, Some(signal)) => Verdict::Signaled { signal },
            (None, None) => Verdict::Unknown,
        };
        Ok(RunReport {
            diagnostic: String::new(),
            verdict,
            usage,
        })
    }

    async fn cleanup(&self, slot_id: SlotId) -> Result<(), SandboxError> {
        remove_if_exists(&self.workspace(slot_id))
            .await
            .map_err(|e| SandboxError::Cleanup {
                slot_id,
                message: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunLimits;
    use crate::worker::slot::{STDERR_FILE, STDOUT_FILE};
    use std::os::unix::fs::PermissionsExt;
    use std::time::Duration;

    fn write_script(slot: &Slot, body: &str) {
        let path = slot.binary_path();
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[tokio::test]
    async fn init_discards_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let rt = LocalRuntime::new(dir.path());

        let slot = rt.init(0).await.unwrap();
        std::fs::write(slot.path("leftover.txt"), "old").unwrap();

        let slot = rt.init(0).await.unwrap();
        assert!(slot.workspace.exists());
        assert!(!slot.path("leftover.txt").exists());
    }

    #[tokio::test]
    async fn cleanup_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let rt = LocalRuntime::new(dir.path());

        let slot = rt.init(1).await.unwrap();
        rt.cleanup(1).await.unwrap();
        assert!(!slot.workspace.exists());
        rt.cleanup(1).await.unwrap();
    }

    #[tokio::test]
    async fn run_redirects_streams_and_reports_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let rt = LocalRuntime::new(dir.path());
        let slot = rt.init(0).await.unwrap();
        std::fs::write(slot.input_path(), "abc\n").unwrap();
        write_script(&slot, "read line; echo \"$line\"; echo oops >&2; exit 4");

        let report = rt
            .run(&slot, &RunRequest::standard(true, RunLimits::default()))
            .await
            .unwrap();
        assert_eq!(report.verdict, Verdict::Exited { code: 4 });
        assert_eq!(slot.read_capture(STDOUT_FILE).await.unwrap(), "abc\n");
        assert_eq!(slot.read_capture(STDERR_FILE).await.unwrap(), "oops\n");
        assert!(report.usage.wall_time_ms.is_some());
    }

    #[tokio::test]
    async fn run_enforces_wall_time() {
        let dir = tempfile::tempdir().unwrap();
        let rt = LocalRuntime::new(dir.path());
        let slot = rt.init(0).await.unwrap();
        write_script(&slot, "sleep 5");

        let limits = RunLimits {
            wall_time: Duration::from_millis(200),
            ..RunLimits::default()
        };
        let report = rt
            .run(&slot, &RunRequest::standard(false, limits))
            .await
            .unwrap();
        assert_eq!(report.verdict, Verdict::TimeLimitExceeded);
        assert!(!report.diagnostic.is_empty());
    }

    #[tokio::test]
    async fn run_without_binary_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let rt = LocalRuntime::new(dir.path());
        let slot = rt.init(0).await.unwrap();

        let err = rt
            .run(&slot, &RunRequest::standard(false, RunLimits::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Spawn { .. }));
    }
}
