//! Driver for the `isolate` sandbox.
//!
//! Each slot maps to an isolate box id. Limits, redirections and the meta
//! report are passed on the command line; isolate enforces them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;

use crate::config::SandboxConfig;
use crate::scheduler::job::{ResourceUsage, Verdict};
use crate::worker::process::Invocation;
use crate::worker::runtime::{RunReport, RunRequest, SandboxError, SandboxRuntime};
use crate::worker::slot::{read_lossy, Slot, SlotId};

/// Extra time granted to isolate itself on top of the wall-time limit.
const RUN_GRACE: Duration = Duration::from_secs(5);
const CONTROL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct IsolateRuntime {
    binary: String,
    box_root: PathBuf,
    meta_dir: PathBuf,
    cgroups: bool,
    run_grace: Duration,
}

impl IsolateRuntime {
    pub fn new(config: &SandboxConfig) -> Self {
        Self {
            binary: config.isolate_binary.clone(),
            box_root: config.box_root.clone(),
            meta_dir: config.local_root.join("meta"),
            cgroups: config.isolate_cgroups,
            run_grace: RUN_GRACE,
        }
    }

    /// Override how long isolate may overrun the wall-time limit before it
    /// is considered hung.
    pub fn with_run_grace(mut self, grace: Duration) -> Self {
        self.run_grace = grace;
        self
    }

    fn command(&self, slot_id: SlotId) -> Command {
        let mut cmd = Command::new(&self.binary);
        // --cg has to be given on every call for the box, init and cleanup included.
        if self.cgroups {
            cmd.arg("--cg");
        }
        cmd.arg(format!("--box-id={}", slot_id));
        cmd
    }

    fn meta_path(&self, slot_id: SlotId) -> PathBuf {
        self.meta_dir.join(format!("box-{}.meta", slot_id))
    }

    /// Command line for running `request` in box `slot_id`.
    pub fn run_command(&self, slot_id: SlotId, request: &RunRequest) -> Command {
        let limits = &request.limits;
        let mut cmd = self.command(slot_id);
        cmd.arg(format!("--time={}", seconds(limits.cpu_time)))
            .arg(format!("--wall-time={}", seconds(limits.wall_time)))
            .arg(if self.cgroups {
                format!("--cg-mem={}", limits.memory_kib)
            } else {
                format!("--mem={}", limits.memory_kib)
            })
            .arg(format!("--stdout={}", request.stdout))
            .arg(format!("--stderr={}", request.stderr));
        if let Some(stdin) = &request.stdin {
            cmd.arg(format!("--stdin={}", stdin));
        }
        cmd.arg(format!("--meta={}", self.meta_path(slot_id).display()))
            .arg("--run")
            .arg("--")
            .arg(format!("./{}", request.binary));
        cmd
    }

    async fn discard(&self, slot_id: SlotId) -> Invocation {
        let mut cmd = self.command(slot_id);
        cmd.arg("--cleanup");
        Invocation::run(cmd, Some(CONTROL_TIMEOUT)).await
    }

    fn workspace_from_init(&self, slot_id: SlotId, stdout: &str) -> PathBuf {
        // isolate prints the box directory on --init; fall back to the
        // conventional layout if it printed nothing.
        let reported = stdout.trim();
        let base = if reported.is_empty() {
            self.box_root.join(slot_id.to_string())
        } else {
            PathBuf::from(reported)
        };
        base.join("box")
    }
}

fn seconds(d: Duration) -> String {
    format!("{:.3}", d.as_secs_f64())
}

impl SandboxRuntime for IsolateRuntime {
    async fn init(&self, slot_id: SlotId) -> Result<Slot, SandboxError> {
        // Whatever the last tenant left behind goes first.
        let _ = self.discard(slot_id).await;

        let mut cmd = self.command(slot_id);
        cmd.arg("--init");
        match Invocation::run(cmd, Some(CONTROL_TIMEOUT)).await {
            Invocation::Completed(out) if out.success() => {
                let workspace = self.workspace_from_init(slot_id, &out.stdout);
                Ok(Slot::new(slot_id, workspace))
            }
            Invocation::Completed(out) => Err(SandboxError::Init {
                slot_id,
                message: if out.stderr.trim().is_empty() {
                    "isolate init failed".to_string()
                } else {
                    out.stderr.trim().to_string()
                },
            }),
            Invocation::TimedOut { after } => Err(SandboxError::Init {
                slot_id,
                message: format!("isolate init timed out after {:?}", after),
            }),
            Invocation::SpawnFailed { program, error } => Err(SandboxError::Init {
                slot_id,
                message: format!("failed to start {}: {}", program, error),
            }),
        }
    }

    async fn run(&self, slot: &Slot, request: &RunRequest) -> Result<RunReport, SandboxError> {
        tokio::fs::create_dir_all(&self.meta_dir).await?;
        let meta_path = self.meta_path(slot.id);
        let _ = tokio::fs::remove_file(&meta_path).await;

        let timeout = request.limits.wall_time + self.run_grace;
        let output = match Invocation::run(self.run_command(slot.id, request), Some(timeout)).await
        {
            Invocation::Completed(out) => out,
            // isolate enforces the wall-time limit itself; not returning
            // means the sandbox is stuck, not the program.
            Invocation::TimedOut { after } => {
                return Err(SandboxError::Unresponsive {
                    slot_id: slot.id,
                    after,
                });
            }
            Invocation::SpawnFailed { program, error } => {
                return Err(SandboxError::Spawn {
                    program,
                    message: error,
                });
            }
        };

        let meta = read_meta(&meta_path).await?;
        let _ = tokio::fs::remove_file(&meta_path).await;

        let (mut verdict, usage) = parse_meta(&meta);
        // Exit status 2 is isolate's own failure; the meta file may be empty.
        if verdict == Verdict::Unknown && output.exit_code == Some(2) {
            verdict = Verdict::SandboxError;
        }

        Ok(RunReport {
            diagnostic: output.stderr.trim().to_string(),
            verdict,
            usage,
        })
    }

    async fn cleanup(&self, slot_id: SlotId) -> Result<(), SandboxError> {
        match self.discard(slot_id).await {
            Invocation::Completed(out) if out.success() => Ok(()),
            Invocation::Completed(out) => Err(SandboxError::Cleanup {
                slot_id,
                message: out.diagnostic(),
            }),
            Invocation::TimedOut { after } => Err(SandboxError::Cleanup {
                slot_id,
                message: format!("timed out after {:?}", after),
            }),
            Invocation::SpawnFailed { program, error } => Err(SandboxError::Spawn {
                program,
                message: error,
            }),
        }
    }
}

async fn read_meta(path: &Path) -> Result<String, SandboxError> {
    Ok(read_lossy(path).await?)
}

/// Interpret an isolate meta report (`key:value` per line).
pub fn parse_meta(meta: &str) -> (Verdict, ResourceUsage) {
    let mut status = None;
    let mut exit_code = None;
    let mut exit_signal = None;
    let mut oom_killed = false;
    let mut usage = ResourceUsage::default();

    for line in meta.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "status" => status = Some(value.to_string()),
            "exitcode" => exit_code = value.parse::<i32>().ok(),
            "exitsig" => exit_signal = value.parse::<i32>().ok(),
            "cg-oom-killed" => oom_killed = value == "1",
            "time" => usage.cpu_time_ms = secs_to_ms(value),
            "time-wall" => usage.wall_time_ms = secs_to_ms(value),
            "max-rss" => usage.max_rss_kib = value.parse::<u64>().ok(),
            _ => {}
        }
    }

    if meta.trim().is_empty() {
        return (Verdict::Unknown, usage);
    }

    let verdict = if oom_killed {
        Verdict::MemoryLimitExceeded
    } else {
        match status.as_deref() {
            Some("TO") => Verdict::TimeLimitExceeded,
            Some("SG") => Verdict::Signaled {
                signal: exit_signal.unwrap_or(0),
            },
            Some("XX") => Verdict::SandboxError,
            Some("RE") | None => Verdict::Exited {
                code: exit_code.unwrap_or(0),
            },
            Some(_) => Verdict::Unknown,
        }
    };
    (verdict, usage)
}

fn secs_to_ms(value: &str) -> Option<u64> {
    value
        .parse::<f64>()
        .ok()
        .filter(|s| s.is_finite() && *s >= 0.0)
        .map(|s| (s * 1000.0).round() as u64)
}
