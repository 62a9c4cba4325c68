use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use crate::config::{RunLimits, RunnerConfig, SandboxBackend};
use crate::scheduler::job::{ResourceUsage, Verdict};
use crate::worker::isolate::IsolateRuntime;
use crate::worker::local::LocalRuntime;
use crate::worker::slot::{Slot, SlotId, BINARY_FILE, INPUT_FILE, STDERR_FILE, STDOUT_FILE};

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("slot {slot_id}: {message}")]
    Init { slot_id: SlotId, message: String },

    #[error("failed to start {program}: {message}")]
    Spawn { program: String, message: String },

    #[error("slot {slot_id}: sandbox did not return within {after:?}")]
    Unresponsive { slot_id: SlotId, after: Duration },

    #[error("slot {slot_id} cleanup failed: {message}")]
    Cleanup { slot_id: SlotId, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// What to execute inside an initialized slot. File names are relative to
/// the slot workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub binary: String,
    pub stdin: Option<String>,
    pub stdout: String,
    pub stderr: String,
    pub limits: RunLimits,
}

impl RunRequest {
    /// The fixed layout every job uses.
    pub fn standard(with_stdin: bool, limits: RunLimits) -> Self {
        Self {
            binary: BINARY_FILE.to_string(),
            stdin: with_stdin.then(|| INPUT_FILE.to_string()),
            stdout: STDOUT_FILE.to_string(),
            stderr: STDERR_FILE.to_string(),
            limits,
        }
    }
}

/// The runtime's own account of a run: its diagnostic stream plus whatever
/// structured status it reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub diagnostic: String,
    pub verdict: Verdict,
    pub usage: ResourceUsage,
}

/// Drives one kind of sandbox: reset a slot, run a binary in it, tear it down.
///
/// `init` must be idempotent: whatever a previous tenant left behind is
/// discarded before the slot is handed out again.
pub trait SandboxRuntime: Send + Sync + 'static {
    fn init(&self, slot_id: SlotId) -> impl Future<Output = Result<Slot, SandboxError>> + Send;

    fn run(
        &self,
        slot: &Slot,
        request: &RunRequest,
    ) -> impl Future<Output = Result<RunReport, SandboxError>> + Send;

    fn cleanup(&self, slot_id: SlotId) -> impl Future<Output = Result<(), SandboxError>> + Send;
}

/// Runtime selected from configuration at startup.
#[derive(Debug, Clone)]
pub enum Runtime {
    Isolate(IsolateRuntime),
    Local(LocalRuntime),
}

impl Runtime {
    pub fn from_config(config: &RunnerConfig) -> Self {
        match config.sandbox.backend {
            SandboxBackend::Isolate => Runtime::Isolate(IsolateRuntime::new(&config.sandbox)),
            SandboxBackend::Local => {
                tracing::warn!(
                    root = %config.sandbox.local_root.display(),
                    "Using local runtime: submissions run without isolation or memory limits"
                );
                Runtime::Local(LocalRuntime::new(&config.sandbox.local_root))
            }
        }
    }
}

impl SandboxRuntime for Runtime {
    async fn init(&self, slot_id: SlotId) -> Result<Slot, SandboxError> {
        match self {
            Runtime::Isolate(rt) => rt.init(slot_id).await,
            Runtime::Local(rt) => rt.init(slot_id).await,
        }
    }

    async fn run(&self, slot: &Slot, request: &RunRequest) -> Result<RunReport, SandboxError> {
        match self {
            Runtime::Isolate(rt) => rt.run(slot, request).await,
            Runtime::Local(rt) => rt.run(slot, request).await,
        }
    }

    async fn cleanup(&self, slot_id: SlotId) -> Result<(), SandboxError> {
        match self {
            Runtime::Isolate(rt) => rt.cleanup(slot_id).await,
            Runtime::Local(rt) => rt.cleanup(slot_id).await,
        }
    }
}
