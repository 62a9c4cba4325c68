use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, RunnerError};

/// Resource ceilings applied to every run. Fixed at startup, never per job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLimits {
    /// CPU time ceiling enforced by the sandbox runtime
    pub cpu_time: Duration,
    /// Wall clock ceiling, catches programs that sleep or block on input
    pub wall_time: Duration,
    /// Memory ceiling in KiB
    pub memory_kib: u64,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            cpu_time: Duration::from_secs(1),
            wall_time: Duration::from_secs(3),
            memory_kib: 262_144,
        }
    }
}

/// How submitted sources are compiled on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerConfig {
    /// Compiler executable (looked up on `PATH`)
    pub program: String,
    /// Extra arguments appended after `<source> -o <binary>`
    pub args: Vec<String>,
    /// Upper bound on a single compilation
    pub timeout: Duration,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            program: "cc".to_string(),
            args: Vec::new(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxBackend {
    /// Run through the `isolate` sandbox (namespaces + limits)
    Isolate,
    /// Plain per-slot directories, no isolation. Development and tests only.
    Local,
}

/// Where slot workspaces live and which runtime drives them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxConfig {
    pub backend: SandboxBackend,
    /// `isolate` executable
    pub isolate_binary: String,
    /// Directory holding isolate boxes (`<box_root>/<id>/box`)
    pub box_root: PathBuf,
    /// Directory holding local slot workspaces
    pub local_root: PathBuf,
    /// Run isolate boxes under its cgroup controller. Memory is then charged
    /// to the box (`--cg-mem`) and OOM kills are reported; without it the
    /// memory ceiling is an address-space limit and an overrun surfaces as a
    /// signal or runtime error.
    pub isolate_cgroups: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            backend: SandboxBackend::Isolate,
            isolate_binary: "isolate".to_string(),
            box_root: PathBuf::from("/var/local/lib/isolate"),
            local_root: std::env::temp_dir().join("box-runner"),
            isolate_cgroups: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Number of workers, and therefore sandbox slots
    pub workers: usize,
    /// Maximum number of jobs waiting in the submission queue
    pub queue_capacity: usize,
    pub limits: RunLimits,
    pub compiler: CompilerConfig,
    pub sandbox: SandboxConfig,
    /// How long shutdown waits for workers before giving up on them
    pub shutdown_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 200,
            limits: RunLimits::default(),
            compiler: CompilerConfig::default(),
            sandbox: SandboxConfig::default(),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl RunnerConfig {
    pub fn new(workers: usize, queue_capacity: usize) -> Self {
        Self {
            workers,
            queue_capacity,
            ..Default::default()
        }
    }

    pub fn with_limits(mut self, limits: RunLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_sandbox(mut self, sandbox: SandboxConfig) -> Self {
        self.sandbox = sandbox;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Reject configurations the pool cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(RunnerError::Config("workers must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(RunnerError::Config(
                "queue capacity must be at least 1".into(),
            ));
        }
        if self.limits.cpu_time.is_zero() || self.limits.wall_time.is_zero() {
            return Err(RunnerError::Config("time limits must be non-zero".into()));
        }
        if self.limits.memory_kib == 0 {
            return Err(RunnerError::Config("memory limit must be non-zero".into()));
        }
        if self.compiler.program.trim().is_empty() {
            return Err(RunnerError::Config("compiler program is empty".into()));
        }
        Ok(())
    }
}
