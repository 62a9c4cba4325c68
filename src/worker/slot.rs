use std::io;
use std::path::{Path, PathBuf};

use crate::scheduler::JobDescriptor;

pub type SlotId = usize;

pub const SOURCE_FILE: &str = "main.c";
pub const INPUT_FILE: &str = "input.txt";
pub const BINARY_FILE: &str = "main";
pub const STDOUT_FILE: &str = "out.txt";
pub const STDERR_FILE: &str = "err.txt";

/// An initialized sandbox slot and the workspace directory it exposes.
///
/// Produced by `SandboxRuntime::init`; only valid until the next cleanup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub id: SlotId,
    pub workspace: PathBuf,
}

impl Slot {
    pub fn new(id: SlotId, workspace: impl Into<PathBuf>) -> Self {
        Self {
            id,
            workspace: workspace.into(),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.workspace.join(name)
    }

    pub fn source_path(&self) -> PathBuf {
        self.path(SOURCE_FILE)
    }

    pub fn input_path(&self) -> PathBuf {
        self.path(INPUT_FILE)
    }

    pub fn binary_path(&self) -> PathBuf {
        self.path(BINARY_FILE)
    }

    /// Write the submission into the workspace. Returns whether an input
    /// file was written.
    pub async fn materialize(&self, descriptor: &JobDescriptor) -> io::Result<bool> {
        tokio::fs::write(self.source_path(), descriptor.code.as_bytes()).await?;
        match &descriptor.stdin {
            Some(stdin) => {
                tokio::fs::write(self.input_path(), stdin.as_bytes()).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Read a capture file, replacing invalid UTF-8. A missing file reads as
    /// empty.
    pub async fn read_capture(&self, name: &str) -> io::Result<String> {
        read_lossy(&self.path(name)).await
    }
}

pub(crate) async fn read_lossy(path: &Path) -> io::Result<String> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e),
    }
}
