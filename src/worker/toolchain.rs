use std::future::Future;
use std::path::Path;

use tokio::process::Command;

use crate::config::CompilerConfig;
use crate::worker::process::Invocation;

/// Turns a source file into an executable on the host.
pub trait Compiler: Send + Sync + 'static {
    fn compile(&self, source: &Path, output: &Path) -> impl Future<Output = Invocation> + Send;
}

/// Invokes a C compiler driver: `<program> <source> -o <output> [args..]`.
#[derive(Debug, Clone)]
pub struct CcCompiler {
    config: CompilerConfig,
}

impl CcCompiler {
    pub fn new(config: CompilerConfig) -> Self {
        Self { config }
    }

    fn command(&self, source: &Path, output: &Path) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.arg(source).arg("-o").arg(output).args(&self.config.args);
        cmd
    }
}

impl Default for CcCompiler {
    fn default() -> Self {
        Self::new(CompilerConfig::default())
    }
}

impl Compiler for CcCompiler {
    async fn compile(&self, source: &Path, output: &Path) -> Invocation {
        tracing::debug!(
            compiler = %self.config.program,
            source = %source.display(),
            "Compiling submission"
        );
        Invocation::run(self.command(source, output), Some(self.config.timeout)).await
    }
}
