use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use box_runner::api::{run_api, ApiState, JobView};
use box_runner::config::{
    CompilerConfig, RunLimits, RunnerConfig, SandboxBackend, SandboxConfig,
};
use box_runner::scheduler::JobDescriptor;
use box_runner::shutdown::install_shutdown_handler;
use box_runner::worker::{CcCompiler, Runtime};
use box_runner::Pool;

#[derive(Parser, Debug)]
#[command(name = "box-runner")]
#[command(version)]
#[command(about = "Compile and run untrusted C submissions in sandboxed slots")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the HTTP server and worker pool
    Server(ServerArgs),

    /// Compile and run a single source file, print the job record as JSON
    Run(RunArgs),
}

// =============================================================================
// Arguments
// =============================================================================

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Backend {
    Isolate,
    Local,
}

/// Options shared by every subcommand that builds a pool.
#[derive(Parser, Debug)]
struct SandboxArgs {
    /// Sandbox runtime used to execute submissions
    #[arg(long, value_enum, default_value = "isolate")]
    backend: Backend,

    /// Path or name of the isolate executable
    #[arg(long, default_value = "isolate")]
    isolate_bin: String,

    /// Directory where isolate keeps its boxes
    #[arg(long, default_value = "/var/local/lib/isolate")]
    box_root: PathBuf,

    /// Run isolate boxes in cgroup mode (memory charged per box, OOM kills reported)
    #[arg(long)]
    isolate_cgroups: bool,

    /// Directory for local workspaces and isolate meta files
    #[arg(long)]
    workspace_root: Option<PathBuf>,

    /// CPU time limit per run, in milliseconds
    #[arg(long, default_value = "1000")]
    time_limit_ms: u64,

    /// Wall clock limit per run, in milliseconds
    #[arg(long, default_value = "3000")]
    wall_time_limit_ms: u64,

    /// Memory limit per run, in KiB
    #[arg(long, default_value = "262144")]
    memory_kib: u64,

    /// C compiler executable
    #[arg(long, default_value = "cc")]
    compiler: String,

    /// Extra compiler argument (repeatable), e.g. --compiler-arg=-O2
    #[arg(long = "compiler-arg", allow_hyphen_values = true)]
    compiler_args: Vec<String>,

    /// Compilation timeout, in seconds
    #[arg(long, default_value = "30")]
    compile_timeout_secs: u64,
}

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Port to listen on for HTTP
    #[arg(long, default_value = "8000")]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Number of workers (one sandbox slot each)
    #[arg(long, default_value = "4")]
    workers: usize,

    /// Maximum number of queued jobs before submissions are rejected
    #[arg(long, default_value = "200")]
    queue_capacity: usize,

    /// How long shutdown waits for running jobs, in seconds
    #[arg(long, default_value = "10")]
    shutdown_timeout_secs: u64,

    #[command(flatten)]
    sandbox: SandboxArgs,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// C source file to compile and run
    source: PathBuf,

    /// File whose contents are fed to the program's stdin
    #[arg(long)]
    stdin_file: Option<PathBuf>,

    #[command(flatten)]
    sandbox: SandboxArgs,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn build_config(workers: usize, queue_capacity: usize, args: &SandboxArgs) -> RunnerConfig {
    let defaults = SandboxConfig::default();
    let sandbox = SandboxConfig {
        backend: match args.backend {
            Backend::Isolate => SandboxBackend::Isolate,
            Backend::Local => SandboxBackend::Local,
        },
        isolate_binary: args.isolate_bin.clone(),
        box_root: args.box_root.clone(),
        local_root: args
            .workspace_root
            .clone()
            .unwrap_or(defaults.local_root),
        isolate_cgroups: args.isolate_cgroups,
    };

    let mut config = RunnerConfig::new(workers, queue_capacity)
        .with_limits(RunLimits {
            cpu_time: Duration::from_millis(args.time_limit_ms),
            wall_time: Duration::from_millis(args.wall_time_limit_ms),
            memory_kib: args.memory_kib,
        })
        .with_sandbox(sandbox);
    config.compiler = CompilerConfig {
        program: args.compiler.clone(),
        args: args.compiler_args.clone(),
        timeout: Duration::from_secs(args.compile_timeout_secs),
    };
    config
}

fn start_pool(config: &RunnerConfig) -> Result<Pool, Box<dyn std::error::Error>> {
    let runtime = Runtime::from_config(config);
    let compiler = CcCompiler::new(config.compiler.clone());
    Ok(Pool::start(config, runtime, compiler)?)
}

// =============================================================================
// Subcommands
// =============================================================================

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = build_config(args.workers, args.queue_capacity, &args.sandbox)
        .with_shutdown_timeout(Duration::from_secs(args.shutdown_timeout_secs));
    let listen_addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;

    tracing::info!(
        listen_addr = %listen_addr,
        workers = config.workers,
        queue_capacity = config.queue_capacity,
        backend = ?config.sandbox.backend,
        "Starting box-runner"
    );

    let pool = start_pool(&config)?;
    let shutdown = install_shutdown_handler();

    let served = run_api(listen_addr, ApiState::new(pool.submitter()), shutdown.clone()).await;
    shutdown.cancel();

    let report = pool.shutdown().await;
    if !report.is_clean() {
        tracing::warn!(slots = ?report.timed_out, "Some workers were still busy at exit");
    }

    served?;
    Ok(())
}

async fn run_once(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let code = tokio::fs::read_to_string(&args.source).await?;
    let stdin = match &args.stdin_file {
        Some(path) => Some(tokio::fs::read_to_string(path).await?),
        None => None,
    };

    let config = build_config(1, 1, &args.sandbox);
    let pool = start_pool(&config)?;

    let job_id = pool.submit(JobDescriptor { code, stdin }).await?;
    let record = loop {
        match pool.status(&job_id).await {
            Some(record) if record.status.is_terminal() => break record,
            Some(_) => tokio::time::sleep(Duration::from_millis(20)).await,
            None => return Err(format!("job {} disappeared", job_id).into()),
        }
    };
    pool.shutdown().await;

    println!("{}", serde_json::to_string_pretty(&JobView::from(&record))?);
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging();

    match args.command {
        Commands::Server(server_args) => run_server(server_args).await?,
        Commands::Run(run_args) => run_once(run_args).await?,
    }

    Ok(())
}
