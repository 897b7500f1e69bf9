use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use ralph_loop::{
    AgentType, BeadsBridge, LoopConfig, MultiObserver, ProductionSeams, ProgressObserver,
    ProgressReporter, RunContext, SequentialLoop, WaveOrchestrator, WorktreeBridge,
};

#[derive(Parser)]
#[command(name = "ralph", about = "Run coding agents against ready beads")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Work ready beads one at a time in the work directory.
    Run(RunArgs),
    /// Dispatch every ready bead in parallel, one worktree each.
    Wave(RunArgs),
    /// Show open beads from the tracker.
    Status {
        #[arg(long, default_value = ".")]
        work_dir: PathBuf,
        /// Cap the number of beads listed.
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Git checkout holding the beads database.
    #[arg(long, default_value = ".")]
    work_dir: PathBuf,

    /// Only pick beads under this epic.
    #[arg(long)]
    epic: Option<String>,

    /// Run exactly this bead instead of picking.
    #[arg(long)]
    bead: Option<String>,

    #[arg(long, default_value_t = 10)]
    max_iterations: u32,

    /// Log what would run without executing anything.
    #[arg(long)]
    dry_run: bool,

    /// Forward raw agent output instead of the condensed progress lines.
    #[arg(short, long)]
    verbose: bool,

    /// Agent variant to run (coder or verifier).
    #[arg(long, default_value = "coder")]
    agent: AgentType,

    /// Per-agent timeout in seconds.
    #[arg(long, default_value_t = 600)]
    agent_timeout: u64,

    #[arg(long, default_value_t = 3)]
    consecutive_failure_limit: u32,

    /// Whole-run wall clock budget in seconds.
    #[arg(long, default_value_t = 7200)]
    wall_clock_timeout: u64,

    /// Max parallel agents in a wave; 0 means one per ready bead.
    #[arg(long, default_value_t = 0)]
    concurrency: usize,

    /// Downgrade successes whose work did not land in git.
    #[arg(long)]
    strict_landing: bool,
}

impl RunArgs {
    fn into_config(self) -> LoopConfig {
        let mut config = LoopConfig::new(self.work_dir);
        config.epic = self.epic;
        config.target_bead = self.bead;
        config.max_iterations = self.max_iterations;
        config.dry_run = self.dry_run;
        config.verbose = self.verbose;
        config.agent_type = self.agent;
        config.agent_timeout = Duration::from_secs(self.agent_timeout);
        config.consecutive_failure_limit = self.consecutive_failure_limit;
        config.wall_clock_timeout = Duration::from_secs(self.wall_clock_timeout);
        config.concurrency = self.concurrency;
        config.strict_landing = self.strict_landing;
        config
    }
}

/// A context that dies on ctrl-c.
fn interruptible_context() -> RunContext {
    let token = CancellationToken::new();
    let ctx = RunContext::with_token(token.clone());
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            token.cancel();
        }
    });
    ctx
}

fn build_observer() -> Arc<dyn ProgressObserver> {
    Arc::new(MultiObserver::new(vec![Some(
        Arc::new(ProgressReporter::stdout()) as Arc<dyn ProgressObserver>,
    )]))
}

async fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Run(args) => {
            let config = args.into_config();
            let ctx = interruptible_context();
            let observer = build_observer();
            let seams = Arc::new(ProductionSeams::new(config.clone(), observer.clone()));
            let runner = SequentialLoop::new(config, seams, observer);
            let summary = runner.run(&ctx).await?;
            Ok(summary.stop_reason.exit_code())
        }
        Commands::Wave(args) => {
            let config = args.into_config();
            let ctx = interruptible_context();
            let observer = build_observer();
            let worktrees = Arc::new(WorktreeBridge::new(&config.work_dir).await?);
            let seams = Arc::new(ProductionSeams::new(config.clone(), observer.clone()));
            let runner = WaveOrchestrator::new(config, seams, observer, worktrees);
            let summary = runner.run(&ctx).await?;
            Ok(summary.stop_reason.exit_code())
        }
        Commands::Status { work_dir, limit } => {
            let bridge = BeadsBridge::new(&work_dir);
            let beads = bridge.list(limit).await?;
            for bead in &beads {
                println!("{}  [{}]  {}", bead.id, bead.status, bead.title);
            }
            info!(beads = beads.len(), "tracker status");
            Ok(0)
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            error!("{err:#}");
            1
        }
    };
    std::process::exit(code);
}
