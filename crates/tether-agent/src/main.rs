//! `tether-agent` - persisted write-back and replication agent.
//!
//! Usage:
//!   tether-agent [-c tether.toml] run
//!   tether-agent enqueue writeback <namespace> <digest>
//!   tether-agent enqueue replicate <tag> <digest> <destination> [--dependency <digest>]...
//!   tether-agent status [--json]
//!   tether-agent drain

mod bootstrap;
mod config;
mod telemetry;
mod writeback;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tether_core::app::StatusView;
use tether_core::domain::{DeferredTask, ReplicationTask, WritebackTask};
use tether_core::ports::{SystemClock, submit};
use tracing::info;

use config::AgentConfig;

#[derive(Parser, Debug)]
#[command(name = "tether-agent", about = "Persisted retry agent for blob write-back")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to the TOML config file.
    #[arg(short = 'c', long = "config", env = "TETHER_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides `store.path`.
    #[arg(long, env = "TETHER_STORE_PATH")]
    store_path: Option<PathBuf>,

    /// Overrides `log.level`; `RUST_LOG` still wins.
    #[arg(long, env = "TETHER_LOG_LEVEL")]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the retry manager until Ctrl-C.
    Run,
    /// Persist a new task.
    #[command(subcommand)]
    Enqueue(EnqueueCommand),
    /// Print pending / failed / dead counts.
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Run a single scan, wait for its attempts, and exit.
    Drain,
}

#[derive(Subcommand, Debug)]
enum EnqueueCommand {
    /// Write a cached blob back to the backend.
    Writeback { namespace: String, digest: String },
    /// Replicate a tag to a remote cluster.
    Replicate {
        tag: String,
        digest: String,
        destination: String,
        /// Digests that must be cached before replicating.
        #[arg(long = "dependency")]
        dependencies: Vec<String>,
    },
}

impl From<EnqueueCommand> for DeferredTask {
    fn from(cmd: EnqueueCommand) -> Self {
        match cmd {
            EnqueueCommand::Writeback { namespace, digest } => {
                WritebackTask::new(namespace, digest).into()
            }
            EnqueueCommand::Replicate {
                tag,
                digest,
                destination,
                dependencies,
            } => ReplicationTask::new(tag, digest, destination, dependencies).into(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AgentConfig::load(cli.config.as_deref())?;
    config.apply_overrides(cli.store_path, cli.log_level);
    bootstrap::init_tracing(&config.log.level);
    bootstrap::init_metrics()?;

    match cli.command {
        Command::Run => run(&config).await,
        Command::Enqueue(cmd) => enqueue(&config, cmd.into()),
        Command::Status { json } => status(&config, json),
        Command::Drain => drain(&config).await,
    }
}

async fn run(config: &AgentConfig) -> anyhow::Result<()> {
    let running = bootstrap::engine_from_config(config)?.start();
    info!("agent running; press Ctrl-C to stop");

    let mut check = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("shutdown requested");
                break;
            }
            _ = check.tick() => {
                if running.is_finished() {
                    tracing::error!("retry manager stopped on its own");
                    break;
                }
            }
        }
    }

    let report = running.shutdown().await?;
    info!(
        scans = report.scans,
        drained = report.drained,
        succeeded = report.totals.succeeded,
        retried = report.totals.retried,
        dead = report.totals.dead,
        "agent stopped"
    );
    Ok(())
}

fn enqueue(config: &AgentConfig, task: DeferredTask) -> anyhow::Result<()> {
    let store = bootstrap::open_store(config)?;
    let record = submit(&*store, task, &SystemClock)?;
    store.close()?;
    println!("{}", record.key());
    Ok(())
}

fn status(config: &AgentConfig, json: bool) -> anyhow::Result<()> {
    let store = bootstrap::open_store(config)?;
    let policy = bootstrap::manager_config(config)?.retry;
    let view = StatusView::from_snapshots(&store.get_pending()?, &store.get_failed()?, &policy, 0);
    store.close()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        print!("{}", render_status(&view));
    }
    Ok(())
}

fn render_status(view: &StatusView) -> String {
    let mut out = format!(
        "pending: {}\nfailed:  {}\ndead:    {}\n",
        view.pending, view.failed, view.dead
    );
    for dead in &view.dead_tasks {
        out.push_str(&format!(
            "  {} ({} attempts): {}\n",
            dead.key,
            dead.attempts,
            dead.last_error.as_deref().unwrap_or("-")
        ));
    }
    out
}

async fn drain(config: &AgentConfig) -> anyhow::Result<()> {
    let mut manager = bootstrap::engine_from_config(config)?.into_manager();
    let cycle = manager.run_cycle().await?;
    manager.close().await?;
    println!(
        "dispatched {}, succeeded {}, retrying {}, dead {}",
        cycle.dispatched, cycle.succeeded, cycle.retried, cycle.dead
    );
    Ok(())
}
