//! CLI command definitions for codejudge.
//!
//! Wires the configured broker, store, and sandbox adapter together for
//! each command. Commands that touch storage or the queue load settings
//! from the environment; `selftest` only needs the engine binary.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::Settings;
use crate::pipeline::{JudgePipeline, SubmitRequest};
use crate::sandbox::{CodeExecutor, RustboxRunner, LANGUAGES};
use crate::scheduler::{
    Dispatcher, DispatcherConfig, HeartbeatPolicy, QueueBroker, RedisBroker,
};
use crate::storage::{PgStore, SubmissionStore};

/// Code-execution pipeline: queue, judge, and inspect submissions.
#[derive(Parser)]
#[command(name = "codejudge")]
#[command(about = "Queue and execute code submissions in a sandbox")]
#[command(version)]
#[command(
    long_about = "codejudge accepts code submissions, queues them by priority, and executes them through the rustbox sandbox engine.\n\nExample usage:\n  codejudge submit --language 1 solution.py\n  codejudge worker --concurrency 4"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run a worker that pulls queued submissions and executes them.
    Worker(WorkerArgs),

    /// Submit a source file for queued execution.
    Submit(SubmitArgs),

    /// Execute a queued submission inline, bypassing the worker pool.
    Exec(ExecArgs),

    /// Inspect or administer the queues.
    Queue(QueueArgs),

    /// Run an end-to-end check of the sandbox engine.
    Selftest(SelftestArgs),

    /// Apply pending database migrations.
    Migrate,

    /// List the supported languages.
    Languages,
}

/// Arguments for `codejudge worker`.
#[derive(Parser, Debug)]
pub struct WorkerArgs {
    /// Worker identity for the heartbeat registry (default: random).
    #[arg(long)]
    pub worker_id: Option<String>,

    /// Maximum concurrently executing submissions.
    #[arg(short, long)]
    pub concurrency: Option<usize>,
}

/// Arguments for `codejudge submit`.
#[derive(Parser, Debug)]
pub struct SubmitArgs {
    /// Path to the source file to submit.
    pub file: PathBuf,

    /// Language id (see `codejudge languages`).
    #[arg(short = 'L', long)]
    pub language: u32,

    /// Priority partition 0-9; higher runs first.
    #[arg(short, long, default_value = "0")]
    pub priority: u8,

    /// Standard input passed to the program.
    #[arg(long)]
    pub stdin: Option<String>,

    /// Time limit in seconds (default: server configured).
    #[arg(long)]
    pub time_limit: Option<u32>,

    /// Memory limit in megabytes (default: server configured).
    #[arg(long)]
    pub memory_limit: Option<u32>,

    /// Output the created submission as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `codejudge exec`.
#[derive(Parser, Debug)]
pub struct ExecArgs {
    /// Submission id to execute.
    pub id: i64,

    /// Output the execution result as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `codejudge queue`.
#[derive(Parser, Debug)]
pub struct QueueArgs {
    /// Queue subcommand to run.
    #[command(subcommand)]
    pub command: QueueSubcommand,
}

/// Queue subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum QueueSubcommand {
    /// Show partition depths and live workers.
    Stats(QueueStatsArgs),

    /// Drop every queued job from every partition.
    Clear,
}

/// Arguments for `codejudge queue stats`.
#[derive(Parser, Debug)]
pub struct QueueStatsArgs {
    /// Output stats as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `codejudge selftest`.
#[derive(Parser, Debug)]
pub struct SelftestArgs {
    /// Sandbox engine binary (default: JUDGE_RUSTBOX_PATH or "rustbox").
    #[arg(long)]
    pub rustbox_path: Option<PathBuf>,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before
/// running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
///
/// This is the main entry point for the codejudge CLI.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Worker(args) => run_worker_command(args).await?,
        Commands::Submit(args) => run_submit_command(args).await?,
        Commands::Exec(args) => run_exec_command(args).await?,
        Commands::Queue(args) => run_queue_command(args).await?,
        Commands::Selftest(args) => run_selftest_command(args).await?,
        Commands::Migrate => run_migrate_command().await?,
        Commands::Languages => run_languages_command(),
    }
    Ok(())
}

/// Connects the production broker for the configured deployment.
async fn connect_broker(settings: &Settings) -> anyhow::Result<Arc<RedisBroker>> {
    let policy = HeartbeatPolicy {
        ttl: settings.heartbeat_ttl,
        active_window: settings.heartbeat_active_window,
    };
    let broker = RedisBroker::connect_with_policy(&settings.redis_url, policy).await?;
    Ok(Arc::new(broker))
}

/// Connects the production store and applies pending migrations.
async fn connect_store(settings: &Settings) -> anyhow::Result<Arc<PgStore>> {
    let store = PgStore::connect(&settings.database_url).await?;
    store.run_migrations().await?;
    Ok(Arc::new(store))
}

/// Builds the full pipeline from environment settings.
async fn build_pipeline(settings: &Settings) -> anyhow::Result<JudgePipeline> {
    let broker = connect_broker(settings).await?;
    let store = connect_store(settings).await?;
    let executor = Arc::new(RustboxRunner::new(settings.rustbox_path.clone()));

    Ok(JudgePipeline::new(
        settings,
        broker as Arc<dyn QueueBroker>,
        store as Arc<dyn SubmissionStore>,
        executor as Arc<dyn CodeExecutor>,
    ))
}

async fn run_worker_command(args: WorkerArgs) -> anyhow::Result<()> {
    let settings = Settings::from_env()?;
    let broker = connect_broker(&settings).await?;
    let store = connect_store(&settings).await?;
    let executor = Arc::new(RustboxRunner::new(settings.rustbox_path.clone()));

    if !executor.is_available().await {
        warn!(
            path = %settings.rustbox_path.display(),
            "Sandbox engine probe failed; executions will error until it is installed"
        );
    }

    let mut config = DispatcherConfig {
        concurrency: args.concurrency.unwrap_or(settings.worker_concurrency),
        poll_interval: settings.poll_interval,
        error_backoff: settings.error_backoff,
        ..DispatcherConfig::default()
    };
    if let Some(worker_id) = args.worker_id {
        config.worker_id = worker_id;
    }

    let dispatcher = Dispatcher::new(
        config,
        broker as Arc<dyn QueueBroker>,
        store as Arc<dyn SubmissionStore>,
        executor as Arc<dyn CodeExecutor>,
    );

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received interrupt, shutting down");
            let _ = shutdown_tx.send(());
        }
    });

    dispatcher.run(shutdown_rx).await;
    Ok(())
}

async fn run_submit_command(args: SubmitArgs) -> anyhow::Result<()> {
    let source_code = std::fs::read_to_string(&args.file)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", args.file.display(), e))?;

    let settings = Settings::from_env()?;
    let pipeline = build_pipeline(&settings).await?;

    let request = SubmitRequest {
        source_code,
        language_id: args.language,
        stdin: args.stdin,
        expected_output: None,
        time_limit_secs: args.time_limit,
        memory_limit_mb: args.memory_limit,
    };

    let submission = pipeline.submit(request, args.priority).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&submission)?);
    } else {
        println!(
            "Submission {} queued at priority {} ({})",
            submission.id, args.priority, submission.status
        );
    }
    Ok(())
}

async fn run_exec_command(args: ExecArgs) -> anyhow::Result<()> {
    let settings = Settings::from_env()?;
    let pipeline = build_pipeline(&settings).await?;

    let result = pipeline.execute_now(args.id).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("Status: {}", result.status);
        println!("Success: {}", result.success);
        if let Some(stdout) = &result.stdout {
            println!("--- stdout ---\n{stdout}");
        }
        if let Some(stderr) = &result.stderr {
            println!("--- stderr ---\n{stderr}");
        }
        if let Some(wall) = result.wall_time {
            println!("Wall time: {wall:.3}s");
        }
    }
    Ok(())
}

async fn run_queue_command(args: QueueArgs) -> anyhow::Result<()> {
    let settings = Settings::from_env()?;
    let broker = connect_broker(&settings).await?;

    match args.command {
        QueueSubcommand::Stats(stats_args) => {
            let mut depths = Vec::new();
            for priority in 0..crate::scheduler::PRIORITY_LEVELS {
                depths.push(broker.queue_depth(priority).await?);
            }
            let total: usize = depths.iter().sum();
            let live_workers = broker.live_worker_count().await?;
            let workers = broker.worker_snapshot().await?;

            if stats_args.json {
                let output = serde_json::json!({
                    "total": total,
                    "partitions": depths,
                    "live_workers": live_workers,
                    "workers": workers,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!("Queued jobs: {total}");
                for (priority, depth) in depths.iter().enumerate().rev() {
                    if *depth > 0 {
                        println!("  priority {priority}: {depth}");
                    }
                }
                println!("Live workers: {live_workers}");
                for worker in workers {
                    println!(
                        "  {} [{:?}] last seen {}",
                        worker.worker_id, worker.phase, worker.last_seen
                    );
                }
            }
        }
        QueueSubcommand::Clear => {
            let dropped = broker.clear_all().await?;
            println!("Dropped {dropped} queued jobs");
        }
    }
    Ok(())
}

async fn run_selftest_command(args: SelftestArgs) -> anyhow::Result<()> {
    let path = args
        .rustbox_path
        .or_else(|| std::env::var("JUDGE_RUSTBOX_PATH").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("rustbox"));

    let runner = RustboxRunner::new(path);
    let report = runner.self_test().await;

    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.passed {
        anyhow::bail!("Self test failed");
    }
    Ok(())
}

async fn run_migrate_command() -> anyhow::Result<()> {
    let settings = Settings::from_env()?;
    let store = PgStore::connect(&settings.database_url).await?;
    store.run_migrations().await?;
    println!("Migrations applied");
    Ok(())
}

fn run_languages_command() {
    for lang in LANGUAGES {
        println!("{:>3}  {} {}", lang.id, lang.name, lang.version);
    }
}
