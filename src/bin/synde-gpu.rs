//! synde-gpu: run and inspect GPU jobs from the command line.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use synde_gpu::client::{JobClient, LaneClient, Submission};
use synde_gpu::constants::GPU_QUEUE;
use synde_gpu::logging::init_logging;
use synde_gpu::{
    client_from_config, CoordinatorConfig, GpuConfig, GpuLaneLock, JobArgs, JobKind, LockGuard,
    LockStore, OfflineClient, TaskCoordinator,
};

/// Run and inspect GPU jobs
#[derive(Parser)]
#[command(name = "synde-gpu")]
#[command(about = "Submit, poll and inspect GPU inference jobs", long_about = None)]
#[command(version)]
struct Cli {
    /// TOML configuration file (defaults to SYNDE_* environment variables)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one job to completion and print its result as JSON
    ///
    /// Without --offline the job runs on a local worker lane that answers
    /// with fixture data after --simulate-secs, so timeouts can be tried
    /// without a GPU. Builds with Redis support hold the job kind's GPU
    /// lane lock at the configured redis_url while the job runs.
    Run {
        /// Job kind (esmfold, clean_ec, deepenzyme, temberture, flan_extractor, fpocket)
        #[arg(long)]
        kind: JobKind,

        /// Positional argument as JSON; bare words are taken as strings
        #[arg(long = "arg")]
        args: Vec<String>,

        /// Keyword argument as NAME=JSON
        #[arg(long = "kwarg")]
        kwargs: Vec<String>,

        /// Answer in-process instead of submitting to the lane
        #[arg(long)]
        offline: bool,

        /// Override the configured timeout, in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// How long the local lane takes to answer
        #[arg(long, default_value = "1.0")]
        simulate_secs: f64,
    },

    /// Show which GPU lanes are currently locked
    Locks {
        /// Redis server holding the locks (defaults to the configured redis_url)
        #[arg(long)]
        redis_url: Option<String>,
    },

    /// Print the effective configuration as TOML
    Config,
}

fn main() -> Result<()> {
    init_logging("synde_gpu=info");
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => GpuConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => GpuConfig::from_env().context("reading SYNDE_* environment")?,
    };

    match cli.command {
        Commands::Run {
            kind,
            args,
            kwargs,
            offline,
            timeout,
            simulate_secs,
        } => run(config, kind, &args, &kwargs, offline, timeout, simulate_secs),
        Commands::Locks { redis_url } => {
            let url = redis_url.unwrap_or_else(|| config.redis_url.clone());
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(locks(&config, &url))
        }
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

fn run(
    mut config: GpuConfig,
    kind: JobKind,
    args: &[String],
    kwargs: &[String],
    offline: bool,
    timeout: Option<u64>,
    simulate_secs: f64,
) -> Result<()> {
    config.offline |= offline;
    let job_args = parse_args(args, kwargs)?;

    let delay = Duration::try_from_secs_f64(simulate_secs)
        .with_context(|| format!("invalid --simulate-secs {simulate_secs}"))?;
    let lane: Arc<dyn JobClient> = Arc::new(simulated_lane(kind, delay)?);
    let client = client_from_config(&config, lane);

    let mut settings = CoordinatorConfig::for_kind(kind, &config);
    if let Some(secs) = timeout {
        settings = settings.with_timeout(Duration::from_secs(secs));
    }
    let coordinator = TaskCoordinator::new(client, settings);

    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(async {
        let lane = claim_lane(&config, kind).await?;
        let result = coordinator.execute(job_args).await;
        if let Some(held) = lane {
            held.release().await;
        }
        anyhow::Ok(result)
    })?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

/// Marks `kind` busy in the shared lock store for the duration of a run.
///
/// Offline runs and kinds that never touch the accelerator skip the lock,
/// as do builds without Redis, which have no store to share it through.
async fn claim_lane(config: &GpuConfig, kind: JobKind) -> Result<Option<LockGuard>> {
    if config.offline || !cfg!(feature = "redis") || !JobKind::ACCELERATOR_BOUND.contains(&kind) {
        return Ok(None);
    }
    let lanes = GpuLaneLock::from_config(lock_store(&config.redis_url).await?, config);
    let held = lanes
        .for_kind(kind)
        .await
        .with_context(|| format!("{} lane is busy", kind.lock_name()))?;
    Ok(Some(held))
}

/// A lane that answers `kind` with its offline fixture after `delay`.
fn simulated_lane(kind: JobKind, delay: Duration) -> Result<LaneClient> {
    let lane = LaneClient::new(GPU_QUEUE).context("starting worker lane")?;
    let fixtures = Arc::new(OfflineClient::new());
    lane.register(kind.task_name(), move |job| {
        let fixtures = fixtures.clone();
        async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = job.cancel.cancelled() => return Err("job cancelled".to_string()),
            }
            match fixtures.submit(&job.request) {
                Submission::Immediate(value) => Ok(value),
                Submission::Pending(_) => Err("fixture unavailable".to_string()),
            }
        }
    });
    Ok(lane)
}

fn parse_args(args: &[String], kwargs: &[String]) -> Result<JobArgs> {
    let mut job_args = JobArgs::new();
    for arg in args {
        job_args = job_args.arg(json_or_string(arg));
    }
    for kwarg in kwargs {
        let (name, value) = kwarg
            .split_once('=')
            .with_context(|| format!("expected NAME=VALUE, got '{kwarg}'"))?;
        job_args = job_args.kwarg(name, json_or_string(value));
    }
    Ok(job_args)
}

fn json_or_string(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

async fn locks(config: &GpuConfig, redis_url: &str) -> Result<()> {
    let lanes = GpuLaneLock::from_config(lock_store(redis_url).await?, config);
    for kind in JobKind::ACCELERATOR_BOUND {
        let state = if lanes.is_task_busy(kind.lock_name()).await {
            "busy"
        } else {
            "idle"
        };
        println!("{:<12} {state}", kind.lock_name());
    }
    println!(
        "gpu          {}",
        if lanes.is_gpu_busy().await { "busy" } else { "idle" }
    );
    Ok(())
}

#[cfg(feature = "redis")]
async fn lock_store(redis_url: &str) -> Result<Arc<dyn LockStore>> {
    let store = synde_gpu::lock::redis::RedisLockStore::new(redis_url)
        .await
        .with_context(|| format!("connecting to {redis_url}"))?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "redis"))]
async fn lock_store(redis_url: &str) -> Result<Arc<dyn LockStore>> {
    anyhow::bail!(
        "GPU lane locks live in the shared store at {redis_url}; \
         this build has no Redis support, rebuild with --features redis"
    )
}
