mod cli;
mod logging;

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use convertbuddy::convert::tools::{check_tools, warn_missing_tools};
use convertbuddy::{
    build_backend, load_runtime_config, Config, Coordinator, JobEventBroadcaster, JobOutcome,
    JobStore, Reaper, RetentionScheduler, Upload, WorkerPool,
};
use serde_json::{Map, Value};
use tokio::sync::broadcast;

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.json_logs)?;

    let config = load_runtime_config(cli.config.as_deref())
        .context("Failed to load configuration")?;

    match cli.command {
        Commands::Run => run(config),
        Commands::Submit {
            target,
            files,
            options,
            timeout,
        } => submit(
            config,
            &target,
            &files,
            options.as_deref(),
            Duration::from_secs(timeout),
        ),
        Commands::Sweep => sweep(config),
        Commands::CheckTools => check(&config),
        Commands::Validate => {
            println!(
                "Configuration is valid: {} storage, {} worker(s), {}h retention",
                config.storage.backend, config.workers.count, config.retention.expiry_hours
            );
            Ok(())
        }
    }
}

fn run(config: Config) -> Result<()> {
    tracing::info!("Starting convertbuddy-worker v{}", env!("CARGO_PKG_VERSION"));
    warn_missing_tools(&config.tools);

    let backend = build_backend(&config)?;
    tracing::info!("Using {} storage backend", backend.kind());

    let events = JobEventBroadcaster::default();
    let store = Arc::new(JobStore::with_events(events));
    let coordinator = Arc::new(Coordinator::new(
        &config,
        Arc::clone(&backend),
        Arc::clone(&store),
    ));
    let pool = WorkerPool::new(coordinator, config.workers.count)?;

    let reaper = Arc::new(Reaper::from_config(&config, backend).with_store(store));
    let scheduler = RetentionScheduler::new(
        reaper,
        Duration::from_secs(config.retention.sweep_interval_secs),
    );
    let (_trigger_tx, trigger_rx) = broadcast::channel(4);
    let scheduler_handle = scheduler.start(trigger_rx)?;

    let stop = Arc::new(AtomicBool::new(false));
    watch_ctrl_c(Arc::clone(&stop))?;

    while !stop.load(Ordering::Acquire) {
        if let Some(outcome) = pool.recv_outcome_timeout(Duration::from_millis(500)) {
            log_outcome(&outcome);
        }
    }

    tracing::info!("Shutting down...");
    scheduler.stop();
    pool.shutdown();
    while let Some(outcome) = pool.try_recv_outcome() {
        log_outcome(&outcome);
    }
    pool.wait();
    if scheduler_handle.join().is_err() {
        tracing::error!("Retention scheduler panicked");
    }

    Ok(())
}

fn log_outcome(outcome: &JobOutcome) {
    if outcome.is_success() {
        tracing::info!(job_id = %outcome.job_id, "Job done");
    } else {
        tracing::warn!(
            job_id = %outcome.job_id,
            error = outcome.error.as_deref().unwrap_or_default(),
            "Job failed"
        );
    }
}

/// Sets `stop` when the process receives Ctrl-C.
fn watch_ctrl_c(stop: Arc<AtomicBool>) -> Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    std::thread::Builder::new()
        .name("ctrl-c".to_string())
        .spawn(move || {
            if let Err(e) = rt.block_on(tokio::signal::ctrl_c()) {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
            }
            stop.store(true, Ordering::Release);
        })?;

    Ok(())
}

fn submit(
    config: Config,
    target: &str,
    files: &[PathBuf],
    options: Option<&str>,
    timeout: Duration,
) -> Result<()> {
    let options = parse_options(options)?;
    let uploads = files
        .iter()
        .map(|path| open_upload(path))
        .collect::<Result<Vec<_>>>()?;

    let backend = build_backend(&config)?;
    let store = Arc::new(JobStore::new());
    let coordinator = Arc::new(Coordinator::new(&config, backend, store));
    let pool = WorkerPool::new(Arc::clone(&coordinator), 1)?;

    let job_id = coordinator.submit(&pool, target, uploads, options)?;
    tracing::info!(job_id = %job_id, "Job submitted");

    let outcome = if timeout.is_zero() {
        pool.recv_outcome()
    } else {
        pool.recv_outcome_timeout(timeout)
    };
    pool.shutdown();
    pool.wait();

    let view = coordinator.query_status(&job_id.to_string())?;
    println!("{}", serde_json::to_string_pretty(&view)?);

    match outcome {
        Some(outcome) if outcome.is_success() => Ok(()),
        Some(outcome) => bail!(
            "Job {} failed: {}",
            job_id,
            outcome.error.unwrap_or_default()
        ),
        None => bail!("Job {} did not finish within {:?}", job_id, timeout),
    }
}

fn parse_options(raw: Option<&str>) -> Result<Map<String, Value>> {
    match raw {
        None => Ok(Map::new()),
        Some(raw) => match serde_json::from_str::<Value>(raw)? {
            Value::Object(map) => Ok(map),
            _ => bail!("--options must be a JSON object"),
        },
    }
}

fn open_upload(path: &Path) -> Result<Upload> {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    Ok(Upload::new(filename, file))
}

fn sweep(config: Config) -> Result<()> {
    let backend = build_backend(&config)?;
    let report = Reaper::from_config(&config, backend).sweep();
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn check(config: &Config) -> Result<()> {
    let tools = check_tools(&config.tools);
    for tool in &tools {
        match &tool.path {
            Some(path) => println!("[OK]      {} ({})", tool.name, path.display()),
            None => println!("[MISSING] {}", tool.name),
        }
    }

    let missing = tools.iter().filter(|t| !t.available).count();
    if missing > 0 {
        bail!("{} converter(s) missing", missing);
    }
    Ok(())
}
