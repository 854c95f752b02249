use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use cronloop::{
    config::Config,
    errors::AppError,
    ingestor::{InputOrchestrator, JobTriggerProcessor, StateTracker},
    job_scheduling::{
        JobExecutor, JobScheduler, LoadReport, SchedulerSettings, ShellCommandRunner,
        TriggerHandle, job_loader,
    },
    logging,
    sources::WebhookInbox,
    utils::format_time_until,
};

/// Configuration could not be loaded, or the state store is unreadable
const EXIT_CONFIG_FAILURE: u8 = 1;
/// `validate` found rejected job definitions
const EXIT_INVALID_DEFINITIONS: u8 = 2;

#[derive(Parser)]
#[command(name = "cronloop")]
#[command(version)]
#[command(about = "Cron-driven job scheduler with a multi-source input orchestrator")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path (defaults to ./cronloop.toml when present)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Job definitions directory (overrides config file)
    #[arg(short, long, value_name = "PATH")]
    jobs_dir: Option<PathBuf>,

    /// Log level (overrides config file)
    #[arg(short = 'v', long, value_name = "LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Run the scheduler (and input orchestrator, if configured) until interrupted
    Run,
    /// Run a single scheduler tick now, wait for dispatched jobs, then exit
    RunOnce,
    /// List loaded jobs with their next due time
    List,
    /// Check configuration and job definitions
    Validate,
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::from(EXIT_CONFIG_FAILURE);
        }
    };

    // Override config with CLI arguments
    if let Some(jobs_dir) = cli.jobs_dir {
        config.jobs_dir = jobs_dir;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    let _log_guard = match logging::init(&config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialise logging: {e:#}");
            return ExitCode::from(EXIT_CONFIG_FAILURE);
        }
    };

    let config_path = Config::resolve_path(cli.config.as_deref());
    if config_path.exists() {
        info!("Configuration loaded from: {}", config_path.display());
    } else {
        info!("No configuration file found, using defaults");
    }

    let result = match cli.command {
        Command::Run => run(config).await,
        Command::RunOnce => run_once(config).await,
        Command::List => list(&config),
        Command::Validate => validate(&config),
        Command::Config => print_config(&config),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {e:#}");
            ExitCode::from(EXIT_CONFIG_FAILURE)
        }
    }
}

fn load_jobs(config: &Config) -> Result<LoadReport> {
    if !config.jobs_dir.is_dir() {
        return Err(AppError::configuration(format!(
            "jobs directory {} does not exist",
            config.jobs_dir.display()
        ))
        .into());
    }
    Ok(job_loader::load_dir(&config.jobs_dir)?)
}

fn build_scheduler(config: &Config) -> Result<JobScheduler> {
    let report = load_jobs(config)?;
    let jobs = report.into_jobs(Duration::from_secs(config.default_timeout_seconds));
    let executor = JobExecutor::new(Arc::new(ShellCommandRunner::new()));
    Ok(JobScheduler::new(
        jobs,
        executor,
        SchedulerSettings::from_config(config),
    ))
}

async fn build_orchestrator(
    config: &Config,
    trigger_handle: TriggerHandle,
    inbox: &WebhookInbox,
) -> Result<Option<InputOrchestrator>> {
    let Some(inputs) = &config.inputs else {
        return Ok(None);
    };

    let state = StateTracker::open(&inputs.state_file)
        .with_context(|| format!("cannot open state file {}", inputs.state_file.display()))?;
    let processor = Arc::new(JobTriggerProcessor::new(trigger_handle));
    let orchestrator = InputOrchestrator::from_config(inputs, state, processor, inbox).await;

    info!(
        "Input orchestrator configured with sources: {:?}",
        orchestrator.source_names().collect::<Vec<_>>()
    );
    Ok(Some(orchestrator))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

async fn run(config: Config) -> Result<ExitCode> {
    info!("Starting cronloop v{}", env!("CARGO_PKG_VERSION"));

    let mut scheduler = build_scheduler(&config)?;
    let inbox = WebhookInbox::new();
    let orchestrator = build_orchestrator(&config, scheduler.trigger_handle(), &inbox).await?;

    let cancellation_token = CancellationToken::new();
    let mut services = tokio::task::JoinSet::new();

    if let Some(mut orchestrator) = orchestrator {
        let token = cancellation_token.clone();
        services.spawn(async move { orchestrator.run(token).await });
    }

    if let Some(webhook) = config.inputs.as_ref().and_then(|inputs| inputs.webhook.clone()) {
        let token = cancellation_token.clone();
        let inbox = inbox.clone();
        services.spawn(async move {
            inbox
                .serve(webhook.bind, token)
                .await
                .map_err(anyhow::Error::from)
        });
    }

    let signal_token = cancellation_token.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        signal_token.cancel();
    });

    scheduler.run(cancellation_token.clone()).await?;
    cancellation_token.cancel();

    while let Some(joined) = services.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Service stopped with error: {:#}", e),
            Err(e) => error!("Service task failed: {}", e),
        }
    }

    info!("cronloop stopped");
    Ok(ExitCode::SUCCESS)
}

async fn run_once(config: Config) -> Result<ExitCode> {
    let mut scheduler = build_scheduler(&config)?;
    let inbox = WebhookInbox::new();

    // Inputs first so that jobs they trigger run in this tick
    if let Some(mut orchestrator) =
        build_orchestrator(&config, scheduler.trigger_handle(), &inbox).await?
    {
        let report = orchestrator
            .run_once()
            .await
            .context("input orchestrator pass failed")?;
        println!(
            "inputs: polled {:?}, failed {:?}, {} new, {} processed",
            report.polled, report.failed, report.new_items, report.processed
        );
    }

    let report = scheduler.run_once(&Local::now()).await;

    if report.dispatched.is_empty() {
        println!("no jobs due");
    }
    for result in &report.results {
        let outcome = if result.success {
            "ok".to_string()
        } else {
            format!(
                "failed ({})",
                result.error.as_deref().unwrap_or("unknown error")
            )
        };
        println!(
            "{}: {} in {:.2}s",
            result.job_id,
            outcome,
            result.duration.as_secs_f64()
        );
    }
    for job_id in &report.deferred {
        println!("{job_id}: deferred (concurrency limit)");
    }

    Ok(ExitCode::SUCCESS)
}

fn list(config: &Config) -> Result<ExitCode> {
    let report = load_jobs(config)?;
    let now = Local::now();

    println!(
        "{:<24} {:<8} {:<8} {:<18} NEXT DUE",
        "ID", "PRIORITY", "ENABLED", "SCHEDULE"
    );
    for definition in &report.definitions {
        let next = match definition.schedule.next_due_after(&now) {
            Some(next) => format!(
                "{} ({})",
                next.format("%Y-%m-%d %H:%M"),
                format_time_until(&now, &next)
            ),
            None => "never".to_string(),
        };
        println!(
            "{:<24} {:<8} {:<8} {:<18} {}",
            definition.id,
            definition.priority,
            if definition.enabled { "yes" } else { "no" },
            definition.schedule,
            next
        );
    }

    Ok(ExitCode::SUCCESS)
}

fn validate(config: &Config) -> Result<ExitCode> {
    let report = load_jobs(config)?;

    for rejected in &report.rejected {
        println!("INVALID {}: {}", rejected.path.display(), rejected.error);
    }
    println!(
        "{} valid, {} rejected",
        report.definitions.len(),
        report.rejected.len()
    );

    if report.rejected.is_empty() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_INVALID_DEFINITIONS))
    }
}

fn print_config(config: &Config) -> Result<ExitCode> {
    print!("{}", config.to_toml_string()?);
    Ok(ExitCode::SUCCESS)
}
