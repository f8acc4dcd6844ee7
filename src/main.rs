//! # Edupulse Analytics - Main Entry Point
//!
//! The rollup service binary:
//!
//! 1. Loads layered settings (file, environment, CLI)
//! 2. Wires the collector, stores, and scheduler together
//! 3. Either serves the HTTP API with recurring rollups (`serve`) or runs a
//!    single rollup and renders the result (`collect`)

use chrono::{
    DateTime,
    Utc,
};
use clap::{
    Parser,
    Subcommand,
};
use color_eyre::Result;
use edupulse_collector::{
    Collector,
    HttpSourceFetcher,
    HttpTenantDirectory,
    HttpTokenProvider,
    Window,
};
use edupulse_config::Settings;
use edupulse_http::{
    create_router,
    AppState,
};
use edupulse_scheduler::{
    JobType,
    MemoryJobStore,
    MemorySnapshotStore,
    RollupScheduler,
    Trigger,
};
use eyre::WrapErr as _;
use std::{
    path::PathBuf,
    str::FromStr,
    sync::Arc,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

mod report;

#[derive(Parser)]
#[command(name = "edupulse-analytics")]
#[command(about = "Edupulse metrics rollup service")]
#[command(version)]
struct Cli {
    /// Path to a YAML settings file
    #[arg(long, env = "EDUPULSE_CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API and run recurring rollups
    Serve,
    /// Run one rollup now and render the result
    Collect {
        /// Metric family to roll up: user, task, point, badge, or full
        #[arg(long, default_value = "full")]
        family: String,

        /// Window end (ISO 8601); defaults to now
        #[arg(long)]
        window_end: Option<String>,

        /// Window length ending at --window-end (e.g. "1h", "30m")
        #[arg(long, default_value = "1h")]
        duration: String,

        /// Export the resulting snapshots as JSON to this file
        #[arg(long)]
        output_file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    init_logging(log_level)?;
    color_eyre::install()?;

    let settings = Settings::load(cli.config.as_deref()).wrap_err("failed to load settings")?;
    let scheduler = build_scheduler(&settings);

    match cli.command {
        Commands::Serve => serve(scheduler, &settings).await,
        Commands::Collect {
            family,
            window_end,
            duration,
            output_file,
        } => collect_once(scheduler, &family, window_end.as_deref(), &duration, output_file).await,
    }
}

fn init_logging(level: &str) -> Result<()> {
    use tracing_subscriber::prelude::*;

    let own_crates = [
        "edupulse_analytics",
        "edupulse_collector",
        "edupulse_aggregator",
        "edupulse_scheduler",
        "edupulse_http",
        "edupulse_config",
    ];
    let directives = own_crates
        .iter()
        .map(|krate| format!("{krate}={level}"))
        .collect::<Vec<_>>()
        .join(",");
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("info,{directives}")));

    tracing_subscriber::registry()
        .with(tracing_error::ErrorLayer::default())
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .try_init()
        .wrap_err("failed to initialize tracing subscriber")
}

fn build_scheduler(settings: &Settings) -> Arc<RollupScheduler> {
    let client = reqwest::Client::new();
    let timeout = settings.source_timeout();

    let fetcher = HttpSourceFetcher::new(client.clone(), settings.endpoints.clone(), timeout);
    let tokens = HttpTokenProvider::new(client.clone(), settings.endpoints.auth_service.clone(), timeout);
    let tenants = HttpTenantDirectory::new(client, settings.endpoints.school_service.clone(), timeout);

    let collector = Collector::new(Arc::new(fetcher), Arc::new(tokens));

    Arc::new(RollupScheduler::new(
        collector,
        Arc::new(tenants),
        Arc::new(MemorySnapshotStore::new()),
        Arc::new(MemoryJobStore::new()),
        settings.run_budget(),
    ))
}

async fn serve(scheduler: Arc<RollupScheduler>, settings: &Settings) -> Result<()> {
    let shutdown = CancellationToken::new();
    let ticker = Arc::clone(&scheduler).schedule_recurring(&settings.rollup_cron, shutdown.clone());

    let state = AppState {
        scheduler,
        job_list_limit: settings.job_list_limit,
    };
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(settings.bind_addr)
        .await
        .wrap_err_with(|| format!("failed to bind {}", settings.bind_addr))?;
    info!(addr = %settings.bind_addr, "serving rollup API");

    let server_shutdown = shutdown.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            server_shutdown.cancel();
        })
        .await
        .wrap_err("server error")?;

    shutdown.cancel();
    ticker.await.ok();
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "failed to listen for shutdown signal");
        // Without a signal handler the service would be unkillable; park
        // instead of busy-looping.
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

async fn collect_once(
    scheduler: Arc<RollupScheduler>,
    family: &str,
    window_end: Option<&str>,
    duration: &str,
    output_file: Option<PathBuf>,
) -> Result<()> {
    let job_type = JobType::from_str(family)
        .map_err(|_| eyre::eyre!("unknown metric family '{family}' (expected user, task, point, badge, or full)"))?;

    let duration = humantime::parse_duration(duration)
        .map_err(|e| eyre::eyre!("invalid duration '{duration}': {e}"))?;
    let end = match window_end {
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map_err(|e| eyre::eyre!("invalid window end '{raw}': {e}"))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };
    let start = end - chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::hours(1));
    let window =
        Window::new(start, end).ok_or_else(|| eyre::eyre!("window must have a positive length"))?;

    info!(%window, job_type = %job_type, "running one-shot rollup");
    let job = scheduler
        .run_now(job_type, Some(window), Trigger::Manual)
        .await
        .wrap_err("rollup could not be started")?;

    println!("{}", report::format_job(&job));

    let mut snapshots = Vec::new();
    for family in job.job_type.families() {
        if let Some(snapshot) = scheduler
            .latest_snapshot(family, &edupulse_aggregator::Scope::Global)
            .await
            .wrap_err("snapshot lookup failed")?
        {
            println!("{}", report::format_snapshot(&snapshot));
            snapshots.push(snapshot);
        }
    }

    if let Some(output_file) = output_file {
        let json = serde_json::to_string_pretty(&snapshots)?;
        tokio::fs::write(&output_file, json)
            .await
            .wrap_err_with(|| format!("failed to write {}", output_file.display()))?;
        info!(path = %output_file.display(), "snapshots exported");
    }

    Ok(())
}
