use std::{
    io::Write,
    path::{Path, PathBuf},
    process::ExitCode,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use volley::{
    Config, ConsoleReporter, HttpExecutor, JsonReporter, LoadController, SeededValueProvider,
    cancel, publish, queue::plan_tasks,
};

#[derive(Parser, Debug)]
#[command(name = "volley", version)]
#[command(about = "Staged HTTP load testing with reproducible URL selection")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every configured stage and write the summary report
    Run {
        /// Path to the configuration file (.json or .toml)
        #[arg(long, short, default_value = "volley.json")]
        config: PathBuf,

        /// Override the configured random seed
        #[arg(long)]
        seed: Option<u64>,

        /// Override the report output path
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print the task messages a distributed producer would publish, one JSON object per line
    Plan {
        /// Path to the configuration file (.json or .toml)
        #[arg(long, short, default_value = "volley.json")]
        config: PathBuf,

        /// Override the configured random seed
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match Cli::parse().command {
        Command::Run {
            config,
            seed,
            output,
        } => run(&config, seed, output).await,
        Command::Plan { config, seed } => plan(&config, seed),
    }
}

fn load(path: &Path, seed: Option<u64>) -> Result<Config> {
    let mut config = Config::from_file(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    if let Some(seed) = seed {
        config.random_seed = seed;
    }
    Ok(config)
}

async fn run(path: &Path, seed: Option<u64>, output: Option<PathBuf>) -> Result<ExitCode> {
    let config = load(path, seed)?;
    let executor =
        HttpExecutor::new(config.request_timeout()).context("Failed to build HTTP client")?;

    let (handle, signal) = cancel::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling run...");
            handle.cancel();
        }
    });

    info!(
        "Running {} stages ({} requests) against {} urls with seed {}",
        config.stages.len(),
        config.total_requests(),
        config.urls.len(),
        config.random_seed
    );
    let summary = LoadController::builder()
        .executor(executor)
        .values(SeededValueProvider::new(config.random_seed))
        .urls(config.urls.clone())
        .stages(config.stages.clone())
        .headers(config.headers.clone())
        .stage_delay(config.stage_delay())
        .dispatch(config.dispatch)
        .batch_sizing(config.batch_sizing)
        .build()
        .run(signal)
        .await?;

    if config.report.enabled {
        let path = output.unwrap_or_else(|| PathBuf::from(&config.report.path));
        publish(&JsonReporter::new(path), &summary).await;
    }
    if config.console_log {
        publish(&ConsoleReporter, &summary).await;
    }

    Ok(if summary.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn plan(path: &Path, seed: Option<u64>) -> Result<ExitCode> {
    let config = load(path, seed)?;
    let mut values = SeededValueProvider::new(config.random_seed);
    let tasks = plan_tasks(&config.urls, &config.headers, &config.stages, &mut values);

    let mut out = std::io::stdout().lock();
    for task in &tasks {
        serde_json::to_writer(&mut out, task)?;
        writeln!(out)?;
    }
    Ok(ExitCode::SUCCESS)
}
