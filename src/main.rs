//! slumber-proxy - transparent L4 proxy with idle-container suspend/wake.

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use slumber_proxy::config::Configuration;
use slumber_proxy::engine::Application;
use slumber_proxy::runtime::RuntimeClientPool;

#[derive(Parser)]
#[command(name = "slumber-proxy")]
#[command(about = "Suspends and wakes container-hosted services based on traffic activity")]
#[command(version)]
struct Cli {
    /// Path to the configuration file (words are joined with spaces)
    #[arg(default_value = "config.json")]
    config: Vec<String>,

    /// Raise logging to trace level
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "trace" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("slumber_proxy={log_level}").into()),
        )
        .init();

    info!("starting slumber-proxy v{}", env!("CARGO_PKG_VERSION"));

    let config_path = cli.config.join(" ");
    if let Err(e) = run(&config_path).await {
        error!(error = %e, "fatal error");
        std::process::exit(1);
    }

    Ok(())
}

async fn run(config_path: &str) -> Result<()> {
    let config = Configuration::load(config_path)
        .with_context(|| format!("loading configuration from {config_path}"))?;

    let pool = RuntimeClientPool::new();
    let shutdown = CancellationToken::new();

    let mut handles = Vec::new();
    for app_config in config.applications {
        let (app, client) = Application::new(app_config, &pool, &shutdown)
            .with_context(|| "starting application engine")?;
        let engine_handles = app
            .spawn(client)
            .with_context(|| "spawning application engine tasks")?;
        handles.extend(engine_handles);
    }

    tokio::signal::ctrl_c()
        .await
        .context("listening for ctrl-c")?;

    info!("shutdown signal received, stopping engines");
    shutdown.cancel();

    for handle in handles {
        let _ = handle.await;
    }

    info!("all engines stopped, exiting");
    Ok(())
}
