mod config;
mod dispatcher;
mod error;
mod format;
mod monitor;
mod orchestrator;
mod progress;
mod provider;
mod providers;
mod registry;
mod sampler;
mod transport;
mod version;


use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};

use crate::config::AppConfig;
use crate::orchestrator::Orchestrator;
use crate::sampler::DiskSampler;
use crate::transport::{HttpClient, RetrySettings};

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env if present (not required)
    dotenvy::dotenv().ok();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::from(2);
        }
    };

    init_tracing(&config);
    info!("Starting mover-status v{}", env!("CARGO_PKG_VERSION"));

    match run(config).await {
        Ok(()) => {
            info!("Clean shutdown");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Startup failed");
            eprintln!("Startup failed: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(config: &AppConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.tracing_directive().into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.application.syslog_enabled {
        // JSON output for the local log shipper.
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    if config.application.version_check {
        version::spawn_version_check();
    }

    let retry_settings = RetrySettings {
        max_retries: config.notifications.retry_attempts,
        ..Default::default()
    };
    let http = if config.application.dry_run {
        HttpClient::dry_run(retry_settings)?
    } else {
        HttpClient::new(retry_settings)?
    };

    let providers = providers::build_enabled(&config, &http)?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let sampler = Arc::new(DiskSampler::new(sampler::DEFAULT_CACHE_TTL));
    let mut orchestrator = Orchestrator::new(
        &config,
        sampler,
        dispatcher::DEFAULT_PROVIDER_TIMEOUT,
        shutdown_rx,
    );
    orchestrator.initialize_providers(providers).await?;

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    info!(
        pid_file = %config.monitoring.pid_file.display(),
        monitored_paths = ?config.monitoring.monitored_paths,
        "Monitoring mover lifecycle"
    );
    orchestrator.run().await?;
    Ok(())
}
