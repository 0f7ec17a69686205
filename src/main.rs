use anyhow::Context;
use clap::Parser;
use nvml_miner_exporter::bootstrap::Bootstrap;
use nvml_miner_exporter::collectors::nvml::NvmlBinding;
use nvml_miner_exporter::config::Config;
use nvml_miner_exporter::exporter::{self, Exporter};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();
    init_logging(&config);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("exporter terminated: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(config: &Config) {
    let default_level = if config.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.json_logs {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "nvml-miner-exporter starting");

    let binding = NvmlBinding::init(config.device_index).context("hardware binding initialization failed")?;
    let bootstrap = Bootstrap::new(Arc::new(binding)).context("device identity resolution failed")?;
    let registry = Arc::new(bootstrap.registry(config.worker().as_ref()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        exporter::shutdown_signal().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    Exporter::new(registry, config.exporter())
        .run(shutdown_rx)
        .await
        .context("exporter failed")?;

    info!("shutdown complete");
    Ok(())
}
