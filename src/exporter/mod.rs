pub mod encoding;
pub mod push;
pub mod server;

pub use push::PushTarget;
pub use server::MetricsServer;

use crate::errors::ExporterError;
use crate::registry::MetricRegistry;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ExporterSettings {
    pub interval: Duration,
    /// Scrape listener address; `None` disables the pull path.
    pub listen: Option<SocketAddr>,
    /// Push gateway; `None` disables the push path.
    pub push: Option<PushTarget>,
}

/// Drives the registry on a fixed tick and serves scrapes until shutdown.
pub struct Exporter {
    registry: Arc<MetricRegistry>,
    settings: ExporterSettings,
}

impl Exporter {
    pub fn new(registry: Arc<MetricRegistry>, settings: ExporterSettings) -> Self {
        Self { registry, settings }
    }

    /// Run until `shutdown` flips to `true` or its sender is dropped.
    ///
    /// Only a scrape listener bind failure is returned as an error; push
    /// failures are logged and retried on the next tick.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), ExporterError> {
        let server = match self.settings.listen {
            Some(addr) => Some(MetricsServer::bind(addr, Arc::clone(&self.registry)).await?),
            None => None,
        };
        if server.is_none() && self.settings.push.is_none() {
            warn!("no scrape port and no gateway configured, nothing will be exported");
        }

        let mut tick = interval(self.settings.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_secs = self.settings.interval.as_secs(),
            collectors = self.registry.len(),
            gateway = self.settings.push.as_ref().map(PushTarget::gateway),
            "starting export loop"
        );

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Some(target) = &self.settings.push {
                        self.push_once(target).await;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("export loop stopped");
        if let Some(server) = server {
            server.shutdown().await;
        }
        Ok(())
    }

    async fn push_once(&self, target: &PushTarget) {
        debug!(gateway = %target.gateway(), job = %target.job(), "pushing metrics");
        let samples = self.registry.gather().await;
        match target.push(samples).await {
            Ok(count) => debug!(count, "push complete"),
            Err(e) => warn!(error = %e, "push failed, will retry next tick"),
        }
    }
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM, only SIGINT will stop the exporter");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
