use crate::collectors::device::{DeviceTelemetryCollector, GpuBinding};
use crate::collectors::worker::WorkerStatusClient;
use crate::collectors::DeviceIdentity;
use crate::config::WorkerSettings;
use crate::errors::BootstrapError;
use crate::registry::MetricRegistry;
use std::sync::Arc;
use tracing::info;

/// One-time device resolution and collector wiring.
pub struct Bootstrap {
    binding: Arc<dyn GpuBinding>,
    identity: DeviceIdentity,
}

impl Bootstrap {
    pub fn new(binding: Arc<dyn GpuBinding>) -> Result<Self, BootstrapError> {
        let identity = binding.identity()?;
        info!(gpu_uuid = %identity.uuid, pci_bus_id = %identity.bus_id, "resolved device identity");
        Ok(Self { binding, identity })
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Registry with the device collector and, if configured, the worker client.
    pub fn registry(&self, worker: Option<&WorkerSettings>) -> MetricRegistry {
        let mut registry = MetricRegistry::new();
        registry.register(Arc::new(DeviceTelemetryCollector::new(
            Arc::clone(&self.binding),
            &self.identity,
        )));

        match worker {
            Some(settings) => {
                info!(host = %settings.host, port = settings.port, "miner metrics enabled");
                registry.register(Arc::new(WorkerStatusClient::new(
                    settings.host.as_str(),
                    settings.port,
                    settings.method.as_str(),
                    settings.timeout,
                    &self.identity,
                )));
            }
            None => info!("no miner port configured, miner metrics disabled"),
        }

        registry
    }
}
