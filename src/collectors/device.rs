use super::*;
use crate::errors::DeviceError;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

const PREFIX: &str = "nvml_";

/// Hardware library seam. Implemented over NVML in production and by fakes in tests.
pub trait GpuBinding: Send + Sync {
    /// Resolve the identity labels of the bound device.
    fn identity(&self) -> Result<DeviceIdentity, DeviceError>;

    /// Acquire the device for one collection cycle.
    fn open(&self) -> Result<Box<dyn DeviceQueries + '_>, DeviceError>;
}

/// Independent reads against an acquired device.
pub trait DeviceQueries {
    fn graphics_clock_mhz(&self) -> Result<u32, DeviceError>;
    fn memory_clock_mhz(&self) -> Result<u32, DeviceError>;
    fn temperature_c(&self) -> Result<u32, DeviceError>;
    fn fan_speed_percent(&self) -> Result<u32, DeviceError>;
    /// Power draw in milliwatts.
    fn power_usage_mw(&self) -> Result<u32, DeviceError>;
    /// Performance state ordinal (P0 = 0 ... P15 = 15, 32 = unknown).
    fn power_state(&self) -> Result<u32, DeviceError>;
    fn memory_info(&self) -> Result<MemoryUsage, DeviceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryUsage {
    pub total_bytes: u64,
    pub used_bytes: u64,
}

/// Hardware telemetry for a single device.
pub struct DeviceTelemetryCollector {
    binding: Arc<dyn GpuBinding>,
    labels: LabelSet,
}

impl DeviceTelemetryCollector {
    pub fn new(binding: Arc<dyn GpuBinding>, identity: &DeviceIdentity) -> Self {
        Self {
            binding,
            labels: identity.labels(),
        }
    }

    /// Run every query once. A failed query drops its sample only; a device
    /// that cannot be acquired yields an empty batch.
    fn sample(binding: &dyn GpuBinding, labels: &LabelSet) -> Vec<SampleValue> {
        let device = match binding.open() {
            Ok(device) => device,
            Err(e) => {
                warn!(error = %e, "device unavailable, skipping hardware samples this cycle");
                return Vec::new();
            }
        };

        let mut samples = Vec::with_capacity(8);

        debug!("querying clocks");
        let gpu_mhz = device.graphics_clock_mhz();
        let mem_mhz = device.memory_clock_mhz();
        push_gauge(&mut samples, labels, "clock_gpu_hz", "GPU clock", gpu_mhz.clone().map(mhz_to_hz));
        push_gauge(&mut samples, labels, "clock_mem_hz", "MEM clock", mem_mhz.clone().map(mhz_to_hz));

        debug!("querying temperature");
        let temp_c = device.temperature_c();
        push_gauge(&mut samples, labels, "gpu_temperature_c", "GPU temperature", temp_c.clone().map(f64::from));

        debug!("querying fan");
        push_gauge(&mut samples, labels, "fan_speed_percent", "fan speed", device.fan_speed_percent().map(f64::from));

        debug!("querying power");
        let power_w = device.power_usage_mw().map(milliwatts_to_watts);
        push_gauge(&mut samples, labels, "power_draw_watt", "power draw", power_w.clone());
        push_gauge(&mut samples, labels, "power_state", "power state", device.power_state().map(f64::from));

        debug!("querying memory");
        match device.memory_info() {
            Ok(mem) => {
                push_gauge(&mut samples, labels, "memory_total_bytes", "total memory", Ok(mem.total_bytes as f64));
                push_gauge(&mut samples, labels, "memory_used_bytes", "used memory", Ok(mem.used_bytes as f64));
            }
            Err(e) => log_query_failure("memory_info", &e),
        }

        if let (Ok(power_w), Ok(temp_c), Ok(gpu_mhz), Ok(mem_mhz)) = (power_w, temp_c, gpu_mhz, mem_mhz) {
            info!(power_w, temp_c, gpu_mhz, mem_mhz, "collected device telemetry");
        }

        samples
    }
}

fn push_gauge(
    samples: &mut Vec<SampleValue>,
    labels: &LabelSet,
    suffix: &str,
    help: &str,
    reading: Result<f64, DeviceError>,
) {
    match reading {
        Ok(value) => samples.push(SampleValue::gauge(
            format!("{PREFIX}{suffix}"),
            format!("NVML {help}"),
            labels,
            value,
        )),
        Err(e) => log_query_failure(suffix, &e),
    }
}

fn log_query_failure(query: &str, error: &DeviceError) {
    match error {
        DeviceError::NotSupported { .. } => debug!(query, error = %error, "query not supported, sample omitted"),
        _ => warn!(query, error = %error, "query failed, sample omitted"),
    }
}

fn mhz_to_hz(mhz: u32) -> f64 {
    f64::from(mhz) * 1_000_000.0
}

pub(crate) fn milliwatts_to_watts(mw: u32) -> f64 {
    f64::from(mw) / 1000.0
}

#[async_trait]
impl Collector for DeviceTelemetryCollector {
    fn name(&self) -> &'static str {
        "device"
    }

    async fn collect(&self) -> Result<Vec<SampleValue>, CollectorError> {
        let binding = Arc::clone(&self.binding);
        let labels = self.labels.clone();
        tokio::task::spawn_blocking(move || Self::sample(binding.as_ref(), &labels))
            .await
            .map_err(|e| CollectorError::TaskFailed {
                name: self.name(),
                reason: e.to_string(),
            })
    }
}

// ─────────────────────────────────────────────
// Unit tests - validate against a scripted device
// ─────────────────────────────────────────────
