//! NVML implementation of [`GpuBinding`].
//!
//! The library handle is held for the lifetime of [`NvmlBinding`]; dropping it
//! shuts NVML down.

use super::device::{DeviceQueries, GpuBinding, MemoryUsage};
use super::DeviceIdentity;
use crate::errors::{BootstrapError, DeviceError};
use nvml_wrapper::enum_wrappers::device::{Clock, PerformanceState, TemperatureSensor};
use nvml_wrapper::error::NvmlError;
use nvml_wrapper::{Device, Nvml};
use tracing::{debug, info};

pub struct NvmlBinding {
    nvml: Nvml,
    index: u32,
}

impl NvmlBinding {
    /// Initialize NVML and check that device `index` can be acquired.
    pub fn init(index: u32) -> Result<Self, BootstrapError> {
        debug!("initializing NVML");
        let nvml = Nvml::init().map_err(|e| BootstrapError::Init(e.to_string()))?;

        match nvml.sys_driver_version() {
            Ok(version) => info!(driver_version = %version, "NVML initialized"),
            Err(e) => debug!(error = %e, "driver version unavailable"),
        }

        let binding = Self { nvml, index };
        {
            let device = binding.device()?;
            if let Ok(name) = device.name() {
                info!(index, device = %name, "bound device");
            }
        }
        Ok(binding)
    }

    fn device(&self) -> Result<Device<'_>, DeviceError> {
        self.nvml
            .device_by_index(self.index)
            .map_err(|e| DeviceError::Unavailable {
                index: self.index,
                reason: e.to_string(),
            })
    }
}

impl GpuBinding for NvmlBinding {
    fn identity(&self) -> Result<DeviceIdentity, DeviceError> {
        let device = self.device()?;
        let uuid = device.uuid().map_err(query_error("uuid"))?;
        let bus_id = device.pci_info().map_err(query_error("pci_info"))?.bus_id;
        Ok(DeviceIdentity::new(uuid, bus_id))
    }

    fn open(&self) -> Result<Box<dyn DeviceQueries + '_>, DeviceError> {
        Ok(Box::new(NvmlDevice(self.device()?)))
    }
}

struct NvmlDevice<'nvml>(Device<'nvml>);

fn query_error(query: &'static str) -> impl Fn(NvmlError) -> DeviceError {
    move |e| match e {
        NvmlError::NotSupported => DeviceError::NotSupported { query },
        other => DeviceError::Query {
            query,
            reason: other.to_string(),
        },
    }
}

impl DeviceQueries for NvmlDevice<'_> {
    fn graphics_clock_mhz(&self) -> Result<u32, DeviceError> {
        self.0
            .clock_info(Clock::Graphics)
            .map_err(query_error("clock_graphics"))
    }

    fn memory_clock_mhz(&self) -> Result<u32, DeviceError> {
        self.0
            .clock_info(Clock::Memory)
            .map_err(query_error("clock_memory"))
    }

    fn temperature_c(&self) -> Result<u32, DeviceError> {
        self.0
            .temperature(TemperatureSensor::Gpu)
            .map_err(query_error("temperature"))
    }

    fn fan_speed_percent(&self) -> Result<u32, DeviceError> {
        self.0.fan_speed(0).map_err(query_error("fan_speed"))
    }

    fn power_usage_mw(&self) -> Result<u32, DeviceError> {
        self.0.power_usage().map_err(query_error("power_usage"))
    }

    fn power_state(&self) -> Result<u32, DeviceError> {
        self.0
            .performance_state()
            .map(pstate_ordinal)
            .map_err(query_error("power_state"))
    }

    fn memory_info(&self) -> Result<MemoryUsage, DeviceError> {
        let info = self.0.memory_info().map_err(query_error("memory_info"))?;
        Ok(MemoryUsage {
            total_bytes: info.total,
            used_bytes: info.used,
        })
    }
}

fn pstate_ordinal(state: PerformanceState) -> u32 {
    match state {
        PerformanceState::Zero => 0,
        PerformanceState::One => 1,
        PerformanceState::Two => 2,
        PerformanceState::Three => 3,
        PerformanceState::Four => 4,
        PerformanceState::Five => 5,
        PerformanceState::Six => 6,
        PerformanceState::Seven => 7,
        PerformanceState::Eight => 8,
        PerformanceState::Nine => 9,
        PerformanceState::Ten => 10,
        PerformanceState::Eleven => 11,
        PerformanceState::Twelve => 12,
        PerformanceState::Thirteen => 13,
        PerformanceState::Fourteen => 14,
        PerformanceState::Fifteen => 15,
        PerformanceState::Unknown => 32,
    }
}
