//! Prometheus exporter for one NVIDIA GPU and the miner process running on it.
//!
//! Hardware readings come from NVML, miner statistics from the miner's JSON
//! status API. Both are merged in a [`registry::MetricRegistry`] and exposed by
//! the [`exporter::Exporter`] as a scrape endpoint, a push to a gateway, or both.

pub mod bootstrap;
pub mod collectors;
pub mod config;
pub mod errors;
pub mod exporter;
pub mod registry;
