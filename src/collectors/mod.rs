pub mod device;
pub mod nvml;
pub mod worker;

use crate::errors::CollectorError;
use async_trait::async_trait;

#[async_trait]
pub trait Collector: Send + Sync {
    /// name of the collector as used in logs
    fn name(&self) -> &'static str;

    /// gather one batch of samples. An expected outage (device busy, worker
    /// down) is reported as `Ok` with an empty batch; `Err` is reserved for
    /// failures the collector did not anticipate.
    async fn collect(&self) -> Result<Vec<SampleValue>, CollectorError>;
}

/// Exposition type of a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Gauge,
    Counter,
}

/// Ordered label name/value pairs. Order is insertion order and is kept
/// through exposition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct LabelSet(Vec<(String, String)>);

impl LabelSet {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Appends a label, replacing the value if the name is already present.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One typed, labeled observation.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleValue {
    pub name: String,
    pub help: String,
    pub kind: MetricKind,
    pub labels: LabelSet,
    pub value: f64,
}

impl SampleValue {
    pub fn gauge(name: impl Into<String>, help: impl Into<String>, labels: &LabelSet, value: f64) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            kind: MetricKind::Gauge,
            labels: labels.clone(),
            value,
        }
    }

    pub fn counter(name: impl Into<String>, help: impl Into<String>, labels: &LabelSet, value: f64) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            kind: MetricKind::Counter,
            labels: labels.clone(),
            value,
        }
    }
}

/// Label names every sample must carry.
pub const IDENTITY_LABELS: [&str; 2] = ["gpu_uuid", "pci_bus_id"];

/// Identity of the bound device, resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub uuid: String,
    pub bus_id: String,
}

impl DeviceIdentity {
    pub fn new(uuid: impl Into<String>, bus_id: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            bus_id: bus_id.into(),
        }
    }

    /// Labels every collector attaches to samples of this device.
    pub fn labels(&self) -> LabelSet {
        LabelSet::new()
            .with(IDENTITY_LABELS[0], self.uuid.as_str())
            .with(IDENTITY_LABELS[1], self.bus_id.as_str())
    }
}
