use crate::collectors::{Collector, SampleValue, IDENTITY_LABELS};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Ordered set of collectors gathered together on every scrape or push.
///
/// Registration happens once during startup; afterwards the registry is only
/// read, so concurrent `gather` calls each do their own collection.
#[derive(Default)]
pub struct MetricRegistry {
    collectors: Vec<Arc<dyn Collector>>,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, collector: Arc<dyn Collector>) {
        debug!(collector = collector.name(), "registered collector");
        self.collectors.push(collector);
    }

    pub fn len(&self) -> usize {
        self.collectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }

    /// Run every collector in registration order and concatenate the results.
    ///
    /// A collector that errors or panics contributes nothing to this pass.
    /// Samples without labels, and repeats of an earlier `(name, labels)` pair,
    /// are dropped.
    pub async fn gather(&self) -> Vec<SampleValue> {
        let mut samples = Vec::new();
        for collector in &self.collectors {
            let started = Instant::now();
            let task = {
                let collector = Arc::clone(collector);
                tokio::spawn(async move { collector.collect().await })
            };
            let batch = match task.await {
                Ok(Ok(batch)) => batch,
                Ok(Err(e)) => {
                    warn!(collector = collector.name(), error = %e, "collection failed");
                    continue;
                }
                Err(e) => {
                    warn!(collector = collector.name(), error = %e, "collector aborted");
                    continue;
                }
            };
            debug!(
                collector = collector.name(),
                count = batch.len(),
                latency_us = started.elapsed().as_micros() as u64,
                "collected"
            );
            samples.extend(batch);
        }
        dedup(samples)
    }
}

fn dedup(samples: Vec<SampleValue>) -> Vec<SampleValue> {
    let mut seen = HashSet::new();
    samples
        .into_iter()
        .filter(|sample| {
            if let Some(missing) = IDENTITY_LABELS
                .iter()
                .find(|name| sample.labels.get(name).is_none())
            {
                warn!(metric = %sample.name, label = *missing, "dropping sample without device identity");
                return false;
            }
            if !seen.insert((sample.name.clone(), sample.labels.clone())) {
                warn!(metric = %sample.name, "dropping duplicate sample");
                return false;
            }
            true
        })
        .collect()
}
