//! Delivery of a gathered sample set to a push gateway.

use super::encoding;
use crate::collectors::SampleValue;
use crate::errors::ExporterError;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushTarget {
    gateway: String,
    job: String,
}

impl PushTarget {
    /// `gateway` is `host:port`, optionally with a scheme.
    pub fn new(gateway: impl Into<String>, job: impl Into<String>) -> Self {
        Self {
            gateway: gateway.into(),
            job: job.into(),
        }
    }

    pub fn gateway(&self) -> &str {
        &self.gateway
    }

    pub fn job(&self) -> &str {
        &self.job
    }

    /// Replace the job's metrics on the gateway with `samples`.
    ///
    /// An empty set is not sent, so an all-failed cycle leaves the last
    /// pushed values in place instead of wiping the group.
    pub async fn push(&self, samples: Vec<SampleValue>) -> Result<usize, ExporterError> {
        if samples.is_empty() {
            debug!(gateway = %self.gateway, "no samples gathered, skipping push");
            return Ok(0);
        }

        let count = samples.len();
        let families = encoding::to_metric_families(&samples);
        let job = self.job.clone();
        let gateway = self.gateway.clone();

        // the prometheus push client is blocking
        tokio::task::spawn_blocking(move || {
            prometheus::push_metrics(&job, HashMap::<String, String>::new(), &gateway, families, None)
        })
        .await
        .map_err(|e| self.failure(e))?
        .map_err(|e| self.failure(e))?;

        Ok(count)
    }

    fn failure(&self, reason: impl ToString) -> ExporterError {
        ExporterError::Push {
            gateway: self.gateway.clone(),
            reason: reason.to_string(),
        }
    }
}
