//! Conversion from [`SampleValue`]s to Prometheus metric families.

use crate::collectors::{MetricKind, SampleValue};
use crate::errors::ExporterError;
use prometheus::proto::{self, MetricFamily, MetricType};
use prometheus::{Encoder, TextEncoder};
use std::collections::HashMap;
use tracing::warn;

/// Group samples into families by name, keeping first-seen order for both
/// families and the metrics inside them.
pub fn to_metric_families(samples: &[SampleValue]) -> Vec<MetricFamily> {
    let mut families: Vec<MetricFamily> = Vec::new();
    let mut index: HashMap<&str, (usize, MetricKind)> = HashMap::new();

    for sample in samples {
        let (idx, kind) = *index.entry(sample.name.as_str()).or_insert_with(|| {
            let mut family = MetricFamily::default();
            family.set_name(sample.name.clone());
            family.set_help(sample.help.clone());
            family.set_field_type(metric_type(sample.kind));
            families.push(family);
            (families.len() - 1, sample.kind)
        });

        if kind != sample.kind {
            warn!(metric = %sample.name, "sample type conflicts with its family, skipped");
            continue;
        }
        families[idx].mut_metric().push(to_metric(sample));
    }

    families
}

fn metric_type(kind: MetricKind) -> MetricType {
    match kind {
        MetricKind::Gauge => MetricType::GAUGE,
        MetricKind::Counter => MetricType::COUNTER,
    }
}

fn to_metric(sample: &SampleValue) -> proto::Metric {
    let mut metric = proto::Metric::default();
    for (name, value) in sample.labels.iter() {
        let mut pair = proto::LabelPair::default();
        pair.set_name(name.to_string());
        pair.set_value(value.to_string());
        metric.mut_label().push(pair);
    }
    match sample.kind {
        MetricKind::Gauge => {
            let mut gauge = proto::Gauge::default();
            gauge.set_value(sample.value);
            metric.set_gauge(gauge);
        }
        MetricKind::Counter => {
            let mut counter = proto::Counter::default();
            counter.set_value(sample.value);
            metric.set_counter(counter);
        }
    }
    metric
}

/// Render samples in the text exposition format.
pub fn render_text(samples: &[SampleValue]) -> Result<Vec<u8>, ExporterError> {
    let families = to_metric_families(samples);
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&families, &mut buffer)?;
    Ok(buffer)
}
