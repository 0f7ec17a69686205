use super::*;
use crate::errors::CollectorError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

const PREFIX: &str = "miner_";

/// Upper bound on the status response size.
pub const MAX_RESPONSE_BYTES: usize = 16 * 1024;

/// Positional fields of the status `result` array.
const FIELD_VERSION: usize = 0;
const FIELD_UPTIME: usize = 1;
const FIELD_ETH_SHARES: usize = 2;
const FIELD_TEMP_FAN: usize = 6;
const FIELD_POOLS: usize = 7;
const FIELD_EVENTS: usize = 8;
const RESULT_LEN: usize = 9;

#[derive(Debug, Serialize)]
struct StatusRequest<'a> {
    id: u32,
    jsonrpc: &'a str,
    method: &'a str,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    result: Vec<String>,
}

/// One parsed status reply. Lives for a single collection cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerStatusRecord {
    pub version: String,
    pub uptime_minutes: f64,
    pub hashrate_mhs: f64,
    pub shares_accepted: f64,
    pub shares_rejected: f64,
    pub temperature_c: f64,
    pub fan_percent: f64,
    pub pool_current: String,
    pub shares_invalid: f64,
    pub pool_switches: f64,
}

impl WorkerStatusRecord {
    /// Parse the raw bytes of a status reply. Any missing field or
    /// non-numeric value rejects the whole reply.
    pub fn parse(bytes: &[u8]) -> Result<Self, CollectorError> {
        let response: StatusResponse = serde_json::from_slice(bytes)?;
        Self::from_fields(&response.result)
    }

    fn from_fields(fields: &[String]) -> Result<Self, CollectorError> {
        if fields.len() < RESULT_LEN {
            return Err(CollectorError::ParseError {
                field: "result".into(),
                raw: format!("{} elements, expected {RESULT_LEN}", fields.len()),
            });
        }

        let shares = split_field(&fields[FIELD_ETH_SHARES], "eth_shares", 3)?;
        let temp_fan = split_field(&fields[FIELD_TEMP_FAN], "temp_fan", 2)?;
        let pools = split_field(&fields[FIELD_POOLS], "pools", 1)?;
        let events = split_field(&fields[FIELD_EVENTS], "events", 4)?;

        let pool_current = pools[0].trim();
        if pool_current.is_empty() {
            return Err(CollectorError::ParseError {
                field: "pools".into(),
                raw: fields[FIELD_POOLS].clone(),
            });
        }

        Ok(Self {
            version: fields[FIELD_VERSION].clone(),
            uptime_minutes: parse_number(&fields[FIELD_UPTIME], "uptime_minutes")?,
            hashrate_mhs: parse_number(shares[0], "eth_hashrate")?,
            shares_accepted: parse_number(shares[1], "eth_shares_accepted")?,
            shares_rejected: parse_number(shares[2], "eth_shares_rejected")?,
            temperature_c: parse_number(temp_fan[0], "temperature")?,
            fan_percent: parse_number(temp_fan[1], "fan_speed")?,
            pool_current: pool_current.to_string(),
            shares_invalid: parse_number(events[0], "eth_shares_invalid")?,
            pool_switches: parse_number(events[1], "eth_pool_switches")?,
        })
    }

    /// Samples for this record, labeled with `identity` plus the version and
    /// current pool learned from the reply itself.
    pub fn samples(&self, identity: &LabelSet) -> Vec<SampleValue> {
        let labels = identity
            .clone()
            .with("version", self.version.as_str())
            .with("eth_pool_current", self.pool_current.as_str());

        let counter = |suffix: &str, help: &str, value: f64| {
            SampleValue::counter(format!("{PREFIX}{suffix}"), format!("Miner {help}"), &labels, value)
        };
        let gauge = |suffix: &str, help: &str, value: f64| {
            SampleValue::gauge(format!("{PREFIX}{suffix}"), format!("Miner {help}"), &labels, value)
        };

        vec![
            counter("uptime_minutes", "uptime in minutes", self.uptime_minutes),
            gauge("eth_hashrate_total_mhs", "total ETH hashrate", self.hashrate_mhs),
            counter("eth_shares_accepted", "accepted ETH shares", self.shares_accepted),
            counter("eth_shares_rejected", "rejected ETH shares", self.shares_rejected),
            gauge("gpu_temperature_c", "GPU temperature", self.temperature_c),
            gauge("fan_speed_percent", "fan speed", self.fan_percent),
            counter("eth_shares_invalid", "invalid ETH shares", self.shares_invalid),
            counter("eth_pool_switches", "ETH pool switches", self.pool_switches),
        ]
    }
}

fn split_field<'a>(raw: &'a str, field: &str, min_parts: usize) -> Result<Vec<&'a str>, CollectorError> {
    let parts: Vec<&str> = raw.split(';').collect();
    if parts.len() < min_parts {
        return Err(CollectorError::ParseError {
            field: field.into(),
            raw: raw.to_string(),
        });
    }
    Ok(parts)
}

fn parse_number(raw: &str, field: &str) -> Result<f64, CollectorError> {
    let trimmed = raw.trim();
    let is_decimal = !trimmed.is_empty()
        && trimmed.bytes().all(|b| b.is_ascii_digit() || b == b'.')
        && trimmed.bytes().filter(|b| *b == b'.').count() <= 1;
    if !is_decimal {
        return Err(CollectorError::ParseError {
            field: field.into(),
            raw: raw.to_string(),
        });
    }
    trimmed.parse::<f64>().map_err(|_| CollectorError::ParseError {
        field: field.into(),
        raw: raw.to_string(),
    })
}

/// Client for the worker's line-less JSON status protocol.
pub struct WorkerStatusClient {
    host: String,
    port: u16,
    method: String,
    timeout: Duration,
    labels: LabelSet,
}

impl WorkerStatusClient {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        method: impl Into<String>,
        timeout: Duration,
        identity: &DeviceIdentity,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            method: method.into(),
            timeout,
            labels: identity.labels(),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn request_body(&self) -> Result<Vec<u8>, CollectorError> {
        Ok(serde_json::to_vec(&StatusRequest {
            id: 0,
            jsonrpc: "2.0",
            method: &self.method,
        })?)
    }

    /// One request/response exchange. Connect and read are each bounded by
    /// the configured timeout. The stream is owned by this call and closed on
    /// every return path.
    pub async fn poll(&self) -> Result<WorkerStatusRecord, CollectorError> {
        let addr = self.addr();
        let timeout_ms = self.timeout.as_millis() as u64;

        let mut stream = timeout(self.timeout, TcpStream::connect(addr.as_str()))
            .await
            .map_err(|_| CollectorError::Timeout {
                addr: addr.clone(),
                stage: "connect",
                timeout_ms,
            })?
            .map_err(|e| CollectorError::WorkerUnavailable {
                addr: addr.clone(),
                source: e,
            })?;

        let body = self.request_body()?;
        let exchange = async {
            stream.write_all(&body).await?;
            Ok::<_, std::io::Error>(read_response(&mut stream).await?)
        };
        let bytes = timeout(self.timeout, exchange)
            .await
            .map_err(|_| CollectorError::Timeout {
                addr: addr.clone(),
                stage: "read",
                timeout_ms,
            })?
            .map_err(|e| CollectorError::WorkerUnavailable {
                addr: addr.clone(),
                source: e,
            })?;

        debug!(addr = %addr, bytes = bytes.len(), "received worker status");
        WorkerStatusRecord::parse(&bytes)
    }
}

/// Read until the peer closes, the buffer cap is hit, or the bytes so far
/// form a complete JSON document. A peer that closes before sending anything
/// is reported as `UnexpectedEof`.
async fn read_response(stream: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let room = MAX_RESPONSE_BYTES - buf.len();
        buf.extend_from_slice(&chunk[..n.min(room)]);
        if buf.len() >= MAX_RESPONSE_BYTES
            || serde_json::from_slice::<serde_json::Value>(&buf).is_ok()
        {
            break;
        }
    }
    if buf.is_empty() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed without a reply",
        ));
    }
    Ok(buf)
}

#[async_trait]
impl Collector for WorkerStatusClient {
    fn name(&self) -> &'static str {
        "worker"
    }

    async fn collect(&self) -> Result<Vec<SampleValue>, CollectorError> {
        match self.poll().await {
            Ok(record) => {
                info!(
                    version = %record.version,
                    hashrate_mhs = record.hashrate_mhs,
                    accepted = record.shares_accepted,
                    pool = %record.pool_current,
                    "collected worker status"
                );
                Ok(record.samples(&self.labels))
            }
            Err(e) if e.is_unavailable() => {
                debug!(addr = %self.addr(), error = %e, "worker unavailable this cycle");
                Ok(Vec::new())
            }
            Err(e) => {
                warn!(addr = %self.addr(), error = %e, "discarding worker status");
                Ok(Vec::new())
            }
        }
    }
}

// ─────────────────────────────────────────────
// Unit tests - validate on hardcoded responses
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RESPONSE: &str = r#"{"id": 0, "error": null, "result": ["9.8 - ETH", "949", "26642;328;0", "26642", "0;0;0", "off", "64;48", "eu1.ethermine.org:4444", "0;0;0;0"]}"#;

    fn identity() -> LabelSet {
        DeviceIdentity::new("GPU-1234", "0000:01:00.0").labels()
    }

    fn response_with(fields: &[&str]) -> String {
        serde_json::json!({ "id": 0, "result": fields }).to_string()
    }

    #[test]
    fn test_parse_sample_response() {
        let record = WorkerStatusRecord::parse(SAMPLE_RESPONSE.as_bytes()).unwrap();
        assert_eq!(record.version, "9.8 - ETH");
        assert_eq!(record.uptime_minutes, 949.0);
        assert_eq!(record.hashrate_mhs, 26642.0);
        assert_eq!(record.shares_accepted, 328.0);
        assert_eq!(record.shares_rejected, 0.0);
        assert_eq!(record.temperature_c, 64.0);
        assert_eq!(record.fan_percent, 48.0);
        assert_eq!(record.pool_current, "eu1.ethermine.org:4444");
        assert_eq!(record.shares_invalid, 0.0);
        assert_eq!(record.pool_switches, 0.0);
    }

    #[test]
    fn test_samples_kinds_and_labels() {
        let record = WorkerStatusRecord::parse(SAMPLE_RESPONSE.as_bytes()).unwrap();
        let samples = record.samples(&identity());
        assert_eq!(samples.len(), 8);

        let kind_of = |name: &str| samples.iter().find(|s| s.name == name).map(|s| s.kind);
        assert_eq!(kind_of("miner_uptime_minutes"), Some(MetricKind::Counter));
        assert_eq!(kind_of("miner_eth_hashrate_total_mhs"), Some(MetricKind::Gauge));
        assert_eq!(kind_of("miner_eth_shares_accepted"), Some(MetricKind::Counter));
        assert_eq!(kind_of("miner_eth_shares_rejected"), Some(MetricKind::Counter));
        assert_eq!(kind_of("miner_gpu_temperature_c"), Some(MetricKind::Gauge));
        assert_eq!(kind_of("miner_fan_speed_percent"), Some(MetricKind::Gauge));
        assert_eq!(kind_of("miner_eth_shares_invalid"), Some(MetricKind::Counter));
        assert_eq!(kind_of("miner_eth_pool_switches"), Some(MetricKind::Counter));

        let names: Vec<_> = samples[0].labels.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["gpu_uuid", "pci_bus_id", "version", "eth_pool_current"]);
        assert!(samples.iter().all(|s| s.labels == samples[0].labels));
        assert_eq!(samples[0].labels.get("eth_pool_current"), Some("eu1.ethermine.org:4444"));
    }

    #[test]
    fn test_parse_is_deterministic() {
        let a = WorkerStatusRecord::parse(SAMPLE_RESPONSE.as_bytes()).unwrap();
        let b = WorkerStatusRecord::parse(SAMPLE_RESPONSE.as_bytes()).unwrap();
        assert_eq!(a.samples(&identity()), b.samples(&identity()));
    }

    #[test]
    fn test_short_result_rejected() {
        let raw = response_with(&["9.8 - ETH", "949", "26642;328;0", "26642", "0;0;0", "off", "64;48", "pool:4444"]);
        assert!(WorkerStatusRecord::parse(raw.as_bytes()).is_err());
    }

    #[test]
    fn test_non_numeric_subfield_rejected() {
        let raw = response_with(&["9.8 - ETH", "949", "26642;abc;0", "26642", "0;0;0", "off", "64;48", "pool:4444", "0;0;0;0"]);
        let err = WorkerStatusRecord::parse(raw.as_bytes()).unwrap_err();
        assert!(matches!(err, CollectorError::ParseError { ref field, .. } if field == "eth_shares_accepted"));
    }

    #[test]
    fn test_missing_subfield_rejected() {
        let raw = response_with(&["9.8 - ETH", "949", "26642;328;0", "26642", "0;0;0", "off", "64", "pool:4444", "0;0;0;0"]);
        assert!(WorkerStatusRecord::parse(raw.as_bytes()).is_err());

        let raw = response_with(&["9.8 - ETH", "949", "26642;328;0", "26642", "0;0;0", "off", "64;48", "pool:4444", "0;0"]);
        assert!(WorkerStatusRecord::parse(raw.as_bytes()).is_err());
    }

    #[test]
    fn test_signed_or_exotic_numbers_rejected() {
        assert!(parse_number("-1", "x").is_err());
        assert!(parse_number("inf", "x").is_err());
        assert!(parse_number("1e3", "x").is_err());
        assert!(parse_number("", "x").is_err());
        assert_eq!(parse_number(" 12.5 ", "x").unwrap(), 12.5);
    }

    #[test]
    fn test_not_json_rejected() {
        let err = WorkerStatusRecord::parse(b"HTTP/1.0 400 Bad Request").unwrap_err();
        assert!(matches!(err, CollectorError::MalformedResponse(_)));
    }

    #[test]
    fn test_multi_pool_takes_first() {
        let raw = response_with(&["9.8 - ETH", "1", "1;2;3", "1", "0;0;0", "off", "60;40", "eu1.pool:4444;us1.pool:4444", "0;1;0;0"]);
        let record = WorkerStatusRecord::parse(raw.as_bytes()).unwrap();
        assert_eq!(record.pool_current, "eu1.pool:4444");
        assert_eq!(record.pool_switches, 1.0);
    }

    #[test]
    fn test_request_body() {
        let client = WorkerStatusClient::new(
            "localhost",
            3333,
            "miner_getstat1",
            Duration::from_secs(1),
            &DeviceIdentity::new("GPU-1234", "0000:01:00.0"),
        );
        let body = client.request_body().unwrap();
        assert_eq!(
            String::from_utf8(body).unwrap(),
            r#"{"id":0,"jsonrpc":"2.0","method":"miner_getstat1"}"#
        );
    }
}
