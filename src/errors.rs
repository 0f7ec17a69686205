use thiserror::Error;

/// Failure of a single hardware read, or of acquiring the device for a cycle.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    #[error("device {index} unavailable: {reason}")]
    Unavailable { index: u32, reason: String },

    #[error("query {query} failed: {reason}")]
    Query { query: &'static str, reason: String },

    #[error("query {query} is not supported by this device")]
    NotSupported { query: &'static str },
}

#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("worker at {addr} unavailable: {source}")]
    WorkerUnavailable {
        addr: String,
        source: std::io::Error,
    },

    #[error("{stage} to {addr} timed out after {timeout_ms}ms")]
    Timeout {
        addr: String,
        stage: &'static str,
        timeout_ms: u64,
    },

    #[error("malformed worker response: {0}")]
    MalformedResponse(#[from] serde_json::Error),

    #[error("failed to parse {field} from worker response: {raw}")]
    ParseError { field: String, raw: String },

    #[error("collector {name} task failed: {reason}")]
    TaskFailed { name: &'static str, reason: String },
}

impl CollectorError {
    /// Connection refused or timed out: the worker simply is not answering this cycle.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            CollectorError::WorkerUnavailable { .. } | CollectorError::Timeout { .. }
        )
    }
}

#[derive(Error, Debug)]
pub enum ExporterError {
    #[error("failed to bind scrape listener on {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        source: std::io::Error,
    },

    #[error("failed to encode metrics: {0}")]
    Encode(#[from] prometheus::Error),

    #[error("push to {gateway} failed: {reason}")]
    Push { gateway: String, reason: String },
}

#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("failed to initialize NVML: {0}")]
    Init(String),

    #[error(transparent)]
    Device(#[from] DeviceError),
}
