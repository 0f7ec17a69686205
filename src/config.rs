use crate::exporter::{ExporterSettings, PushTarget};
use clap::Parser;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(name = "nvml-miner-exporter", version, about = "nVidia GPU and miner Prometheus metrics exporter")]
pub struct Config {
    /// Turn on verbose (debug) logging.
    #[arg(long, env = "NVML_EXPORTER_VERBOSE", default_value_t = false)]
    pub verbose: bool,

    /// Enable JSON structured logging.
    #[arg(long, env = "NVML_EXPORTER_JSON_LOGS", default_value_t = false)]
    pub json_logs: bool,

    /// Period between metric updates, in seconds.
    #[arg(
        short = 'u',
        long,
        env = "NVML_EXPORTER_UPDATE_PERIOD",
        default_value_t = 30,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub update_period: u64,

    /// If non-zero, port to serve scrapes on.
    #[arg(short = 'p', long, env = "NVML_EXPORTER_PORT", default_value_t = 0)]
    pub port: u16,

    /// Address the scrape listener binds to.
    #[arg(long, env = "NVML_EXPORTER_LISTEN_ADDRESS", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub listen_address: IpAddr,

    /// If set, push gateway as <host>:<port>.
    #[arg(short = 'g', long, env = "NVML_EXPORTER_GATEWAY")]
    pub gateway: Option<String>,

    /// Job label for pushed metrics.
    /// if none provided, default to hostname.
    #[arg(long, env = "NVML_EXPORTER_JOB")]
    pub job: Option<String>,

    /// Index of the GPU to monitor.
    #[arg(long, env = "NVML_EXPORTER_DEVICE_INDEX", default_value_t = 0)]
    pub device_index: u32,

    /// Miner API hostname.
    #[arg(long, env = "NVML_EXPORTER_MINER_HOST", default_value = "localhost")]
    pub miner_host: String,

    /// Miner API TCP port. Miner metrics are disabled when unset.
    #[arg(long, env = "NVML_EXPORTER_MINER_PORT")]
    pub miner_port: Option<u16>,

    /// Miner API status method.
    #[arg(long, env = "NVML_EXPORTER_MINER_METHOD", default_value = "miner_getstat1")]
    pub miner_method: String,

    /// Connect and read timeout for the miner API, in milliseconds.
    #[arg(
        long,
        env = "NVML_EXPORTER_MINER_TIMEOUT_MS",
        default_value_t = 3000,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub miner_timeout_ms: u64,
}

/// Where and how to reach the miner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    pub host: String,
    pub port: u16,
    pub method: String,
    pub timeout: Duration,
}

impl Config {
    /// get job name, upon failure fallback to hostname.
    pub fn resolved_job(&self) -> String {
        self.job.clone().unwrap_or_else(|| {
            hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "unknown-host".to_string())
        })
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_period)
    }

    pub fn listen_addr(&self) -> Option<SocketAddr> {
        (self.port != 0).then(|| SocketAddr::new(self.listen_address, self.port))
    }

    pub fn worker(&self) -> Option<WorkerSettings> {
        self.miner_port.map(|port| WorkerSettings {
            host: self.miner_host.clone(),
            port,
            method: self.miner_method.clone(),
            timeout: Duration::from_millis(self.miner_timeout_ms),
        })
    }

    pub fn exporter(&self) -> ExporterSettings {
        ExporterSettings {
            interval: self.update_interval(),
            listen: self.listen_addr(),
            push: self
                .gateway
                .as_ref()
                .filter(|g| !g.is_empty())
                .map(|g| PushTarget::new(g.as_str(), self.resolved_job())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        Config::try_parse_from(std::iter::once("nvml-miner-exporter").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]);
        assert!(!config.verbose);
        assert_eq!(config.update_interval(), Duration::from_secs(30));
        assert_eq!(config.listen_addr(), None);
        assert_eq!(config.miner_host, "localhost");
        assert_eq!(config.worker(), None);
        assert!(config.exporter().push.is_none());
    }

    #[test]
    fn test_scrape_port_enables_listener() {
        let config = parse(&["-p", "9400", "--listen-address", "127.0.0.1"]);
        assert_eq!(config.listen_addr(), Some("127.0.0.1:9400".parse().unwrap()));
    }

    #[test]
    fn test_worker_settings() {
        let config = parse(&["--miner-port", "3333", "--miner-host", "rig", "--miner-timeout-ms", "500"]);
        assert_eq!(
            config.worker(),
            Some(WorkerSettings {
                host: "rig".into(),
                port: 3333,
                method: "miner_getstat1".into(),
                timeout: Duration::from_millis(500),
            })
        );
    }

    #[test]
    fn test_gateway_uses_job_override() {
        let config = parse(&["-g", "pushgw:9091", "--job", "rig-07"]);
        let push = config.exporter().push.unwrap();
        assert_eq!(push.gateway(), "pushgw:9091");
        assert_eq!(push.job(), "rig-07");
    }

    #[test]
    fn test_job_falls_back_to_hostname() {
        let config = parse(&[]);
        assert!(!config.resolved_job().is_empty());
    }

    #[test]
    fn test_zero_update_period_rejected() {
        assert!(Config::try_parse_from(["nvml-miner-exporter", "-u", "0"]).is_err());
    }
}
