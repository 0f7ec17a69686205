#![allow(dead_code)]

use nvml_miner_exporter::collectors::device::{DeviceQueries, GpuBinding, MemoryUsage};
use nvml_miner_exporter::collectors::DeviceIdentity;
use nvml_miner_exporter::errors::DeviceError;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

pub const SAMPLE_RESULT: [&str; 9] = [
    "9.8 - ETH",
    "949",
    "26642;328;0",
    "26642",
    "0;0;0",
    "off",
    "64;48",
    "eu1.ethermine.org:4444",
    "0;0;0;0",
];

pub fn status_reply(result: &[&str]) -> String {
    serde_json::json!({ "id": 0, "error": null, "result": result }).to_string()
}

/// A GPU that always answers with fixed readings unless marked lost.
#[derive(Default)]
pub struct FakeGpu {
    pub lost: AtomicBool,
}

impl FakeGpu {
    pub fn lose(&self) {
        self.lost.store(true, Ordering::SeqCst);
    }
}

struct FakeReadings;

impl GpuBinding for FakeGpu {
    fn identity(&self) -> Result<DeviceIdentity, DeviceError> {
        Ok(DeviceIdentity::new("GPU-8d1c3f2e", "00000000:01:00.0"))
    }

    fn open(&self) -> Result<Box<dyn DeviceQueries + '_>, DeviceError> {
        if self.lost.load(Ordering::SeqCst) {
            return Err(DeviceError::Unavailable {
                index: 0,
                reason: "GPU is lost".into(),
            });
        }
        Ok(Box::new(FakeReadings))
    }
}

impl DeviceQueries for FakeReadings {
    fn graphics_clock_mhz(&self) -> Result<u32, DeviceError> {
        Ok(1607)
    }
    fn memory_clock_mhz(&self) -> Result<u32, DeviceError> {
        Ok(4004)
    }
    fn temperature_c(&self) -> Result<u32, DeviceError> {
        Ok(64)
    }
    fn fan_speed_percent(&self) -> Result<u32, DeviceError> {
        Err(DeviceError::NotSupported { query: "fan_speed" })
    }
    fn power_usage_mw(&self) -> Result<u32, DeviceError> {
        Ok(123456)
    }
    fn power_state(&self) -> Result<u32, DeviceError> {
        Ok(2)
    }
    fn memory_info(&self) -> Result<MemoryUsage, DeviceError> {
        Ok(MemoryUsage {
            total_bytes: 8_514_043_904,
            used_bytes: 2_862_612_480,
        })
    }
}

/// Behaviour of a fake miner for each accepted connection.
#[derive(Clone)]
pub enum MinerReply {
    /// Write the body in the given chunks, then close.
    Chunks(Vec<String>),
    /// Write the body in one piece, then keep the connection open.
    Hold(String),
    /// Accept and read the request, then never answer.
    Silent,
}

/// Loopback miner API. Every request body received is forwarded on the channel.
pub async fn spawn_miner(reply: MinerReply) -> (SocketAddr, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let reply = reply.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 1024];
                let n = stream.read(&mut buf).await.unwrap_or(0);
                let _ = tx.send(String::from_utf8_lossy(&buf[..n]).into_owned());
                match reply {
                    MinerReply::Chunks(chunks) => {
                        for chunk in chunks {
                            let _ = stream.write_all(chunk.as_bytes()).await;
                            let _ = stream.flush().await;
                            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                        }
                    }
                    MinerReply::Hold(body) => {
                        let _ = stream.write_all(body.as_bytes()).await;
                        let _ = stream.flush().await;
                        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
                    }
                    MinerReply::Silent => {
                        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
                    }
                }
            });
        }
    });
    (addr, rx)
}

/// An address nothing is listening on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}
