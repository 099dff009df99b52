//! TCP connect probe

use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use polaris_core::{Config, DetectResult, OutlierDetector, PolarisResult, ProbeOutcome};

/// Probes liveness with a deadline-bounded `connect(2)`
pub struct TcpDetector {
    timeout: RwLock<Duration>,
}

impl TcpDetector {
    pub fn new() -> Self {
        Self {
            timeout: RwLock::new(Duration::from_millis(500)),
        }
    }
}

impl Default for TcpDetector {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn resolve(host: &str, port: u16) -> Option<SocketAddr> {
    (host, port).to_socket_addrs().ok()?.next()
}

impl OutlierDetector for TcpDetector {
    fn name(&self) -> &str {
        "tcp"
    }

    fn init(&self, config: &Config) -> PolarisResult<()> {
        *self.timeout.write() =
            Duration::from_millis(config.consumer.outlier_detection.tcp.timeout.max(1));
        Ok(())
    }

    fn detect_instance(&self, host: &str, port: u16) -> DetectResult {
        let timeout = *self.timeout.read();
        let start = Instant::now();
        let Some(addr) = resolve(host, port) else {
            return DetectResult {
                outcome: ProbeOutcome::Fail,
                latency: start.elapsed(),
            };
        };
        let outcome = match TcpStream::connect_timeout(&addr, timeout) {
            Ok(_) => ProbeOutcome::Success,
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => ProbeOutcome::Timeout,
            Err(_) => ProbeOutcome::Fail,
        };
        DetectResult {
            outcome,
            latency: start.elapsed(),
        }
    }
}
