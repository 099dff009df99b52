//! UDP echo probe

use std::net::UdpSocket;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use polaris_core::{Config, DetectResult, OutlierDetector, PolarisResult, ProbeOutcome};

/// Bytes sent as the probe; the peer is expected to answer with anything
const PROBE_PAYLOAD: &[u8] = b"polaris-detect";

struct UdpParams {
    timeout: Duration,
    timeout_as_fail: bool,
}

/// Sends a probe datagram and waits for any echo within the deadline
pub struct UdpDetector {
    params: RwLock<UdpParams>,
}

impl UdpDetector {
    pub fn new() -> Self {
        Self {
            params: RwLock::new(UdpParams {
                timeout: Duration::from_millis(500),
                timeout_as_fail: true,
            }),
        }
    }
}

impl Default for UdpDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl OutlierDetector for UdpDetector {
    fn name(&self) -> &str {
        "udp"
    }

    fn init(&self, config: &Config) -> PolarisResult<()> {
        let udp = &config.consumer.outlier_detection.udp;
        let mut params = self.params.write();
        params.timeout = Duration::from_millis(udp.timeout.max(1));
        params.timeout_as_fail = udp.timeout_as_fail;
        Ok(())
    }

    fn detect_instance(&self, host: &str, port: u16) -> DetectResult {
        let (timeout, timeout_as_fail) = {
            let params = self.params.read();
            (params.timeout, params.timeout_as_fail)
        };
        let start = Instant::now();
        let fail = |start: Instant| DetectResult {
            outcome: ProbeOutcome::Fail,
            latency: start.elapsed(),
        };

        let Some(addr) = super::tcp::resolve(host, port) else {
            return fail(start);
        };
        let Ok(socket) = UdpSocket::bind("0.0.0.0:0") else {
            return fail(start);
        };
        if socket.set_read_timeout(Some(timeout)).is_err()
            || socket.send_to(PROBE_PAYLOAD, addr).is_err()
        {
            return fail(start);
        }
        let mut buf = [0u8; 256];
        let outcome = match socket.recv_from(&mut buf) {
            Ok(_) => ProbeOutcome::Success,
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                if timeout_as_fail {
                    ProbeOutcome::Fail
                } else {
                    ProbeOutcome::Timeout
                }
            }
            Err(_) => ProbeOutcome::Fail,
        };
        DetectResult {
            outcome,
            latency: start.elapsed(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn spawn_echo_server() -> (std::net::SocketAddr, std::thread::JoinHandle<()>) {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = socket.local_addr().unwrap();
        let handle = std::thread::spawn(move || {
            let mut buf = [0u8; 256];
            if let Ok((len, peer)) = socket.recv_from(&mut buf) {
                let _ = socket.send_to(&buf[..len], peer);
            }
        });
        (addr, handle)
    }

    #[test]
    fn echoing_peer_probes_successful() {
        let (addr, handle) = spawn_echo_server();
        let detector = UdpDetector::new();
        let result = detector.detect_instance("127.0.0.1", addr.port());
        assert_eq!(result.outcome, ProbeOutcome::Success);
        handle.join().unwrap();
    }

    #[test]
    fn silent_peer_counts_as_fail_by_default() {
        // Socket that never answers
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = socket.local_addr().unwrap().port();
        let detector = UdpDetector::new();
        let config =
            Config::from_yaml("consumer:\n  outlierDetection:\n    udp:\n      timeout: 30\n")
                .unwrap();
        detector.init(&config).unwrap();
        let result = detector.detect_instance("127.0.0.1", port);
        assert_eq!(result.outcome, ProbeOutcome::Fail);
    }

    #[test]
    fn silent_peer_is_timeout_when_configured() {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = socket.local_addr().unwrap().port();
        let detector = UdpDetector::new();
        let config = Config::from_yaml(
            "consumer:\n  outlierDetection:\n    udp:\n      timeout: 30\n      timeoutAsFail: false\n",
        )
        .unwrap();
        detector.init(&config).unwrap();
        let result = detector.detect_instance("127.0.0.1", port);
        assert_eq!(result.outcome, ProbeOutcome::Timeout);
    }
}
