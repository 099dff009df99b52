//! HTTP GET probe
//!
//! A liveness probe, not an HTTP client: one GET on the configured path
//! over a deadline-bounded socket, verdict from the status line alone.
//! Any 2xx is success, anything else a failure.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use polaris_core::{Config, DetectResult, OutlierDetector, PolarisResult, ProbeOutcome};

struct HttpParams {
    timeout: Duration,
    path: String,
}

/// GET-based detector; 2xx means alive
pub struct HttpDetector {
    params: RwLock<HttpParams>,
}

impl HttpDetector {
    pub fn new() -> Self {
        Self {
            params: RwLock::new(HttpParams {
                timeout: Duration::from_millis(500),
                path: "/".to_string(),
            }),
        }
    }
}

impl Default for HttpDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl OutlierDetector for HttpDetector {
    fn name(&self) -> &str {
        "http"
    }

    fn init(&self, config: &Config) -> PolarisResult<()> {
        let http = &config.consumer.outlier_detection.http;
        let mut params = self.params.write();
        params.timeout = Duration::from_millis(http.timeout.max(1));
        params.path = if http.path.starts_with('/') {
            http.path.clone()
        } else {
            format!("/{}", http.path)
        };
        Ok(())
    }

    fn detect_instance(&self, host: &str, port: u16) -> DetectResult {
        let (timeout, path) = {
            let params = self.params.read();
            (params.timeout, params.path.clone())
        };
        let start = Instant::now();
        let outcome = probe(host, port, &path, timeout, start);
        DetectResult {
            outcome,
            latency: start.elapsed(),
        }
    }
}

fn probe(host: &str, port: u16, path: &str, timeout: Duration, start: Instant) -> ProbeOutcome {
    let Some(addr) = super::tcp::resolve(host, port) else {
        return ProbeOutcome::Fail;
    };
    let mut stream = match TcpStream::connect_timeout(&addr, timeout) {
        Ok(stream) => stream,
        Err(e) if e.kind() == std::io::ErrorKind::TimedOut => return ProbeOutcome::Timeout,
        Err(_) => return ProbeOutcome::Fail,
    };
    let remaining = match timeout.checked_sub(start.elapsed()) {
        Some(remaining) if !remaining.is_zero() => remaining,
        _ => return ProbeOutcome::Timeout,
    };
    if stream.set_write_timeout(Some(remaining)).is_err()
        || stream.set_read_timeout(Some(remaining)).is_err()
    {
        return ProbeOutcome::Fail;
    }
    let request = format!(
        "GET {path} HTTP/1.1\r\nHost: {host}:{port}\r\nConnection: close\r\nUser-Agent: polaris-detect\r\n\r\n"
    );
    if stream.write_all(request.as_bytes()).is_err() {
        return ProbeOutcome::Fail;
    }
    // Only the status line matters; 64 bytes is plenty for it
    let mut buf = [0u8; 64];
    let mut read = 0;
    while read < buf.len() {
        match stream.read(&mut buf[read..]) {
            Ok(0) => break,
            Ok(n) => {
                read += n;
                if buf[..read].contains(&b'\n') {
                    break;
                }
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                return ProbeOutcome::Timeout;
            }
            Err(_) => return ProbeOutcome::Fail,
        }
    }
    match parse_status(&buf[..read]) {
        Some(status) if (200..300).contains(&status) => ProbeOutcome::Success,
        _ => ProbeOutcome::Fail,
    }
}

/// Pull the status code out of `HTTP/1.x NNN ...`
fn parse_status(line: &[u8]) -> Option<u16> {
    let text = std::str::from_utf8(line).ok()?;
    let mut parts = text.split_whitespace();
    let version = parts.next()?;
    if !version.starts_with("HTTP/") {
        return None;
    }
    parts.next()?.parse().ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn spawn_http_server(status_line: &'static str) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf);
                let _ = stream.write_all(status_line.as_bytes());
            }
        });
        addr
    }

    #[test]
    fn two_hundred_is_success() {
        let addr = spawn_http_server("HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");
        let detector = HttpDetector::new();
        let result = detector.detect_instance("127.0.0.1", addr.port());
        assert_eq!(result.outcome, ProbeOutcome::Success);
    }

    #[test]
    fn five_hundred_is_failure() {
        let addr = spawn_http_server("HTTP/1.1 500 Internal Server Error\r\n\r\n");
        let detector = HttpDetector::new();
        let result = detector.detect_instance("127.0.0.1", addr.port());
        assert_eq!(result.outcome, ProbeOutcome::Fail);
    }

    #[test]
    fn refused_connection_is_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let detector = HttpDetector::new();
        let result = detector.detect_instance("127.0.0.1", port);
        assert_eq!(result.outcome, ProbeOutcome::Fail);
    }

    #[test]
    fn status_line_parser() {
        assert_eq!(parse_status(b"HTTP/1.1 204 No Content\r\n"), Some(204));
        assert_eq!(parse_status(b"HTTP/1.0 301 Moved\r\n"), Some(301));
        assert_eq!(parse_status(b"SSH-2.0-OpenSSH\r\n"), None);
        assert_eq!(parse_status(b""), None);
    }

    #[test]
    fn init_normalises_the_path() {
        let detector = HttpDetector::new();
        let config = Config::from_yaml(
            "consumer:\n  outlierDetection:\n    http:\n      path: health\n",
        )
        .unwrap();
        detector.init(&config).unwrap();
        assert_eq!(detector.params.read().path, "/health");
    }
}
