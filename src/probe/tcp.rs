//! TCP connect probe.

use std::io::ErrorKind;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;

use super::ProbeResult;

/// Connect deadline for a single TCP probe.
const CONNECT_TIMEOUT: Duration = Duration::from_millis(3000);

/// Check whether `(host, port)` accepts a TCP connection.
///
/// The connection is dropped as soon as the outcome is known. `responseMs`
/// is wall-clock time from call start to settlement.
pub async fn run_tcp_probe(host: &str, port: u16) -> ProbeResult {
    probe_with_timeout(host, port, CONNECT_TIMEOUT).await
}

async fn probe_with_timeout(host: &str, port: u16, timeout: Duration) -> ProbeResult {
    let start = Instant::now();

    match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => {
            drop(stream);
            ProbeResult::up(start.elapsed())
        }
        Ok(Err(err)) => ProbeResult::down(start.elapsed(), error_code(&err)),
        Err(_) => ProbeResult::down(start.elapsed(), "timeout"),
    }
}

/// Map a socket error to its platform error code name.
fn error_code(err: &std::io::Error) -> String {
    match err.kind() {
        ErrorKind::ConnectionRefused => "ECONNREFUSED".to_string(),
        ErrorKind::ConnectionReset => "ECONNRESET".to_string(),
        ErrorKind::ConnectionAborted => "ECONNABORTED".to_string(),
        ErrorKind::HostUnreachable => "EHOSTUNREACH".to_string(),
        ErrorKind::NetworkUnreachable => "ENETUNREACH".to_string(),
        ErrorKind::TimedOut => "ETIMEDOUT".to_string(),
        ErrorKind::PermissionDenied => "EACCES".to_string(),
        ErrorKind::AddrNotAvailable => "EADDRNOTAVAIL".to_string(),
        _ => "error".to_string(),
    }
}
