//! Echo probe with native ICMP and `ping` command fallback.
//!
//! The blocking ICMP path runs in spawn_blocking; when raw/dgram ICMP
//! sockets are unavailable (or denied at send time) the probe falls back to
//! spawning the platform `ping` binary, whose exit code decides liveness.

use std::mem::MaybeUninit;
use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::process::Command;

use super::{ProbeError, ProbeResult};

/// Per-attempt deadline for one echo exchange.
const ATTEMPT_TIMEOUT: Duration = Duration::from_millis(3000);

/// Hard ceiling on the whole probe invocation, resolution included.
const HARD_CEILING: Duration = Duration::from_millis(5000);

/// ICMP capability state, detected once per process.
#[derive(Debug, Clone, Copy, PartialEq)]
enum IcmpCapability {
    Native,
    CommandOnly,
}

static ICMP_CAPABILITY: OnceLock<IcmpCapability> = OnceLock::new();

/// Echo sequence counter so concurrent probes to the same host can tell
/// their replies apart.
static ECHO_SEQUENCE: AtomicU16 = AtomicU16::new(0);

fn next_echo_id() -> (u16, u16) {
    let identifier: u16 = rand::random();
    let sequence = ECHO_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    (identifier, sequence)
}

fn detect_icmp_capability() -> IcmpCapability {
    if Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("Echo probe: using native ICMP (RAW socket, privileged)");
        return IcmpCapability::Native;
    }
    if Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("Echo probe: using native ICMP (DGRAM socket, unprivileged)");
        return IcmpCapability::Native;
    }
    tracing::info!("Echo probe: native ICMP unavailable, using ping command fallback");
    IcmpCapability::CommandOnly
}

/// Check whether `host` answers an echo probe.
///
/// `responseMs` is wall-clock for the whole invocation (resolution, send,
/// reply or process exit) — a rough upper bound on the round-trip time, not
/// the in-transit latency. Failures always report reason `ping_failed`.
pub async fn run_echo_probe(host: &str) -> ProbeResult {
    let start = Instant::now();

    let outcome = tokio::time::timeout(HARD_CEILING, echo(host)).await;
    match outcome {
        Ok(Ok(())) => ProbeResult::up(start.elapsed()),
        Ok(Err(e)) => {
            tracing::debug!("Echo probe for {} failed: {}", host, e);
            ProbeResult::down(start.elapsed(), "ping_failed")
        }
        Err(_) => ProbeResult::down(start.elapsed(), "ping_failed"),
    }
}

async fn echo(host: &str) -> Result<(), ProbeError> {
    let capability = *ICMP_CAPABILITY.get_or_init(detect_icmp_capability);

    if capability == IcmpCapability::Native {
        let ip = resolve_address(host).await?;
        let result = tokio::task::spawn_blocking(move || blocking_echo(ip, ATTEMPT_TIMEOUT))
            .await
            .map_err(|e| ProbeError::Network(format!("spawn_blocking failed: {}", e)))?;

        match result {
            Ok(()) => return Ok(()),
            Err(ProbeError::Network(msg))
                if msg.contains("Permission") || msg.contains("not permitted") =>
            {
                tracing::warn!(
                    "Native echo for {} hit a permission error, falling back to command: {}",
                    host,
                    msg
                );
            }
            Err(e) => return Err(e),
        }
    }

    run_ping_command(host).await
}

/// Resolve hostname to IP address.
async fn resolve_address(host: &str) -> Result<IpAddr, ProbeError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }

    let mut addrs = tokio::net::lookup_host(format!("{}:0", host))
        .await
        .map_err(|e| ProbeError::Network(format!("DNS resolution failed: {}", e)))?;

    addrs
        .next()
        .map(|sa| sa.ip())
        .ok_or_else(|| ProbeError::Network(format!("no addresses found for {}", host)))
}

/// One blocking ICMP echo exchange: send a request, wait for the matching
/// reply or the deadline. Runs on a spawn_blocking thread.
fn blocking_echo(ip: IpAddr, timeout: Duration) -> Result<(), ProbeError> {
    let (domain, protocol, request_type, reply_type) = match ip {
        IpAddr::V4(_) => (Domain::IPV4, Protocol::ICMPV4, 8u8, 0u8),
        IpAddr::V6(_) => (Domain::IPV6, Protocol::ICMPV6, 128u8, 129u8),
    };

    // RAW requires CAP_NET_RAW; DGRAM works unprivileged where the platform
    // allows it.
    let socket = Socket::new(domain, Type::RAW, Some(protocol))
        .or_else(|_| Socket::new(domain, Type::DGRAM, Some(protocol)))
        .map_err(|e| ProbeError::Network(format!("failed to create ICMP socket: {}", e)))?;

    // The read timeout is set per loop pass below; writes get the full budget.
    socket
        .set_write_timeout(Some(timeout))
        .map_err(|e| ProbeError::Network(format!("failed to set timeout: {}", e)))?;

    let dest = SocketAddr::new(ip, 0);
    socket
        .connect(&dest.into())
        .map_err(|e| ProbeError::Network(format!("failed to connect: {}", e)))?;

    let (identifier, sequence) = next_echo_id();
    let packet = build_echo_request(request_type, identifier, sequence);

    let start = Instant::now();
    let deadline = start + timeout;
    socket
        .send(&packet)
        .map_err(|e| ProbeError::Network(format!("failed to send: {}", e)))?;

    // Keep reading until our reply shows up or the deadline passes; shared
    // ICMP sockets can see replies belonging to other probes. The read
    // timeout shrinks to the remaining budget each pass so stray packets
    // cannot extend the wait, and the socket is released at the deadline.
    loop {
        let Some(remaining) = remaining_budget(deadline, Instant::now()) else {
            return Err(ProbeError::Timeout(timeout));
        };
        socket
            .set_read_timeout(Some(remaining))
            .map_err(|e| ProbeError::Network(format!("failed to set timeout: {}", e)))?;

        let mut buf = [MaybeUninit::<u8>::uninit(); 1500];
        let len = socket.recv(&mut buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::WouldBlock
                || e.kind() == std::io::ErrorKind::TimedOut
            {
                ProbeError::Timeout(timeout)
            } else {
                ProbeError::Network(format!("failed to receive: {}", e))
            }
        })?;
        // SAFETY: recv initialized `len` bytes
        let buf: &[u8] = unsafe { std::slice::from_raw_parts(buf.as_ptr() as *const u8, len) };

        if Instant::now() >= deadline {
            return Err(ProbeError::Timeout(timeout));
        }

        // RAW IPv4 sockets hand us the IP header too; DGRAM and IPv6 do not.
        let offset = if ip.is_ipv4() && len > 20 && buf[0] >> 4 == 4 {
            20
        } else {
            0
        };
        if len >= offset + 8 {
            let id = u16::from_be_bytes([buf[offset + 4], buf[offset + 5]]);
            let seq = u16::from_be_bytes([buf[offset + 6], buf[offset + 7]]);
            if buf[offset] == reply_type && id == identifier && seq == sequence {
                return Ok(());
            }
        }
        // Someone else's packet, keep waiting.
    }
}

/// Time left until `deadline`. `None` once the deadline has passed or the
/// leftover is too small for a meaningful read timeout (a zero read timeout
/// would mean "block forever").
fn remaining_budget(deadline: Instant, now: Instant) -> Option<Duration> {
    deadline
        .checked_duration_since(now)
        .filter(|d| !d.is_zero())
}

/// Build an ICMP/ICMPv6 Echo Request (8 byte header + 56 byte payload).
/// The checksum is only filled in for ICMPv4; the kernel computes it for
/// ICMPv6 datagram sockets.
fn build_echo_request(request_type: u8, identifier: u16, sequence: u16) -> Vec<u8> {
    let mut packet = vec![0u8; 64];

    packet[0] = request_type;
    packet[1] = 0; // Code
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());

    if request_type == 8 {
        let checksum = icmp_checksum(&packet);
        packet[2..4].copy_from_slice(&checksum.to_be_bytes());
    }

    packet
}

/// Compute ICMP checksum (RFC 1071).
fn icmp_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut i = 0;

    while i < data.len() - 1 {
        sum += u16::from_be_bytes([data[i], data[i + 1]]) as u32;
        i += 2;
    }
    if i < data.len() {
        sum += (data[i] as u32) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !sum as u16
}

/// Run the platform `ping` binary and judge liveness by its exit code.
async fn run_ping_command(host: &str) -> Result<(), ProbeError> {
    let mut command = Command::new("ping");
    if cfg!(windows) {
        command.args(["-n", "1", "-w", "3000", host]);
    } else {
        command.args(["-c", "1", "-W", "3", host]);
    }

    let status = command
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status()
        .await
        .map_err(|e| ProbeError::Command(format!("failed to execute ping: {}", e)))?;

    if status.success() {
        Ok(())
    } else {
        Err(ProbeError::Command(format!("ping exited with {}", status)))
    }
}
