//! Ping probe with native ICMP and a system `ping` fallback.
//!
//! Native echo runs on blocking sockets inside `spawn_blocking`. When the
//! process may not open ICMP sockets the system tool is invoked and its output
//! is matched against a set of locale-independent patterns.

use std::io::Read;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::process::Stdio;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::process::Command;

use super::dns::resolve_preferring_ipv4;
use super::{round_millis, DiagnosticError, ProbeRunner};

/// Which kind of ICMP socket this process may open.
#[derive(Debug, Clone, Copy, PartialEq)]
enum IcmpCapability {
    Raw,
    Datagram,
    CommandOnly,
}

static ICMP_CAPABILITY: OnceLock<IcmpCapability> = OnceLock::new();

static ECHO_SEQUENCE: AtomicU16 = AtomicU16::new(0);

fn detect_icmp_capability() -> IcmpCapability {
    if Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("Ping probe: using native ICMP (RAW socket)");
        return IcmpCapability::Raw;
    }
    if Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("Ping probe: using native ICMP (DGRAM socket)");
        return IcmpCapability::Datagram;
    }
    tracing::info!("Ping probe: native ICMP unavailable, using system ping");
    IcmpCapability::CommandOnly
}

/// Latency probe backed by ICMP echo.
#[derive(Debug, Clone, Copy, Default)]
pub struct PingRunner;

impl PingRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProbeRunner for PingRunner {
    async fn measure(&self, address: &str, timeout: Duration) -> Result<u64, DiagnosticError> {
        let capability = *ICMP_CAPABILITY.get_or_init(detect_icmp_capability);
        if capability == IcmpCapability::CommandOnly {
            return run_ping_command(address, timeout).await;
        }

        let ip = match resolve_preferring_ipv4(address).await? {
            IpAddr::V4(v4) => v4,
            // Native echo is IPv4 only; let the system tool deal with v6.
            IpAddr::V6(_) => return run_ping_command(address, timeout).await,
        };

        let raw = capability == IcmpCapability::Raw;
        let result = tokio::task::spawn_blocking(move || echo_v4(ip, raw, timeout))
            .await
            .map_err(|e| DiagnosticError::Invocation(format!("ping task failed: {}", e)))?;

        match result {
            Err(DiagnosticError::Invocation(reason)) => {
                tracing::warn!(
                    "Native ping to {} failed ({}), falling back to system ping",
                    address,
                    reason
                );
                run_ping_command(address, timeout).await
            }
            other => other,
        }
    }
}

fn next_sequence() -> u16 {
    ECHO_SEQUENCE.fetch_add(1, Ordering::Relaxed)
}

/// Send one ICMPv4 echo request and wait for the matching reply.
fn echo_v4(ip: Ipv4Addr, raw: bool, timeout: Duration) -> Result<u64, DiagnosticError> {
    let socket_type = if raw { Type::RAW } else { Type::DGRAM };
    let mut socket = Socket::new(Domain::IPV4, socket_type, Some(Protocol::ICMPV4))
        .map_err(|e| DiagnosticError::Invocation(format!("icmp socket: {}", e)))?;
    socket
        .set_write_timeout(Some(timeout))
        .map_err(|e| DiagnosticError::Invocation(format!("set timeout: {}", e)))?;
    socket
        .connect(&SocketAddr::new(IpAddr::V4(ip), 0).into())
        .map_err(|e| DiagnosticError::Unreachable(format!("{}: {}", ip, e)))?;

    let identifier: u16 = rand::random();
    let sequence = next_sequence();
    let request = build_echo_request(identifier, sequence);

    let start = Instant::now();
    socket.send(&request).map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => {
            DiagnosticError::Invocation(format!("permission denied: {}", e))
        }
        _ => DiagnosticError::Unreachable(format!("{}: {}", ip, e)),
    })?;

    let mut buf = [0u8; 1500];
    loop {
        let remaining = timeout
            .checked_sub(start.elapsed())
            .filter(|d| !d.is_zero())
            .ok_or(DiagnosticError::Timeout(timeout))?;
        socket
            .set_read_timeout(Some(remaining))
            .map_err(|e| DiagnosticError::Invocation(format!("set timeout: {}", e)))?;

        let len = socket.read(&mut buf).map_err(|e| match e.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => {
                DiagnosticError::Timeout(timeout)
            }
            _ => DiagnosticError::Unreachable(format!("{}: {}", ip, e)),
        })?;
        let elapsed = start.elapsed();

        // Datagram ICMP sockets rewrite the identifier and filter replies in
        // the kernel, so only raw sockets need the identifier match.
        let expected_id = raw.then_some(identifier);
        if is_echo_reply(&buf[..len], expected_id, sequence) {
            return Ok(round_millis(elapsed.as_secs_f64() * 1000.0));
        }
    }
}

/// Check whether a received datagram is the reply to our echo request.
fn is_echo_reply(packet: &[u8], identifier: Option<u16>, sequence: u16) -> bool {
    // Raw sockets deliver the IPv4 header in front of the ICMP message.
    let offset = if packet.first().map(|b| b >> 4) == Some(4) {
        usize::from(packet[0] & 0x0F) * 4
    } else {
        0
    };
    let Some(icmp) = packet.get(offset..offset + 8) else {
        return false;
    };
    let reply_id = u16::from_be_bytes([icmp[4], icmp[5]]);
    let reply_seq = u16::from_be_bytes([icmp[6], icmp[7]]);
    icmp[0] == 0 && reply_seq == sequence && identifier.map_or(true, |id| id == reply_id)
}

/// Build an ICMP echo request (type 8) with a 32 byte payload.
fn build_echo_request(identifier: u16, sequence: u16) -> Vec<u8> {
    let mut packet = vec![0u8; 40];
    packet[0] = 8;
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());
    for (i, byte) in packet[8..].iter_mut().enumerate() {
        *byte = b'a' + (i % 23) as u8;
    }
    let checksum = internet_checksum(&packet);
    packet[2..4].copy_from_slice(&checksum.to_be_bytes());
    packet
}

/// RFC 1071 checksum.
fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = data
        .chunks(2)
        .map(|pair| match pair {
            [hi, lo] => u32::from(u16::from_be_bytes([*hi, *lo])),
            [hi] => u32::from(*hi) << 8,
            _ => 0,
        })
        .sum();
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// How the local `ping` expresses its reply wait.
#[derive(Debug, Clone, Copy, PartialEq)]
enum PingFlavor {
    /// `ping -n 1 -w <ms>`
    Windows,
    /// macOS and FreeBSD: `ping -c 1 -W <ms>`
    Bsd,
    /// iputils and busybox: `ping -c 1 -W <secs>`
    Linux,
}

impl PingFlavor {
    fn current() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else if cfg!(any(target_os = "macos", target_os = "ios", target_os = "freebsd")) {
            Self::Bsd
        } else {
            Self::Linux
        }
    }
}

fn ping_command_args(flavor: PingFlavor, address: &str, timeout: Duration) -> Vec<String> {
    let millis = timeout.as_millis().max(1);
    let (count_flag, wait_flag, wait) = match flavor {
        PingFlavor::Windows => ("-n", "-w", millis.to_string()),
        PingFlavor::Bsd => ("-c", "-W", millis.to_string()),
        // Whole seconds only; round up so the wait is never shorter.
        PingFlavor::Linux => ("-c", "-W", millis.div_ceil(1000).to_string()),
    };
    vec![
        count_flag.into(),
        "1".into(),
        wait_flag.into(),
        wait,
        address.into(),
    ]
}

/// Run the system ping tool once.
async fn run_ping_command(address: &str, timeout: Duration) -> Result<u64, DiagnosticError> {
    let child = Command::new("ping")
        .args(ping_command_args(PingFlavor::current(), address, timeout))
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    // The tool rounds its wait up to whole seconds on Unix.
    let grace = timeout + Duration::from_secs(1);
    let output = tokio::time::timeout(grace, child)
        .await
        .map_err(|_| DiagnosticError::Timeout(timeout))?
        .map_err(|e| DiagnosticError::Invocation(format!("failed to execute ping: {}", e)))?;

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));

    if !output.status.success() {
        // Exit code 1 is "no reply" for both iputils and BSD ping; anything
        // else is an error such as an unknown host.
        return match output.status.code() {
            Some(1) => Err(DiagnosticError::Timeout(timeout)),
            _ => Err(DiagnosticError::Unreachable(text.trim().to_string())),
        };
    }

    parse_ping_output(&text)
}

/// Ordered latency patterns. The first match wins.
fn latency_patterns() -> &'static [(Regex, usize)] {
    static PATTERNS: OnceLock<Vec<(Regex, usize)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // "time=12.3 ms", "time<1ms"
            (r"time[=<]\s*([0-9]+(?:[.,][0-9]+)?)\s*ms", 1),
            // Localized wording: "时间=12ms", "Zeit=12ms", "temps=12 ms"
            (r"[=<]\s*([0-9]+(?:[.,][0-9]+)?)\s*ms", 1),
            // Linux summary, average column
            (r"rtt\s+min/avg/max/mdev\s*=\s*([0-9.]+)/([0-9.]+)/([0-9.]+)", 2),
            // BSD/macOS summary, average column
            (r"round-trip\s+min/avg/max/(?:std-?dev)\s*=\s*([0-9.]+)/([0-9.]+)/([0-9.]+)", 2),
        ]
        .into_iter()
        .map(|(pattern, group)| (Regex::new(pattern).expect("valid latency pattern"), group))
        .collect()
    })
}

/// Extract the round-trip time in milliseconds from ping output.
pub fn parse_ping_output(output: &str) -> Result<u64, DiagnosticError> {
    latency_patterns()
        .iter()
        .find_map(|(re, group)| {
            let caps = re.captures(output)?;
            caps.get(*group)?
                .as_str()
                .replace(',', ".")
                .parse::<f64>()
                .ok()
        })
        .map(round_millis)
        .ok_or_else(|| {
            DiagnosticError::Parse(output.lines().next().unwrap_or_default().to_string())
        })
}
