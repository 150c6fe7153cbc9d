//! Identity of the machine running the diagnostics.

use serde::Serialize;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};

/// Public address and provider as seen by the geolocation service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublicIdentity {
    pub ip: String,
    pub isp: String,
    pub country: String,
    pub region: String,
}

/// Hostname and primary local address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalIdentity {
    pub hostname: String,
    pub ip: IpAddr,
}

impl LocalIdentity {
    /// Discover the local identity, falling back to `("Unknown", 127.0.0.1)`.
    pub fn discover() -> Self {
        let hostname = ["HOSTNAME", "COMPUTERNAME"]
            .iter()
            .find_map(|var| std::env::var(var).ok().filter(|v| !v.trim().is_empty()))
            .unwrap_or_else(|| "Unknown".to_string());

        let ip = primary_local_ip().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
        Self { hostname, ip }
    }
}

/// Address of the interface that routes to the public internet.
///
/// Connecting a UDP socket only selects a route; no packet is sent.
fn primary_local_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80)).ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_unspecified()).then_some(ip)
}
