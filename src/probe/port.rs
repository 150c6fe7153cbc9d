//! TCP port liveness probe.

use serde::Serialize;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;

use super::DiagnosticError;

/// State of a TCP port as seen from here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PortState {
    Open,
    ClosedOrFiltered,
    Error,
}

impl std::fmt::Display for PortState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "Open"),
            Self::ClosedOrFiltered => write!(f, "Closed/Filtered"),
            Self::Error => write!(f, "Error"),
        }
    }
}

/// One-shot TCP connect check.
#[derive(Debug, Clone)]
pub struct PortProbe {
    timeout: Duration,
}

impl Default for PortProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

impl PortProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Attempt a TCP connection to `address:port`.
    pub async fn check(&self, address: &str, port: u16) -> PortState {
        let resolved = tokio::time::timeout(self.timeout, resolve_socket_addr(address, port))
            .await
            .unwrap_or(Err(DiagnosticError::Timeout(self.timeout)));
        let addr = match resolved {
            Ok(addr) => addr,
            Err(e) => {
                tracing::debug!("Port check on {}:{} failed: {}", address, port, e);
                return PortState::Error;
            }
        };

        match tokio::time::timeout(self.timeout, TcpStream::connect(addr)).await {
            // The stream is dropped here, closing the connection.
            Ok(Ok(_stream)) => PortState::Open,
            Ok(Err(e)) => {
                tracing::debug!("Port {} refused or filtered: {}", addr, e);
                PortState::ClosedOrFiltered
            }
            Err(_) => PortState::ClosedOrFiltered,
        }
    }
}

async fn resolve_socket_addr(address: &str, port: u16) -> Result<SocketAddr, DiagnosticError> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((address.trim(), port))
        .await
        .map_err(|e| DiagnosticError::Unreachable(format!("{}: {}", address, e)))?
        .collect();

    addrs
        .iter()
        .find(|sa| sa.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| DiagnosticError::Unreachable(format!("no addresses found for {}", address)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_open_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let probe = PortProbe::new(Duration::from_secs(1));
        assert_eq!(probe.check("127.0.0.1", port).await, PortState::Open);
    }

    #[tokio::test]
    async fn test_closed_port() {
        // Bind then drop to find a port nobody is listening on.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let probe = PortProbe::new(Duration::from_secs(1));
        assert_eq!(probe.check("127.0.0.1", port).await, PortState::ClosedOrFiltered);
    }

    #[tokio::test]
    async fn test_unresolvable_host() {
        let probe = PortProbe::new(Duration::from_secs(1));
        assert_eq!(probe.check("no-such-host.invalid", 80).await, PortState::Error);
    }

    #[test]
    fn test_display() {
        assert_eq!(PortState::ClosedOrFiltered.to_string(), "Closed/Filtered");
    }
}
