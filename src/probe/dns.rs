//! DNS resolution probe using the system resolver.

use serde::Serialize;
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::time::Duration;

use super::DiagnosticError;
use crate::geo::{AddressLocator, LocationInfo};

/// A resolved address with its location.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedAddress {
    pub address: IpAddr,
    pub location: LocationInfo,
}

/// Resolves a domain to its set of addresses.
#[derive(Debug, Clone)]
pub struct DnsProbe {
    timeout: Duration,
}

impl Default for DnsProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(3))
    }
}

impl DnsProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Resolve `domain` into a deduplicated, ordered address set.
    ///
    /// Any failure, including timeout, yields an empty set.
    pub async fn resolve(&self, domain: &str) -> BTreeSet<IpAddr> {
        match self.try_resolve(domain).await {
            Ok(addrs) => addrs,
            Err(e) => {
                tracing::debug!("DNS resolution failed for {}: {}", domain, e);
                BTreeSet::new()
            }
        }
    }

    /// Resolve `domain`, reporting why resolution failed.
    pub async fn try_resolve(&self, domain: &str) -> Result<BTreeSet<IpAddr>, DiagnosticError> {
        let domain = domain.trim();
        if domain.is_empty() {
            return Err(DiagnosticError::Config("empty domain".into()));
        }

        let lookup = tokio::net::lookup_host((domain, 0));
        let addrs = tokio::time::timeout(self.timeout, lookup)
            .await
            .map_err(|_| DiagnosticError::Timeout(self.timeout))?
            .map_err(|e| DiagnosticError::Unreachable(format!("{}: {}", domain, e)))?;

        Ok(addrs.map(|sa| sa.ip()).collect())
    }

    /// Resolve `domain` and locate every resulting address.
    pub async fn resolve_and_locate(
        &self,
        domain: &str,
        locator: &AddressLocator,
    ) -> Vec<ResolvedAddress> {
        let mut resolved = Vec::new();
        for address in self.resolve(domain).await {
            let location = locator.locate(&address.to_string()).await;
            resolved.push(ResolvedAddress { address, location });
        }
        resolved
    }
}

/// Resolve a host to one address, preferring IPv4.
pub(crate) async fn resolve_preferring_ipv4(address: &str) -> Result<IpAddr, DiagnosticError> {
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(ip);
    }

    let addrs: Vec<IpAddr> = tokio::net::lookup_host((address, 0))
        .await
        .map_err(|e| {
            DiagnosticError::Unreachable(format!("DNS resolution failed for {}: {}", address, e))
        })?
        .map(|sa| sa.ip())
        .collect();

    addrs
        .iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| DiagnosticError::Unreachable(format!("no addresses found for {}", address)))
}
