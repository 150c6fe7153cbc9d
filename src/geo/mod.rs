//! Address enrichment: coarse location and ISP for an IP address.

mod identity;
mod ipapi;

pub use identity::*;
pub use ipapi::*;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::{OnceCell, Semaphore};

use crate::probe::DiagnosticError;

/// Maximum concurrent external lookups.
pub const MAX_CONCURRENT_LOOKUPS: usize = 4;

/// Geolocation fields returned by a lookup service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoRecord {
    pub country: String,
    pub region: String,
    pub city: String,
    pub isp: String,
}

impl GeoRecord {
    /// `"{country} {region} {city} ({isp})"`
    pub fn summary(&self) -> String {
        format!("{} {} {} ({})", self.country, self.region, self.city, self.isp)
    }
}

/// A remote geolocation lookup.
#[async_trait]
pub trait GeoService: Send + Sync {
    async fn lookup(&self, address: &str) -> Result<GeoRecord, DiagnosticError>;

    /// Geolocation of the caller's own public address.
    async fn public_identity(&self) -> Result<PublicIdentity, DiagnosticError>;
}

/// Location of an address, or one of the two sentinels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocationInfo {
    Resolved(String),
    Internal,
    Unknown,
}

impl LocationInfo {
    pub fn summary(&self) -> &str {
        match self {
            Self::Resolved(s) => s,
            Self::Internal => "LAN/Internal",
            Self::Unknown => "Unknown Location",
        }
    }
}

impl std::fmt::Display for LocationInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.summary())
    }
}

impl Serialize for LocationInfo {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.summary())
    }
}

/// True for addresses that never leave the local network: RFC1918, loopback,
/// link-local, unspecified, and the `*` placeholder trace tools print.
pub fn is_internal_address(address: &str) -> bool {
    let address = address.trim();
    if address == "*" || address.eq_ignore_ascii_case("localhost") {
        return true;
    }
    match address.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => {
            v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified()
        }
        Ok(IpAddr::V6(v6)) => v6.is_loopback() || v6.is_unspecified(),
        Err(_) => false,
    }
}

/// Resolves addresses to locations through a [`GeoService`], caching every
/// successful answer for the life of the process.
///
/// Each address owns a once-cell, so concurrent callers for the same uncached
/// address share a single external lookup. Failures leave the cell empty and
/// the next caller retries.
pub struct AddressLocator {
    service: Arc<dyn GeoService>,
    cache: Mutex<HashMap<String, Arc<OnceCell<String>>>>,
    permits: Semaphore,
}

impl AddressLocator {
    pub fn new(service: Arc<dyn GeoService>) -> Self {
        Self::with_concurrency(service, MAX_CONCURRENT_LOOKUPS)
    }

    pub fn with_concurrency(service: Arc<dyn GeoService>, max_concurrent: usize) -> Self {
        Self {
            service,
            cache: Mutex::new(HashMap::new()),
            permits: Semaphore::new(max_concurrent.max(1)),
        }
    }

    /// Locate `address`. Never fails; errors become [`LocationInfo::Unknown`].
    pub async fn locate(&self, address: &str) -> LocationInfo {
        let address = address.trim();
        if is_internal_address(address) {
            return LocationInfo::Internal;
        }
        // Only literal addresses are looked up; anything else never reaches
        // the cache or the service.
        let Ok(ip) = address.parse::<IpAddr>() else {
            return LocationInfo::Unknown;
        };
        let key = ip.to_string();

        let cell = {
            let mut cache = self.cache.lock();
            cache.entry(key.clone()).or_default().clone()
        };

        match cell.get_or_try_init(|| self.fetch(&key)).await {
            Ok(summary) => LocationInfo::Resolved(summary.clone()),
            Err(e) => {
                tracing::debug!("Location lookup for {} failed: {}", key, e);
                self.evict_empty(&key, &cell);
                LocationInfo::Unknown
            }
        }
    }

    /// Drop the cell for `key` if it is still the one we used and still empty.
    fn evict_empty(&self, key: &str, cell: &Arc<OnceCell<String>>) {
        let mut cache = self.cache.lock();
        if let Some(current) = cache.get(key) {
            if Arc::ptr_eq(current, cell) && !current.initialized() {
                cache.remove(key);
            }
        }
    }

    /// Public identity of this host, `None` when the service is unavailable.
    pub async fn public_identity(&self) -> Option<PublicIdentity> {
        match self.service.public_identity().await {
            Ok(identity) => Some(identity),
            Err(e) => {
                tracing::warn!("Public identity lookup failed: {}", e);
                None
            }
        }
    }

    /// Number of addresses with a cached location.
    pub fn cached_count(&self) -> usize {
        self.cache.lock().values().filter(|c| c.initialized()).count()
    }

    async fn fetch(&self, address: &str) -> Result<String, DiagnosticError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| DiagnosticError::Upstream(e.to_string()))?;
        let record = self.service.lookup(address).await?;
        Ok(record.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Counts lookups; fails the first `fail_first` calls.
    struct CountingService {
        calls: AtomicUsize,
        fail_first: usize,
        delay: Duration,
    }

    impl CountingService {
        fn new(fail_first: usize, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail_first,
                delay,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl GeoService for CountingService {
        async fn lookup(&self, address: &str) -> Result<GeoRecord, DiagnosticError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if n < self.fail_first {
                return Err(DiagnosticError::Upstream("service down".into()));
            }
            Ok(GeoRecord {
                country: "Country".into(),
                region: "Region".into(),
                city: format!("City-{}", address),
                isp: "ISP".into(),
            })
        }

        async fn public_identity(&self) -> Result<PublicIdentity, DiagnosticError> {
            Err(DiagnosticError::Upstream("not supported".into()))
        }
    }

    #[test]
    fn test_internal_addresses() {
        let internal = [
            "*",
            "127.0.0.1",
            "10.1.2.3",
            "172.16.0.1",
            "192.168.1.1",
            "169.254.10.1",
            "0.0.0.0",
            "::1",
        ];
        for addr in internal {
            assert!(is_internal_address(addr), "{} should be internal", addr);
        }
        for addr in ["8.8.8.8", "172.32.0.1", "1.1.1.1", "example.com"] {
            assert!(!is_internal_address(addr), "{} should be external", addr);
        }
    }

    #[tokio::test]
    async fn test_internal_addresses_skip_service() {
        let service = CountingService::new(0, Duration::ZERO);
        let locator = AddressLocator::new(service.clone());

        for addr in ["*", "127.0.0.1", "10.0.0.1", "192.168.1.1"] {
            assert_eq!(locator.locate(addr).await, LocationInfo::Internal);
        }
        assert_eq!(service.calls(), 0);
        assert_eq!(LocationInfo::Internal.summary(), "LAN/Internal");
    }

    #[tokio::test]
    async fn test_cache_hit() {
        let service = CountingService::new(0, Duration::ZERO);
        let locator = AddressLocator::new(service.clone());

        let first = locator.locate("8.8.8.8").await;
        let second = locator.locate("8.8.8.8").await;
        assert_eq!(first, second);
        assert_eq!(first.summary(), "Country Region City-8.8.8.8 (ISP)");
        assert_eq!(service.calls(), 1);
        assert_eq!(locator.cached_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_lookups_share_one_call() {
        let service = CountingService::new(0, Duration::from_millis(50));
        let locator = Arc::new(AddressLocator::new(service.clone()));

        let a = tokio::spawn({
            let locator = locator.clone();
            async move { locator.locate("1.1.1.1").await }
        });
        let b = tokio::spawn({
            let locator = locator.clone();
            async move { locator.locate("1.1.1.1").await }
        });

        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        assert_eq!(a, b);
        assert!(matches!(a, LocationInfo::Resolved(_)));
        assert_eq!(service.calls(), 1);
    }

    #[tokio::test]
    async fn test_failure_not_cached() {
        let service = CountingService::new(1, Duration::ZERO);
        let locator = AddressLocator::new(service.clone());

        assert_eq!(locator.locate("9.9.9.9").await, LocationInfo::Unknown);
        assert_eq!(locator.cached_count(), 0);

        let retry = locator.locate("9.9.9.9").await;
        assert!(matches!(retry, LocationInfo::Resolved(_)));
        assert_eq!(service.calls(), 2);
    }

    #[tokio::test]
    async fn test_failed_lookups_leave_no_entries() {
        let service = CountingService::new(usize::MAX, Duration::ZERO);
        let locator = AddressLocator::new(service.clone());

        for i in 0..50 {
            let addr = format!("203.0.113.{}", i);
            assert_eq!(locator.locate(&addr).await, LocationInfo::Unknown);
        }
        assert_eq!(service.calls(), 50);
        assert!(locator.cache.lock().is_empty());
    }

    #[tokio::test]
    async fn test_non_address_input_skips_service() {
        let service = CountingService::new(0, Duration::ZERO);
        let locator = AddressLocator::new(service.clone());

        for i in 0..20 {
            let input = format!("not-an-ip-{}/../x?y", i);
            assert_eq!(locator.locate(&input).await, LocationInfo::Unknown);
        }
        assert_eq!(locator.locate("").await, LocationInfo::Unknown);
        assert_eq!(locator.locate("example.com").await, LocationInfo::Unknown);
        assert_eq!(service.calls(), 0);
        assert!(locator.cache.lock().is_empty());
    }

    #[tokio::test]
    async fn test_public_identity_unavailable() {
        let locator = AddressLocator::new(CountingService::new(0, Duration::ZERO));
        assert!(locator.public_identity().await.is_none());
    }

    #[test]
    fn test_location_serializes_as_summary() {
        let json = serde_json::to_string(&LocationInfo::Unknown).unwrap();
        assert_eq!(json, "\"Unknown Location\"");
    }
}
