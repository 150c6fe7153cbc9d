//! ip-api.com compatible geolocation client.

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use super::{GeoRecord, GeoService, PublicIdentity};
use crate::probe::DiagnosticError;

/// Upper bound on how long a single lookup may block a caller.
pub const MAX_LOOKUP_TIMEOUT: Duration = Duration::from_secs(3);

/// Wait applied after a 429 that carries no reset hint.
const DEFAULT_BACKOFF: Duration = Duration::from_secs(60);

/// Response body of the lookup endpoint.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct IpApiResponse {
    status: String,
    message: Option<String>,
    country: String,
    region_name: String,
    city: String,
    isp: String,
    query: String,
}

impl IpApiResponse {
    fn ensure_success(&self) -> Result<(), DiagnosticError> {
        if self.status == "success" {
            Ok(())
        } else {
            Err(DiagnosticError::Upstream(format!(
                "lookup status '{}': {}",
                self.status,
                self.message.as_deref().unwrap_or("no message")
            )))
        }
    }

    fn into_record(self) -> Result<GeoRecord, DiagnosticError> {
        self.ensure_success()?;
        Ok(GeoRecord {
            country: self.country,
            region: self.region_name,
            city: self.city,
            isp: self.isp,
        })
    }

    fn into_identity(self) -> Result<PublicIdentity, DiagnosticError> {
        self.ensure_success()?;
        Ok(PublicIdentity {
            ip: self.query,
            isp: self.isp,
            country: self.country,
            region: self.region_name,
        })
    }
}

/// Client for an ip-api.com style endpoint (`<endpoint>/<address>?lang=en`).
///
/// Honors the service's quota headers: once `X-Rl` reaches zero (or a 429 is
/// returned) lookups fail fast until the `X-Ttl` window has passed.
pub struct IpApiService {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
    blocked_until: Mutex<Option<Instant>>,
}

impl IpApiService {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, DiagnosticError> {
        let timeout = timeout.min(MAX_LOOKUP_TIMEOUT);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DiagnosticError::Config(format!("geolocation client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            timeout,
            blocked_until: Mutex::new(None),
        })
    }

    fn check_quota(&self) -> Result<(), DiagnosticError> {
        let mut blocked = self.blocked_until.lock();
        match *blocked {
            Some(until) if Instant::now() < until => Err(DiagnosticError::Upstream(
                "request quota exhausted".into(),
            )),
            Some(_) => {
                *blocked = None;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn record_quota(&self, status: reqwest::StatusCode, headers: &HeaderMap) {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
        };

        let exhausted =
            status == reqwest::StatusCode::TOO_MANY_REQUESTS || header("X-Rl") == Some(0);
        if exhausted {
            let wait = header("X-Ttl")
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_BACKOFF);
            tracing::warn!("Geolocation quota exhausted, pausing lookups for {:?}", wait);
            *self.blocked_until.lock() = Some(Instant::now() + wait);
        }
    }

    async fn fetch(&self, url: &str) -> Result<IpApiResponse, DiagnosticError> {
        self.check_quota()?;

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                DiagnosticError::Timeout(self.timeout)
            } else {
                DiagnosticError::Upstream(e.to_string())
            }
        })?;

        self.record_quota(response.status(), response.headers());
        if !response.status().is_success() {
            return Err(DiagnosticError::Upstream(format!(
                "lookup returned HTTP {}",
                response.status()
            )));
        }

        response
            .json::<IpApiResponse>()
            .await
            .map_err(|e| DiagnosticError::Upstream(format!("malformed lookup response: {}", e)))
    }
}

#[async_trait]
impl GeoService for IpApiService {
    async fn lookup(&self, address: &str) -> Result<GeoRecord, DiagnosticError> {
        let ip: IpAddr = address
            .trim()
            .parse()
            .map_err(|_| DiagnosticError::Config(format!("'{}' is not an IP address", address)))?;
        let url = format!("{}/{}?lang=en", self.endpoint, ip);
        self.fetch(&url).await?.into_record()
    }

    async fn public_identity(&self) -> Result<PublicIdentity, DiagnosticError> {
        let url = format!("{}/?lang=en", self.endpoint);
        self.fetch(&url).await?.into_identity()
    }
}
