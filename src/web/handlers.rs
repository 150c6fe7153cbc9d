//! HTTP request handlers.

use super::AppState;
use crate::config::HISTORY_POINTS_RANGE;
use crate::geo::{LocalIdentity, LocationInfo, PublicIdentity};
use crate::probe::{PortState, ResolvedAddress};
use crate::trace::Hop;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};

// ============================================================================
// Monitoring
// ============================================================================

pub async fn handle_get_targets(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.config.targets.clone())
}

pub async fn handle_get_history(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.store.snapshot())
}

pub async fn handle_get_latest(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.latest() {
        Some(record) => Json(record).into_response(),
        None => (StatusCode::NOT_FOUND, "No samples yet").into_response(),
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CapacityRequest {
    pub max_points: usize,
}

pub async fn handle_resize_history(
    State(state): State<AppState>,
    Json(req): Json<CapacityRequest>,
) -> impl IntoResponse {
    let (min, max) = HISTORY_POINTS_RANGE;
    if !(min..=max).contains(&req.max_points) {
        return (
            StatusCode::BAD_REQUEST,
            format!("max_points must be between {} and {}", min, max),
        )
            .into_response();
    }

    state.store.resize(req.max_points);
    tracing::info!("History capacity set to {}", req.max_points);
    Json(CapacityRequest {
        max_points: state.store.capacity(),
    })
    .into_response()
}

// ============================================================================
// Diagnostics
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct TraceQuery {
    /// Configured target name, or a raw host/address.
    pub target: String,
}

#[derive(Debug, Serialize)]
pub struct TraceResponse {
    pub address: String,
    pub hops: Vec<Hop>,
}

pub async fn handle_trace(
    State(state): State<AppState>,
    Query(query): Query<TraceQuery>,
) -> impl IntoResponse {
    let address = state
        .config
        .target(&query.target)
        .map(|t| t.address.clone())
        .unwrap_or_else(|| query.target.trim().to_string());
    if address.is_empty() {
        return (StatusCode::BAD_REQUEST, "Missing target").into_response();
    }

    match state
        .tracer
        .trace(&address, state.config.trace_max_hops, state.config.trace_hop_timeout)
        .await
    {
        Ok(hops) => Json(TraceResponse { address, hops }).into_response(),
        Err(e) => {
            tracing::error!("Trace to {} failed: {}", address, e);
            (StatusCode::BAD_GATEWAY, format!("Diagnostics Failed: {}", e)).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PortQuery {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Serialize)]
pub struct PortResponse {
    pub host: String,
    pub port: u16,
    pub state: PortState,
}

pub async fn handle_port(
    State(state): State<AppState>,
    Query(query): Query<PortQuery>,
) -> impl IntoResponse {
    let result = state.port_probe.check(&query.host, query.port).await;
    Json(PortResponse {
        host: query.host,
        port: query.port,
        state: result,
    })
}

#[derive(Debug, Deserialize)]
pub struct HttpQuery {
    pub url: String,
}

pub async fn handle_http(
    State(state): State<AppState>,
    Query(query): Query<HttpQuery>,
) -> impl IntoResponse {
    Json(state.http_probe.check(&query.url).await)
}

#[derive(Debug, Deserialize)]
pub struct DnsQuery {
    pub domain: String,
}

#[derive(Debug, Serialize)]
pub struct DnsResponse {
    pub domain: String,
    pub addresses: Vec<ResolvedAddress>,
}

pub async fn handle_dns(
    State(state): State<AppState>,
    Query(query): Query<DnsQuery>,
) -> impl IntoResponse {
    let addresses = state
        .dns_probe
        .resolve_and_locate(&query.domain, &state.locator)
        .await;
    Json(DnsResponse {
        domain: query.domain,
        addresses,
    })
}

#[derive(Debug, Deserialize)]
pub struct LocateQuery {
    pub ip: String,
}

#[derive(Debug, Serialize)]
pub struct LocateResponse {
    pub ip: String,
    pub location: LocationInfo,
}

pub async fn handle_locate(
    State(state): State<AppState>,
    Query(query): Query<LocateQuery>,
) -> impl IntoResponse {
    let location = state.locator.locate(&query.ip).await;
    Json(LocateResponse {
        ip: query.ip,
        location,
    })
}

#[derive(Debug, Serialize)]
pub struct IdentityResponse {
    pub public: Option<PublicIdentity>,
    pub local: LocalIdentity,
}

pub async fn handle_identity(State(state): State<AppState>) -> impl IntoResponse {
    let public = state.locator.public_identity().await;
    let local = tokio::task::spawn_blocking(LocalIdentity::discover)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Local identity task failed: {}", e);
            LocalIdentity {
                hostname: "Unknown".to_string(),
                ip: std::net::Ipv4Addr::LOCALHOST.into(),
            }
        });
    Json(IdentityResponse { public, local })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorConfig;
    use crate::geo::{AddressLocator, GeoRecord, GeoService};
    use crate::history::{HistoryRecord, LatencyHistoryStore};
    use crate::probe::{DiagnosticError, DnsProbe, HttpProbe, PortProbe};
    use crate::trace::{PathTracer, TraceRunner};
    use async_trait::async_trait;
    use axum::response::Response;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    struct Offline;

    #[async_trait]
    impl GeoService for Offline {
        async fn lookup(&self, _address: &str) -> Result<GeoRecord, DiagnosticError> {
            Err(DiagnosticError::Upstream("offline".into()))
        }

        async fn public_identity(&self) -> Result<PublicIdentity, DiagnosticError> {
            Err(DiagnosticError::Upstream("offline".into()))
        }
    }

    #[async_trait]
    impl TraceRunner for Offline {
        async fn run(
            &self,
            _address: &str,
            _max_hops: u8,
            _timeout: Duration,
        ) -> Result<String, DiagnosticError> {
            Err(DiagnosticError::Invocation("traceroute: command not found".into()))
        }
    }

    fn state() -> AppState {
        let locator = Arc::new(AddressLocator::new(Arc::new(Offline)));
        AppState {
            config: Arc::new(MonitorConfig::default()),
            store: LatencyHistoryStore::new(10),
            tracer: Arc::new(PathTracer::new(Arc::new(Offline), locator.clone())),
            locator,
            port_probe: PortProbe::default(),
            http_probe: HttpProbe::new(Duration::from_secs(1)).unwrap(),
            dns_probe: DnsProbe::default(),
        }
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_latest_empty_is_not_found() {
        let response = handle_get_latest(State(state())).await.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_history_snapshot() {
        let state = state();
        let mut values = BTreeMap::new();
        values.insert("Gateway".to_string(), None);
        state.store.append(HistoryRecord {
            timestamp: Utc::now(),
            values,
        });

        let response = handle_get_history(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json[0]["values"]["Gateway"], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn test_resize_history_bounds() {
        let state = state();
        let request = Json(CapacityRequest { max_points: 5 });
        let rejected = handle_resize_history(State(state.clone()), request)
            .await
            .into_response();
        assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);

        let request = Json(CapacityRequest { max_points: 50 });
        let accepted = handle_resize_history(State(state.clone()), request)
            .await
            .into_response();
        assert_eq!(accepted.status(), StatusCode::OK);
        assert_eq!(state.store.capacity(), 50);

        let (min, max) = HISTORY_POINTS_RANGE;
        for (points, status) in [
            (min, StatusCode::OK),
            (max, StatusCode::OK),
            (max + 1, StatusCode::BAD_REQUEST),
        ] {
            let request = Json(CapacityRequest { max_points: points });
            let response = handle_resize_history(State(state.clone()), request)
                .await
                .into_response();
            assert_eq!(response.status(), status, "max_points = {}", points);
        }
        assert_eq!(state.store.capacity(), max);
    }

    #[tokio::test]
    async fn test_trace_failure_is_bad_gateway() {
        let query = TraceQuery {
            target: "Gateway".to_string(),
        };
        let response = handle_trace(State(state()), Query(query)).await.into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_locate_internal() {
        let query = LocateQuery {
            ip: "192.168.1.1".to_string(),
        };
        let response = handle_locate(State(state()), Query(query)).await.into_response();
        let json = body_json(response).await;
        assert_eq!(json["location"], "LAN/Internal");
    }
}
