//! Web server module.
//!
//! JSON API consumed by the presentation layer.

mod handlers;

pub use handlers::*;

use crate::config::MonitorConfig;
use crate::geo::AddressLocator;
use crate::history::LatencyHistoryStore;
use crate::probe::{DnsProbe, HttpProbe, PortProbe};
use crate::trace::PathTracer;

use axum::{
    routing::{get, put},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<MonitorConfig>,
    pub store: LatencyHistoryStore,
    pub locator: Arc<AddressLocator>,
    pub tracer: Arc<PathTracer>,
    pub port_probe: PortProbe,
    pub http_probe: HttpProbe,
    pub dns_probe: DnsProbe,
}

/// Web server for NetGuardian.
pub struct Server {
    state: AppState,
}

impl Server {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Build the router with all routes.
    pub fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        Router::new()
            // Monitoring
            .route("/api/targets", get(handlers::handle_get_targets))
            .route("/api/history", get(handlers::handle_get_history))
            .route("/api/history/capacity", put(handlers::handle_resize_history))
            .route("/api/latest", get(handlers::handle_get_latest))
            // Diagnostics
            .route("/api/trace", get(handlers::handle_trace))
            .route("/api/port", get(handlers::handle_port))
            .route("/api/http", get(handlers::handle_http))
            .route("/api/dns", get(handlers::handle_dns))
            .route("/api/locate", get(handlers::handle_locate))
            .route("/api/identity", get(handlers::handle_identity))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Serve on the configured port until `shutdown` resolves.
    pub async fn start<F>(
        &self,
        shutdown: F,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = self.routes();

        tracing::info!("API server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}
