//! NetGuardian - network diagnostics service.

use netguardian::config::MonitorConfig;
use netguardian::geo::{AddressLocator, IpApiService};
use netguardian::history::LatencyHistoryStore;
use netguardian::probe::{DnsProbe, HttpProbe, PingRunner, PortProbe};
use netguardian::scheduler::MonitorScheduler;
use netguardian::trace::{PathTracer, SystemTraceRunner};
use netguardian::web::{AppState, Server};

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("netguardian=info".parse()?))
        .init();

    // Load configuration
    let cfg = Arc::new(MonitorConfig::load()?);
    tracing::info!("Starting NetGuardian on port {}...", cfg.http_port);
    tracing::info!(
        "Monitoring {} targets every {:?}, keeping {} points",
        cfg.targets.len(),
        cfg.interval,
        cfg.history_points
    );

    // Enrichment and diagnostics
    let geo = Arc::new(IpApiService::new(&cfg.geo_endpoint, cfg.geo_timeout)?);
    let locator = Arc::new(AddressLocator::new(geo));
    let tracer = Arc::new(PathTracer::new(Arc::new(SystemTraceRunner), locator.clone()));
    let store = LatencyHistoryStore::new(cfg.history_points);

    // Start monitor
    let scheduler = Arc::new(MonitorScheduler::new(Arc::new(PingRunner::new()), cfg.probe_timeout));
    let monitor = {
        let scheduler = scheduler.clone();
        let store = store.clone();
        let targets = cfg.targets.clone();
        let interval = cfg.interval;
        tokio::spawn(async move {
            scheduler
                .run(targets, interval, move |record| store.append(record))
                .await
        })
    };

    // Start web server
    let state = AppState {
        config: cfg.clone(),
        store,
        locator,
        tracer,
        port_probe: PortProbe::new(cfg.port_timeout),
        http_probe: HttpProbe::new(cfg.http_timeout)?,
        dns_probe: DnsProbe::new(cfg.dns_timeout),
    };
    let shutdown = {
        let token = scheduler.cancel_token();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutting down...");
            token.cancel();
        }
    };
    Server::new(state).start(shutdown).await?;

    scheduler.cancel();
    monitor.await??;
    Ok(())
}
