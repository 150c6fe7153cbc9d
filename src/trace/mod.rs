//! Path discovery: run a hop trace, parse it, and locate every hop.

mod command;
mod parse;

pub use command::*;
pub use parse::*;

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

use crate::geo::{AddressLocator, LocationInfo};
use crate::probe::DiagnosticError;

/// Produces raw hop-discovery output for an address.
#[async_trait]
pub trait TraceRunner: Send + Sync {
    async fn run(
        &self,
        address: &str,
        max_hops: u8,
        per_hop_timeout: Duration,
    ) -> Result<String, DiagnosticError>;
}

/// One responding router on a path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hop {
    pub index: u32,
    pub address: String,
    pub location: LocationInfo,
}

/// Responding hops in path order. Silent hops are absent.
pub type Path = Vec<Hop>;

/// Traces the route to a target and enriches each hop with its location.
pub struct PathTracer {
    runner: Arc<dyn TraceRunner>,
    locator: Arc<AddressLocator>,
}

impl PathTracer {
    pub fn new(runner: Arc<dyn TraceRunner>, locator: Arc<AddressLocator>) -> Self {
        Self { runner, locator }
    }

    /// Trace `address`. Fails only when the trace tool itself fails; lines
    /// that are not hop rows are skipped.
    pub async fn trace(
        &self,
        address: &str,
        max_hops: u8,
        per_hop_timeout: Duration,
    ) -> Result<Path, DiagnosticError> {
        let output = self.runner.run(address, max_hops, per_hop_timeout).await?;
        let raw_hops = parse_hops(&output);
        tracing::debug!("Trace to {} returned {} hops", address, raw_hops.len());

        let mut lookups = JoinSet::new();
        for (slot, hop) in raw_hops.iter().enumerate() {
            let locator = self.locator.clone();
            let ip = hop.address.to_string();
            lookups.spawn(async move { (slot, locator.locate(&ip).await) });
        }

        let mut locations = vec![LocationInfo::Unknown; raw_hops.len()];
        while let Some(joined) = lookups.join_next().await {
            match joined {
                Ok((slot, location)) => locations[slot] = location,
                Err(e) => tracing::error!("Hop location task failed: {}", e),
            }
        }

        Ok(raw_hops
            .into_iter()
            .zip(locations)
            .map(|(hop, location)| Hop {
                index: hop.index,
                address: hop.address.to_string(),
                location,
            })
            .collect())
    }
}
