//! Probe module for network diagnostics.
//!
//! Latency probing (ping) plus one-shot point checks: TCP port, HTTP status
//! and DNS resolution.

mod dns;
mod http;
mod ping;
mod port;

pub use dns::*;
pub use http::*;
pub use ping::*;
pub use port::*;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Diagnostic error types.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DiagnosticError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("unreachable: {0}")]
    Unreachable(String),
    #[error("unrecognized tool output: {0}")]
    Parse(String),
    #[error("upstream service failure: {0}")]
    Upstream(String),
    #[error("invocation failed: {0}")]
    Invocation(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Coarse classification of a [`DiagnosticError`], carried on outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    Unreachable,
    Parse,
    Upstream,
    Invocation,
    Config,
}

impl DiagnosticError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Timeout(_) => FailureKind::Timeout,
            Self::Unreachable(_) => FailureKind::Unreachable,
            Self::Parse(_) => FailureKind::Parse,
            Self::Upstream(_) => FailureKind::Upstream,
            Self::Invocation(_) => FailureKind::Invocation,
            Self::Config(_) => FailureKind::Config,
        }
    }
}

/// A named endpoint to monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    pub address: String,
}

impl Target {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }
}

/// Result of one latency probe against a target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeOutcome {
    pub target: Target,
    /// Round-trip time in whole milliseconds, `None` when no reply was measured.
    pub latency_ms: Option<u64>,
    /// Why no reply was measured.
    pub failure: Option<FailureKind>,
    pub timestamp: DateTime<Utc>,
}

impl ProbeOutcome {
    pub fn from_result(target: Target, result: Result<u64, DiagnosticError>) -> Self {
        let (latency_ms, failure) = match result {
            Ok(ms) => (Some(ms), None),
            Err(e) => (None, Some(e.kind())),
        };
        Self {
            target,
            latency_ms,
            failure,
            timestamp: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.latency_ms.is_some()
    }
}

/// A single reachability/latency probe.
///
/// Implementations report the typed failure from [`ProbeRunner::measure`];
/// callers that only need "signal or no signal" use [`ProbeRunner::probe`].
#[async_trait]
pub trait ProbeRunner: Send + Sync {
    /// Measure round-trip latency to `address` in milliseconds.
    async fn measure(&self, address: &str, timeout: Duration) -> Result<u64, DiagnosticError>;

    /// Probe a target, collapsing every failure into an outcome without latency.
    async fn probe(&self, target: &Target, timeout: Duration) -> ProbeOutcome {
        let result = self.measure(&target.address, timeout).await;
        if let Err(e) = &result {
            tracing::debug!("Probe failed for {} ({}): {}", target.name, target.address, e);
        }
        ProbeOutcome::from_result(target.clone(), result)
    }
}

/// Convert a fractional millisecond reading into whole milliseconds.
pub(crate) fn round_millis(ms: f64) -> u64 {
    if ms.is_finite() && ms > 0.0 {
        ms.round() as u64
    } else {
        0
    }
}
