//! Configuration module for NetGuardian.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::collections::HashSet;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::probe::Target;

/// Configuration error types.
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{var}: cannot parse '{value}'")]
    Parse { var: &'static str, value: String },
    #[error("invalid target list: {0}")]
    Targets(String),
    #[error("{0}")]
    Invalid(String),
}

/// Default monitored targets.
pub const DEFAULT_TARGETS: &[(&str, &str)] = &[
    ("Baidu", "www.baidu.com"),
    ("Bilibili", "www.bilibili.com"),
    ("GitHub", "www.github.com"),
    ("Steam", "store.steampowered.com"),
    ("Gateway", "192.168.1.1"),
];

const INTERVAL_SECS_RANGE: (u64, u64) = (1, 10);
/// Accepted range for the history capacity.
pub const HISTORY_POINTS_RANGE: (usize, usize) = (10, 100);

/// Monitor and service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// HTTP port for the API server (default: 8080)
    pub http_port: u16,
    /// Monitored targets (default: [`DEFAULT_TARGETS`])
    pub targets: Vec<Target>,
    /// Tick interval, 1-10s (default: 2s)
    pub interval: Duration,
    /// History capacity, 10-100 records (default: 30)
    pub history_points: usize,
    /// Per-ping timeout (default: 800ms)
    pub probe_timeout: Duration,
    /// Hop bound for route traces (default: 15)
    pub trace_max_hops: u8,
    /// Per-hop wait for route traces (default: 500ms)
    pub trace_hop_timeout: Duration,
    /// TCP connect timeout for port checks (default: 2s)
    pub port_timeout: Duration,
    /// Request timeout for HTTP checks (default: 3s)
    pub http_timeout: Duration,
    /// Resolution timeout for DNS checks (default: 3s)
    pub dns_timeout: Duration,
    /// Geolocation lookup endpoint (default: "http://ip-api.com/json")
    pub geo_endpoint: String,
    /// Geolocation timeout, at most 3s (default: 2s)
    pub geo_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            targets: DEFAULT_TARGETS
                .iter()
                .map(|(name, address)| Target::new(*name, *address))
                .collect(),
            interval: Duration::from_secs(2),
            history_points: 30,
            probe_timeout: Duration::from_millis(800),
            trace_max_hops: 15,
            trace_hop_timeout: Duration::from_millis(500),
            port_timeout: Duration::from_secs(2),
            http_timeout: Duration::from_secs(3),
            dns_timeout: Duration::from_secs(3),
            geo_endpoint: "http://ip-api.com/json".to_string(),
            geo_timeout: Duration::from_secs(2),
        }
    }
}

impl MonitorConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `NETGUARDIAN_HTTP_PORT`: API port (default: 8080)
    /// - `NETGUARDIAN_TARGETS`: `Name=address,...` (default: built-in set)
    /// - `NETGUARDIAN_INTERVAL_SECS`: tick interval, clamped to 1-10 (default: 2)
    /// - `NETGUARDIAN_HISTORY_POINTS`: history size, clamped to 10-100 (default: 30)
    /// - `NETGUARDIAN_PROBE_TIMEOUT_MS`: ping timeout (default: 800)
    /// - `NETGUARDIAN_TRACE_MAX_HOPS`: trace hop bound (default: 15)
    /// - `NETGUARDIAN_TRACE_HOP_TIMEOUT_MS`: per-hop wait (default: 500)
    /// - `NETGUARDIAN_PORT_TIMEOUT_MS`: port check timeout (default: 2000)
    /// - `NETGUARDIAN_HTTP_TIMEOUT_MS`: HTTP check timeout (default: 3000)
    /// - `NETGUARDIAN_DNS_TIMEOUT_MS`: DNS check timeout (default: 3000)
    /// - `NETGUARDIAN_GEO_ENDPOINT`: geolocation endpoint
    /// - `NETGUARDIAN_GEO_TIMEOUT_MS`: geolocation timeout, at most 3000 (default: 2000)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(|var| env::var(var).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn load_from<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(port) = parse_var(&lookup, "NETGUARDIAN_HTTP_PORT")? {
            cfg.http_port = port;
        }
        if let Some(list) = lookup("NETGUARDIAN_TARGETS") {
            cfg.targets = parse_targets(&list)?;
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "NETGUARDIAN_INTERVAL_SECS")? {
            let (min, max) = INTERVAL_SECS_RANGE;
            cfg.interval = Duration::from_secs(secs.clamp(min, max));
        }
        if let Some(points) = parse_var::<usize, _>(&lookup, "NETGUARDIAN_HISTORY_POINTS")? {
            cfg.history_points = points.clamp(HISTORY_POINTS_RANGE.0, HISTORY_POINTS_RANGE.1);
        }
        if let Some(ms) = parse_var(&lookup, "NETGUARDIAN_PROBE_TIMEOUT_MS")? {
            cfg.probe_timeout = Duration::from_millis(ms);
        }
        if let Some(hops) = parse_var(&lookup, "NETGUARDIAN_TRACE_MAX_HOPS")? {
            cfg.trace_max_hops = hops;
        }
        if let Some(ms) = parse_var(&lookup, "NETGUARDIAN_TRACE_HOP_TIMEOUT_MS")? {
            cfg.trace_hop_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var(&lookup, "NETGUARDIAN_PORT_TIMEOUT_MS")? {
            cfg.port_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var(&lookup, "NETGUARDIAN_HTTP_TIMEOUT_MS")? {
            cfg.http_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var(&lookup, "NETGUARDIAN_DNS_TIMEOUT_MS")? {
            cfg.dns_timeout = Duration::from_millis(ms);
        }
        if let Some(endpoint) = lookup("NETGUARDIAN_GEO_ENDPOINT") {
            cfg.geo_endpoint = endpoint.trim().to_string();
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "NETGUARDIAN_GEO_TIMEOUT_MS")? {
            cfg.geo_timeout = Duration::from_millis(ms.min(3000));
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.probe_timeout.is_zero() || self.probe_timeout >= self.interval {
            return Err(ConfigError::Invalid(format!(
                "probe timeout {:?} must be positive and shorter than the interval {:?}",
                self.probe_timeout, self.interval
            )));
        }
        if self.trace_max_hops == 0 {
            return Err(ConfigError::Invalid("trace max hops must be at least 1".into()));
        }
        if self.geo_endpoint.is_empty() {
            return Err(ConfigError::Invalid("geolocation endpoint is empty".into()));
        }
        Ok(())
    }

    /// Find a configured target by name.
    pub fn target(&self, name: &str) -> Option<&Target> {
        self.targets.iter().find(|t| t.name == name)
    }
}

fn parse_var<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Parse { var, value }),
    }
}

/// Parse `Name=address,Name2=address2`.
pub fn parse_targets(list: &str) -> Result<Vec<Target>, ConfigError> {
    let mut seen = HashSet::new();
    let mut targets = Vec::new();

    for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (name, address) = entry
            .split_once('=')
            .ok_or_else(|| ConfigError::Targets(format!("'{}' is not Name=address", entry)))?;
        let (name, address) = (name.trim(), address.trim());
        if name.is_empty() || address.is_empty() {
            return Err(ConfigError::Targets(format!("'{}' has an empty name or address", entry)));
        }
        if !seen.insert(name.to_string()) {
            return Err(ConfigError::Targets(format!("duplicate target name '{}'", name)));
        }
        targets.push(Target::new(name, address));
    }

    if targets.is_empty() {
        return Err(ConfigError::Targets("no targets given".into()));
    }
    Ok(targets)
}
