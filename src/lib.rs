//! NetGuardian - network diagnostics engine.
//!
//! Periodic latency monitoring with bounded history, route tracing with hop
//! geolocation, and one-shot port, HTTP and DNS checks.

pub mod config;
pub mod geo;
pub mod history;
pub mod probe;
pub mod scheduler;
pub mod trace;
pub mod web;
