//! In-memory latency history.
//!
//! A bounded FIFO of per-tick records, one column per monitored target.

mod models;
mod store;

pub use models::*;
pub use store::*;
