//! History record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::probe::{ProbeOutcome, Target};

/// Latency at or above this is rated degraded.
pub const DEGRADED_LATENCY_MS: u64 = 100;

/// Rating of one target's latency in a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyStatus {
    Normal,
    Degraded,
    Timeout,
}

/// One row of the time series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub timestamp: DateTime<Utc>,
    /// Latency per target name in milliseconds; `None` serializes as null.
    pub values: BTreeMap<String, Option<u64>>,
}

impl HistoryRecord {
    /// Build a record with a key for every target, filled from `outcomes`.
    ///
    /// Targets without an outcome are recorded as `None`.
    pub fn from_outcomes(
        timestamp: DateTime<Utc>,
        targets: &[Target],
        outcomes: &[ProbeOutcome],
    ) -> Self {
        let mut values: BTreeMap<String, Option<u64>> =
            targets.iter().map(|t| (t.name.clone(), None)).collect();
        for outcome in outcomes {
            if let Some(slot) = values.get_mut(&outcome.target.name) {
                *slot = outcome.latency_ms;
            }
        }
        Self { timestamp, values }
    }

    pub fn latency(&self, target: &str) -> Option<u64> {
        self.values.get(target).copied().flatten()
    }

    /// Rate a target's latency; `None` when the target is not in this record.
    pub fn status(&self, target: &str) -> Option<LatencyStatus> {
        self.values.get(target).map(|value| match value {
            Some(ms) if *ms >= DEGRADED_LATENCY_MS => LatencyStatus::Degraded,
            Some(_) => LatencyStatus::Normal,
            None => LatencyStatus::Timeout,
        })
    }
}
