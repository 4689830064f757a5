use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cadence {
    Normal,
    Fast,
}

/// Outcome of one probe as seen right after it was rescheduled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeReport {
    pub ts: DateTime<Utc>,
    pub seq: u64,
    pub latency_ms: Option<u64>,
    pub avg_ms: f64,
    pub latest_ms: u64,
    pub samples: usize,
    pub cadence: Cadence,
    pub next_interval_ms: u128,
    pub failures: Vec<String>,
    pub probes_ok: u64,
    pub probes_err: u64,
}

impl ProbeReport {
    pub fn is_ok(&self) -> bool {
        self.latency_ms.is_some()
    }
}
