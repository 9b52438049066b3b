use serde::{Deserialize, Serialize};

/// Session auto-refresh policy.
///
/// A refresh regenerates the session plan when blended confidence drifts
/// below `min_confidence` for more than `low_confidence_grace` consecutive
/// parses, or when `max_parses` parses have run since the last refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoRefreshConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_parses: Option<u32>,
    /// Cooldown between triggered refreshes.
    #[serde(default = "d_min_interval_ms")]
    pub min_interval_ms: u64,
    /// How many consecutive low-confidence parses are tolerated before a
    /// refresh triggers.
    #[serde(default = "d_low_confidence_grace")]
    pub low_confidence_grace: u32,
}

impl Default for AutoRefreshConfig {
    fn default() -> Self {
        Self {
            min_confidence: None,
            max_parses: None,
            min_interval_ms: d_min_interval_ms(),
            low_confidence_grace: d_low_confidence_grace(),
        }
    }
}

fn d_min_interval_ms() -> u64 {
    30_000
}

fn d_low_confidence_grace() -> u32 {
    1
}
