use serde::{Deserialize, Serialize};

/// Knobs for the LLM plan-rewrite wrapper around the architect.
///
/// A rewrite only runs when a client is attached and the heuristic plan's
/// confidence falls below the effective threshold. `cooldown_ms` throttles
/// consecutive attempts regardless of outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanRewriteConfig {
    #[serde(default = "d_enabled")]
    pub enabled: bool,
    #[serde(default = "d_cooldown_ms")]
    pub cooldown_ms: u64,
    #[serde(default = "d_concurrency")]
    pub concurrency: usize,
    /// Overrides the per-request threshold for deciding whether the
    /// heuristic plan is good enough to skip the rewrite.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_heuristic_confidence: Option<f64>,
}

impl Default for PlanRewriteConfig {
    fn default() -> Self {
        Self {
            enabled: d_enabled(),
            cooldown_ms: d_cooldown_ms(),
            concurrency: d_concurrency(),
            min_heuristic_confidence: None,
        }
    }
}

fn d_enabled() -> bool {
    true
}

fn d_cooldown_ms() -> u64 {
    30_000
}

fn d_concurrency() -> usize {
    1
}
