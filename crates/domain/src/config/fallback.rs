use serde::{Deserialize, Serialize};

/// Budgets and gates for the lean LLM field resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeanLlmConfig {
    #[serde(default = "d_enabled")]
    pub enabled: bool,
    /// Skip the resolver entirely when the plan's own confidence is at or
    /// above this gate; a confident plan does not need the fallback.
    #[serde(default = "d_plan_confidence_gate")]
    pub plan_confidence_gate: f64,
    #[serde(default = "d_max_invocations_per_parse")]
    pub max_invocations_per_parse: u32,
    #[serde(default = "d_max_tokens_per_parse")]
    pub max_tokens_per_parse: u32,
    /// When false, optional fields never reach the LLM.
    #[serde(default)]
    pub allow_optional_fields: bool,
    /// Input is trimmed to this many characters before the client call; the
    /// removed tail is replaced by a `... [truncated N chars]` marker.
    #[serde(default = "d_max_input_characters")]
    pub max_input_characters: usize,
    #[serde(default = "d_concurrency")]
    pub concurrency: usize,
    #[serde(default = "d_cooldown_ms")]
    pub cooldown_ms: u64,
}

impl Default for LeanLlmConfig {
    fn default() -> Self {
        Self {
            enabled: d_enabled(),
            plan_confidence_gate: d_plan_confidence_gate(),
            max_invocations_per_parse: d_max_invocations_per_parse(),
            max_tokens_per_parse: d_max_tokens_per_parse(),
            allow_optional_fields: false,
            max_input_characters: d_max_input_characters(),
            concurrency: d_concurrency(),
            cooldown_ms: d_cooldown_ms(),
        }
    }
}

fn d_enabled() -> bool {
    true
}

fn d_plan_confidence_gate() -> f64 {
    0.85
}

fn d_max_invocations_per_parse() -> u32 {
    2
}

fn d_max_tokens_per_parse() -> u32 {
    2_000
}

fn d_max_input_characters() -> usize {
    6_000
}

fn d_concurrency() -> usize {
    1
}

fn d_cooldown_ms() -> u64 {
    15_000
}
