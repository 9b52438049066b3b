//! Client-facing interfaces for the two LLM-backed paths: plan rewrite and
//! batched field fallback.
//!
//! Concrete HTTP adapters live outside the kernel. Implementations translate
//! between these types and each provider's wire format, honor the advisory
//! `timeout_ms`, and fold their own retry / finish-reason handling into the
//! returned outcome's diagnostics. The kernel never inspects provider stop
//! reasons.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use psr_domain::{ParseDiagnostic, Result, SearchPlan, ValidationType};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Usage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Token / latency / model accounting attached to an LLM outcome.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmUsage {
    pub tokens: u32,
    pub latency_ms: u64,
    pub model: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Plan rewrite
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything a rewrite client needs to improve a low-confidence plan.
#[derive(Debug, Clone)]
pub struct PlanRewriteContext {
    pub plan: SearchPlan,
    /// A bounded sample of the input the plan was built against.
    pub input_sample: String,
    pub output_schema: Map<String, Value>,
    pub instructions: Option<String>,
    /// Advisory deadline from `ParseOptions.timeout_ms`.
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct PlanRewriteOutcome {
    pub plan: SearchPlan,
    /// Client-judged confidence of the rewritten plan, if it offers one.
    pub confidence: Option<f64>,
    pub diagnostics: Vec<ParseDiagnostic>,
    pub usage: Option<LlmUsage>,
}

/// Rewrites a heuristic plan that came in under the confidence threshold.
#[async_trait]
pub trait PlanRewriteClient: Send + Sync {
    async fn rewrite(&self, ctx: PlanRewriteContext) -> Result<PlanRewriteOutcome>;

    /// A unique identifier for this client instance.
    fn client_id(&self) -> &str;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Field fallback
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One unresolved field in a batched fallback call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldQuery {
    pub target_key: String,
    pub description: String,
    pub validation_type: ValidationType,
    pub is_required: bool,
}

/// A single batched request covering every still-unresolved field.
#[derive(Debug, Clone)]
pub struct FieldBatchContext {
    pub fields: Vec<FieldQuery>,
    /// Input already trimmed to the configured character budget.
    pub input_excerpt: String,
    pub instructions: Option<String>,
    pub timeout_ms: Option<u64>,
}

/// Values fanned back out to the requesting fields.
///
/// `shared_extractions` carries extra values the model volunteered beyond
/// the asked-for fields; the resolver memoizes them for later steps.
#[derive(Debug, Clone, Default)]
pub struct FieldBatchOutcome {
    pub values: HashMap<String, Value>,
    pub confidences: HashMap<String, f64>,
    pub diagnostics: Vec<ParseDiagnostic>,
    pub usage: Option<LlmUsage>,
    pub shared_extractions: HashMap<String, Value>,
}

/// Resolves a batch of fields the deterministic chain could not.
#[async_trait]
pub trait FieldFallbackClient: Send + Sync {
    async fn resolve(&self, ctx: FieldBatchContext) -> Result<FieldBatchOutcome>;

    /// A unique identifier for this client instance.
    fn client_id(&self) -> &str;
}
