use async_trait::async_trait;
use serde_json::{Map, Value};

use psr_domain::{
    FieldFallbackSummary, ParseDiagnostic, Result, SearchPlan, SearchStep, Stage,
};
use psr_resolvers::{lean_llm, ResolveContext, ResolverRegistry, Scratchpad};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Extractor contract
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ExtractorContext<'a> {
    pub plan: &'a SearchPlan,
    pub input_data: &'a str,
    pub registry: &'a ResolverRegistry,
    pub request_id: &'a str,
    pub instructions: Option<&'a str>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct ExtractorResult {
    pub parsed_data: Map<String, Value>,
    pub confidence: f64,
    pub tokens: u32,
    pub diagnostics: Vec<ParseDiagnostic>,
    /// Required keys no resolver could satisfy; non-empty means failure.
    pub missing_required: Vec<String>,
    pub field_fallback: Option<FieldFallbackSummary>,
}

/// Executes a [`SearchPlan`] against the full input via the resolver chain.
#[async_trait]
pub trait ExtractorAgent: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, ctx: ExtractorContext<'_>) -> Result<ExtractorResult>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Heuristic extractor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Floor on extractor token accounting.
const MIN_EXTRACTOR_TOKENS: u32 = 72;

/// Default extractor: walks plan steps in plan order and aggregates
/// per-step confidence.
///
/// The `parallel` strategy is advisory; steps always run sequentially so
/// resolver ordering and scratchpad sharing stay deterministic.
#[derive(Debug, Default)]
pub struct HeuristicExtractor;

impl HeuristicExtractor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ExtractorAgent for HeuristicExtractor {
    fn name(&self) -> &str {
        "heuristic"
    }

    async fn execute(&self, ctx: ExtractorContext<'_>) -> Result<ExtractorResult> {
        let scratchpad = Scratchpad::new();
        let mut parsed_data = Map::new();
        let mut diagnostics = Vec::new();
        let mut missing_required = Vec::new();
        let mut confidence_sum = 0.0;

        // Unresolved steps, kept current so the lean LLM resolver can batch
        // everything still outstanding.
        let mut pending: Vec<SearchStep> = ctx.plan.steps.clone();

        for step in &ctx.plan.steps {
            let resolution = {
                let resolve_ctx = ResolveContext {
                    step,
                    input_data: ctx.input_data,
                    scratchpad: &scratchpad,
                    request_id: ctx.request_id,
                    detected_format: ctx.plan.metadata.detected_format,
                    plan_confidence: ctx.plan.metadata.planner_confidence,
                    pending_steps: &pending,
                    instructions: ctx.instructions,
                    timeout_ms: ctx.timeout_ms,
                };
                ctx.registry.resolve(&resolve_ctx).await
            };

            diagnostics.extend(resolution.diagnostics);

            match resolution.value {
                Some(value) => {
                    let floor = if step.is_required { 0.7 } else { 0.5 };
                    confidence_sum += resolution.confidence.max(floor);
                    parsed_data.insert(step.target_key.clone(), value);
                    pending.retain(|s| s.target_key != step.target_key);
                }
                None => {
                    confidence_sum += if step.is_required {
                        resolution.confidence
                    } else {
                        resolution.confidence.max(0.2)
                    };
                    if step.is_required {
                        missing_required.push(step.target_key.clone());
                    }
                }
            }
        }

        let step_count = ctx.plan.steps.len();
        let confidence = if step_count == 0 {
            0.0
        } else {
            (confidence_sum / step_count as f64).clamp(0.0, 1.0)
        };

        if !missing_required.is_empty() {
            diagnostics.push(ParseDiagnostic::error(
                "*",
                Stage::Extractor,
                format!("missing required field(s): {}", missing_required.join(", ")),
            ));
        }

        let lean_tokens = scratchpad.counter(lean_llm::TOKENS_KEY) as u32;
        let tokens = ((ctx.plan.metadata.estimated_tokens as f64 * 0.7).round() as u32)
            .max(MIN_EXTRACTOR_TOKENS)
            + lean_tokens;

        Ok(ExtractorResult {
            parsed_data,
            confidence,
            tokens,
            diagnostics,
            missing_required,
            field_fallback: scratchpad.get_as(lean_llm::USAGE_KEY),
        })
    }
}
