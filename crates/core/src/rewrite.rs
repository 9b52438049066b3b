use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use psr_domain::config::PlanRewriteConfig;
use psr_domain::telemetry::{QueueSnapshot, RewriteAction, TelemetryKind};
use psr_domain::{
    ParseDiagnostic, PlanOrigin, Result, Stage, TelemetryEvent, TelemetryHub, TelemetrySource,
};
use psr_llm::{PlanRewriteClient, PlanRewriteContext};
use psr_queue::TaskQueue;

use crate::architect::{ArchitectAgent, ArchitectContext, ArchitectResult};

/// Sample of the input forwarded to the rewrite client.
const INPUT_SAMPLE_CHARS: usize = 4_000;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// External state snapshot
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Inspectable state of the plan-rewrite path.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PlanRewriteState {
    pub last_attempt_at: Option<String>,
    pub last_success_at: Option<String>,
    pub last_failure_at: Option<String>,
    pub queue: QueueSnapshot,
    pub last_error: Option<String>,
}

#[derive(Default)]
struct Timestamps {
    last_attempt_at: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
    last_failure_at: Option<DateTime<Utc>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Hybrid architect
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Wraps an architect with an LLM rewrite for low-confidence plans.
///
/// A heuristic plan at or above the effective threshold passes through
/// untouched. Below it, one rewrite call runs through a bounded queue,
/// throttled by a cooldown window. A rewrite failure falls back to the
/// heuristic plan with a warning; every outcome emits `plan_rewrite`
/// telemetry with the queue snapshot.
pub struct HybridArchitect {
    inner: Arc<dyn ArchitectAgent>,
    client: Arc<dyn PlanRewriteClient>,
    config: PlanRewriteConfig,
    queue: TaskQueue,
    telemetry: Arc<TelemetryHub>,
    timestamps: Mutex<Timestamps>,
}

impl HybridArchitect {
    pub fn new(
        inner: Arc<dyn ArchitectAgent>,
        client: Arc<dyn PlanRewriteClient>,
        config: PlanRewriteConfig,
        telemetry: Arc<TelemetryHub>,
    ) -> Self {
        let queue = TaskQueue::new(config.concurrency);
        Self {
            inner,
            client,
            config,
            queue,
            telemetry,
            timestamps: Mutex::new(Timestamps::default()),
        }
    }

    /// Snapshot for `plan_rewrite_state()` queries.
    pub fn state(&self) -> PlanRewriteState {
        let ts = self.timestamps.lock();
        let metrics = self.queue.metrics();
        PlanRewriteState {
            last_attempt_at: ts.last_attempt_at.map(|t| t.to_rfc3339()),
            last_success_at: ts.last_success_at.map(|t| t.to_rfc3339()),
            last_failure_at: ts.last_failure_at.map(|t| t.to_rfc3339()),
            queue: metrics.snapshot(),
            last_error: metrics.last_error,
        }
    }

    fn emit(&self, request_id: &str, action: RewriteAction, skip_reason: Option<String>) {
        self.telemetry.emit(TelemetryEvent::new(
            request_id,
            TelemetrySource::Core,
            TelemetryKind::PlanRewrite {
                action,
                queue: self.queue.metrics().snapshot(),
                skip_reason,
            },
        ));
    }

    fn in_cooldown(&self) -> bool {
        let ts = self.timestamps.lock();
        let Some(last) = ts.last_attempt_at else {
            return false;
        };
        let elapsed_ms = Utc::now().signed_duration_since(last).num_milliseconds();
        elapsed_ms >= 0 && (elapsed_ms as u64) < self.config.cooldown_ms
    }
}

#[async_trait]
impl ArchitectAgent for HybridArchitect {
    fn name(&self) -> &str {
        "hybrid"
    }

    async fn create_plan(&self, ctx: ArchitectContext<'_>) -> Result<ArchitectResult> {
        // Capture what the rewrite call needs before the context moves into
        // the inner planner.
        let request_id = ctx.request_id.to_string();
        let input_sample = truncate_sample(ctx.input_data, INPUT_SAMPLE_CHARS);
        let output_schema = ctx.output_schema.clone();
        let instructions = ctx.instructions.map(str::to_string);
        let timeout_ms = ctx.options.and_then(|o| o.timeout_ms);
        let threshold = self
            .config
            .min_heuristic_confidence
            .or(ctx.options.and_then(|o| o.confidence_threshold))
            .unwrap_or(ctx.config.min_confidence);

        let mut heuristic = self.inner.create_plan(ctx).await?;

        if !self.config.enabled || heuristic.confidence >= threshold {
            return Ok(heuristic);
        }

        if self.in_cooldown() {
            heuristic.diagnostics.push(ParseDiagnostic::info(
                "*",
                Stage::Architect,
                "plan rewrite skipped (cooldown)",
            ));
            self.emit(&request_id, RewriteAction::Skipped, Some("cooldown".into()));
            return Ok(heuristic);
        }

        self.timestamps.lock().last_attempt_at = Some(Utc::now());
        self.emit(&request_id, RewriteAction::Queued, None);

        let rewrite_ctx = PlanRewriteContext {
            plan: heuristic.plan.clone(),
            input_sample,
            output_schema,
            instructions,
            timeout_ms,
        };
        let client = Arc::clone(&self.client);
        let call = self
            .queue
            .enqueue(async move { client.rewrite(rewrite_ctx).await });

        match call.await {
            Ok(outcome) => {
                self.timestamps.lock().last_success_at = Some(Utc::now());

                let mut plan = outcome.plan;
                plan.metadata.origin = PlanOrigin::Model;
                let confidence = outcome
                    .confidence
                    .unwrap_or(heuristic.confidence)
                    .clamp(0.0, 1.0);
                plan.metadata.planner_confidence = confidence;

                let mut diagnostics = heuristic.diagnostics;
                diagnostics.extend(outcome.diagnostics);
                let mut tokens = heuristic.tokens;
                match &outcome.usage {
                    Some(usage) => {
                        tokens += usage.tokens;
                        diagnostics.push(ParseDiagnostic::info(
                            "*",
                            Stage::Architect,
                            format!(
                                "plan rewritten by {} ({} tokens, {} ms)",
                                usage.model, usage.tokens, usage.latency_ms
                            ),
                        ));
                    }
                    None => diagnostics.push(ParseDiagnostic::info(
                        "*",
                        Stage::Architect,
                        "plan rewritten by model",
                    )),
                }

                self.emit(&request_id, RewriteAction::Completed, None);
                Ok(ArchitectResult {
                    plan,
                    confidence,
                    tokens,
                    diagnostics,
                })
            }
            Err(e) => {
                self.timestamps.lock().last_failure_at = Some(Utc::now());
                heuristic.diagnostics.push(ParseDiagnostic::warning(
                    "*",
                    Stage::Architect,
                    format!("plan rewrite failed, keeping heuristic plan: {e}"),
                ));
                self.emit(&request_id, RewriteAction::Failed, None);
                Ok(heuristic)
            }
        }
    }
}

fn truncate_sample(input: &str, max_chars: usize) -> String {
    if input.len() <= max_chars {
        return input.to_string();
    }
    let mut cut = max_chars;
    while !input.is_char_boundary(cut) {
        cut -= 1;
    }
    input[..cut].to_string()
}
