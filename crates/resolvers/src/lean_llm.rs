use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use psr_domain::config::LeanLlmConfig;
use psr_domain::telemetry::{FallbackAction, QueueSnapshot, TelemetryKind};
use psr_domain::{
    FieldAudit, FieldAuditAction, FieldFallbackSummary, ParseDiagnostic, Result, SearchStep, Stage,
    TelemetryEvent, TelemetryHub, TelemetrySource,
};
use psr_llm::{FieldBatchContext, FieldFallbackClient, FieldQuery};
use psr_queue::TaskQueue;

use crate::registry::{FieldResolution, FieldResolver, ResolveContext};

const VALUES_KEY: &str = "resolver:leanllm:values";
const SHARED_KEY: &str = "resolver:leanllm:shared";
/// Scratchpad key of the per-parse [`FieldFallbackSummary`]; the extractor
/// reads it back when building metadata.
pub const USAGE_KEY: &str = "resolver:leanllm:usage";
const INVOCATIONS_KEY: &str = "resolver:leanllm:invocations";
/// Scratchpad counter of LLM tokens spent this parse.
pub const TOKENS_KEY: &str = "resolver:leanllm:tokens";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// External state snapshot
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Inspectable state of the fallback path, for dashboards and operators.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FieldFallbackState {
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
// Resolver
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// LLM-backed last-resort resolver.
///
/// The first eligible field batches every still-pending field into a single
/// client call; the returned values are memoized in the scratchpad and
/// fanned back out as later steps reach this resolver. Invocations are
/// guarded by the plan-confidence gate, per-parse invocation and token
/// budgets, the optional-field guard, and a cross-parse cooldown, and run
/// through a dedicated bounded queue.
pub struct LeanLlmResolver {
    config: LeanLlmConfig,
    client: Arc<dyn FieldFallbackClient>,
    queue: TaskQueue,
    telemetry: Arc<TelemetryHub>,
    timestamps: Mutex<Timestamps>,
}

impl LeanLlmResolver {
    pub fn new(
        config: LeanLlmConfig,
        client: Arc<dyn FieldFallbackClient>,
        telemetry: Arc<TelemetryHub>,
    ) -> Self {
        let queue = TaskQueue::new(config.concurrency);
        Self {
            config,
            client,
            queue,
            telemetry,
            timestamps: Mutex::new(Timestamps::default()),
        }
    }

    /// Snapshot for `field_fallback_state()` queries.
    pub fn state(&self) -> FieldFallbackState {
        let ts = self.timestamps.lock();
        let metrics = self.queue.metrics();
        FieldFallbackState {
            last_attempt_at: ts.last_attempt_at.map(|t| t.to_rfc3339()),
            last_success_at: ts.last_success_at.map(|t| t.to_rfc3339()),
            last_failure_at: ts.last_failure_at.map(|t| t.to_rfc3339()),
            queue: metrics.snapshot(),
            last_error: metrics.last_error,
        }
    }

    fn emit(
        &self,
        ctx: &ResolveContext<'_>,
        action: FallbackAction,
        skip_reason: Option<String>,
    ) {
        self.telemetry.emit(TelemetryEvent::new(
            ctx.request_id,
            TelemetrySource::Core,
            TelemetryKind::FieldFallback {
                action,
                field: Some(ctx.step.target_key.clone()),
                queue: self.queue.metrics().snapshot(),
                skip_reason,
            },
        ));
    }

    fn skip(
        &self,
        ctx: &ResolveContext<'_>,
        reason: &str,
        limit: Option<(&str, u64)>,
    ) -> FieldResolution {
        update_usage(ctx, |usage| {
            match limit {
                Some(_) => usage.skipped_by_limits += 1,
                None if reason == "plan-confidence" => usage.skipped_by_plan_confidence += 1,
                None => {}
            }
            usage.audit.push(FieldAudit {
                field: ctx.step.target_key.clone(),
                action: FieldAuditAction::Skipped,
                reason: Some(reason.to_string()),
                limit_type: limit.map(|(ty, _)| ty.to_string()),
                limit: limit.map(|(_, l)| l),
                source_field: None,
            });
        });
        self.emit(ctx, FallbackAction::Skipped, Some(reason.to_string()));
        FieldResolution::not_found().with_diagnostic(ParseDiagnostic::info(
            ctx.step.target_key.clone(),
            Stage::Extractor,
            format!("lean-llm: skipped ({reason})"),
        ))
    }

    /// Fields to include in a batch call: every pending step the guards
    /// allow, the current step first.
    fn batch_fields(&self, ctx: &ResolveContext<'_>) -> Vec<FieldQuery> {
        let eligible = |step: &SearchStep| step.is_required || self.config.allow_optional_fields;
        let query = |step: &SearchStep| FieldQuery {
            target_key: step.target_key.clone(),
            description: step.description.clone(),
            validation_type: step.validation_type.clone(),
            is_required: step.is_required,
        };

        let mut fields = vec![query(ctx.step)];
        for step in ctx.pending_steps {
            if step.target_key != ctx.step.target_key && eligible(step) {
                fields.push(query(step));
            }
        }
        fields
    }

    async fn invoke(&self, ctx: &ResolveContext<'_>) -> Result<Option<FieldResolution>> {
        let target = ctx.step.target_key.clone();
        let batch = FieldBatchContext {
            fields: self.batch_fields(ctx),
            input_excerpt: trim_input(ctx.input_data, self.config.max_input_characters),
            instructions: ctx.instructions.map(str::to_string),
            timeout_ms: ctx.timeout_ms,
        };

        // The attempt counts against the budget whether or not it succeeds.
        ctx.scratchpad.add_counter(INVOCATIONS_KEY, 1);
        self.timestamps.lock().last_attempt_at = Some(Utc::now());
        self.emit(ctx, FallbackAction::Queued, None);

        let client = Arc::clone(&self.client);
        let call = self.queue.enqueue(async move { client.resolve(batch).await });
        self.emit(ctx, FallbackAction::Started, None);

        match call.await {
            Ok(outcome) => {
                self.timestamps.lock().last_success_at = Some(Utc::now());

                let tokens = outcome.usage.as_ref().map(|u| u.tokens).unwrap_or(0);
                ctx.scratchpad.add_counter(TOKENS_KEY, tokens as u64);

                // Merge values and volunteered extractions for later steps.
                let mut values: HashMap<String, Value> =
                    ctx.scratchpad.get_as(VALUES_KEY).unwrap_or_default();
                values.extend(outcome.values.clone());
                ctx.scratchpad.set_as(VALUES_KEY, &values);

                let mut shared: HashMap<String, (Value, String)> =
                    ctx.scratchpad.get_as(SHARED_KEY).unwrap_or_default();
                for (key, value) in &outcome.shared_extractions {
                    shared.insert(key.clone(), (value.clone(), target.clone()));
                }
                ctx.scratchpad.set_as(SHARED_KEY, &shared);

                update_usage(ctx, |usage| {
                    usage.total_invocations += 1;
                    usage.total_tokens += tokens;
                    usage.shared_extractions += outcome.shared_extractions.len() as u32;
                });

                self.emit(ctx, FallbackAction::Resolved, None);

                let mut diagnostics = outcome.diagnostics.clone();
                match outcome.values.get(&target) {
                    Some(value) => {
                        let confidence =
                            outcome.confidences.get(&target).copied().unwrap_or(0.7);
                        update_usage(ctx, |usage| {
                            usage.resolved_fields += 1;
                            usage.audit.push(invoked_audit(&target, None));
                        });
                        let mut resolution = FieldResolution::found(value.clone(), confidence);
                        resolution.diagnostics.append(&mut diagnostics);
                        Ok(Some(resolution))
                    }
                    None => {
                        update_usage(ctx, |usage| {
                            usage
                                .audit
                                .push(invoked_audit(&target, Some("no value returned")));
                        });
                        let mut resolution = FieldResolution::not_found();
                        resolution.diagnostics.append(&mut diagnostics);
                        Ok(Some(resolution.with_diagnostic(ParseDiagnostic::info(
                            target,
                            Stage::Extractor,
                            "lean-llm: batch call returned no value for this field",
                        ))))
                    }
                }
            }
            Err(e) => {
                self.timestamps.lock().last_failure_at = Some(Utc::now());
                update_usage(ctx, |usage| {
                    usage.total_invocations += 1;
                    usage
                        .audit
                        .push(invoked_audit(&target, Some("client call failed")));
                });
                self.emit(ctx, FallbackAction::Failed, None);
                Ok(Some(FieldResolution::not_found().with_diagnostic(
                    ParseDiagnostic::warning(
                        target,
                        Stage::Extractor,
                        format!("lean-llm: client call failed: {e}"),
                    ),
                )))
            }
        }
    }
}

#[async_trait]
impl FieldResolver for LeanLlmResolver {
    fn name(&self) -> &str {
        "lean-llm"
    }

    async fn resolve(&self, ctx: &ResolveContext<'_>) -> Result<Option<FieldResolution>> {
        if !self.config.enabled {
            return Ok(None);
        }
        let target = &ctx.step.target_key;

        // Fan-out from an earlier batch call this parse.
        let values: HashMap<String, Value> =
            ctx.scratchpad.get_as(VALUES_KEY).unwrap_or_default();
        if let Some(value) = values.get(target) {
            update_usage(ctx, |usage| {
                usage.resolved_fields += 1;
                usage.audit.push(invoked_audit(target, Some("batched")));
            });
            return Ok(Some(FieldResolution::found(value.clone(), 0.7)));
        }

        // Extractions an earlier response volunteered.
        let shared: HashMap<String, (Value, String)> =
            ctx.scratchpad.get_as(SHARED_KEY).unwrap_or_default();
        if let Some((value, source)) = shared.get(target) {
            update_usage(ctx, |usage| {
                usage.reused_resolutions += 1;
                usage.audit.push(FieldAudit {
                    field: target.clone(),
                    action: FieldAuditAction::Reused,
                    reason: Some("shared extraction".into()),
                    limit_type: None,
                    limit: None,
                    source_field: Some(source.clone()),
                });
            });
            return Ok(Some(
                FieldResolution::found(value.clone(), 0.65).with_diagnostic(
                    ParseDiagnostic::info(
                        target.clone(),
                        Stage::Extractor,
                        format!("lean-llm: reused shared extraction from '{source}'"),
                    ),
                ),
            ));
        }

        // A confident plan does not pay for the fallback.
        if ctx.plan_confidence >= self.config.plan_confidence_gate {
            return Ok(Some(self.skip(ctx, "plan-confidence", None)));
        }

        if !ctx.step.is_required && !self.config.allow_optional_fields {
            return Ok(Some(self.skip(ctx, "optional-field", None)));
        }

        let invocations = ctx.scratchpad.counter(INVOCATIONS_KEY);
        if invocations >= self.config.max_invocations_per_parse as u64 {
            return Ok(Some(self.skip(
                ctx,
                "invocation-limit",
                Some(("invocations", self.config.max_invocations_per_parse as u64)),
            )));
        }

        let tokens = ctx.scratchpad.counter(TOKENS_KEY);
        if tokens >= self.config.max_tokens_per_parse as u64 {
            return Ok(Some(self.skip(
                ctx,
                "token-limit",
                Some(("tokens", self.config.max_tokens_per_parse as u64)),
            )));
        }

        // Cross-parse cooldown: only the first attempt of a parse checks it,
        // so a multi-invocation budget still works within one parse.
        if invocations == 0 {
            if let Some(last) = self.timestamps.lock().last_attempt_at {
                let elapsed_ms = Utc::now().signed_duration_since(last).num_milliseconds();
                if elapsed_ms >= 0 && (elapsed_ms as u64) < self.config.cooldown_ms {
                    return Ok(Some(self.skip(ctx, "cooldown", None)));
                }
            }
        }

        self.invoke(ctx).await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn invoked_audit(field: &str, reason: Option<&str>) -> FieldAudit {
    FieldAudit {
        field: field.to_string(),
        action: FieldAuditAction::Invoked,
        reason: reason.map(str::to_string),
        limit_type: None,
        limit: None,
        source_field: None,
    }
}

fn update_usage(ctx: &ResolveContext<'_>, apply: impl FnOnce(&mut FieldFallbackSummary)) {
    let mut usage: FieldFallbackSummary = ctx.scratchpad.get_as(USAGE_KEY).unwrap_or_default();
    apply(&mut usage);
    ctx.scratchpad.set_as(USAGE_KEY, &usage);
}

/// Trim to the character budget, replacing the tail with a single marker.
fn trim_input(input: &str, max_chars: usize) -> String {
    if input.len() <= max_chars {
        return input.to_string();
    }
    let mut cut = max_chars;
    while !input.is_char_boundary(cut) {
        cut -= 1;
    }
    let removed = input.len() - cut;
    format!("{}... [truncated {removed} chars]", &input[..cut])
}

#[cfg(test)]
mod tests {
    use super::*;
    use psr_domain::{DetectedFormat, ValidationType};
    use psr_llm::FieldBatchOutcome;
    use psr_llm::LlmUsage;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::scratchpad::Scratchpad;

    /// Returns a value for the first requested field only, plus a shared
    /// extraction for `bonus`.
    struct OneFieldClient {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl FieldFallbackClient for OneFieldClient {
        async fn resolve(&self, ctx: FieldBatchContext) -> Result<FieldBatchOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let first = ctx.fields[0].target_key.clone();
            let mut outcome = FieldBatchOutcome {
                usage: Some(LlmUsage {
                    tokens: 120,
                    latency_ms: 10,
                    model: "mock-small".into(),
                }),
                ..Default::default()
            };
            outcome.values.insert(first.clone(), json!("from-llm"));
            outcome.confidences.insert(first, 0.8);
            outcome
                .shared_extractions
                .insert("bonus".into(), json!("volunteered"));
            Ok(outcome)
        }

        fn client_id(&self) -> &str {
            "mock"
        }
    }

    fn step(key: &str, required: bool) -> SearchStep {
        SearchStep {
            target_key: key.into(),
            description: key.into(),
            search_instruction: format!("find {key}"),
            validation_type: ValidationType::String,
            is_required: required,
        }
    }

    fn resolver(config: LeanLlmConfig, client: Arc<OneFieldClient>) -> LeanLlmResolver {
        LeanLlmResolver::new(config, client, Arc::new(TelemetryHub::new()))
    }

    fn config(max_invocations: u32) -> LeanLlmConfig {
        LeanLlmConfig {
            max_invocations_per_parse: max_invocations,
            plan_confidence_gate: 0.85,
            cooldown_ms: 0,
            ..Default::default()
        }
    }

    async fn resolve_step<'a>(
        resolver: &LeanLlmResolver,
        step: &'a SearchStep,
        pending: &'a [SearchStep],
        pad: &'a Scratchpad,
    ) -> FieldResolution {
        let ctx = ResolveContext {
            step,
            input_data: "unparsable blob",
            scratchpad: pad,
            request_id: "req-1",
            detected_format: DetectedFormat::Text,
            plan_confidence: 0.4,
            pending_steps: pending,
            instructions: None,
            timeout_ms: None,
        };
        resolver.resolve(&ctx).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn one_call_then_invocation_limit_audits() {
        let client = Arc::new(OneFieldClient {
            calls: AtomicUsize::new(0),
        });
        let resolver = resolver(config(1), Arc::clone(&client));
        let steps = [step("a", true), step("b", true), step("c", true)];
        let pad = Scratchpad::new();

        let a = resolve_step(&resolver, &steps[0], &steps, &pad).await;
        assert_eq!(a.value, Some(json!("from-llm")));
        let b = resolve_step(&resolver, &steps[1], &steps[1..], &pad).await;
        assert!(b.value.is_none());
        let c = resolve_step(&resolver, &steps[2], &steps[2..], &pad).await;
        assert!(c.value.is_none());

        assert_eq!(client.calls.load(Ordering::SeqCst), 1);

        let usage: FieldFallbackSummary = pad.get_as(USAGE_KEY).unwrap();
        assert_eq!(usage.total_invocations, 1);
        assert_eq!(usage.resolved_fields, 1);
        assert_eq!(usage.skipped_by_limits, 2);
        let skipped: Vec<&FieldAudit> = usage
            .audit
            .iter()
            .filter(|a| a.action == FieldAuditAction::Skipped)
            .collect();
        assert_eq!(skipped.len(), 2);
        assert!(skipped
            .iter()
            .all(|a| a.limit_type.as_deref() == Some("invocations")));
    }

    #[tokio::test]
    async fn zero_budget_never_calls_client() {
        let client = Arc::new(OneFieldClient {
            calls: AtomicUsize::new(0),
        });
        let resolver = resolver(config(0), Arc::clone(&client));
        let steps = [step("a", true), step("b", true)];
        let pad = Scratchpad::new();

        for s in &steps {
            let result = resolve_step(&resolver, s, &steps, &pad).await;
            assert!(result.value.is_none());
        }

        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
        let usage: FieldFallbackSummary = pad.get_as(USAGE_KEY).unwrap();
        assert_eq!(usage.audit.len(), 2);
        assert!(usage
            .audit
            .iter()
            .all(|a| a.action == FieldAuditAction::Skipped
                && a.reason.as_deref() == Some("invocation-limit")));
    }

    #[tokio::test]
    async fn shared_extraction_is_reused_with_source() {
        let client = Arc::new(OneFieldClient {
            calls: AtomicUsize::new(0),
        });
        let resolver = resolver(config(2), Arc::clone(&client));
        let steps = [step("a", true), step("bonus", true)];
        let pad = Scratchpad::new();

        resolve_step(&resolver, &steps[0], &steps, &pad).await;
        let bonus = resolve_step(&resolver, &steps[1], &steps[1..], &pad).await;
        assert_eq!(bonus.value, Some(json!("volunteered")));

        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        let usage: FieldFallbackSummary = pad.get_as(USAGE_KEY).unwrap();
        assert_eq!(usage.reused_resolutions, 1);
        let reused = usage
            .audit
            .iter()
            .find(|a| a.action == FieldAuditAction::Reused)
            .unwrap();
        assert_eq!(reused.source_field.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn confident_plan_gates_the_resolver() {
        let client = Arc::new(OneFieldClient {
            calls: AtomicUsize::new(0),
        });
        let resolver = resolver(config(2), Arc::clone(&client));
        let s = step("a", true);
        let pending = [s.clone()];
        let pad = Scratchpad::new();

        let ctx = ResolveContext {
            step: &s,
            input_data: "blob",
            scratchpad: &pad,
            request_id: "req-1",
            detected_format: DetectedFormat::Text,
            plan_confidence: 0.9,
            pending_steps: &pending,
            instructions: None,
            timeout_ms: None,
        };
        let result = resolver.resolve(&ctx).await.unwrap().unwrap();
        assert!(result.value.is_none());
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);

        let usage: FieldFallbackSummary = pad.get_as(USAGE_KEY).unwrap();
        assert_eq!(usage.skipped_by_plan_confidence, 1);
    }

    #[tokio::test]
    async fn optional_fields_are_guarded() {
        let client = Arc::new(OneFieldClient {
            calls: AtomicUsize::new(0),
        });
        let resolver = resolver(config(2), Arc::clone(&client));
        let s = step("nickname", false);
        let pending = [s.clone()];
        let pad = Scratchpad::new();

        let result = resolve_step(&resolver, &s, &pending, &pad).await;
        assert!(result.value.is_none());
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
        let usage: FieldFallbackSummary = pad.get_as(USAGE_KEY).unwrap();
        assert_eq!(usage.audit[0].reason.as_deref(), Some("optional-field"));
    }

    #[test]
    fn trim_marks_removed_tail() {
        let input = "abcdefghij";
        let trimmed = trim_input(input, 4);
        assert_eq!(trimmed, "abcd... [truncated 6 chars]");
        assert_eq!(trim_input("short", 100), "short");
    }
}
