//! The lean LLM field fallback exercised through the full kernel: budget
//! enforcement, audit trails, and the external state query.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use psr_core::{
    CoreOptions, FieldAuditAction, FieldBatchContext, FieldBatchOutcome, FieldFallbackClient,
    LlmUsage, ParseRequest, ParseratorCore, Result,
};
use serde_json::{json, Map, Value};

/// Resolves only the first requested field per call.
struct FirstFieldClient {
    calls: AtomicUsize,
}

#[async_trait]
impl FieldFallbackClient for FirstFieldClient {
    async fn resolve(&self, ctx: FieldBatchContext) -> Result<FieldBatchOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let first = ctx.fields[0].target_key.clone();
        let mut outcome = FieldBatchOutcome {
            usage: Some(LlmUsage {
                tokens: 90,
                latency_ms: 5,
                model: "mock-lean".into(),
            }),
            ..Default::default()
        };
        outcome.values.insert(first.clone(), json!("llm-value"));
        outcome.confidences.insert(first, 0.8);
        Ok(outcome)
    }

    fn client_id(&self) -> &str {
        "first-field"
    }
}

fn opaque_schema(fields: &[&str]) -> Map<String, Value> {
    fields
        .iter()
        .map(|f| (f.to_string(), json!({"description": format!("the {f}")})))
        .collect()
}

fn core_with_budget(max_invocations: u32) -> (ParseratorCore, Arc<FirstFieldClient>) {
    let client = Arc::new(FirstFieldClient {
        calls: AtomicUsize::new(0),
    });
    let mut config = psr_core::config::CoreConfig::default();
    config.field_fallback.max_invocations_per_parse = max_invocations;
    config.field_fallback.cooldown_ms = 0;

    let core = ParseratorCore::new(CoreOptions {
        config: Some(config),
        fallback_client: Some(Arc::clone(&client) as Arc<dyn FieldFallbackClient>),
        ..CoreOptions::new("test-key")
    })
    .unwrap();
    (core, client)
}

#[tokio::test]
async fn one_invocation_budget_resolves_one_field_and_audits_the_rest() {
    let (core, client) = core_with_budget(1);
    let response = core
        .parse(ParseRequest::new(
            "nothing here matches any field",
            opaque_schema(&["alpha", "beta", "gamma"]),
        ))
        .await;

    assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    assert_eq!(response.parsed_data["alpha"], json!("llm-value"));

    let summary = response.metadata.field_fallback.unwrap();
    assert_eq!(summary.total_invocations, 1);
    assert_eq!(summary.resolved_fields, 1);
    assert_eq!(summary.skipped_by_limits, 2);
    assert_eq!(summary.total_tokens, 90);

    let skipped: Vec<_> = summary
        .audit
        .iter()
        .filter(|a| a.action == FieldAuditAction::Skipped)
        .collect();
    assert_eq!(skipped.len(), 2);
    assert!(skipped
        .iter()
        .all(|a| a.limit_type.as_deref() == Some("invocations") && a.limit == Some(1)));
}

#[tokio::test]
async fn zero_invocation_budget_never_calls_the_client() {
    let (core, client) = core_with_budget(0);
    let response = core
        .parse(ParseRequest::new(
            "nothing here matches any field",
            opaque_schema(&["alpha", "beta"]),
        ))
        .await;

    assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    let summary = response.metadata.field_fallback.unwrap();
    assert_eq!(summary.total_invocations, 0);
    assert_eq!(summary.audit.len(), 2);
    assert!(summary
        .audit
        .iter()
        .all(|a| a.action == FieldAuditAction::Skipped
            && a.reason.as_deref() == Some("invocation-limit")));
}

#[tokio::test]
async fn llm_tokens_flow_into_extractor_accounting() {
    let (core, _client) = core_with_budget(1);
    let response = core
        .parse(ParseRequest::new(
            "nothing here matches any field",
            opaque_schema(&["alpha"]),
        ))
        .await;

    assert!(response.success, "error: {:?}", response.error);
    // Extractor tokens include the 90 LLM tokens on top of the estimate.
    let breakdown = &response.metadata.stage_breakdown["extractor"];
    assert!(breakdown.tokens >= 90 + 72);
}

#[tokio::test]
async fn fallback_state_is_queryable_after_a_parse() {
    let (core, _client) = core_with_budget(1);
    assert!(core
        .get_lean_llm_field_fallback_state()
        .unwrap()
        .last_attempt_at
        .is_none());

    core.parse(ParseRequest::new(
        "nothing here matches any field",
        opaque_schema(&["alpha"]),
    ))
    .await;

    let state = core.get_lean_llm_field_fallback_state().unwrap();
    assert!(state.last_attempt_at.is_some());
    assert!(state.last_success_at.is_some());
    assert_eq!(state.queue.completed, 1);
}

#[tokio::test]
async fn rewrite_state_is_absent_without_a_client() {
    let (core, _client) = core_with_budget(1);
    assert!(core.get_lean_llm_plan_rewrite_state().is_none());
}
