use std::collections::VecDeque;

use async_trait::async_trait;
use serde_json::Value;

use psr_domain::{DetectedFormat, ParseDiagnostic, Result, Stage};
use psr_heuristics::normalize_key;

use crate::registry::{FieldResolution, FieldResolver, ResolveContext};

const PAYLOAD_KEY: &str = "resolver:json:payload";
const FAILED_KEY: &str = "resolver:json:failed";

/// Resolves fields from JSON input by breadth-first key search.
///
/// The payload is parsed once per parse and cached in the scratchpad. Key
/// comparison uses the collapsed normalized form, so `contactEmail`,
/// `contact_email` and `Contact Email` all hit the same node. A parse
/// failure emits one diagnostic for the whole parse, then stays silent.
#[derive(Debug, Default)]
pub struct JsonResolver;

impl JsonResolver {
    pub fn new() -> Self {
        Self
    }

    fn payload(&self, ctx: &ResolveContext<'_>) -> Option<Value> {
        if let Some(payload) = ctx.scratchpad.get(PAYLOAD_KEY) {
            return Some(payload);
        }
        if ctx.scratchpad.contains(FAILED_KEY) {
            return None;
        }
        match serde_json::from_str::<Value>(ctx.input_data) {
            Ok(payload) => {
                ctx.scratchpad.set(PAYLOAD_KEY, payload.clone());
                Some(payload)
            }
            Err(_) => {
                ctx.scratchpad.set(FAILED_KEY, Value::Bool(true));
                None
            }
        }
    }
}

/// Breadth-first search for the first key whose normalized form matches.
/// Returns the value and its JSONPath-style location.
fn search(payload: &Value, target: &str) -> Option<(Value, String)> {
    let mut queue: VecDeque<(&Value, String)> = VecDeque::new();
    queue.push_back((payload, "$".to_string()));

    while let Some((node, path)) = queue.pop_front() {
        match node {
            Value::Object(map) => {
                for (key, value) in map {
                    if normalize_key(key) == *target {
                        return Some((value.clone(), format!("{path}.{key}")));
                    }
                }
                for (key, value) in map {
                    queue.push_back((value, format!("{path}.{key}")));
                }
            }
            Value::Array(items) => {
                for (idx, value) in items.iter().enumerate() {
                    queue.push_back((value, format!("{path}[{idx}]")));
                }
            }
            _ => {}
        }
    }
    None
}

#[async_trait]
impl FieldResolver for JsonResolver {
    fn name(&self) -> &str {
        "json"
    }

    async fn resolve(&self, ctx: &ResolveContext<'_>) -> Result<Option<FieldResolution>> {
        if ctx.detected_format != DetectedFormat::Json {
            return Ok(None);
        }

        let already_failed = ctx.scratchpad.contains(FAILED_KEY);
        let Some(payload) = self.payload(ctx) else {
            if already_failed {
                // Parse failure was already reported once.
                return Ok(None);
            }
            return Ok(Some(FieldResolution::not_found().with_diagnostic(
                ParseDiagnostic::warning(
                    ctx.step.target_key.clone(),
                    Stage::Extractor,
                    "input looked like JSON but failed to parse",
                ),
            )));
        };

        let target = normalize_key(&ctx.step.target_key);
        match search(&payload, &target) {
            Some((value, path)) => {
                // Top-level hits are more trustworthy than deep ones.
                let confidence = if path.matches('.').count() <= 1 { 0.95 } else { 0.85 };
                Ok(Some(
                    FieldResolution::found(value, confidence).with_diagnostic(
                        ParseDiagnostic::info(
                            ctx.step.target_key.clone(),
                            Stage::Extractor,
                            format!("json: matched key at {path}"),
                        ),
                    ),
                ))
            }
            None => Ok(Some(FieldResolution::not_found().with_diagnostic(
                ParseDiagnostic::info(
                    ctx.step.target_key.clone(),
                    Stage::Extractor,
                    format!("json: no key matching '{}'", ctx.step.target_key),
                ),
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scratchpad::Scratchpad;
    use psr_domain::{SearchStep, ValidationType};
    use serde_json::json;

    fn step(key: &str) -> SearchStep {
        SearchStep {
            target_key: key.into(),
            description: key.into(),
            search_instruction: format!("find {key}"),
            validation_type: ValidationType::String,
            is_required: true,
        }
    }

    fn ctx<'a>(
        step: &'a SearchStep,
        input: &'a str,
        pad: &'a Scratchpad,
        pending: &'a [SearchStep],
        format: DetectedFormat,
    ) -> ResolveContext<'a> {
        ResolveContext {
            step,
            input_data: input,
            scratchpad: pad,
            request_id: "req-1",
            detected_format: format,
            plan_confidence: 0.5,
            pending_steps: pending,
            instructions: None,
            timeout_ms: None,
        }
    }

    #[tokio::test]
    async fn finds_nested_key_with_path_diagnostic() {
        let resolver = JsonResolver::new();
        let input = r#"{"customer": {"contact_email": "jane@x.io"}}"#;
        let step = step("contactEmail");
        let pad = Scratchpad::new();
        let pending = [step.clone()];
        let c = ctx(&step, input, &pad, &pending, DetectedFormat::Json);

        let result = resolver.resolve(&c).await.unwrap().unwrap();
        assert_eq!(result.value, Some(json!("jane@x.io")));
        assert!(result.diagnostics[0]
            .message
            .contains("$.customer.contact_email"));
    }

    #[tokio::test]
    async fn caches_payload_in_scratchpad() {
        let resolver = JsonResolver::new();
        let input = r#"{"name": "Jane"}"#;
        let step = step("name");
        let pad = Scratchpad::new();
        let pending = [step.clone()];
        let c = ctx(&step, input, &pad, &pending, DetectedFormat::Json);

        resolver.resolve(&c).await.unwrap();
        assert!(pad.contains("resolver:json:payload"));
    }

    #[tokio::test]
    async fn skips_non_json_input() {
        let resolver = JsonResolver::new();
        let step = step("name");
        let pad = Scratchpad::new();
        let pending = [step.clone()];
        let c = ctx(&step, "Name: Jane", &pad, &pending, DetectedFormat::Text);
        assert!(resolver.resolve(&c).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn parse_failure_reports_once() {
        let resolver = JsonResolver::new();
        let step_a = step("a");
        let step_b = step("b");
        let pad = Scratchpad::new();
        let pending = [step_a.clone(), step_b.clone()];
        // Format detection can be fooled by a truncated payload.
        let input = "{\"a\": 1,";

        let c1 = ctx(&step_a, input, &pad, &pending, DetectedFormat::Json);
        let first = resolver.resolve(&c1).await.unwrap().unwrap();
        assert_eq!(first.diagnostics.len(), 1);

        let c2 = ctx(&step_b, input, &pad, &pending, DetectedFormat::Json);
        assert!(resolver.resolve(&c2).await.unwrap().is_none());
    }
}
