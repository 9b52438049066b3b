use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use psr_domain::{ParseDiagnostic, Result, Stage, ValidationType};
use psr_heuristics::{normalize_key, Matchers};

use crate::registry::{FieldResolution, FieldResolver, ResolveContext};

/// Last deterministic stop: validation-type patterns over the whole input.
///
/// Typed fields run their matcher against the full text. Free-form types
/// (string, object, custom) have no global pattern, so they fall back to a
/// `label: value` line scan for the target key.
pub struct TypedPatternResolver {
    matchers: Arc<Matchers>,
}

impl TypedPatternResolver {
    pub fn new(matchers: Arc<Matchers>) -> Self {
        Self { matchers }
    }
}

#[async_trait]
impl FieldResolver for TypedPatternResolver {
    fn name(&self) -> &str {
        "typed-pattern"
    }

    async fn resolve(&self, ctx: &ResolveContext<'_>) -> Result<Option<FieldResolution>> {
        let ty = &ctx.step.validation_type;
        let target = &ctx.step.target_key;

        if let Some((value, confidence)) = self.matchers.find(ty, ctx.input_data) {
            return Ok(Some(
                FieldResolution::found(value, confidence).with_diagnostic(ParseDiagnostic::info(
                    target.clone(),
                    Stage::Extractor,
                    format!("typed-pattern: {} pattern matched", ty.as_str()),
                )),
            ));
        }

        // Free-form fall-through: a labeled line anywhere in the input.
        if matches!(
            ty,
            ValidationType::String | ValidationType::Object | ValidationType::Custom(_)
        ) {
            if let Some(raw) = labeled_line(ctx.input_data, target) {
                return Ok(Some(
                    FieldResolution::found(json!(raw), 0.6).with_diagnostic(
                        ParseDiagnostic::info(
                            target.clone(),
                            Stage::Extractor,
                            "typed-pattern: labeled line matched",
                        ),
                    ),
                ));
            }
        }

        Ok(None)
    }
}

fn labeled_line(input: &str, target_key: &str) -> Option<String> {
    let target = normalize_key(target_key);
    for line in input.lines() {
        let split = line
            .split_once(':')
            .or_else(|| line.split_once(" - "));
        if let Some((label, rest)) = split {
            if normalize_key(label) == target && !rest.trim().is_empty() {
                return Some(rest.trim().to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scratchpad::Scratchpad;
    use psr_domain::{DetectedFormat, SearchStep};

    fn step(key: &str, ty: ValidationType) -> SearchStep {
        SearchStep {
            target_key: key.into(),
            description: key.into(),
            search_instruction: format!("find {key}"),
            validation_type: ty,
            is_required: true,
        }
    }

    async fn resolve(key: &str, ty: ValidationType, input: &str) -> Option<FieldResolution> {
        let resolver = TypedPatternResolver::new(Arc::new(Matchers::new()));
        let step = step(key, ty);
        let pad = Scratchpad::new();
        let pending = [step.clone()];
        let ctx = ResolveContext {
            step: &step,
            input_data: input,
            scratchpad: &pad,
            request_id: "req-1",
            detected_format: DetectedFormat::Text,
            plan_confidence: 0.5,
            pending_steps: &pending,
            instructions: None,
            timeout_ms: None,
        };
        resolver.resolve(&ctx).await.unwrap()
    }

    #[tokio::test]
    async fn typed_pattern_scans_whole_input() {
        let result = resolve(
            "email",
            ValidationType::Email,
            "you can reach Jane at jane@example.com whenever",
        )
        .await
        .unwrap();
        assert_eq!(result.value, Some(json!("jane@example.com")));
    }

    #[tokio::test]
    async fn free_form_uses_labeled_lines() {
        let result = resolve(
            "project",
            ValidationType::String,
            "Project: Mercury Rising\nOwner: Dana",
        )
        .await
        .unwrap();
        assert_eq!(result.value, Some(json!("Mercury Rising")));
    }

    #[tokio::test]
    async fn no_match_skips() {
        assert!(resolve("email", ValidationType::Email, "no contact info here")
            .await
            .is_none());
    }
}
