use std::sync::Arc;

use async_trait::async_trait;

use psr_domain::{DetectedFormat, ParseDiagnostic, Result, Stage};
use psr_heuristics::{normalize_key, sections, Matchers};

use crate::registry::{FieldResolution, FieldResolver, ResolveContext};

/// Minimum section score before extraction is attempted.
const MIN_SECTION_SCORE: f64 = 0.45;

/// Resolves fields from heading-delimited documents.
///
/// Segments the input into sections, scores each against the target key,
/// and extracts from the best-scoring section: a `key: value` labeled line
/// first, then the step's typed matcher over the section body.
pub struct SectionResolver {
    matchers: Arc<Matchers>,
}

impl SectionResolver {
    pub fn new(matchers: Arc<Matchers>) -> Self {
        Self { matchers }
    }
}

#[async_trait]
impl FieldResolver for SectionResolver {
    fn name(&self) -> &str {
        "section"
    }

    async fn resolve(&self, ctx: &ResolveContext<'_>) -> Result<Option<FieldResolution>> {
        if ctx.detected_format == DetectedFormat::Json {
            return Ok(None);
        }

        let segments = sections::segment(ctx.input_data);
        if segments.is_empty() {
            return Ok(None);
        }

        let target = &ctx.step.target_key;
        let best = segments
            .iter()
            .map(|s| (s, sections::score(s, target)))
            .max_by(|a, b| a.1.total_cmp(&b.1));
        let Some((section, score)) = best.filter(|(_, score)| *score >= MIN_SECTION_SCORE) else {
            return Ok(None);
        };

        let section_label = if section.heading.is_empty() {
            "preamble".to_string()
        } else {
            format!("'{}'", section.heading)
        };

        // Prefer an explicitly labeled line inside the winning section.
        let labeled = labeled_value(&section.body, target)
            .and_then(|raw| self.matchers.coerce(&ctx.step.validation_type, &raw));
        let (value, confidence) = match labeled {
            Some(value) => (Some(value), (0.75 + 0.2 * score.min(1.0)).min(0.95)),
            None => match self.matchers.find(&ctx.step.validation_type, &section.body) {
                Some((value, baseline)) => {
                    (Some(value), (baseline * score.min(1.0)).clamp(0.0, 0.9))
                }
                None => (None, 0.0),
            },
        };

        match value {
            Some(value) => Ok(Some(
                FieldResolution::found(value, confidence).with_diagnostic(ParseDiagnostic::info(
                    target.clone(),
                    Stage::Extractor,
                    format!("section: matched {section_label} (score {score:.2})"),
                )),
            )),
            None => Ok(Some(FieldResolution::not_found().with_diagnostic(
                ParseDiagnostic::info(
                    target.clone(),
                    Stage::Extractor,
                    format!("section: {section_label} scored {score:.2} but held no usable value"),
                ),
            ))),
        }
    }
}

/// First `key [:=-] value` line in `body` whose label matches the target.
fn labeled_value(body: &str, target_key: &str) -> Option<String> {
    let target = normalize_key(target_key);
    for line in body.lines() {
        if let Some((label, rest)) = line.split_once([':', '=']) {
            if normalize_key(label) == target && !rest.trim().is_empty() {
                return Some(rest.trim().to_string());
            }
        }
        if let Some((label, rest)) = line.split_once(" - ") {
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
    use psr_domain::{SearchStep, ValidationType};
    use serde_json::json;

    const REPORT: &str = "\
Customer Report

BILLING
Name: Jane Doe
Total: $41.50

CONTACT
Email: jane@example.com
Phone: +1 555 123 4567";

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
        let resolver = SectionResolver::new(Arc::new(Matchers::new()));
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
    async fn labeled_line_in_matching_section_wins() {
        let result = resolve("email", ValidationType::Email, REPORT).await.unwrap();
        assert_eq!(result.value, Some(json!("jane@example.com")));
        assert!(result.diagnostics[0].message.contains("CONTACT"));
    }

    #[tokio::test]
    async fn typed_matcher_runs_when_no_label_matches() {
        let result = resolve("total", ValidationType::Currency, REPORT)
            .await
            .unwrap();
        assert_eq!(result.value, Some(json!("$41.50")));
    }

    #[tokio::test]
    async fn skips_json_format() {
        let resolver = SectionResolver::new(Arc::new(Matchers::new()));
        let step = step("email", ValidationType::Email);
        let pad = Scratchpad::new();
        let pending = [step.clone()];
        let ctx = ResolveContext {
            step: &step,
            input_data: "{}",
            scratchpad: &pad,
            request_id: "req-1",
            detected_format: DetectedFormat::Json,
            plan_confidence: 0.5,
            pending_steps: &pending,
            instructions: None,
            timeout_ms: None,
        };
        assert!(resolver.resolve(&ctx).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unrelated_key_skips() {
        let result = resolve("vehicle_vin", ValidationType::String, REPORT).await;
        assert!(result.is_none());
    }
}
