use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use psr_domain::{DetectedFormat, ParseDiagnostic, Result, Stage, ValidationType};
use psr_heuristics::{normalize_key, Matchers};

use crate::registry::{FieldResolution, FieldResolver, ResolveContext};

const PAIRS_KEY: &str = "resolver:kv:pairs";

/// Opt-in resolver for messy `key: value` / `key = value` / `key - value`
/// documents with no usable section structure.
///
/// Indexes every labeled line once per parse (cached in the scratchpad) and
/// returns all values filed under the normalized target key, validated
/// against the step's type when possible.
pub struct LooseKeyValueResolver {
    matchers: Arc<Matchers>,
}

impl LooseKeyValueResolver {
    pub fn new(matchers: Arc<Matchers>) -> Self {
        Self { matchers }
    }

    fn pairs(&self, ctx: &ResolveContext<'_>) -> HashMap<String, Vec<String>> {
        if let Some(cached) = ctx.scratchpad.get_as::<HashMap<String, Vec<String>>>(PAIRS_KEY) {
            return cached;
        }
        let pairs = index_pairs(ctx.input_data);
        ctx.scratchpad.set_as(PAIRS_KEY, &pairs);
        pairs
    }
}

fn index_pairs(input: &str) -> HashMap<String, Vec<String>> {
    let mut pairs: HashMap<String, Vec<String>> = HashMap::new();
    for line in input.lines() {
        let split = line
            .split_once([':', '='])
            .or_else(|| line.split_once(" - "));
        let Some((label, rest)) = split else {
            continue;
        };
        let key = normalize_key(label);
        let value = rest.trim();
        // Long labels are prose, not keys.
        if key.is_empty() || key.len() > 40 || value.is_empty() {
            continue;
        }
        pairs.entry(key).or_default().push(value.to_string());
    }
    pairs
}

#[async_trait]
impl FieldResolver for LooseKeyValueResolver {
    fn name(&self) -> &str {
        "loose-key-value"
    }

    async fn resolve(&self, ctx: &ResolveContext<'_>) -> Result<Option<FieldResolution>> {
        if ctx.detected_format == DetectedFormat::Json {
            return Ok(None);
        }

        let pairs = self.pairs(ctx);
        let target = normalize_key(&ctx.step.target_key);
        let Some(values) = pairs.get(&target).filter(|v| !v.is_empty()) else {
            return Ok(None);
        };

        let ty = &ctx.step.validation_type;
        let is_array = matches!(
            ty,
            ValidationType::StringArray | ValidationType::NumberArray
        );

        let (value, confidence) = if is_array && values.len() > 1 {
            // Repeated keys become the array itself.
            (Some(json!(values)), 0.7)
        } else if let Some(coerced) = values.iter().find_map(|v| self.matchers.coerce(ty, v)) {
            (Some(coerced), 0.7)
        } else {
            // Keep the raw text when the typed coercion rejects it.
            (Some(json!(values[0].clone())), 0.5)
        };

        Ok(value.map(|v| {
            FieldResolution::found(v, confidence).with_diagnostic(ParseDiagnostic::info(
                ctx.step.target_key.clone(),
                Stage::Extractor,
                format!(
                    "loose-key-value: {} labeled line(s) for '{}'",
                    values.len(),
                    ctx.step.target_key
                ),
            ))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scratchpad::Scratchpad;
    use psr_domain::SearchStep;

    const NOTES: &str = "\
ticket = 4471
owner: Dana Reyes
tag: infra
tag: billing
eta - 2024-06-01
some prose line without any delimiter";

    fn step(key: &str, ty: ValidationType) -> SearchStep {
        SearchStep {
            target_key: key.into(),
            description: key.into(),
            search_instruction: format!("find {key}"),
            validation_type: ty,
            is_required: false,
        }
    }

    async fn resolve(key: &str, ty: ValidationType) -> Option<FieldResolution> {
        let resolver = LooseKeyValueResolver::new(Arc::new(Matchers::new()));
        let step = step(key, ty);
        let pad = Scratchpad::new();
        let pending = [step.clone()];
        let ctx = ResolveContext {
            step: &step,
            input_data: NOTES,
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
    async fn equals_and_colon_delimiters_both_index() {
        let result = resolve("ticket", ValidationType::Number).await.unwrap();
        assert_eq!(result.value, Some(json!(4471.0)));

        let result = resolve("owner", ValidationType::Name).await.unwrap();
        assert_eq!(result.value, Some(json!("Dana Reyes")));
    }

    #[tokio::test]
    async fn repeated_keys_become_arrays() {
        let result = resolve("tag", ValidationType::StringArray).await.unwrap();
        assert_eq!(result.value, Some(json!(["infra", "billing"])));
    }

    #[tokio::test]
    async fn dash_delimiter_indexes_too() {
        let result = resolve("eta", ValidationType::Date).await.unwrap();
        assert_eq!(result.value, Some(json!("2024-06-01")));
    }

    #[tokio::test]
    async fn missing_key_skips() {
        assert!(resolve("absent", ValidationType::String).await.is_none());
    }
}
