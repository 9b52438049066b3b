use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{Map, Value};

use psr_domain::{
    ParseDiagnostic, ParseRequest, Result, SearchPlan, Severity, Stage, StageMetrics,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Contracts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct PreprocessContext<'a> {
    pub request: &'a ParseRequest,
    pub request_id: &'a str,
}

/// Partial replacement of the request. `None` fields stay untouched.
#[derive(Debug, Default)]
pub struct PreprocessResult {
    pub input_data: Option<String>,
    pub output_schema: Option<Map<String, Value>>,
    pub instructions: Option<String>,
    pub diagnostics: Vec<ParseDiagnostic>,
    pub tokens: u32,
    pub confidence: Option<f64>,
}

impl PreprocessResult {
    fn changes_anything(&self) -> bool {
        self.input_data.is_some() || self.output_schema.is_some() || self.instructions.is_some()
    }
}

/// Named transformation applied before planning. `Ok(None)` means the
/// processor looked and changed nothing.
#[async_trait]
pub trait Preprocessor: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, ctx: &PreprocessContext<'_>) -> Result<Option<PreprocessResult>>;
}

pub struct PostprocessContext<'a> {
    pub parsed_data: &'a Map<String, Value>,
    pub plan: Option<&'a SearchPlan>,
    pub request_id: &'a str,
}

/// Partial replacement of the result payload.
#[derive(Debug, Default)]
pub struct PostprocessResult {
    pub parsed_data: Option<Map<String, Value>>,
    pub diagnostics: Vec<ParseDiagnostic>,
    pub tokens: u32,
    pub confidence: Option<f64>,
}

/// Named transformation applied to extracted data after the extractor.
#[async_trait]
pub trait Postprocessor: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, ctx: &PostprocessContext<'_>) -> Result<Option<PostprocessResult>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stage executors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct StageOutcome {
    pub metrics: StageMetrics,
    pub diagnostics: Vec<ParseDiagnostic>,
}

/// Run the preprocessor stack in order, mutating the request in place.
/// A processor error becomes a warning diagnostic and the stage continues.
pub async fn run_preprocessors(
    processors: &[Arc<dyn Preprocessor>],
    request: &mut ParseRequest,
    request_id: &str,
) -> StageOutcome {
    let start = Instant::now();
    let mut diagnostics = Vec::new();
    let mut tokens = 0u32;
    let mut confidence_samples = Vec::new();
    let mut runs = 0u32;

    for processor in processors {
        let outcome = {
            let ctx = PreprocessContext {
                request,
                request_id,
            };
            processor.run(&ctx).await
        };
        match outcome {
            Ok(Some(mut result)) => {
                if result.changes_anything() {
                    runs += 1;
                }
                diagnostics.append(&mut result.diagnostics);
                tokens += result.tokens;
                if let Some(c) = result.confidence {
                    confidence_samples.push(c);
                }
                if let Some(input) = result.input_data {
                    request.input_data = input;
                }
                if let Some(schema) = result.output_schema {
                    request.output_schema = schema;
                }
                if let Some(instructions) = result.instructions {
                    request.instructions = Some(instructions);
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(processor = processor.name(), error = %e, "preprocessor failed");
                diagnostics.push(ParseDiagnostic::warning(
                    "*",
                    Stage::Preprocess,
                    format!("preprocessor '{}' failed: {e}", processor.name()),
                ));
            }
        }
    }

    StageOutcome {
        metrics: StageMetrics {
            time_ms: start.elapsed().as_millis() as u64,
            tokens,
            confidence: average(&confidence_samples),
            runs: Some(runs),
        },
        diagnostics,
    }
}

/// Run the postprocessor stack in order over the extracted data.
pub async fn run_postprocessors(
    processors: &[Arc<dyn Postprocessor>],
    parsed_data: &mut Map<String, Value>,
    plan: Option<&SearchPlan>,
    request_id: &str,
) -> StageOutcome {
    let start = Instant::now();
    let mut diagnostics = Vec::new();
    let mut tokens = 0u32;
    let mut confidence_samples = Vec::new();
    let mut runs = 0u32;

    for processor in processors {
        let outcome = {
            let ctx = PostprocessContext {
                parsed_data,
                plan,
                request_id,
            };
            processor.run(&ctx).await
        };
        match outcome {
            Ok(Some(mut result)) => {
                if result.parsed_data.is_some() {
                    runs += 1;
                }
                diagnostics.append(&mut result.diagnostics);
                tokens += result.tokens;
                if let Some(c) = result.confidence {
                    confidence_samples.push(c);
                }
                if let Some(data) = result.parsed_data {
                    *parsed_data = data;
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(processor = processor.name(), error = %e, "postprocessor failed");
                diagnostics.push(ParseDiagnostic::warning(
                    "*",
                    Stage::Postprocess,
                    format!("postprocessor '{}' failed: {e}", processor.name()),
                ));
            }
        }
    }

    StageOutcome {
        metrics: StageMetrics {
            time_ms: start.elapsed().as_millis() as u64,
            tokens,
            confidence: average(&confidence_samples),
            runs: Some(runs),
        },
        diagnostics,
    }
}

fn average(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        0.0
    } else {
        samples.iter().sum::<f64>() / samples.len() as f64
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Default preprocessors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Strips leading/trailing whitespace from the input.
pub struct TrimWhitespace;

#[async_trait]
impl Preprocessor for TrimWhitespace {
    fn name(&self) -> &str {
        "trim-whitespace"
    }

    async fn run(&self, ctx: &PreprocessContext<'_>) -> Result<Option<PreprocessResult>> {
        let trimmed = ctx.request.input_data.trim();
        if trimmed.len() == ctx.request.input_data.len() {
            return Ok(None);
        }
        Ok(Some(PreprocessResult {
            input_data: Some(trimmed.to_string()),
            ..Default::default()
        }))
    }
}

/// Rewrites CRLF and lone CR line endings to LF.
pub struct NormalizeLineEndings;

#[async_trait]
impl Preprocessor for NormalizeLineEndings {
    fn name(&self) -> &str {
        "normalize-line-endings"
    }

    async fn run(&self, ctx: &PreprocessContext<'_>) -> Result<Option<PreprocessResult>> {
        let input = &ctx.request.input_data;
        if !input.contains('\r') {
            return Ok(None);
        }
        Ok(Some(PreprocessResult {
            input_data: Some(input.replace("\r\n", "\n").replace('\r', "\n")),
            ..Default::default()
        }))
    }
}

/// Drops schema keys that can't name a field: empty keys and double
/// underscore prefixes reserved for tooling.
pub struct StripUnsafeSchemaKeys;

#[async_trait]
impl Preprocessor for StripUnsafeSchemaKeys {
    fn name(&self) -> &str {
        "strip-unsafe-schema-keys"
    }

    async fn run(&self, ctx: &PreprocessContext<'_>) -> Result<Option<PreprocessResult>> {
        let schema = &ctx.request.output_schema;
        let unsafe_keys: Vec<String> = schema
            .keys()
            .filter(|k| k.trim().is_empty() || k.starts_with("__"))
            .cloned()
            .collect();
        if unsafe_keys.is_empty() {
            return Ok(None);
        }

        let mut cleaned = schema.clone();
        for key in &unsafe_keys {
            cleaned.remove(key);
        }
        Ok(Some(PreprocessResult {
            output_schema: Some(cleaned),
            diagnostics: vec![ParseDiagnostic {
                field: "*".into(),
                stage: Stage::Preprocess,
                message: format!("removed unsafe schema key(s): {}", unsafe_keys.join(", ")),
                severity: Severity::Warning,
            }],
            ..Default::default()
        }))
    }
}

pub fn default_preprocessors() -> Vec<Arc<dyn Preprocessor>> {
    vec![
        Arc::new(TrimWhitespace),
        Arc::new(NormalizeLineEndings),
        Arc::new(StripUnsafeSchemaKeys),
    ]
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Default postprocessors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Collapses runs of internal whitespace in string values.
pub struct CollapseWhitespace;

#[async_trait]
impl Postprocessor for CollapseWhitespace {
    fn name(&self) -> &str {
        "collapse-whitespace"
    }

    async fn run(&self, ctx: &PostprocessContext<'_>) -> Result<Option<PostprocessResult>> {
        let mut changed = false;
        let mut data = ctx.parsed_data.clone();
        for value in data.values_mut() {
            if let Value::String(s) = value {
                let collapsed = s.split_whitespace().collect::<Vec<_>>().join(" ");
                if collapsed != *s {
                    *s = collapsed;
                    changed = true;
                }
            }
        }
        if !changed {
            return Ok(None);
        }
        Ok(Some(PostprocessResult {
            parsed_data: Some(data),
            ..Default::default()
        }))
    }
}

/// Removes empty strings, arrays and objects from optional fields.
pub struct PruneEmptyOptionals;

#[async_trait]
impl Postprocessor for PruneEmptyOptionals {
    fn name(&self) -> &str {
        "prune-empty-optionals"
    }

    async fn run(&self, ctx: &PostprocessContext<'_>) -> Result<Option<PostprocessResult>> {
        let Some(plan) = ctx.plan else {
            return Ok(None);
        };
        let optional: Vec<&str> = plan
            .steps
            .iter()
            .filter(|s| !s.is_required)
            .map(|s| s.target_key.as_str())
            .collect();

        let empty = |v: &Value| match v {
            Value::String(s) => s.is_empty(),
            Value::Array(a) => a.is_empty(),
            Value::Object(o) => o.is_empty(),
            Value::Null => true,
            _ => false,
        };

        let pruned: Vec<String> = ctx
            .parsed_data
            .iter()
            .filter(|(k, v)| optional.contains(&k.as_str()) && empty(v))
            .map(|(k, _)| k.clone())
            .collect();
        if pruned.is_empty() {
            return Ok(None);
        }

        let mut data = ctx.parsed_data.clone();
        for key in &pruned {
            data.remove(key);
        }
        Ok(Some(PostprocessResult {
            parsed_data: Some(data),
            diagnostics: pruned
                .iter()
                .map(|k| {
                    ParseDiagnostic::info(
                        k.clone(),
                        Stage::Postprocess,
                        "pruned empty optional value",
                    )
                })
                .collect(),
            ..Default::default()
        }))
    }
}

/// Turns textual null markers (`"null"`, `"none"`, `"n/a"`) into absent
/// values.
pub struct NormalizeTextualNulls;

#[async_trait]
impl Postprocessor for NormalizeTextualNulls {
    fn name(&self) -> &str {
        "normalize-textual-nulls"
    }

    async fn run(&self, ctx: &PostprocessContext<'_>) -> Result<Option<PostprocessResult>> {
        let is_textual_null = |v: &Value| {
            v.as_str()
                .map(|s| {
                    matches!(
                        s.trim().to_lowercase().as_str(),
                        "null" | "none" | "n/a" | "na"
                    )
                })
                .unwrap_or(false)
        };

        let nulled: Vec<String> = ctx
            .parsed_data
            .iter()
            .filter(|(_, v)| is_textual_null(v))
            .map(|(k, _)| k.clone())
            .collect();
        if nulled.is_empty() {
            return Ok(None);
        }

        let mut data = ctx.parsed_data.clone();
        for key in &nulled {
            data.remove(key);
        }
        Ok(Some(PostprocessResult {
            parsed_data: Some(data),
            diagnostics: nulled
                .iter()
                .map(|k| {
                    ParseDiagnostic::info(
                        k.clone(),
                        Stage::Postprocess,
                        "normalized textual null to absent",
                    )
                })
                .collect(),
            ..Default::default()
        }))
    }
}

pub fn default_postprocessors() -> Vec<Arc<dyn Postprocessor>> {
    vec![
        Arc::new(CollapseWhitespace),
        Arc::new(PruneEmptyOptionals),
        Arc::new(NormalizeTextualNulls),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use psr_domain::{
        Complexity, DetectedFormat, Error, PlanMetadata, PlanOrigin, PlanStrategy, SearchStep,
        ValidationType,
    };
    use serde_json::json;

    fn request(input: &str) -> ParseRequest {
        let mut schema = Map::new();
        schema.insert("name".into(), json!("string"));
        ParseRequest::new(input, schema)
    }

    #[tokio::test]
    async fn defaults_trim_and_normalize() {
        let mut req = request("  Name: Jane\r\nCity: Portland  ");
        let outcome = run_preprocessors(&default_preprocessors(), &mut req, "req-1").await;
        assert_eq!(req.input_data, "Name: Jane\nCity: Portland");
        assert_eq!(outcome.metrics.runs, Some(2));
    }

    #[tokio::test]
    async fn unsafe_schema_keys_are_stripped_with_warning() {
        let mut req = request("x");
        req.output_schema.insert("__proto".into(), json!("string"));
        let outcome = run_preprocessors(&default_preprocessors(), &mut req, "req-1").await;
        assert!(!req.output_schema.contains_key("__proto"));
        assert!(req.output_schema.contains_key("name"));
        assert_eq!(outcome.diagnostics.len(), 1);
        assert_eq!(outcome.diagnostics[0].severity, Severity::Warning);
    }

    struct Exploding;

    #[async_trait]
    impl Preprocessor for Exploding {
        fn name(&self) -> &str {
            "exploding"
        }

        async fn run(&self, _ctx: &PreprocessContext<'_>) -> Result<Option<PreprocessResult>> {
            Err(Error::Other("kaboom".into()))
        }
    }

    #[tokio::test]
    async fn processor_errors_become_warnings_and_stage_continues() {
        let processors: Vec<Arc<dyn Preprocessor>> =
            vec![Arc::new(Exploding), Arc::new(TrimWhitespace)];
        let mut req = request("  padded  ");
        let outcome = run_preprocessors(&processors, &mut req, "req-1").await;
        assert_eq!(req.input_data, "padded");
        assert!(outcome.diagnostics[0].message.contains("kaboom"));
        assert_eq!(outcome.metrics.runs, Some(1));
    }

    fn plan_with_optional(key: &str) -> SearchPlan {
        SearchPlan {
            id: "p".into(),
            version: 1,
            steps: vec![SearchStep {
                target_key: key.into(),
                description: key.into(),
                search_instruction: "".into(),
                validation_type: ValidationType::String,
                is_required: false,
            }],
            strategy: PlanStrategy::Sequential,
            confidence_threshold: 0.5,
            metadata: PlanMetadata {
                detected_format: DetectedFormat::Text,
                complexity: Complexity::Low,
                estimated_tokens: 10,
                origin: PlanOrigin::Heuristic,
                planner_confidence: 0.5,
            },
        }
    }

    #[tokio::test]
    async fn postprocessors_collapse_prune_and_null_normalize() {
        let plan = plan_with_optional("notes");
        let mut data = Map::new();
        data.insert("name".into(), json!("Jane   \t Doe"));
        data.insert("notes".into(), json!(""));
        data.insert("status".into(), json!("N/A"));

        let outcome =
            run_postprocessors(&default_postprocessors(), &mut data, Some(&plan), "req-1").await;

        assert_eq!(data["name"], json!("Jane Doe"));
        assert!(!data.contains_key("notes"));
        assert!(!data.contains_key("status"));
        assert_eq!(outcome.metrics.runs, Some(3));
    }
}
