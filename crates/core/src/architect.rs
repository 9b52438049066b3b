use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

use psr_domain::config::CoreConfig;
use psr_domain::{
    Error, ParseDiagnostic, ParseOptions, PlanMetadata, PlanOrigin, Result, SchemaValue,
    SearchPlan, SearchStep, Stage, ValidationType,
};
use psr_heuristics::{detect_format, estimate_tokens, infer_validation_type, is_field_optional};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Architect contract
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What a planner sees: a sample of the input plus the caller's schema.
pub struct ArchitectContext<'a> {
    pub input_data: &'a str,
    pub output_schema: &'a Map<String, Value>,
    pub instructions: Option<&'a str>,
    pub options: Option<&'a ParseOptions>,
    pub config: &'a CoreConfig,
    pub request_id: &'a str,
}

#[derive(Debug, Clone)]
pub struct ArchitectResult {
    pub plan: SearchPlan,
    pub confidence: f64,
    pub tokens: u32,
    pub diagnostics: Vec<ParseDiagnostic>,
}

/// Produces a [`SearchPlan`] from a schema and an input sample.
#[async_trait]
pub trait ArchitectAgent: Send + Sync {
    fn name(&self) -> &str;

    async fn create_plan(&self, ctx: ArchitectContext<'_>) -> Result<ArchitectResult>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Heuristic architect
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Upper bound on heuristic planner confidence.
const MAX_HEURISTIC_CONFIDENCE: f64 = 0.92;

/// Deterministic planner: one step per schema field, in schema order, with
/// validation types inferred from descriptors and field names.
#[derive(Debug, Default)]
pub struct HeuristicArchitect;

impl HeuristicArchitect {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ArchitectAgent for HeuristicArchitect {
    fn name(&self) -> &str {
        "heuristic"
    }

    async fn create_plan(&self, ctx: ArchitectContext<'_>) -> Result<ArchitectResult> {
        if ctx.output_schema.is_empty() {
            return Err(Error::Architect("output schema has no fields".into()));
        }

        let mut steps = Vec::with_capacity(ctx.output_schema.len());
        let mut recognized = 0usize;

        for (field, descriptor) in ctx.output_schema {
            let schema = SchemaValue::classify(descriptor);
            let ty = infer_validation_type(field, &schema);
            if schema.type_hint().is_some() || ty != ValidationType::String {
                recognized += 1;
            }

            let description = schema
                .description()
                .map(str::to_string)
                .unwrap_or_else(|| format!("the '{field}' field"));
            steps.push(SearchStep {
                target_key: field.clone(),
                search_instruction: format!(
                    "locate '{field}' as {} in the input",
                    ty.as_str()
                ),
                description,
                validation_type: ty,
                is_required: !is_field_optional(&schema),
            });
        }

        let field_count = steps.len();
        let detected_format = detect_format(ctx.input_data);
        let estimated = estimate_tokens(ctx.input_data.len(), field_count);
        let confidence = (0.4 + 0.52 * recognized as f64 / field_count as f64)
            .clamp(0.0, MAX_HEURISTIC_CONFIDENCE);

        let threshold = ctx
            .options
            .and_then(|o| o.confidence_threshold)
            .unwrap_or(ctx.config.min_confidence);

        let plan = SearchPlan {
            id: Uuid::new_v4().to_string(),
            version: 1,
            steps,
            strategy: ctx.config.default_strategy,
            confidence_threshold: threshold,
            metadata: PlanMetadata {
                detected_format,
                complexity: psr_heuristics::complexity(ctx.input_data.len(), field_count),
                estimated_tokens: estimated,
                origin: PlanOrigin::Heuristic,
                planner_confidence: confidence,
            },
        };

        let mut diagnostics = vec![ParseDiagnostic::info(
            "*",
            Stage::Architect,
            format!(
                "planned {field_count} step(s), {recognized} with recognized types, format {}",
                detected_format.as_str()
            ),
        )];
        if recognized < field_count {
            diagnostics.push(ParseDiagnostic::info(
                "*",
                Stage::Architect,
                format!("{} field(s) fell back to free-form text", field_count - recognized),
            ));
        }

        // Planning cost scales with the extraction estimate.
        let tokens = ((estimated as f64 * 0.3).round() as u32).max(56);

        Ok(ArchitectResult {
            plan,
            confidence,
            tokens,
            diagnostics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    async fn plan_for(schema: Map<String, Value>, input: &str) -> ArchitectResult {
        let config = CoreConfig::default();
        let ctx = ArchitectContext {
            input_data: input,
            output_schema: &schema,
            instructions: None,
            options: None,
            config: &config,
            request_id: "req-1",
        };
        HeuristicArchitect::new().create_plan(ctx).await.unwrap()
    }

    #[tokio::test]
    async fn steps_follow_schema_order() {
        let result = plan_for(
            schema(&[
                ("zeta", json!("string")),
                ("email", json!("email")),
                ("alpha", json!("number")),
            ]),
            "Some text",
        )
        .await;
        let keys: Vec<&str> = result.plan.steps.iter().map(|s| s.target_key.as_str()).collect();
        assert_eq!(keys, ["zeta", "email", "alpha"]);
    }

    #[tokio::test]
    async fn optional_descriptor_clears_required() {
        let result = plan_for(
            schema(&[
                ("name", json!("name")),
                ("nickname", json!({"type": "string", "optional": true})),
            ]),
            "Name: Jane",
        )
        .await;
        assert!(result.plan.steps[0].is_required);
        assert!(!result.plan.steps[1].is_required);
    }

    #[tokio::test]
    async fn confidence_grows_with_recognized_fields_and_stays_capped() {
        let all_typed = plan_for(
            schema(&[("email", json!("email")), ("phone", json!("phone"))]),
            "x",
        )
        .await;
        let untyped = plan_for(
            schema(&[("blob", json!({"widget": true})), ("thing", json!({"x": 1}))]),
            "x",
        )
        .await;
        assert!(all_typed.confidence > untyped.confidence);
        assert!(all_typed.confidence <= MAX_HEURISTIC_CONFIDENCE);
    }

    #[tokio::test]
    async fn json_input_is_detected_in_metadata() {
        let result = plan_for(schema(&[("name", json!("string"))]), r#"{"name": "J"}"#).await;
        assert_eq!(
            result.plan.metadata.detected_format,
            psr_domain::DetectedFormat::Json
        );
        assert_eq!(result.plan.metadata.origin, PlanOrigin::Heuristic);
    }

    #[tokio::test]
    async fn empty_schema_is_an_architect_error() {
        let config = CoreConfig::default();
        let empty = Map::new();
        let ctx = ArchitectContext {
            input_data: "x",
            output_schema: &empty,
            instructions: None,
            options: None,
            config: &config,
            request_id: "req-1",
        };
        assert!(HeuristicArchitect::new().create_plan(ctx).await.is_err());
    }
}
