use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Per-call knobs. All fields optional; unset fields fall back to the
/// kernel configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParseOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validate_output: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_metadata: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_threshold: Option<f64>,
}

/// One extraction request: the raw input plus the caller's output schema.
///
/// `output_schema` maps field names to heterogeneous descriptors (see
/// [`crate::SchemaValue`]); field order is preserved and drives plan step
/// order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParseRequest {
    pub input_data: String,
    pub output_schema: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<ParseOptions>,
}

impl ParseRequest {
    pub fn new(input_data: impl Into<String>, output_schema: Map<String, Value>) -> Self {
        Self {
            input_data: input_data.into(),
            output_schema,
            instructions: None,
            options: None,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_options(mut self, options: ParseOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Effective per-call confidence threshold, if any.
    pub fn confidence_threshold(&self) -> Option<f64> {
        self.options.as_ref().and_then(|o| o.confidence_threshold)
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

    #[test]
    fn schema_preserves_field_order() {
        let req = ParseRequest::new(
            "x",
            schema(&[
                ("zeta", json!("string")),
                ("alpha", json!("number")),
                ("mid", json!("email")),
            ]),
        );
        let keys: Vec<&String> = req.output_schema.keys().collect();
        assert_eq!(keys, ["zeta", "alpha", "mid"]);
    }

    #[test]
    fn threshold_comes_from_options() {
        let req = ParseRequest::new("x", Map::new()).with_options(ParseOptions {
            confidence_threshold: Some(0.8),
            ..Default::default()
        });
        assert_eq!(req.confidence_threshold(), Some(0.8));
    }
}
