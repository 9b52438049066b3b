use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Expected shape of a single extracted field.
///
/// Determines which deterministic matcher runs for the field and the
/// baseline confidence a successful match reports. Unknown hint strings are
/// preserved as [`ValidationType::Custom`] rather than rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ValidationType {
    String,
    Number,
    Boolean,
    Email,
    Phone,
    Date,
    IsoDate,
    Url,
    StringArray,
    NumberArray,
    Currency,
    Percentage,
    Address,
    Name,
    Object,
    Custom(String),
}

impl ValidationType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Email => "email",
            Self::Phone => "phone",
            Self::Date => "date",
            Self::IsoDate => "iso_date",
            Self::Url => "url",
            Self::StringArray => "string_array",
            Self::NumberArray => "number_array",
            Self::Currency => "currency",
            Self::Percentage => "percentage",
            Self::Address => "address",
            Self::Name => "name",
            Self::Object => "object",
            Self::Custom(s) => s.as_str(),
        }
    }

    /// Confidence reported when this type's deterministic matcher succeeds.
    /// Tight formats (email, url, iso dates) score higher than loose text.
    pub fn baseline_confidence(&self) -> f64 {
        match self {
            Self::Email | Self::Url | Self::IsoDate => 0.9,
            Self::Phone | Self::Date | Self::Currency | Self::Percentage => 0.85,
            Self::Number | Self::Boolean => 0.8,
            Self::StringArray | Self::NumberArray => 0.7,
            Self::Address | Self::Name => 0.65,
            Self::String | Self::Object | Self::Custom(_) => 0.6,
        }
    }
}

impl From<String> for ValidationType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "string" | "text" => Self::String,
            "number" | "float" | "integer" | "int" => Self::Number,
            "boolean" | "bool" => Self::Boolean,
            "email" => Self::Email,
            "phone" | "tel" => Self::Phone,
            "date" => Self::Date,
            "iso_date" | "iso-date" | "isodate" => Self::IsoDate,
            "url" | "uri" => Self::Url,
            "string_array" | "string[]" | "array" | "list" => Self::StringArray,
            "number_array" | "number[]" => Self::NumberArray,
            "currency" | "money" | "price" => Self::Currency,
            "percentage" | "percent" => Self::Percentage,
            "address" => Self::Address,
            "name" => Self::Name,
            "object" => Self::Object,
            _ => Self::Custom(s),
        }
    }
}

impl From<ValidationType> for String {
    fn from(v: ValidationType) -> Self {
        v.as_str().to_string()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Plan value types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-field extraction directive. Immutable once added to a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchStep {
    pub target_key: String,
    pub description: String,
    pub search_instruction: String,
    pub validation_type: ValidationType,
    pub is_required: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStrategy {
    Sequential,
    Parallel,
    Adaptive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

/// Who produced the plan currently in hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanOrigin {
    Heuristic,
    Model,
    Cached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectedFormat {
    Json,
    Html,
    CsvLike,
    Text,
}

impl DetectedFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Html => "html",
            Self::CsvLike => "csv_like",
            Self::Text => "text",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanMetadata {
    pub detected_format: DetectedFormat,
    pub complexity: Complexity,
    pub estimated_tokens: u32,
    pub origin: PlanOrigin,
    /// Confidence the planner reported for this plan, `[0, 1]`.
    pub planner_confidence: f64,
}

/// Declarative description of what to extract and how.
///
/// Plans are value types: they are deep-cloned before being handed out, and
/// consumers never mutate a cached plan in place. A plan served from the
/// cache has its `metadata.origin` rewritten to [`PlanOrigin::Cached`] on
/// the way out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchPlan {
    pub id: String,
    pub version: u32,
    pub steps: Vec<SearchStep>,
    pub strategy: PlanStrategy,
    pub confidence_threshold: f64,
    pub metadata: PlanMetadata,
}

impl SearchPlan {
    /// Clone for hand-out, rewriting the origin. Used on every cache read.
    pub fn clone_with_origin(&self, origin: PlanOrigin) -> Self {
        let mut plan = self.clone();
        plan.metadata.origin = origin;
        plan
    }

    pub fn required_keys(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| s.is_required)
            .map(|s| s.target_key.as_str())
            .collect()
    }
}
