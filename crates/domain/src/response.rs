use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::diagnostics::ParseDiagnostic;
use crate::error::ParseError;
use crate::plan::SearchPlan;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stage metrics
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Timing / token / confidence readout for one pipeline stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageMetrics {
    pub time_ms: u64,
    pub tokens: u32,
    pub confidence: f64,
    /// For processor stages: how many processors produced changes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runs: Option<u32>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Lean LLM fallback summary
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldAuditAction {
    Invoked,
    Reused,
    Skipped,
}

/// One per-field audit entry from the lean LLM resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldAudit {
    pub field: String,
    pub action: FieldAuditAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Which budget blocked the field: `"invocations"` or `"tokens"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    /// For reused resolutions: the field whose shared extraction was hit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_field: Option<String>,
}

/// Per-parse usage summary of the lean LLM field fallback.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldFallbackSummary {
    pub total_invocations: u32,
    pub resolved_fields: u32,
    pub reused_resolutions: u32,
    pub skipped_by_plan_confidence: u32,
    pub skipped_by_limits: u32,
    pub shared_extractions: u32,
    pub total_tokens: u32,
    pub audit: Vec<FieldAudit>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Parse metadata + response
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything a caller can inspect about how a parse went.
///
/// `architect_plan` is a clone; mutating it never affects cached plans.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub architect_plan: Option<SearchPlan>,
    /// Blended confidence, `0.35 * architect + 0.65 * extractor`.
    pub confidence: f64,
    pub architect_tokens: u32,
    pub extractor_tokens: u32,
    pub tokens_used: u32,
    pub processing_time_ms: u64,
    pub request_id: String,
    /// RFC 3339 timestamp of response construction.
    pub timestamp: String,
    pub stage_breakdown: BTreeMap<String, StageMetrics>,
    pub diagnostics: Vec<ParseDiagnostic>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_fallback: Option<FieldFallbackSummary>,
}

impl ParseMetadata {
    pub fn empty(request_id: impl Into<String>) -> Self {
        Self {
            architect_plan: None,
            confidence: 0.0,
            architect_tokens: 0,
            extractor_tokens: 0,
            tokens_used: 0,
            processing_time_ms: 0,
            request_id: request_id.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            stage_breakdown: BTreeMap::new(),
            diagnostics: Vec::new(),
            field_fallback: None,
        }
    }
}

/// The outcome of one parse. Failures are fully formed too: partial
/// `parsed_data`, an ordered diagnostic audit, and a populated `error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseResponse {
    pub success: bool,
    pub parsed_data: Map<String, Value>,
    pub metadata: ParseMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ParseError>,
}

impl ParseResponse {
    pub fn failure(error: ParseError, metadata: ParseMetadata) -> Self {
        Self {
            success: false,
            parsed_data: Map::new(),
            metadata,
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Stage;
    use crate::error::ErrorCode;

    #[test]
    fn failure_is_fully_formed() {
        let meta = ParseMetadata::empty("req-1");
        let resp = ParseResponse::failure(
            ParseError::new(ErrorCode::Validation, "empty input", Stage::Validation),
            meta,
        );
        assert!(!resp.success);
        assert!(resp.parsed_data.is_empty());
        assert_eq!(resp.error.unwrap().code, ErrorCode::Validation);
        assert_eq!(resp.metadata.request_id, "req-1");
    }

    #[test]
    fn metadata_timestamp_is_rfc3339() {
        let meta = ParseMetadata::empty("req-2");
        assert!(chrono::DateTime::parse_from_rfc3339(&meta.timestamp).is_ok());
    }
}
