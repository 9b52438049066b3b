use serde::{Deserialize, Serialize};

use crate::diagnostics::Stage;

/// Shared error type used across all Parserator crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("validation: {0}")]
    Validation(String),

    #[error("architect: {0}")]
    Architect(String),

    #[error("extractor: {0}")]
    Extractor(String),

    #[error("resolver {resolver}: {message}")]
    Resolver { resolver: String, message: String },

    #[error("plan cache: {0}")]
    Cache(String),

    #[error("LLM client: {0}")]
    LlmClient(String),

    #[error("queue: {0}")]
    Queue(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response-level error record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Machine-readable failure classification carried on failure responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Validation,
    ArchitectFailed,
    ExtractorFailed,
    MissingRequiredFields,
    LowConfidence,
    UnknownFailure,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION",
            Self::ArchitectFailed => "ARCHITECT_FAILED",
            Self::ExtractorFailed => "EXTRACTOR_FAILED",
            Self::MissingRequiredFields => "MISSING_REQUIRED_FIELDS",
            Self::LowConfidence => "LOW_CONFIDENCE",
            Self::UnknownFailure => "UNKNOWN_FAILURE",
        }
    }
}

/// Structured error attached to a failed [`crate::ParseResponse`].
///
/// Always fully populated: `code` and `stage` classify the failure,
/// `details` carries machine-readable context (for example the list of
/// missing required fields), and `suggestion` is a human hint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseError {
    pub code: ErrorCode,
    pub message: String,
    pub stage: Stage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl ParseError {
    pub fn new(code: ErrorCode, message: impl Into<String>, stage: Stage) -> Self {
        Self {
            code,
            message: message.into(),
            stage,
            details: None,
            suggestion: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

impl Error {
    /// Map an internal error onto the response-level record, classifying by
    /// the pipeline stage that raised it.
    pub fn into_parse_error(self) -> ParseError {
        match self {
            Error::Validation(msg) => ParseError::new(ErrorCode::Validation, msg, Stage::Validation),
            Error::Architect(msg) => {
                ParseError::new(ErrorCode::ArchitectFailed, msg, Stage::Architect)
            }
            Error::Extractor(msg) => {
                ParseError::new(ErrorCode::ExtractorFailed, msg, Stage::Extractor)
            }
            other => ParseError::new(
                ErrorCode::UnknownFailure,
                other.to_string(),
                Stage::Orchestration,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_serializes_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::MissingRequiredFields).unwrap();
        assert_eq!(json, "\"MISSING_REQUIRED_FIELDS\"");
    }

    #[test]
    fn architect_error_maps_to_architect_stage() {
        let err = Error::Architect("no fields recognized".into()).into_parse_error();
        assert_eq!(err.code, ErrorCode::ArchitectFailed);
        assert_eq!(err.stage, Stage::Architect);
    }

    #[test]
    fn unknown_errors_map_to_orchestration() {
        let err = Error::Other("boom".into()).into_parse_error();
        assert_eq!(err.code, ErrorCode::UnknownFailure);
        assert_eq!(err.stage, Stage::Orchestration);
    }
}
