use serde::{Deserialize, Serialize};

/// Pipeline stage a diagnostic or error originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Preprocess,
    Validation,
    Architect,
    Extractor,
    Postprocess,
    Orchestration,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Preprocess => "preprocess",
            Self::Validation => "validation",
            Self::Architect => "architect",
            Self::Extractor => "extractor",
            Self::Postprocess => "postprocess",
            Self::Orchestration => "orchestration",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A structured message attached to a parse.
///
/// Diagnostics are append-only and keep lifecycle order: preprocess entries
/// first, then architect (or validation), extractor, postprocess, and any
/// late orchestration warnings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseDiagnostic {
    /// Field the message concerns, or `"*"` for parse-wide messages.
    pub field: String,
    pub stage: Stage,
    pub message: String,
    pub severity: Severity,
}

impl ParseDiagnostic {
    pub fn info(field: impl Into<String>, stage: Stage, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            stage,
            message: message.into(),
            severity: Severity::Info,
        }
    }

    pub fn warning(field: impl Into<String>, stage: Stage, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            stage,
            message: message.into(),
            severity: Severity::Warning,
        }
    }

    pub fn error(field: impl Into<String>, stage: Stage, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            stage,
            message: message.into(),
            severity: Severity::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_tags_are_snake_case() {
        let json = serde_json::to_string(&Stage::Preprocess).unwrap();
        assert_eq!(json, "\"preprocess\"");
    }

    #[test]
    fn constructors_set_severity() {
        let d = ParseDiagnostic::warning("total", Stage::Extractor, "no match");
        assert_eq!(d.severity, Severity::Warning);
        assert_eq!(d.field, "total");
    }
}
