mod cache;
mod fallback;
mod refresh;
mod rewrite;

pub use cache::*;
pub use fallback::*;
pub use refresh::*;
pub use rewrite::*;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::plan::PlanStrategy;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level kernel config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Blended-confidence floor. Parses below it get a warning, or a
    /// `LOW_CONFIDENCE` failure when field fallbacks are disabled.
    #[serde(default = "d_min_confidence")]
    pub min_confidence: f64,
    #[serde(default = "d_max_input_length")]
    pub max_input_length: usize,
    #[serde(default = "d_max_schema_fields")]
    pub max_schema_fields: usize,
    #[serde(default = "d_default_strategy")]
    pub default_strategy: PlanStrategy,
    #[serde(default = "d_enable_field_fallbacks")]
    pub enable_field_fallbacks: bool,
    #[serde(default)]
    pub plan_cache: PlanCachePolicy,
    #[serde(default)]
    pub plan_rewrite: PlanRewriteConfig,
    #[serde(default)]
    pub field_fallback: LeanLlmConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            min_confidence: d_min_confidence(),
            max_input_length: d_max_input_length(),
            max_schema_fields: d_max_schema_fields(),
            default_strategy: d_default_strategy(),
            enable_field_fallbacks: d_enable_field_fallbacks(),
            plan_cache: PlanCachePolicy::default(),
            plan_rewrite: PlanRewriteConfig::default(),
            field_fallback: LeanLlmConfig::default(),
        }
    }
}

fn d_min_confidence() -> f64 {
    0.55
}

fn d_max_input_length() -> usize {
    120_000
}

fn d_max_schema_fields() -> usize {
    64
}

fn d_default_strategy() -> PlanStrategy {
    PlanStrategy::Sequential
}

fn d_enable_field_fallbacks() -> bool {
    true
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

fn issue(severity: ConfigSeverity, field: &str, message: impl Into<String>) -> ConfigIssue {
    ConfigIssue {
        severity,
        field: field.into(),
        message: message.into(),
    }
}

impl CoreConfig {
    /// Validate the composed configuration. Errors indicate a config the
    /// kernel refuses to run with; warnings flag likely mistakes.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if !(0.0..=1.0).contains(&self.min_confidence) {
            issues.push(issue(
                ConfigSeverity::Error,
                "min_confidence",
                format!("must be within [0, 1], got {}", self.min_confidence),
            ));
        }
        if self.max_input_length == 0 {
            issues.push(issue(
                ConfigSeverity::Error,
                "max_input_length",
                "must be at least 1",
            ));
        }
        if self.max_schema_fields == 0 {
            issues.push(issue(
                ConfigSeverity::Error,
                "max_schema_fields",
                "must be at least 1",
            ));
        }

        if !(0.0..=1.0).contains(&self.field_fallback.plan_confidence_gate) {
            issues.push(issue(
                ConfigSeverity::Error,
                "field_fallback.plan_confidence_gate",
                "must be within [0, 1]",
            ));
        }
        if self.field_fallback.concurrency == 0 {
            issues.push(issue(
                ConfigSeverity::Error,
                "field_fallback.concurrency",
                "must be at least 1",
            ));
        }
        if self.field_fallback.max_input_characters < 256 {
            issues.push(issue(
                ConfigSeverity::Warning,
                "field_fallback.max_input_characters",
                "very small excerpts rarely resolve anything",
            ));
        }

        if self.plan_rewrite.concurrency == 0 {
            issues.push(issue(
                ConfigSeverity::Error,
                "plan_rewrite.concurrency",
                "must be at least 1",
            ));
        }
        if self.plan_rewrite.enabled && self.plan_rewrite.cooldown_ms == 0 {
            issues.push(issue(
                ConfigSeverity::Warning,
                "plan_rewrite.cooldown_ms",
                "zero cooldown allows rewrite storms",
            ));
        }

        if let Some(floor) = self.plan_cache.min_confidence {
            if !(0.0..=1.0).contains(&floor) {
                issues.push(issue(
                    ConfigSeverity::Error,
                    "plan_cache.min_confidence",
                    "must be within [0, 1]",
                ));
            }
        }

        issues
    }

    pub fn has_errors(issues: &[ConfigIssue]) -> bool {
        issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_clean() {
        let issues = CoreConfig::default().validate();
        assert!(issues.is_empty(), "unexpected issues: {issues:?}");
    }

    #[test]
    fn out_of_range_confidence_is_an_error() {
        let config = CoreConfig {
            min_confidence: 1.5,
            ..Default::default()
        };
        let issues = config.validate();
        assert!(CoreConfig::has_errors(&issues));
        assert!(issues.iter().any(|i| i.field == "min_confidence"));
    }

    #[test]
    fn zero_rewrite_cooldown_is_a_warning() {
        let mut config = CoreConfig::default();
        config.plan_rewrite.cooldown_ms = 0;
        let issues = config.validate();
        assert!(!CoreConfig::has_errors(&issues));
        assert!(issues
            .iter()
            .any(|i| i.field == "plan_rewrite.cooldown_ms"));
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = CoreConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: CoreConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.max_schema_fields, config.max_schema_fields);
        assert_eq!(back.field_fallback.concurrency, config.field_fallback.concurrency);
    }
}
