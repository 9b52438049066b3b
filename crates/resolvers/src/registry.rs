use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use psr_domain::{DetectedFormat, ParseDiagnostic, Result, SearchStep, Stage};

use crate::scratchpad::Scratchpad;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Resolver contract
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything a resolver may consult for one step. The request itself is
/// never handed over; cross-resolver state goes through the scratchpad.
pub struct ResolveContext<'a> {
    pub step: &'a SearchStep,
    pub input_data: &'a str,
    pub scratchpad: &'a Scratchpad,
    pub request_id: &'a str,
    pub detected_format: DetectedFormat,
    /// The plan's own confidence, used by gated resolvers.
    pub plan_confidence: f64,
    /// Steps not yet resolved in this parse, in plan order. Includes the
    /// current step.
    pub pending_steps: &'a [SearchStep],
    pub instructions: Option<&'a str>,
    pub timeout_ms: Option<u64>,
}

/// What one resolver produced for one step. A `value` of `None` means the
/// resolver ran but found nothing; its diagnostics still count.
#[derive(Debug, Clone)]
pub struct FieldResolution {
    pub value: Option<Value>,
    pub confidence: f64,
    pub diagnostics: Vec<ParseDiagnostic>,
    /// Name of the resolver that produced the winning value (empty for the
    /// aggregated no-value result).
    pub resolver: String,
}

impl FieldResolution {
    pub fn found(value: Value, confidence: f64) -> Self {
        Self {
            value: Some(value),
            confidence,
            diagnostics: Vec::new(),
            resolver: String::new(),
        }
    }

    pub fn not_found() -> Self {
        Self {
            value: None,
            confidence: 0.0,
            diagnostics: Vec::new(),
            resolver: String::new(),
        }
    }

    pub fn with_diagnostic(mut self, diagnostic: ParseDiagnostic) -> Self {
        self.diagnostics.push(diagnostic);
        self
    }
}

/// Pluggable strategy for finding a single field's value.
#[async_trait]
pub trait FieldResolver: Send + Sync {
    fn name(&self) -> &str;

    /// Cheap pre-filter; a resolver returning `false` is not consulted for
    /// the step.
    fn supports(&self, _step: &SearchStep) -> bool {
        true
    }

    /// `Ok(None)` means "skip": the resolver did not apply to this step.
    async fn resolve(&self, ctx: &ResolveContext<'_>) -> Result<Option<FieldResolution>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Ordered chain of field resolvers.
///
/// Resolvers run in registration order; the first non-skip result carrying
/// a value wins. Diagnostics accumulate across every consulted resolver,
/// and a resolver error is downgraded to a warning diagnostic; the walk
/// itself never fails.
#[derive(Clone, Default)]
pub struct ResolverRegistry {
    resolvers: Vec<Arc<dyn FieldResolver>>,
}

impl ResolverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, resolver: Arc<dyn FieldResolver>) {
        self.resolvers.push(resolver);
    }

    pub fn replace(&mut self, resolvers: Vec<Arc<dyn FieldResolver>>) {
        self.resolvers = resolvers;
    }

    pub fn into_resolvers(self) -> Vec<Arc<dyn FieldResolver>> {
        self.resolvers
    }

    pub fn names(&self) -> Vec<String> {
        self.resolvers.iter().map(|r| r.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }

    /// Walk the chain for one step.
    pub async fn resolve(&self, ctx: &ResolveContext<'_>) -> FieldResolution {
        let mut diagnostics: Vec<ParseDiagnostic> = Vec::new();

        for resolver in &self.resolvers {
            if !resolver.supports(ctx.step) {
                continue;
            }

            match resolver.resolve(ctx).await {
                Ok(Some(mut resolution)) => {
                    diagnostics.append(&mut resolution.diagnostics);
                    if resolution.value.is_some() {
                        return FieldResolution {
                            value: resolution.value,
                            confidence: resolution.confidence,
                            diagnostics,
                            resolver: resolver.name().to_string(),
                        };
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        resolver = resolver.name(),
                        field = %ctx.step.target_key,
                        error = %e,
                        "resolver failed, continuing chain"
                    );
                    diagnostics.push(ParseDiagnostic::warning(
                        ctx.step.target_key.clone(),
                        Stage::Extractor,
                        format!("resolver '{}' failed: {e}", resolver.name()),
                    ));
                }
            }
        }

        FieldResolution {
            value: None,
            confidence: 0.0,
            diagnostics,
            resolver: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use psr_domain::{Error, ValidationType};
    use serde_json::json;

    struct Fixed {
        name: &'static str,
        outcome: Outcome,
    }

    enum Outcome {
        Skip,
        Empty(&'static str),
        Value(Value, f64),
        Fail,
    }

    #[async_trait]
    impl FieldResolver for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        async fn resolve(&self, ctx: &ResolveContext<'_>) -> Result<Option<FieldResolution>> {
            match &self.outcome {
                Outcome::Skip => Ok(None),
                Outcome::Empty(msg) => Ok(Some(FieldResolution::not_found().with_diagnostic(
                    ParseDiagnostic::info(ctx.step.target_key.clone(), Stage::Extractor, *msg),
                ))),
                Outcome::Value(v, c) => Ok(Some(FieldResolution::found(v.clone(), *c))),
                Outcome::Fail => Err(Error::Resolver {
                    resolver: self.name.into(),
                    message: "boom".into(),
                }),
            }
        }
    }

    fn step() -> SearchStep {
        SearchStep {
            target_key: "email".into(),
            description: "email".into(),
            search_instruction: "find the email".into(),
            validation_type: ValidationType::Email,
            is_required: true,
        }
    }

    fn registry(outcomes: Vec<(&'static str, Outcome)>) -> ResolverRegistry {
        let mut registry = ResolverRegistry::new();
        for (name, outcome) in outcomes {
            registry.register(Arc::new(Fixed { name, outcome }));
        }
        registry
    }

    async fn run(registry: &ResolverRegistry) -> FieldResolution {
        let step = step();
        let pad = Scratchpad::new();
        let pending = [step.clone()];
        let ctx = ResolveContext {
            step: &step,
            input_data: "input",
            scratchpad: &pad,
            request_id: "req-1",
            detected_format: DetectedFormat::Text,
            plan_confidence: 0.5,
            pending_steps: &pending,
            instructions: None,
            timeout_ms: None,
        };
        registry.resolve(&ctx).await
    }

    #[tokio::test]
    async fn first_value_wins_and_diagnostics_accumulate() {
        let registry = registry(vec![
            ("skipper", Outcome::Skip),
            ("empty", Outcome::Empty("looked, nothing")),
            ("hit", Outcome::Value(json!("jane@x.io"), 0.9)),
            ("never", Outcome::Value(json!("wrong"), 0.1)),
        ]);
        let result = run(&registry).await;
        assert_eq!(result.value, Some(json!("jane@x.io")));
        assert_eq!(result.resolver, "hit");
        assert_eq!(result.diagnostics.len(), 1);
    }

    #[tokio::test]
    async fn errors_become_warnings_and_chain_continues() {
        let registry = registry(vec![
            ("broken", Outcome::Fail),
            ("hit", Outcome::Value(json!(42), 0.8)),
        ]);
        let result = run(&registry).await;
        assert_eq!(result.value, Some(json!(42)));
        assert_eq!(result.diagnostics.len(), 1);
        assert!(result.diagnostics[0].message.contains("broken"));
    }

    #[tokio::test]
    async fn all_skip_with_diagnostics_yields_empty_aggregate() {
        let registry = registry(vec![
            ("e1", Outcome::Empty("nothing here")),
            ("e2", Outcome::Empty("nor here")),
        ]);
        let result = run(&registry).await;
        assert!(result.value.is_none());
        assert!(result.resolver.is_empty());
        assert_eq!(result.diagnostics.len(), 2);
    }
}
