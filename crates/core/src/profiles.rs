use std::sync::Arc;

use psr_domain::config::CoreConfig;
use psr_domain::PlanStrategy;
use psr_heuristics::Matchers;
use psr_resolvers::{
    FieldResolver, JsonResolver, LooseKeyValueResolver, SectionResolver, TypedPatternResolver,
};

use crate::architect::ArchitectAgent;
use crate::extractor::ExtractorAgent;

/// The deterministic resolver chain, in consultation order.
pub fn default_resolver_chain() -> Vec<Arc<dyn FieldResolver>> {
    let matchers = Arc::new(Matchers::new());
    vec![
        Arc::new(JsonResolver::new()),
        Arc::new(SectionResolver::new(Arc::clone(&matchers))),
        Arc::new(TypedPatternResolver::new(matchers)),
    ]
}

/// Preset bundle of configuration and component choices.
pub trait Profile: Send + Sync {
    fn name(&self) -> &str;

    fn configure(&self, ctx: ProfileContext) -> ProfileOutcome;
}

pub struct ProfileContext {
    pub config: CoreConfig,
}

#[derive(Default)]
pub struct ProfileOutcome {
    pub config: Option<CoreConfig>,
    pub architect: Option<Arc<dyn ArchitectAgent>>,
    pub extractor: Option<Arc<dyn ExtractorAgent>>,
    pub resolvers: Option<Vec<Arc<dyn FieldResolver>>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Built-in profiles
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The default bundle: stock config, stock components.
struct LeanAgent;

impl Profile for LeanAgent {
    fn name(&self) -> &str {
        "lean-agent"
    }

    fn configure(&self, _ctx: ProfileContext) -> ProfileOutcome {
        ProfileOutcome::default()
    }
}

/// Permissive bundle for messy free-form inputs: lower confidence floor,
/// adaptive strategy, and the loose key-value resolver in the chain.
struct VibeCoder;

impl Profile for VibeCoder {
    fn name(&self) -> &str {
        "vibe-coder"
    }

    fn configure(&self, ctx: ProfileContext) -> ProfileOutcome {
        let mut config = ctx.config;
        config.min_confidence = 0.4;
        config.default_strategy = PlanStrategy::Adaptive;

        let matchers = Arc::new(Matchers::new());
        let resolvers: Vec<Arc<dyn FieldResolver>> = vec![
            Arc::new(JsonResolver::new()),
            Arc::new(SectionResolver::new(Arc::clone(&matchers))),
            Arc::new(LooseKeyValueResolver::new(Arc::clone(&matchers))),
            Arc::new(TypedPatternResolver::new(matchers)),
        ];

        ProfileOutcome {
            config: Some(config),
            resolvers: Some(resolvers),
            ..Default::default()
        }
    }
}

/// Strict bundle for high-volume machine feeds: higher confidence floor,
/// parallel strategy hint, larger inputs, no LLM fallbacks.
struct SensorGrid;

impl Profile for SensorGrid {
    fn name(&self) -> &str {
        "sensor-grid"
    }

    fn configure(&self, ctx: ProfileContext) -> ProfileOutcome {
        let mut config = ctx.config;
        config.min_confidence = 0.75;
        config.default_strategy = PlanStrategy::Parallel;
        config.max_input_length = 400_000;
        config.enable_field_fallbacks = false;
        config.field_fallback.enabled = false;
        config.plan_rewrite.enabled = false;

        ProfileOutcome {
            config: Some(config),
            ..Default::default()
        }
    }
}

/// Look up a built-in profile by name.
pub fn builtin_profile(name: &str) -> Option<Box<dyn Profile>> {
    match name {
        "lean-agent" => Some(Box::new(LeanAgent)),
        "vibe-coder" => Some(Box::new(VibeCoder)),
        "sensor-grid" => Some(Box::new(SensorGrid)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_profile_is_none() {
        assert!(builtin_profile("warp-drive").is_none());
    }

    #[test]
    fn vibe_coder_adds_loose_key_value_resolver() {
        let outcome = builtin_profile("vibe-coder")
            .unwrap()
            .configure(ProfileContext {
                config: CoreConfig::default(),
            });
        let config = outcome.config.unwrap();
        assert_eq!(config.min_confidence, 0.4);
        assert_eq!(config.default_strategy, PlanStrategy::Adaptive);

        let names: Vec<String> = outcome
            .resolvers
            .unwrap()
            .iter()
            .map(|r| r.name().to_string())
            .collect();
        assert!(names.contains(&"loose-key-value".to_string()));
    }

    #[test]
    fn sensor_grid_disables_fallbacks() {
        let outcome = builtin_profile("sensor-grid")
            .unwrap()
            .configure(ProfileContext {
                config: CoreConfig::default(),
            });
        let config = outcome.config.unwrap();
        assert!(!config.enable_field_fallbacks);
        assert!(!config.field_fallback.enabled);
        assert_eq!(config.max_input_length, 400_000);
    }

    #[test]
    fn lean_agent_changes_nothing() {
        let outcome = builtin_profile("lean-agent")
            .unwrap()
            .configure(ProfileContext {
                config: CoreConfig::default(),
            });
        assert!(outcome.config.is_none());
        assert!(outcome.resolvers.is_none());
    }
}
