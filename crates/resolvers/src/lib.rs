//! The field-resolver stack: an ordered registry of pluggable strategies
//! for locating a single field's value in the input, plus the default
//! deterministic chain and the optional lean LLM fallback.

pub mod json;
pub mod keyvalue;
pub mod lean_llm;
pub mod registry;
pub mod scratchpad;
pub mod section;
pub mod typed;

pub use json::JsonResolver;
pub use keyvalue::LooseKeyValueResolver;
pub use lean_llm::{FieldFallbackState, LeanLlmResolver};
pub use registry::{FieldResolution, FieldResolver, ResolveContext, ResolverRegistry};
pub use scratchpad::Scratchpad;
pub use section::SectionResolver;
pub use typed::TypedPatternResolver;
