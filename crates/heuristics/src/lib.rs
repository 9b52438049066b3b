//! Deterministic text heuristics shared by the architect and the resolver
//! chain: input format sniffing, key normalization, section segmentation,
//! validation-type inference, typed value matchers, and cost estimates.

pub mod estimate;
pub mod format;
pub mod keys;
pub mod sections;
pub mod validate;

pub use estimate::{complexity, estimate_tokens};
pub use format::detect_format;
pub use keys::{key_tokens, key_variants, normalize_key, underscore_key};
pub use sections::{segment, Section};
pub use validate::{infer_validation_type, is_field_optional, Matchers};
