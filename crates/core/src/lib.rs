//! Parserator core: the structured-data extraction kernel.
//!
//! Composes the architect (plan generation), the extractor (plan
//! execution over the resolver chain), the plan cache, pre/postprocessor
//! stages, profiles, telemetry and interceptors behind the
//! [`ParseratorCore`] facade, plus the reusable [`ParseSession`]
//! abstraction with plan reuse and auto-refresh.

pub mod architect;
pub mod cache;
pub mod extractor;
pub mod kernel;
pub mod processors;
pub mod profiles;
pub mod rewrite;
pub mod session;

pub use architect::{ArchitectAgent, ArchitectContext, ArchitectResult, HeuristicArchitect};
pub use cache::{plan_cache_key, InMemoryPlanCache, PlanCache, PlanCacheEntry};
pub use extractor::{ExtractorAgent, ExtractorContext, ExtractorResult, HeuristicExtractor};
pub use kernel::{
    CoreOptions, InterceptorHandle, ParseInterceptor, ParseManyOptions, ParseratorCore,
};
pub use processors::{
    default_postprocessors, default_preprocessors, Postprocessor, PostprocessContext,
    PostprocessResult, Preprocessor, PreprocessContext, PreprocessResult,
};
pub use profiles::{builtin_profile, default_resolver_chain, Profile, ProfileContext, ProfileOutcome};
pub use rewrite::{HybridArchitect, PlanRewriteState};
pub use session::{
    AutoRefreshState, ParseSession, PlanState, RefreshPlanOptions, SessionInit, SessionOptions,
    SessionSnapshot, SessionTotals,
};

// The domain vocabulary is part of the public surface.
pub use psr_domain::{
    config, Complexity, DetectedFormat, Error, ErrorCode, FieldAudit, FieldAuditAction,
    FieldFallbackSummary, ParseDiagnostic, ParseError, ParseMetadata, ParseOptions, ParseRequest,
    ParseResponse, PlanMetadata, PlanOrigin, PlanStrategy, Result, SchemaValue, SearchPlan,
    SearchStep, Severity, Stage, StageMetrics, TelemetryEvent, TelemetryHub, TelemetryKind,
    TelemetrySource, ValidationType,
};
pub use psr_llm::{
    FieldBatchContext, FieldBatchOutcome, FieldFallbackClient, FieldQuery, LlmUsage,
    PlanRewriteClient, PlanRewriteContext, PlanRewriteOutcome,
};
pub use psr_resolvers::{
    FieldFallbackState, FieldResolution, FieldResolver, LeanLlmResolver, ResolveContext,
    ResolverRegistry, Scratchpad,
};
