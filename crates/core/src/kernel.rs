use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::json;
use uuid::Uuid;

use psr_domain::config::{ConfigIssue, CoreConfig};
use psr_domain::telemetry::TelemetryKind;
use psr_domain::{
    Error, ErrorCode, ParseDiagnostic, ParseError, ParseMetadata, ParseRequest, ParseResponse,
    Result, SearchPlan, Stage, StageMetrics, TelemetryEvent, TelemetryHub, TelemetrySource,
};
use psr_llm::{FieldFallbackClient, PlanRewriteClient};
use psr_resolvers::{FieldFallbackState, FieldResolver, LeanLlmResolver, ResolverRegistry};

use crate::architect::{ArchitectAgent, ArchitectContext, ArchitectResult, HeuristicArchitect};
use crate::cache::{plan_cache_key, InMemoryPlanCache, PlanCache, PlanCacheEntry};
use crate::extractor::{ExtractorAgent, ExtractorContext, HeuristicExtractor};
use crate::processors::{
    default_postprocessors, default_preprocessors, run_postprocessors, run_preprocessors,
    Postprocessor, Preprocessor,
};
use crate::profiles::{builtin_profile, default_resolver_chain, Profile, ProfileContext};
use crate::rewrite::{HybridArchitect, PlanRewriteState};
use crate::session::{ParseSession, SessionInit, SessionOptions};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Interceptors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Hook points around the parse lifecycle. Interceptor failures are logged
/// and never change the parse outcome.
#[async_trait]
pub trait ParseInterceptor: Send + Sync {
    fn name(&self) -> &str;

    async fn before_parse(&self, _request: &ParseRequest, _request_id: &str) -> Result<()> {
        Ok(())
    }

    async fn on_success(&self, _response: &ParseResponse) -> Result<()> {
        Ok(())
    }

    async fn on_failure(&self, _response: &ParseResponse) -> Result<()> {
        Ok(())
    }
}

/// Opaque handle returned by [`ParseratorCore::use_interceptor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterceptorHandle(u64);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Options
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Construction-time composition of the kernel.
pub struct CoreOptions {
    /// Opaque credential handed to external LLM clients. Must be non-empty.
    pub api_key: String,
    pub config: Option<CoreConfig>,
    pub profile: Option<String>,
    pub architect: Option<Arc<dyn ArchitectAgent>>,
    pub extractor: Option<Arc<dyn ExtractorAgent>>,
    pub resolvers: Option<Vec<Arc<dyn FieldResolver>>>,
    pub plan_cache: Option<Arc<dyn PlanCache>>,
    /// Run without any plan cache at all.
    pub disable_plan_cache: bool,
    pub preprocessors: Option<Vec<Arc<dyn Preprocessor>>>,
    pub postprocessors: Option<Vec<Arc<dyn Postprocessor>>>,
    /// Share a hub that already has listeners attached.
    pub telemetry: Option<Arc<TelemetryHub>>,
    pub interceptors: Vec<Arc<dyn ParseInterceptor>>,
    pub rewrite_client: Option<Arc<dyn PlanRewriteClient>>,
    pub fallback_client: Option<Arc<dyn FieldFallbackClient>>,
}

impl CoreOptions {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            config: None,
            profile: None,
            architect: None,
            extractor: None,
            resolvers: None,
            plan_cache: None,
            disable_plan_cache: false,
            preprocessors: None,
            postprocessors: None,
            telemetry: None,
            interceptors: Vec::new(),
            rewrite_client: None,
            fallback_client: None,
        }
    }
}

impl fmt::Debug for CoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreOptions")
            .field("api_key", &"***redacted***")
            .field("profile", &self.profile)
            .field("disable_plan_cache", &self.disable_plan_cache)
            .finish_non_exhaustive()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Kernel
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(crate) struct Inner {
    api_key: String,
    config: RwLock<CoreConfig>,
    profile: RwLock<Option<String>>,
    architect: RwLock<Arc<dyn ArchitectAgent>>,
    hybrid: RwLock<Option<Arc<HybridArchitect>>>,
    extractor: RwLock<Arc<dyn ExtractorAgent>>,
    registry: RwLock<ResolverRegistry>,
    lean: Option<Arc<LeanLlmResolver>>,
    rewrite_client: Option<Arc<dyn PlanRewriteClient>>,
    plan_cache: Option<Arc<dyn PlanCache>>,
    telemetry: Arc<TelemetryHub>,
    preprocessors: RwLock<Vec<Arc<dyn Preprocessor>>>,
    postprocessors: RwLock<Vec<Arc<dyn Postprocessor>>>,
    interceptors: RwLock<Vec<(u64, Arc<dyn ParseInterceptor>)>>,
    next_interceptor_id: AtomicU64,
}

/// A plan prepared outside the kernel lifecycle (session reuse, hydration).
#[derive(Debug, Clone)]
pub(crate) struct PreparedPlan {
    pub plan: SearchPlan,
    pub confidence: f64,
    pub tokens: u32,
    pub diagnostics: Vec<ParseDiagnostic>,
}

/// The extraction kernel facade.
///
/// Cheap to clone; clones share state. Configuration and component updates
/// apply between parses only.
#[derive(Clone)]
pub struct ParseratorCore {
    pub(crate) inner: Arc<Inner>,
}

impl ParseratorCore {
    pub fn new(options: CoreOptions) -> Result<Self> {
        if options.api_key.trim().is_empty() {
            return Err(Error::Config("api_key must be non-empty".into()));
        }

        // defaults, then profile overrides, then user overrides.
        let mut config = CoreConfig::default();
        let mut profile_architect = None;
        let mut profile_extractor = None;
        let mut profile_resolvers = None;
        if let Some(name) = &options.profile {
            let profile = builtin_profile(name)
                .ok_or_else(|| Error::Config(format!("unknown profile '{name}'")))?;
            let outcome = profile.configure(ProfileContext {
                config: config.clone(),
            });
            if let Some(c) = outcome.config {
                config = c;
            }
            profile_architect = outcome.architect;
            profile_extractor = outcome.extractor;
            profile_resolvers = outcome.resolvers;
        }
        if let Some(user) = options.config {
            config = user;
        }

        let issues = config.validate();
        if CoreConfig::has_errors(&issues) {
            let joined = issues
                .iter()
                .map(|i| i.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(Error::Config(joined));
        }
        for issue in &issues {
            tracing::warn!(issue = %issue, "config warning");
        }

        let telemetry = options.telemetry.unwrap_or_else(|| Arc::new(TelemetryHub::new()));

        let mut registry = ResolverRegistry::new();
        registry.replace(
            options
                .resolvers
                .or(profile_resolvers)
                .unwrap_or_else(default_resolver_chain),
        );
        let lean = options.fallback_client.map(|client| {
            Arc::new(LeanLlmResolver::new(
                config.field_fallback.clone(),
                client,
                Arc::clone(&telemetry),
            ))
        });
        if let Some(lean) = &lean {
            registry.register(Arc::clone(lean) as Arc<dyn FieldResolver>);
        }

        let base_architect: Arc<dyn ArchitectAgent> = options
            .architect
            .or(profile_architect)
            .unwrap_or_else(|| Arc::new(HeuristicArchitect::new()));
        let (architect, hybrid) = match &options.rewrite_client {
            Some(client) => {
                let hybrid = Arc::new(HybridArchitect::new(
                    base_architect,
                    Arc::clone(client),
                    config.plan_rewrite.clone(),
                    Arc::clone(&telemetry),
                ));
                (
                    Arc::clone(&hybrid) as Arc<dyn ArchitectAgent>,
                    Some(hybrid),
                )
            }
            None => (base_architect, None),
        };

        let extractor: Arc<dyn ExtractorAgent> = options
            .extractor
            .or(profile_extractor)
            .unwrap_or_else(|| Arc::new(HeuristicExtractor::new()));

        let plan_cache = if options.disable_plan_cache {
            None
        } else {
            Some(
                options
                    .plan_cache
                    .unwrap_or_else(|| Arc::new(InMemoryPlanCache::new())),
            )
        };

        let interceptors = options
            .interceptors
            .into_iter()
            .enumerate()
            .map(|(i, interceptor)| (i as u64, interceptor))
            .collect::<Vec<_>>();
        let next_id = interceptors.len() as u64;

        Ok(Self {
            inner: Arc::new(Inner {
                api_key: options.api_key,
                config: RwLock::new(config),
                profile: RwLock::new(options.profile),
                architect: RwLock::new(architect),
                hybrid: RwLock::new(hybrid),
                extractor: RwLock::new(extractor),
                registry: RwLock::new(registry),
                lean,
                rewrite_client: options.rewrite_client,
                plan_cache,
                telemetry,
                preprocessors: RwLock::new(
                    options.preprocessors.unwrap_or_else(default_preprocessors),
                ),
                postprocessors: RwLock::new(
                    options
                        .postprocessors
                        .unwrap_or_else(default_postprocessors),
                ),
                interceptors: RwLock::new(interceptors),
                next_interceptor_id: AtomicU64::new(next_id),
            }),
        })
    }

    // ──────────────────────────────────────────────────────────────
    // Parse lifecycle
    // ──────────────────────────────────────────────────────────────

    pub async fn parse(&self, request: ParseRequest) -> ParseResponse {
        self.parse_inner(request, None, None).await
    }

    pub(crate) async fn parse_inner(
        &self,
        mut request: ParseRequest,
        prepared: Option<PreparedPlan>,
        session_id: Option<String>,
    ) -> ParseResponse {
        let request_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        let config = self.inner.config.read().clone();
        let profile = self.inner.profile.read().clone();
        let source = if session_id.is_some() {
            TelemetrySource::Session
        } else {
            TelemetrySource::Core
        };

        let emit = |kind: TelemetryKind| {
            let mut event =
                TelemetryEvent::new(&request_id, source, kind).with_profile(profile.clone());
            if let Some(id) = &session_id {
                event = event.with_session(id.clone());
            }
            self.inner.telemetry.emit(event);
        };

        let mut diagnostics: Vec<ParseDiagnostic> = Vec::new();
        let mut breakdown: BTreeMap<String, StageMetrics> = BTreeMap::new();

        // 1. Preprocess.
        let preprocessors = self.inner.preprocessors.read().clone();
        let pre = run_preprocessors(&preprocessors, &mut request, &request_id).await;
        diagnostics.extend(pre.diagnostics);
        if pre.metrics.runs.unwrap_or(0) > 0 {
            breakdown.insert("preprocess".into(), pre.metrics);
            emit(TelemetryKind::ParseStage {
                stage: Stage::Preprocess,
            });
        }

        // 2. Before-parse interceptors.
        for (_, interceptor) in self.inner.interceptors.read().clone() {
            if let Err(e) = interceptor.before_parse(&request, &request_id).await {
                tracing::warn!(
                    interceptor = interceptor.name(),
                    error = %e,
                    "before_parse interceptor failed"
                );
            }
        }

        // 3. Parse start.
        emit(TelemetryKind::ParseStart);

        // 4. Validate.
        if let Some(message) = validate_request(&request, &config) {
            diagnostics.push(ParseDiagnostic::error("*", Stage::Validation, message.clone()));
            let mut metadata = self.base_metadata(&request_id, diagnostics, breakdown, started);
            metadata.confidence = 0.0;
            let error = ParseError::new(ErrorCode::Validation, message, Stage::Validation)
                .with_suggestion("check input_data and output_schema before submitting");
            emit(TelemetryKind::ParseFailure {
                code: ErrorCode::Validation,
            });
            let response = ParseResponse::failure(error, metadata);
            self.run_failure_interceptors(&response).await;
            return response;
        }

        // 5. Plan: handed off, cached, or freshly generated.
        let architect_started = Instant::now();
        let architect_result = match prepared {
            Some(prepared) => {
                diagnostics.extend(prepared.diagnostics.clone());
                ArchitectResult {
                    plan: prepared.plan,
                    confidence: prepared.confidence,
                    tokens: prepared.tokens,
                    diagnostics: Vec::new(),
                }
            }
            None => match self.plan_for_request(&request, &config, &profile, &request_id, &emit).await
            {
                Ok(mut result) => {
                    diagnostics.append(&mut result.diagnostics);
                    result
                }
                Err(e) => {
                    let message = e.to_string();
                    diagnostics.push(ParseDiagnostic::error(
                        "*",
                        Stage::Architect,
                        message.clone(),
                    ));
                    let mut metadata =
                        self.base_metadata(&request_id, diagnostics, breakdown, started);
                    metadata.confidence = 0.0;
                    let error =
                        ParseError::new(ErrorCode::ArchitectFailed, message, Stage::Architect);
                    emit(TelemetryKind::ParseFailure {
                        code: ErrorCode::ArchitectFailed,
                    });
                    let response = ParseResponse::failure(error, metadata);
                    self.run_failure_interceptors(&response).await;
                    return response;
                }
            },
        };
        breakdown.insert(
            "architect".into(),
            StageMetrics {
                time_ms: architect_started.elapsed().as_millis() as u64,
                tokens: architect_result.tokens,
                confidence: architect_result.confidence,
                runs: None,
            },
        );
        emit(TelemetryKind::ParseStage {
            stage: Stage::Architect,
        });

        // 6. Extract.
        let extractor_started = Instant::now();
        let registry = self.inner.registry.read().clone();
        let extractor = self.inner.extractor.read().clone();
        let extraction = extractor
            .execute(ExtractorContext {
                plan: &architect_result.plan,
                input_data: &request.input_data,
                registry: &registry,
                request_id: &request_id,
                instructions: request.instructions.as_deref(),
                timeout_ms: request.options.as_ref().and_then(|o| o.timeout_ms),
            })
            .await;
        let extraction = match extraction {
            Ok(extraction) => extraction,
            Err(e) => {
                let message = e.to_string();
                diagnostics.push(ParseDiagnostic::error("*", Stage::Extractor, message.clone()));
                let mut metadata = self.base_metadata(&request_id, diagnostics, breakdown, started);
                metadata.architect_plan = Some(architect_result.plan.clone());
                metadata.architect_tokens = architect_result.tokens;
                metadata.tokens_used = architect_result.tokens;
                let error = ParseError::new(ErrorCode::ExtractorFailed, message, Stage::Extractor);
                emit(TelemetryKind::ParseFailure {
                    code: ErrorCode::ExtractorFailed,
                });
                let response = ParseResponse::failure(error, metadata);
                self.run_failure_interceptors(&response).await;
                return response;
            }
        };
        diagnostics.extend(extraction.diagnostics.clone());
        breakdown.insert(
            "extractor".into(),
            StageMetrics {
                time_ms: extractor_started.elapsed().as_millis() as u64,
                tokens: extraction.tokens,
                confidence: extraction.confidence,
                runs: None,
            },
        );
        emit(TelemetryKind::ParseStage {
            stage: Stage::Extractor,
        });

        // 7. Postprocess.
        let mut parsed_data = extraction.parsed_data;
        let postprocessors = self.inner.postprocessors.read().clone();
        let post = run_postprocessors(
            &postprocessors,
            &mut parsed_data,
            Some(&architect_result.plan),
            &request_id,
        )
        .await;
        diagnostics.extend(post.diagnostics);
        if post.metrics.runs.unwrap_or(0) > 0 {
            breakdown.insert("postprocess".into(), post.metrics);
            emit(TelemetryKind::ParseStage {
                stage: Stage::Postprocess,
            });
        }

        // 8. Blend confidence and evaluate thresholds.
        let blended =
            0.35 * architect_result.confidence + 0.65 * extraction.confidence;
        let threshold = request
            .confidence_threshold()
            .unwrap_or(config.min_confidence);

        let mut error: Option<ParseError> = None;
        if !extraction.missing_required.is_empty() {
            error = Some(
                ParseError::new(
                    ErrorCode::MissingRequiredFields,
                    format!(
                        "required field(s) not found: {}",
                        extraction.missing_required.join(", ")
                    ),
                    Stage::Extractor,
                )
                .with_details(json!({ "missing": extraction.missing_required }))
                .with_suggestion(
                    "mark the field(s) optional, refine instructions, or attach an LLM fallback",
                ),
            );
        } else if blended < threshold {
            diagnostics.push(ParseDiagnostic::warning(
                "*",
                Stage::Orchestration,
                format!("blended confidence {blended:.2} below threshold {threshold:.2}"),
            ));
            if !config.enable_field_fallbacks {
                error = Some(
                    ParseError::new(
                        ErrorCode::LowConfidence,
                        format!("blended confidence {blended:.2} below threshold {threshold:.2}"),
                        Stage::Orchestration,
                    )
                    .with_suggestion("lower the confidence threshold or enable field fallbacks"),
                );
            }
        }

        // 9. Final response + telemetry + interceptors.
        let metadata = ParseMetadata {
            architect_plan: Some(architect_result.plan.clone()),
            confidence: blended,
            architect_tokens: architect_result.tokens,
            extractor_tokens: extraction.tokens,
            tokens_used: architect_result.tokens + extraction.tokens,
            processing_time_ms: started.elapsed().as_millis() as u64,
            request_id: request_id.clone(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            stage_breakdown: breakdown,
            diagnostics,
            field_fallback: extraction.field_fallback,
        };

        let response = ParseResponse {
            success: error.is_none(),
            parsed_data,
            metadata,
            error,
        };

        match &response.error {
            None => {
                emit(TelemetryKind::ParseSuccess { confidence: blended });
                for (_, interceptor) in self.inner.interceptors.read().clone() {
                    if let Err(e) = interceptor.on_success(&response).await {
                        tracing::warn!(
                            interceptor = interceptor.name(),
                            error = %e,
                            "on_success interceptor failed"
                        );
                    }
                }
            }
            Some(err) => {
                emit(TelemetryKind::ParseFailure { code: err.code });
                self.run_failure_interceptors(&response).await;
            }
        }

        response
    }

    /// Cache lookup, falling back to the architect; persists fresh plans.
    async fn plan_for_request(
        &self,
        request: &ParseRequest,
        config: &CoreConfig,
        profile: &Option<String>,
        request_id: &str,
        emit: &(dyn Fn(TelemetryKind) + Send + Sync),
    ) -> Result<ArchitectResult> {
        let key = plan_cache_key(
            &request.output_schema,
            request.instructions.as_deref(),
            request.options.as_ref(),
            profile.as_deref(),
        );

        if let Some(cache) = &self.inner.plan_cache {
            match cache.get(&key).await {
                Ok(Some(entry)) => {
                    if config.plan_cache.is_stale(entry.age_ms()) {
                        emit(TelemetryKind::PlanCache {
                            hit: false,
                            key: key.clone(),
                        });
                        let mut result = self.generate_plan(request, config, request_id).await?;
                        result.diagnostics.push(ParseDiagnostic::info(
                            "*",
                            Stage::Architect,
                            "plan cache entry was stale, regenerated",
                        ));
                        self.persist_plan(&key, &result, config, profile).await;
                        emit(TelemetryKind::PlanReady {
                            origin: result.plan.metadata.origin,
                            confidence: result.confidence,
                        });
                        return Ok(result);
                    }

                    emit(TelemetryKind::PlanCache {
                        hit: true,
                        key: key.clone(),
                    });
                    let plan = entry
                        .plan
                        .clone_with_origin(psr_domain::PlanOrigin::Cached);
                    let mut diagnostics = entry.diagnostics.clone();
                    diagnostics.push(ParseDiagnostic::info(
                        "*",
                        Stage::Architect,
                        "plan served from cache",
                    ));
                    emit(TelemetryKind::PlanReady {
                        origin: plan.metadata.origin,
                        confidence: entry.confidence,
                    });
                    return Ok(ArchitectResult {
                        plan,
                        confidence: entry.confidence,
                        tokens: 0,
                        diagnostics,
                    });
                }
                Ok(None) => {
                    emit(TelemetryKind::PlanCache {
                        hit: false,
                        key: key.clone(),
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "plan cache get failed, treating as miss");
                }
            }
        }

        let result = self.generate_plan(request, config, request_id).await?;
        self.persist_plan(&key, &result, config, profile).await;
        emit(TelemetryKind::PlanReady {
            origin: result.plan.metadata.origin,
            confidence: result.confidence,
        });
        Ok(result)
    }

    pub(crate) async fn generate_plan(
        &self,
        request: &ParseRequest,
        config: &CoreConfig,
        request_id: &str,
    ) -> Result<ArchitectResult> {
        let architect = self.inner.architect.read().clone();
        architect
            .create_plan(ArchitectContext {
                input_data: &request.input_data,
                output_schema: &request.output_schema,
                instructions: request.instructions.as_deref(),
                options: request.options.as_ref(),
                config,
                request_id,
            })
            .await
    }

    pub(crate) async fn persist_plan(
        &self,
        key: &str,
        result: &ArchitectResult,
        config: &CoreConfig,
        profile: &Option<String>,
    ) {
        let Some(cache) = &self.inner.plan_cache else {
            return;
        };
        if !config.plan_cache.admits(result.confidence) {
            return;
        }
        let entry = PlanCacheEntry {
            plan: result.plan.clone(),
            confidence: result.confidence,
            diagnostics: result.diagnostics.clone(),
            tokens: result.tokens,
            processing_time_ms: 0,
            updated_at: chrono::Utc::now().to_rfc3339(),
            profile: profile.clone(),
        };
        if let Err(e) = cache.set(key, entry).await {
            tracing::warn!(error = %e, "plan cache set failed");
        }
    }

    fn base_metadata(
        &self,
        request_id: &str,
        diagnostics: Vec<ParseDiagnostic>,
        breakdown: BTreeMap<String, StageMetrics>,
        started: Instant,
    ) -> ParseMetadata {
        let mut metadata = ParseMetadata::empty(request_id);
        metadata.diagnostics = diagnostics;
        metadata.stage_breakdown = breakdown;
        metadata.processing_time_ms = started.elapsed().as_millis() as u64;
        metadata
    }

    async fn run_failure_interceptors(&self, response: &ParseResponse) {
        for (_, interceptor) in self.inner.interceptors.read().clone() {
            if let Err(e) = interceptor.on_failure(response).await {
                tracing::warn!(
                    interceptor = interceptor.name(),
                    error = %e,
                    "on_failure interceptor failed"
                );
            }
        }
    }

    // ──────────────────────────────────────────────────────────────
    // Batch + sessions
    // ──────────────────────────────────────────────────────────────

    /// Parse a batch sharing one schema. With `reuse_plan`, the batch runs
    /// through a single session so the plan is generated once.
    pub async fn parse_many(
        &self,
        requests: Vec<ParseRequest>,
        options: ParseManyOptions,
    ) -> Result<Vec<ParseResponse>> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        if !options.reuse_plan || requests.len() == 1 {
            let mut responses = Vec::with_capacity(requests.len());
            for request in requests {
                responses.push(self.parse(request).await);
            }
            return Ok(responses);
        }

        let first = &requests[0];
        let shared_schema = first.output_schema.clone();
        let shared_instructions = first.instructions.clone();
        for request in &requests[1..] {
            if request.output_schema != shared_schema
                || request.instructions != shared_instructions
            {
                return Err(Error::Validation(
                    "parse_many with reuse_plan requires every request to share the same \
                     output_schema and instructions"
                        .into(),
                ));
            }
        }

        let seed = options
            .seed_input
            .clone()
            .unwrap_or_else(|| first.input_data.clone());
        let mut session = self.create_session(
            shared_schema,
            SessionOptions {
                instructions: shared_instructions,
                default_seed_input: Some(seed),
                ..Default::default()
            },
        );

        let mut responses = Vec::with_capacity(requests.len());
        for request in requests {
            responses.push(session.parse(&request.input_data, request.options).await);
        }
        session.wait_for_idle().await;
        Ok(responses)
    }

    pub fn create_session(
        &self,
        output_schema: serde_json::Map<String, serde_json::Value>,
        options: SessionOptions,
    ) -> ParseSession {
        ParseSession::new(self.clone(), output_schema, options)
    }

    /// Hydrate a session from a prior response, attaching its plan as a
    /// cached plan (architect tokens are never charged again).
    pub fn create_session_from_response(
        &self,
        request: &ParseRequest,
        response: &ParseResponse,
        options: Option<SessionOptions>,
    ) -> Result<ParseSession> {
        let plan = response
            .metadata
            .architect_plan
            .clone()
            .ok_or_else(|| Error::Validation("response carries no architect plan".into()))?;

        let mut options = options.unwrap_or_default();
        if options.instructions.is_none() {
            options.instructions = request.instructions.clone();
        }
        if options.options.is_none() {
            options.options = request.options.clone();
        }

        let init = SessionInit {
            session_id: None,
            output_schema: request.output_schema.clone(),
            instructions: options.instructions.clone(),
            options: options.options.clone(),
            auto_refresh: options.auto_refresh.clone(),
            default_seed_input: options
                .default_seed_input
                .clone()
                .or_else(|| Some(request.input_data.clone())),
            plan: Some(plan.clone_with_origin(psr_domain::PlanOrigin::Cached)),
            plan_confidence: Some(plan.metadata.planner_confidence),
            plan_updated_at: Some(response.metadata.timestamp.clone()),
        };
        Ok(ParseSession::from_init(self.clone(), init))
    }

    // ──────────────────────────────────────────────────────────────
    // Configuration and composition surface
    // ──────────────────────────────────────────────────────────────

    pub fn api_key(&self) -> &str {
        &self.inner.api_key
    }

    pub fn get_config(&self) -> CoreConfig {
        self.inner.config.read().clone()
    }

    /// Mutate the live configuration. Applies between parses.
    pub fn update_config(&self, apply: impl FnOnce(&mut CoreConfig)) {
        apply(&mut self.inner.config.write());
    }

    pub fn validate_config(&self) -> Vec<ConfigIssue> {
        self.inner.config.read().validate()
    }

    pub fn get_profile(&self) -> Option<String> {
        self.inner.profile.read().clone()
    }

    /// Apply a built-in profile by name.
    pub fn apply_profile(&self, name: &str) -> Result<()> {
        let profile =
            builtin_profile(name).ok_or_else(|| Error::Config(format!("unknown profile '{name}'")))?;
        self.apply_custom_profile(profile.as_ref());
        *self.inner.profile.write() = Some(name.to_string());
        Ok(())
    }

    /// Apply a caller-supplied profile bundle.
    pub fn apply_custom_profile(&self, profile: &dyn Profile) {
        let outcome = profile.configure(ProfileContext {
            config: self.get_config(),
        });
        if let Some(config) = outcome.config {
            *self.inner.config.write() = config;
        }
        if let Some(architect) = outcome.architect {
            self.set_architect(architect);
        }
        if let Some(extractor) = outcome.extractor {
            *self.inner.extractor.write() = extractor;
        }
        if let Some(resolvers) = outcome.resolvers {
            let mut registry = ResolverRegistry::new();
            registry.replace(resolvers);
            // The LLM fallback stays last in the chain across profile swaps.
            if let Some(lean) = &self.inner.lean {
                registry.register(Arc::clone(lean) as Arc<dyn FieldResolver>);
            }
            *self.inner.registry.write() = registry;
        }
        *self.inner.profile.write() = Some(profile.name().to_string());
    }

    /// Replace the architect. A configured rewrite client keeps wrapping
    /// the replacement.
    pub fn set_architect(&self, architect: Arc<dyn ArchitectAgent>) {
        match &self.inner.rewrite_client {
            Some(client) => {
                let hybrid = Arc::new(HybridArchitect::new(
                    architect,
                    Arc::clone(client),
                    self.get_config().plan_rewrite,
                    Arc::clone(&self.inner.telemetry),
                ));
                *self.inner.architect.write() = Arc::clone(&hybrid) as Arc<dyn ArchitectAgent>;
                *self.inner.hybrid.write() = Some(hybrid);
            }
            None => {
                *self.inner.architect.write() = architect;
                *self.inner.hybrid.write() = None;
            }
        }
    }

    pub fn set_extractor(&self, extractor: Arc<dyn ExtractorAgent>) {
        *self.inner.extractor.write() = extractor;
    }

    /// Append a resolver to the chain, keeping the LLM fallback last.
    pub fn register_resolver(&self, resolver: Arc<dyn FieldResolver>) {
        let mut registry = self.inner.registry.write();
        let mut list = registry.clone().into_resolvers();
        if self.inner.lean.is_some() && list.last().map(|r| r.name()) == Some("lean-llm") {
            let lean = list.pop();
            list.push(resolver);
            if let Some(lean) = lean {
                list.push(lean);
            }
        } else {
            list.push(resolver);
        }
        let mut rebuilt = ResolverRegistry::new();
        rebuilt.replace(list);
        *registry = rebuilt;
    }

    /// Swap the entire resolver chain.
    pub fn replace_resolvers(&self, resolvers: Vec<Arc<dyn FieldResolver>>) {
        let mut registry = ResolverRegistry::new();
        registry.replace(resolvers);
        *self.inner.registry.write() = registry;
    }

    pub fn list_resolvers(&self) -> Vec<String> {
        self.inner.registry.read().names()
    }

    /// Register an interceptor; the handle unregisters it.
    pub fn use_interceptor(&self, interceptor: Arc<dyn ParseInterceptor>) -> InterceptorHandle {
        let id = self.inner.next_interceptor_id.fetch_add(1, Ordering::Relaxed);
        self.inner.interceptors.write().push((id, interceptor));
        InterceptorHandle(id)
    }

    pub fn remove_interceptor(&self, handle: InterceptorHandle) {
        self.inner
            .interceptors
            .write()
            .retain(|(id, _)| *id != handle.0);
    }

    pub fn list_interceptors(&self) -> Vec<String> {
        self.inner
            .interceptors
            .read()
            .iter()
            .map(|(_, i)| i.name().to_string())
            .collect()
    }

    pub fn use_preprocessor(&self, processor: Arc<dyn Preprocessor>) {
        self.inner.preprocessors.write().push(processor);
    }

    pub fn use_postprocessor(&self, processor: Arc<dyn Postprocessor>) {
        self.inner.postprocessors.write().push(processor);
    }

    pub fn list_preprocessors(&self) -> Vec<String> {
        self.inner
            .preprocessors
            .read()
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    pub fn list_postprocessors(&self) -> Vec<String> {
        self.inner
            .postprocessors
            .read()
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    // ──────────────────────────────────────────────────────────────
    // Plan cache surface
    // ──────────────────────────────────────────────────────────────

    pub async fn get_plan_cache_entry(&self, key: &str) -> Result<Option<PlanCacheEntry>> {
        match &self.inner.plan_cache {
            Some(cache) => cache.get(key).await,
            None => Ok(None),
        }
    }

    pub async fn delete_plan_cache_entry(&self, key: &str) -> Result<()> {
        match &self.inner.plan_cache {
            Some(cache) => cache.delete(key).await,
            None => Ok(()),
        }
    }

    pub async fn clear_plan_cache(&self, profile: Option<&str>) -> Result<()> {
        match &self.inner.plan_cache {
            Some(cache) => cache.clear(profile).await,
            None => Ok(()),
        }
    }

    // ──────────────────────────────────────────────────────────────
    // Observability surface
    // ──────────────────────────────────────────────────────────────

    pub fn telemetry(&self) -> Arc<TelemetryHub> {
        Arc::clone(&self.inner.telemetry)
    }

    /// State of the plan-rewrite path, if a rewrite client is attached.
    pub fn get_lean_llm_plan_rewrite_state(&self) -> Option<PlanRewriteState> {
        self.inner.hybrid.read().as_ref().map(|h| h.state())
    }

    /// State of the field-fallback path, if a fallback client is attached.
    pub fn get_lean_llm_field_fallback_state(&self) -> Option<FieldFallbackState> {
        self.inner.lean.as_ref().map(|l| l.state())
    }

    pub(crate) fn plan_cache_handle(&self) -> Option<Arc<dyn PlanCache>> {
        self.inner.plan_cache.clone()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Batch options + validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct ParseManyOptions {
    pub reuse_plan: bool,
    pub seed_input: Option<String>,
}

impl Default for ParseManyOptions {
    fn default() -> Self {
        Self {
            reuse_plan: true,
            seed_input: None,
        }
    }
}

fn validate_request(request: &ParseRequest, config: &CoreConfig) -> Option<String> {
    if request.input_data.is_empty() {
        return Some("input_data must be a non-empty string".into());
    }
    if request.input_data.len() > config.max_input_length {
        return Some(format!(
            "input_data exceeds max_input_length ({} > {})",
            request.input_data.len(),
            config.max_input_length
        ));
    }
    if request.output_schema.is_empty() {
        return Some("output_schema must declare at least one field".into());
    }
    if request.output_schema.len() > config.max_schema_fields {
        return Some(format!(
            "output_schema exceeds max_schema_fields ({} > {})",
            request.output_schema.len(),
            config.max_schema_fields
        ));
    }
    None
}
