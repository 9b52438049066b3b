use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::task::JoinSet;
use uuid::Uuid;

use psr_domain::config::AutoRefreshConfig;
use psr_domain::telemetry::{RefreshAction, TelemetryKind};
use psr_domain::{
    Error, ErrorCode, ParseDiagnostic, ParseError, ParseMetadata, ParseOptions, ParseRequest,
    ParseResponse, PlanOrigin, Result, SearchPlan, Stage, TelemetryEvent, TelemetrySource,
};
use psr_queue::TaskQueue;

use crate::cache::plan_cache_key;
use crate::kernel::{ParseratorCore, PreparedPlan};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Options + serializable projections
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub session_id: Option<String>,
    pub instructions: Option<String>,
    pub options: Option<ParseOptions>,
    pub auto_refresh: Option<AutoRefreshConfig>,
    pub default_seed_input: Option<String>,
}

/// Serializable cold-start record; see [`ParseSession::export_init`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInit {
    pub session_id: Option<String>,
    pub output_schema: Map<String, Value>,
    pub instructions: Option<String>,
    pub options: Option<ParseOptions>,
    pub auto_refresh: Option<AutoRefreshConfig>,
    pub default_seed_input: Option<String>,
    pub plan: Option<SearchPlan>,
    pub plan_confidence: Option<f64>,
    pub plan_updated_at: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SessionTotals {
    pub architect_tokens: u64,
    pub extractor_tokens: u64,
    pub parse_count: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AutoRefreshState {
    pub parses_since_refresh: u32,
    pub low_confidence_runs: u32,
    pub last_triggered_at: Option<String>,
    pub last_attempt_at: Option<String>,
    pub pending: bool,
    pub last_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanSummary {
    pub id: String,
    pub version: u32,
    pub origin: PlanOrigin,
    pub steps: usize,
    pub planner_confidence: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub plan: Option<PlanSummary>,
    pub plan_updated_at: Option<String>,
    pub last_confidence: f64,
    pub totals: SessionTotals,
    pub auto_refresh: AutoRefreshState,
}

/// Current plan with billing state; for dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct PlanState {
    pub plan: Option<SearchPlan>,
    pub updated_at: Option<String>,
    pub confidence: f64,
    pub tokens_billed: bool,
}

/// Regenerate-now options; see [`ParseSession::refresh_plan`].
#[derive(Debug, Clone, Default)]
pub struct RefreshPlanOptions {
    pub force: bool,
    pub instructions: Option<String>,
    pub options: Option<ParseOptions>,
    pub seed_input: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Internal shared state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct PlanSlot {
    plan: Option<SearchPlan>,
    confidence: f64,
    diagnostics: Vec<ParseDiagnostic>,
    updated_at: Option<DateTime<Utc>>,
    pending_tokens: u32,
    tokens_billed: bool,
}

#[derive(Default)]
struct RefreshRuntime {
    parses_since_refresh: u32,
    low_confidence_runs: u32,
    last_triggered_at: Option<DateTime<Utc>>,
    last_attempt_at: Option<DateTime<Utc>>,
    pending: bool,
    last_reason: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Reusable parse context bound to a stable schema/instructions pair.
///
/// Single-owner: a session must not run two parses concurrently, so the
/// mutating surface takes `&mut self`. Background work (plan-cache writes,
/// auto-refresh) lands on owned task sets that [`ParseSession::wait_for_idle`]
/// drains.
pub struct ParseSession {
    kernel: ParseratorCore,
    session_id: String,
    output_schema: Map<String, Value>,
    instructions: Option<String>,
    options: Option<ParseOptions>,
    auto_refresh: Option<AutoRefreshConfig>,
    default_seed_input: Option<String>,
    last_seed_input: Option<String>,
    last_confidence: f64,
    totals: SessionTotals,
    plan_slot: Arc<Mutex<PlanSlot>>,
    refresh: Arc<Mutex<RefreshRuntime>>,
    background: JoinSet<()>,
    cache_queue: TaskQueue,
}

impl ParseSession {
    pub(crate) fn new(
        kernel: ParseratorCore,
        output_schema: Map<String, Value>,
        options: SessionOptions,
    ) -> Self {
        Self {
            kernel,
            session_id: options
                .session_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            output_schema,
            instructions: options.instructions,
            options: options.options,
            auto_refresh: options.auto_refresh,
            default_seed_input: options.default_seed_input,
            last_seed_input: None,
            last_confidence: 0.0,
            totals: SessionTotals::default(),
            plan_slot: Arc::new(Mutex::new(PlanSlot::default())),
            refresh: Arc::new(Mutex::new(RefreshRuntime::default())),
            background: JoinSet::new(),
            cache_queue: TaskQueue::new(1),
        }
    }

    /// Rebuild a session from a serialized [`SessionInit`]. A carried plan
    /// is treated as cached: architect tokens are never charged for it.
    pub fn from_init(kernel: ParseratorCore, init: SessionInit) -> Self {
        let mut session = Self::new(
            kernel,
            init.output_schema,
            SessionOptions {
                session_id: init.session_id,
                instructions: init.instructions,
                options: init.options,
                auto_refresh: init.auto_refresh,
                default_seed_input: init.default_seed_input,
            },
        );
        if let Some(plan) = init.plan {
            let confidence = init
                .plan_confidence
                .unwrap_or(plan.metadata.planner_confidence);
            let updated_at = init
                .plan_updated_at
                .as_deref()
                .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                .map(|t| t.with_timezone(&Utc));
            let mut slot = session.plan_slot.lock();
            slot.plan = Some(plan.clone_with_origin(PlanOrigin::Cached));
            slot.confidence = confidence;
            slot.updated_at = updated_at.or_else(|| Some(Utc::now()));
            slot.pending_tokens = 0;
            slot.tokens_billed = true;
            drop(slot);
            session
        } else {
            session
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    // ──────────────────────────────────────────────────────────────
    // Parse
    // ──────────────────────────────────────────────────────────────

    /// Run one parse against the session plan, generating the plan lazily
    /// on first use.
    pub async fn parse(
        &mut self,
        input_data: &str,
        overrides: Option<ParseOptions>,
    ) -> ParseResponse {
        let prepared = match self.ensure_plan(input_data).await {
            Ok(prepared) => prepared,
            Err(e) => {
                let message = e.to_string();
                let mut metadata = ParseMetadata::empty(Uuid::new_v4().to_string());
                metadata
                    .diagnostics
                    .push(ParseDiagnostic::error("*", Stage::Architect, message.clone()));
                self.emit_refresh_kind(TelemetryKind::ParseFailure {
                    code: ErrorCode::ArchitectFailed,
                });
                return ParseResponse::failure(
                    ParseError::new(ErrorCode::ArchitectFailed, message, Stage::Architect),
                    metadata,
                );
            }
        };

        let request = ParseRequest {
            input_data: input_data.to_string(),
            output_schema: self.output_schema.clone(),
            instructions: self.instructions.clone(),
            options: overrides.or_else(|| self.options.clone()),
        };
        let response = self
            .kernel
            .parse_inner(request, Some(prepared), Some(self.session_id.clone()))
            .await;

        self.totals.architect_tokens += response.metadata.architect_tokens as u64;
        self.totals.extractor_tokens += response.metadata.extractor_tokens as u64;
        self.totals.parse_count += 1;
        self.last_confidence = response.metadata.confidence;

        self.evaluate_auto_refresh(response.metadata.confidence, input_data);

        response
    }

    /// Lazily generate (or adopt from the kernel cache) the session plan,
    /// then hand out a clone. Architect tokens and plan diagnostics are
    /// handed out exactly once per plan lifetime.
    async fn ensure_plan(&mut self, input_data: &str) -> Result<PreparedPlan> {
        let needs_plan = self.plan_slot.lock().plan.is_none();

        if needs_plan {
            let seed = self
                .default_seed_input
                .clone()
                .unwrap_or_else(|| input_data.to_string());
            let request_id = Uuid::new_v4().to_string();
            let config = self.kernel.get_config();
            let profile = self.kernel.get_profile();
            let key = plan_cache_key(
                &self.output_schema,
                self.instructions.as_deref(),
                self.options.as_ref(),
                profile.as_deref(),
            );

            // Fast path: another consumer may already have planned this
            // schema through the kernel cache.
            let mut adopted = false;
            if let Some(cache) = self.kernel.plan_cache_handle() {
                if let Ok(Some(entry)) = cache.get(&key).await {
                    if !config.plan_cache.is_stale(entry.age_ms()) {
                        let mut slot = self.plan_slot.lock();
                        slot.plan = Some(entry.plan.clone_with_origin(PlanOrigin::Cached));
                        slot.confidence = entry.confidence;
                        slot.diagnostics = entry.diagnostics.clone();
                        slot.diagnostics.push(ParseDiagnostic::info(
                            "*",
                            Stage::Architect,
                            "session plan adopted from plan cache",
                        ));
                        slot.updated_at = Some(Utc::now());
                        slot.pending_tokens = 0;
                        slot.tokens_billed = true;
                        adopted = true;
                    }
                }
            }

            if !adopted {
                let request = ParseRequest {
                    input_data: seed.clone(),
                    output_schema: self.output_schema.clone(),
                    instructions: self.instructions.clone(),
                    options: self.options.clone(),
                };
                let result = self.kernel.generate_plan(&request, &config, &request_id).await?;

                {
                    let mut slot = self.plan_slot.lock();
                    slot.plan = Some(result.plan.clone());
                    slot.confidence = result.confidence;
                    slot.diagnostics = result.diagnostics.clone();
                    slot.updated_at = Some(Utc::now());
                    slot.pending_tokens = result.tokens;
                    slot.tokens_billed = false;
                }
                self.last_seed_input = Some(seed);

                // Plan-cache write happens off the parse path.
                let kernel = self.kernel.clone();
                let write_key = key.clone();
                let write_config = config.clone();
                let write_profile = profile.clone();
                let _ = self.cache_queue.enqueue(async move {
                    kernel
                        .persist_plan(&write_key, &result, &write_config, &write_profile)
                        .await;
                    Ok::<_, Error>(())
                });
            }

            let slot = self.plan_slot.lock();
            if let Some(plan) = &slot.plan {
                self.emit_refresh_kind(TelemetryKind::PlanReady {
                    origin: plan.metadata.origin,
                    confidence: slot.confidence,
                });
            }
        }

        let mut slot = self.plan_slot.lock();
        let plan = slot
            .plan
            .clone()
            .ok_or_else(|| Error::Architect("session holds no plan".into()))?;
        let tokens = if slot.tokens_billed {
            0
        } else {
            slot.pending_tokens
        };
        slot.tokens_billed = true;
        // Plan diagnostics ride along on the first parse only.
        let diagnostics = std::mem::take(&mut slot.diagnostics);

        Ok(PreparedPlan {
            plan,
            confidence: slot.confidence,
            tokens,
            diagnostics,
        })
    }

    // ──────────────────────────────────────────────────────────────
    // Auto-refresh
    // ──────────────────────────────────────────────────────────────

    fn evaluate_auto_refresh(&mut self, blended: f64, input_data: &str) {
        let Some(config) = self.auto_refresh.clone() else {
            return;
        };

        let decision = {
            let mut rt = self.refresh.lock();
            rt.parses_since_refresh += 1;

            let mut reason: Option<&'static str> = None;
            if let Some(min_confidence) = config.min_confidence {
                if blended < min_confidence {
                    rt.low_confidence_runs += 1;
                } else {
                    rt.low_confidence_runs = 0;
                }
                if rt.low_confidence_runs > config.low_confidence_grace {
                    reason = Some("confidence");
                }
            }
            if reason.is_none() {
                if let Some(max_parses) = config.max_parses {
                    if rt.parses_since_refresh >= max_parses {
                        reason = Some("usage");
                    }
                }
            }

            match reason {
                None => None,
                Some(reason) if rt.pending => Some((reason, Some("pending"))),
                Some(reason) => {
                    let in_cooldown = rt.last_triggered_at.is_some_and(|last| {
                        let elapsed = Utc::now().signed_duration_since(last).num_milliseconds();
                        elapsed >= 0 && (elapsed as u64) < config.min_interval_ms
                    });
                    if in_cooldown {
                        Some((reason, Some("cooldown")))
                    } else {
                        rt.pending = true;
                        rt.last_triggered_at = Some(Utc::now());
                        rt.last_attempt_at = Some(Utc::now());
                        Some((reason, None))
                    }
                }
            }
        };

        let Some((reason, skip)) = decision else {
            return;
        };
        if let Some(skip) = skip {
            self.emit_refresh(RefreshAction::Skipped, Some(reason), Some(skip));
            return;
        }
        self.emit_refresh(RefreshAction::Triggered, Some(reason), None);
        self.spawn_refresh(reason, input_data);
    }

    fn spawn_refresh(&mut self, reason: &'static str, input_data: &str) {
        let seed = self
            .last_seed_input
            .clone()
            .or_else(|| self.default_seed_input.clone())
            .unwrap_or_else(|| input_data.to_string());

        let kernel = self.kernel.clone();
        let session_id = self.session_id.clone();
        let output_schema = self.output_schema.clone();
        let instructions = self.instructions.clone();
        let options = self.options.clone();
        let plan_slot = Arc::clone(&self.plan_slot);
        let refresh = Arc::clone(&self.refresh);
        let cache_queue = self.cache_queue.clone();

        self.background.spawn(async move {
            let request_id = Uuid::new_v4().to_string();
            let config = kernel.get_config();
            let profile = kernel.get_profile();
            let request = ParseRequest {
                input_data: seed,
                output_schema: output_schema.clone(),
                instructions: instructions.clone(),
                options: options.clone(),
            };

            let emit = |action: RefreshAction| {
                kernel.telemetry().emit(
                    TelemetryEvent::new(
                        Uuid::new_v4().to_string(),
                        TelemetrySource::Session,
                        TelemetryKind::PlanAutoRefresh {
                            action,
                            reason: Some(reason.to_string()),
                            skip_reason: None,
                        },
                    )
                    .with_profile(profile.clone())
                    .with_session(session_id.clone()),
                );
            };

            match kernel.generate_plan(&request, &config, &request_id).await {
                Ok(result) => {
                    {
                        let mut slot = plan_slot.lock();
                        slot.plan = Some(result.plan.clone());
                        slot.confidence = result.confidence;
                        slot.diagnostics = result.diagnostics.clone();
                        slot.updated_at = Some(Utc::now());
                        slot.pending_tokens = result.tokens;
                        slot.tokens_billed = false;
                    }
                    {
                        let mut rt = refresh.lock();
                        rt.pending = false;
                        rt.parses_since_refresh = 0;
                        rt.low_confidence_runs = 0;
                        rt.last_reason = Some(reason.to_string());
                    }

                    let key = plan_cache_key(
                        &output_schema,
                        instructions.as_deref(),
                        options.as_ref(),
                        profile.as_deref(),
                    );
                    let write_kernel = kernel.clone();
                    let write_config = config.clone();
                    let write_profile = profile.clone();
                    let _ = cache_queue.enqueue(async move {
                        write_kernel
                            .persist_plan(&key, &result, &write_config, &write_profile)
                            .await;
                        Ok::<_, Error>(())
                    });

                    emit(RefreshAction::Completed);
                }
                Err(e) => {
                    refresh.lock().pending = false;
                    tracing::warn!(session_id = %session_id, error = %e, "auto-refresh failed");
                    emit(RefreshAction::Failed);
                }
            }
        });
    }

    /// Synchronously regenerate the plan. No-ops when nothing changes and
    /// `force` is unset; restores the previous state on failure.
    pub async fn refresh_plan(&mut self, options: RefreshPlanOptions) -> Result<()> {
        let no_changes = options.instructions.is_none()
            && options.options.is_none()
            && options.seed_input.is_none();
        if no_changes && !options.force {
            return Ok(());
        }

        let previous_instructions = self.instructions.clone();
        let previous_options = self.options.clone();
        let previous_seed = self.last_seed_input.clone();

        if let Some(instructions) = options.instructions {
            self.instructions = Some(instructions);
        }
        if let Some(parse_options) = options.options {
            self.options = Some(parse_options);
        }
        let seed = options
            .seed_input
            .clone()
            .or_else(|| self.last_seed_input.clone())
            .or_else(|| self.default_seed_input.clone());
        let Some(seed) = seed else {
            self.instructions = previous_instructions;
            self.options = previous_options;
            return Err(Error::Validation(
                "refresh_plan needs a seed input; none is available".into(),
            ));
        };
        self.last_seed_input = Some(seed.clone());

        let request_id = Uuid::new_v4().to_string();
        let config = self.kernel.get_config();
        let profile = self.kernel.get_profile();
        let request = ParseRequest {
            input_data: seed,
            output_schema: self.output_schema.clone(),
            instructions: self.instructions.clone(),
            options: self.options.clone(),
        };

        match self.kernel.generate_plan(&request, &config, &request_id).await {
            Ok(result) => {
                {
                    let mut slot = self.plan_slot.lock();
                    slot.plan = Some(result.plan.clone());
                    slot.confidence = result.confidence;
                    slot.diagnostics = result.diagnostics.clone();
                    slot.updated_at = Some(Utc::now());
                    slot.pending_tokens = result.tokens;
                    slot.tokens_billed = false;
                }
                {
                    let mut rt = self.refresh.lock();
                    rt.parses_since_refresh = 0;
                    rt.low_confidence_runs = 0;
                }

                let key = plan_cache_key(
                    &self.output_schema,
                    self.instructions.as_deref(),
                    self.options.as_ref(),
                    profile.as_deref(),
                );
                let kernel = self.kernel.clone();
                let _ = self.cache_queue.enqueue(async move {
                    kernel.persist_plan(&key, &result, &config, &profile).await;
                    Ok::<_, Error>(())
                });
                Ok(())
            }
            Err(e) => {
                self.instructions = previous_instructions;
                self.options = previous_options;
                self.last_seed_input = previous_seed;
                Err(e)
            }
        }
    }

    // ──────────────────────────────────────────────────────────────
    // Draining + projections
    // ──────────────────────────────────────────────────────────────

    /// Await every background task this session has spawned: auto-refresh
    /// work plus the plan-cache write queue.
    pub async fn wait_for_idle(&mut self) {
        while self.background.join_next().await.is_some() {}
        self.cache_queue.on_idle().await;
    }

    pub fn plan_state(&self) -> PlanState {
        let slot = self.plan_slot.lock();
        PlanState {
            plan: slot.plan.clone(),
            updated_at: slot.updated_at.map(|t| t.to_rfc3339()),
            confidence: slot.confidence,
            tokens_billed: slot.tokens_billed,
        }
    }

    pub fn get_auto_refresh_state(&self) -> AutoRefreshState {
        let rt = self.refresh.lock();
        AutoRefreshState {
            parses_since_refresh: rt.parses_since_refresh,
            low_confidence_runs: rt.low_confidence_runs,
            last_triggered_at: rt.last_triggered_at.map(|t| t.to_rfc3339()),
            last_attempt_at: rt.last_attempt_at.map(|t| t.to_rfc3339()),
            pending: rt.pending,
            last_reason: rt.last_reason.clone(),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let slot = self.plan_slot.lock();
        SessionSnapshot {
            session_id: self.session_id.clone(),
            plan: slot.plan.as_ref().map(|p| PlanSummary {
                id: p.id.clone(),
                version: p.version,
                origin: p.metadata.origin,
                steps: p.steps.len(),
                planner_confidence: p.metadata.planner_confidence,
            }),
            plan_updated_at: slot.updated_at.map(|t| t.to_rfc3339()),
            last_confidence: self.last_confidence,
            totals: self.totals,
            auto_refresh: self.get_auto_refresh_state(),
        }
    }

    /// Serializable record that [`ParseSession::from_init`] accepts.
    pub fn export_init(&self) -> SessionInit {
        let slot = self.plan_slot.lock();
        SessionInit {
            session_id: Some(self.session_id.clone()),
            output_schema: self.output_schema.clone(),
            instructions: self.instructions.clone(),
            options: self.options.clone(),
            auto_refresh: self.auto_refresh.clone(),
            default_seed_input: self.default_seed_input.clone(),
            plan: slot.plan.clone(),
            plan_confidence: Some(slot.confidence),
            plan_updated_at: slot.updated_at.map(|t| t.to_rfc3339()),
        }
    }

    fn emit_refresh(
        &self,
        action: RefreshAction,
        reason: Option<&str>,
        skip_reason: Option<&str>,
    ) {
        self.emit_refresh_kind(TelemetryKind::PlanAutoRefresh {
            action,
            reason: reason.map(str::to_string),
            skip_reason: skip_reason.map(str::to_string),
        });
    }

    fn emit_refresh_kind(&self, kind: TelemetryKind) {
        self.kernel.telemetry().emit(
            TelemetryEvent::new(Uuid::new_v4().to_string(), TelemetrySource::Session, kind)
                .with_profile(self.kernel.get_profile())
                .with_session(self.session_id.clone()),
        );
    }
}
