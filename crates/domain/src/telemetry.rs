//! Typed lifecycle events and the fan-out hub.
//!
//! Listeners are untrusted: the hub snapshots the listener list before
//! iterating, catches panics, logs them, and never lets a listener failure
//! reach the parse pipeline. Every emitted event is also mirrored to
//! structured `tracing` output.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::diagnostics::Stage;
use crate::error::ErrorCode;
use crate::plan::PlanOrigin;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event payloads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetrySource {
    Core,
    Session,
}

/// Counters describing an async queue at the moment of an event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub pending: u64,
    pub in_flight: u64,
    pub completed: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewriteAction {
    Queued,
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshAction {
    Queued,
    Triggered,
    Completed,
    Failed,
    Skipped,
}

impl RefreshAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Triggered => "triggered",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackAction {
    Queued,
    Started,
    Resolved,
    Failed,
    Skipped,
}

/// What happened, with the payload specific to each lifecycle point.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TelemetryKind {
    ParseStart,
    ParseStage {
        stage: Stage,
    },
    ParseSuccess {
        confidence: f64,
    },
    ParseFailure {
        code: ErrorCode,
    },
    PlanReady {
        origin: PlanOrigin,
        confidence: f64,
    },
    PlanCache {
        hit: bool,
        key: String,
    },
    PlanRewrite {
        action: RewriteAction,
        queue: QueueSnapshot,
        #[serde(skip_serializing_if = "Option::is_none")]
        skip_reason: Option<String>,
    },
    PlanAutoRefresh {
        action: RefreshAction,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        skip_reason: Option<String>,
    },
    FieldFallback {
        action: FallbackAction,
        #[serde(skip_serializing_if = "Option::is_none")]
        field: Option<String>,
        queue: QueueSnapshot,
        #[serde(skip_serializing_if = "Option::is_none")]
        skip_reason: Option<String>,
    },
}

/// A lifecycle event with its common envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub request_id: String,
    /// RFC 3339.
    pub timestamp: String,
    pub source: TelemetrySource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(flatten)]
    pub kind: TelemetryKind,
}

impl TelemetryEvent {
    pub fn new(request_id: impl Into<String>, source: TelemetrySource, kind: TelemetryKind) -> Self {
        Self {
            request_id: request_id.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            source,
            profile: None,
            session_id: None,
            kind,
        }
    }

    pub fn with_profile(mut self, profile: Option<String>) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Mirror the event to structured logs.
    pub fn log(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::debug!(telemetry_event = %json, "psr_event");
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Hub
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

type Listener = dyn Fn(&TelemetryEvent) + Send + Sync;

/// Opaque registration handle; pass back to [`TelemetryHub::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerHandle(u64);

/// Fan-out registry of telemetry listeners.
#[derive(Default)]
pub struct TelemetryHub {
    listeners: RwLock<Vec<(u64, Arc<Listener>)>>,
    next_id: AtomicU64,
}

impl TelemetryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. The returned handle unregisters it.
    pub fn subscribe<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&TelemetryEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.write().push((id, Arc::new(listener)));
        ListenerHandle(id)
    }

    pub fn unsubscribe(&self, handle: ListenerHandle) {
        self.listeners.write().retain(|(id, _)| *id != handle.0);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Deliver an event to every registered listener, then mirror it to
    /// structured logs. Listener panics are caught and logged; emission
    /// iterates a snapshot so listeners may unsubscribe concurrently.
    pub fn emit(&self, event: TelemetryEvent) {
        let snapshot: Vec<Arc<Listener>> = self
            .listeners
            .read()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();

        for listener in snapshot {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener(&event);
            }));
            if outcome.is_err() {
                tracing::warn!(
                    request_id = %event.request_id,
                    "telemetry listener panicked, dropping error"
                );
            }
        }

        event.log();
    }
}
