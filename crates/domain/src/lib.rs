//! Shared domain types for the Parserator extraction kernel.
//!
//! Everything the other crates agree on lives here: plan and step value
//! types, parse requests and responses, diagnostics, the error type, the
//! configuration tree, and the telemetry event fabric.

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod plan;
pub mod request;
pub mod response;
pub mod schema;
pub mod telemetry;

pub use diagnostics::{ParseDiagnostic, Severity, Stage};
pub use error::{Error, ErrorCode, ParseError, Result};
pub use plan::{
    Complexity, DetectedFormat, PlanMetadata, PlanOrigin, PlanStrategy, SearchPlan, SearchStep,
    ValidationType,
};
pub use request::{ParseOptions, ParseRequest};
pub use response::{
    FieldAudit, FieldAuditAction, FieldFallbackSummary, ParseMetadata, ParseResponse, StageMetrics,
};
pub use schema::SchemaValue;
pub use telemetry::{
    FallbackAction, ListenerHandle, QueueSnapshot, RefreshAction, RewriteAction, TelemetryEvent,
    TelemetryHub, TelemetryKind, TelemetrySource,
};
