//! Session behavior: charge-once architect tokens, plan reuse across
//! parse_many, auto-refresh triggering and draining, and cold-start
//! hydration.

use std::sync::Arc;

use parking_lot::Mutex;
use psr_core::{
    plan_cache_key, CoreOptions, ParseRequest, ParseManyOptions, ParseratorCore, PlanOrigin,
    SessionOptions, TelemetryHub, TelemetryKind,
};
use psr_domain::config::AutoRefreshConfig;
use psr_domain::telemetry::RefreshAction;
use serde_json::{json, Map, Value};

fn schema(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn contact_schema() -> Map<String, Value> {
    schema(&[("name", json!("name")), ("email", json!("email"))])
}

fn core() -> ParseratorCore {
    ParseratorCore::new(CoreOptions::new("test-key")).unwrap()
}

#[tokio::test]
async fn architect_tokens_charge_once_per_plan() {
    let core = core();
    let mut session = core.create_session(contact_schema(), SessionOptions::default());

    let first = session
        .parse("Name: Jane Doe\nEmail: jane@example.com", None)
        .await;
    assert!(first.success);
    assert!(first.metadata.architect_tokens > 0);

    let second = session
        .parse("Name: Ana Lopez\nEmail: ana@acme.io", None)
        .await;
    assert!(second.success);
    assert_eq!(second.metadata.architect_tokens, 0);

    session.wait_for_idle().await;
    let snapshot = session.snapshot();
    assert_eq!(snapshot.totals.parse_count, 2);
    assert_eq!(
        snapshot.totals.architect_tokens,
        first.metadata.architect_tokens as u64
    );
}

#[tokio::test]
async fn parses_since_refresh_counts_without_triggers() {
    let core = core();
    let mut session = core.create_session(
        contact_schema(),
        SessionOptions {
            auto_refresh: Some(AutoRefreshConfig::default()),
            ..Default::default()
        },
    );

    for _ in 0..3 {
        session
            .parse("Name: Jane Doe\nEmail: jane@example.com", None)
            .await;
    }
    session.wait_for_idle().await;
    assert_eq!(session.snapshot().auto_refresh.parses_since_refresh, 3);
}

#[tokio::test]
async fn low_confidence_streak_triggers_auto_refresh() {
    let hub = Arc::new(TelemetryHub::new());
    let actions: Arc<Mutex<Vec<RefreshAction>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&actions);
    hub.subscribe(move |event| {
        if let TelemetryKind::PlanAutoRefresh { action, .. } = &event.kind {
            sink.lock().push(*action);
        }
    });

    let core = ParseratorCore::new(CoreOptions {
        telemetry: Some(hub),
        ..CoreOptions::new("test-key")
    })
    .unwrap();

    // Opaque schema over unlabeled prose keeps blended confidence far
    // below the refresh floor.
    let mut session = core.create_session(
        schema(&[("blob", json!({"widget": 1}))]),
        SessionOptions {
            auto_refresh: Some(AutoRefreshConfig {
                min_confidence: Some(0.9),
                low_confidence_grace: 0,
                min_interval_ms: 0,
                max_parses: None,
            }),
            ..Default::default()
        },
    );

    session.parse("nothing extractable here", None).await;
    assert!(actions.lock().contains(&RefreshAction::Triggered));

    session.parse("still nothing extractable", None).await;
    session.wait_for_idle().await;

    let snapshot = session.snapshot();
    assert_eq!(snapshot.auto_refresh.last_reason.as_deref(), Some("confidence"));
    assert!(!snapshot.auto_refresh.pending);
    assert!(actions.lock().contains(&RefreshAction::Completed));
}

#[tokio::test]
async fn usage_cap_triggers_refresh_and_resets_counter() {
    let core = core();
    let mut session = core.create_session(
        contact_schema(),
        SessionOptions {
            auto_refresh: Some(AutoRefreshConfig {
                min_confidence: None,
                max_parses: Some(2),
                min_interval_ms: 0,
                low_confidence_grace: 1,
            }),
            ..Default::default()
        },
    );

    session
        .parse("Name: Jane Doe\nEmail: jane@example.com", None)
        .await;
    session
        .parse("Name: Ana Lopez\nEmail: ana@acme.io", None)
        .await;
    session.wait_for_idle().await;

    let snapshot = session.snapshot();
    assert_eq!(snapshot.auto_refresh.last_reason.as_deref(), Some("usage"));
    assert_eq!(snapshot.auto_refresh.parses_since_refresh, 0);
}

#[tokio::test]
async fn idle_drain_flushes_the_plan_cache_write_queue() {
    let core = core();
    let mut session = core.create_session(contact_schema(), SessionOptions::default());

    session
        .parse("Name: Jane Doe\nEmail: jane@example.com", None)
        .await;
    session.wait_for_idle().await;

    let key = plan_cache_key(&contact_schema(), None, None, None);
    let entry = core.get_plan_cache_entry(&key).await.unwrap();
    assert!(entry.is_some(), "session plan should be written through");
}

#[tokio::test]
async fn parse_many_reuses_one_plan() {
    let core = core();
    let requests = vec![
        ParseRequest::new("Name: Jane Doe\nEmail: jane@example.com", contact_schema()),
        ParseRequest::new("Name: Ana Lopez\nEmail: ana@acme.io", contact_schema()),
        ParseRequest::new("Name: Kim Park\nEmail: kim@beta.dev", contact_schema()),
    ];

    let responses = core
        .parse_many(requests, ParseManyOptions::default())
        .await
        .unwrap();
    assert_eq!(responses.len(), 3);
    assert!(responses.iter().all(|r| r.success));
    assert!(responses[0].metadata.architect_tokens > 0);
    assert_eq!(responses[1].metadata.architect_tokens, 0);
    assert_eq!(responses[2].metadata.architect_tokens, 0);
}

#[tokio::test]
async fn parse_many_rejects_mixed_schemas() {
    let core = core();
    let requests = vec![
        ParseRequest::new("a", contact_schema()),
        ParseRequest::new("b", schema(&[("other", json!("string"))])),
    ];
    assert!(core
        .parse_many(requests, ParseManyOptions::default())
        .await
        .is_err());
}

#[tokio::test]
async fn session_hydrates_from_a_prior_response() {
    let core = core();
    let request = ParseRequest::new("Name: Jane Doe\nEmail: jane@example.com", contact_schema());
    let response = core.parse(request.clone()).await;
    assert!(response.success);

    let mut session = core
        .create_session_from_response(&request, &response, None)
        .unwrap();
    let replay = session
        .parse("Name: Ana Lopez\nEmail: ana@acme.io", None)
        .await;

    assert!(replay.success);
    assert_eq!(replay.metadata.architect_tokens, 0);
    assert_eq!(
        replay.metadata.architect_plan.unwrap().metadata.origin,
        PlanOrigin::Cached
    );
    session.wait_for_idle().await;
}

#[tokio::test]
async fn export_init_round_trips_through_json() {
    let core = core();
    let mut session = core.create_session(contact_schema(), SessionOptions::default());
    session
        .parse("Name: Jane Doe\nEmail: jane@example.com", None)
        .await;
    session.wait_for_idle().await;

    let serialized = serde_json::to_string(&session.export_init()).unwrap();
    let init: psr_core::SessionInit = serde_json::from_str(&serialized).unwrap();
    let mut revived = psr_core::ParseSession::from_init(core, init);

    let response = revived
        .parse("Name: Ana Lopez\nEmail: ana@acme.io", None)
        .await;
    assert!(response.success);
    assert_eq!(response.metadata.architect_tokens, 0);
    assert_eq!(revived.session_id(), session.session_id());
    revived.wait_for_idle().await;
}

#[tokio::test]
async fn refresh_plan_noop_without_changes_and_restores_on_demand() {
    let core = core();
    let mut session = core.create_session(contact_schema(), SessionOptions::default());
    session
        .parse("Name: Jane Doe\nEmail: jane@example.com", None)
        .await;
    let before = session.plan_state();

    // No changes, no force: the plan is untouched.
    session
        .refresh_plan(psr_core::RefreshPlanOptions::default())
        .await
        .unwrap();
    let after = session.plan_state();
    assert_eq!(
        before.plan.as_ref().unwrap().id,
        after.plan.as_ref().unwrap().id
    );

    // Forced refresh mints a new plan and re-arms token billing.
    session
        .refresh_plan(psr_core::RefreshPlanOptions {
            force: true,
            ..Default::default()
        })
        .await
        .unwrap();
    let forced = session.plan_state();
    assert_ne!(
        before.plan.as_ref().unwrap().id,
        forced.plan.as_ref().unwrap().id
    );
    assert!(!forced.tokens_billed);
    session.wait_for_idle().await;
}
