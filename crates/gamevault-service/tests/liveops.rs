//! LiveOps integration tests.

mod common;

use common::TestHarness;
use gamevault_core::UserId;
use serde_json::{json, Value};

async fn create_event(harness: &TestHarness, body: Value) -> Value {
    let response = harness
        .server
        .post("/v1/admin/liveops/events")
        .add_header("authorization", harness.admin_auth_header())
        .json(&body)
        .await;
    assert_eq!(response.status_code(), 201);
    response.json()
}

async fn trigger(harness: &TestHarness, event_id: &str) -> axum_test::TestResponse {
    harness
        .server
        .post(&format!("/v1/admin/liveops/events/{event_id}/trigger"))
        .add_header("authorization", harness.admin_auth_header())
        .await
}

#[tokio::test]
async fn currency_event_grants_every_target() {
    let harness = TestHarness::new();
    let (a, b) = (UserId::generate(), UserId::generate());

    let event = create_event(
        &harness,
        json!({
            "name": "launch gift",
            "action": { "type": "grant_currency", "currency": "coins", "amount": 50 },
            "target_users": [a.to_string(), b.to_string()]
        }),
    )
    .await;
    assert_eq!(event["status"], "scheduled");
    let event_id = event["id"].as_str().unwrap();

    let response = trigger(&harness, event_id).await;
    response.assert_status_ok();
    let report: Value = response.json();
    assert_eq!(report["succeeded"], 2);
    assert_eq!(report["failed"], 0);
    assert_eq!(report["event"]["status"], "completed");

    for user_id in [a, b] {
        assert_eq!(harness.wallet(user_id).await["coins"], 50);
    }

    let activity: Value = harness
        .server
        .get("/v1/admin/liveops/activity")
        .add_header("authorization", harness.admin_auth_header())
        .add_query_param("event_id", event_id)
        .await
        .json();
    let per_user = activity["activity"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|entry| entry["user_id"].is_string())
        .count();
    assert_eq!(per_user, 2);
}

#[tokio::test]
async fn completed_event_cannot_fire_again() {
    let harness = TestHarness::new();
    let target = UserId::generate();
    let event = create_event(
        &harness,
        json!({
            "name": "xp boost",
            "action": { "type": "grant_xp", "amount": 100 },
            "target_users": [target.to_string()]
        }),
    )
    .await;
    let event_id = event["id"].as_str().unwrap();

    trigger(&harness, event_id).await.assert_status_ok();
    let again = trigger(&harness, event_id).await;

    assert_eq!(again.status_code(), 409);
    let progression: Value = harness
        .server
        .get("/v1/progression")
        .add_header("authorization", TestHarness::auth_header_for(target))
        .await
        .json();
    assert_eq!(progression["xp"], 100);
}

#[tokio::test]
async fn double_xp_event_sets_the_multiplier_until_cancelled() {
    let harness = TestHarness::new();
    let ends_at = chrono::Utc::now() + chrono::Duration::hours(1);
    let event = create_event(
        &harness,
        json!({
            "name": "double xp weekend",
            "action": { "type": "double_xp", "multiplier": 2.0 },
            "ends_at": ends_at
        }),
    )
    .await;
    let event_id = event["id"].as_str().unwrap();

    let report: Value = trigger(&harness, event_id).await.json();
    assert_eq!(report["event"]["status"], "active");

    let status: Value = harness
        .server
        .get("/v1/status")
        .add_header("authorization", harness.user_auth_header())
        .await
        .json();
    assert_eq!(status["xp_multiplier"], 2.0);
    assert_eq!(status["active_events"].as_array().unwrap().len(), 1);

    let cancelled: Value = harness
        .server
        .post(&format!("/v1/admin/liveops/events/{event_id}/cancel"))
        .add_header("authorization", harness.admin_auth_header())
        .await
        .json();
    assert_eq!(cancelled["status"], "cancelled");

    let status: Value = harness
        .server
        .get("/v1/status")
        .add_header("authorization", harness.user_auth_header())
        .await
        .json();
    assert_eq!(status["xp_multiplier"], 1.0);
}

#[tokio::test]
async fn events_are_listed_by_status() {
    let harness = TestHarness::new();
    create_event(
        &harness,
        json!({
            "name": "notice",
            "action": { "type": "announcement", "message": "maintenance at noon" }
        }),
    )
    .await;

    let scheduled: Value = harness
        .server
        .get("/v1/admin/liveops/events")
        .add_header("authorization", harness.admin_auth_header())
        .add_query_param("status", "scheduled")
        .await
        .json();
    assert_eq!(scheduled["events"].as_array().unwrap().len(), 1);

    let active: Value = harness
        .server
        .get("/v1/admin/liveops/events")
        .add_header("authorization", harness.admin_auth_header())
        .add_query_param("status", "active")
        .await
        .json();
    assert!(active["events"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_event_is_not_found() {
    let harness = TestHarness::new();

    let response = trigger(&harness, &gamevault_core::EventId::generate().to_string()).await;

    assert_eq!(response.status_code(), 404);
}
