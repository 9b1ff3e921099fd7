//! Payment webhook and realtime delivery integration tests.

mod common;

use std::sync::Arc;

use common::{TestHarness, WEBHOOK_SECRET};
use gamevault_core::Channel;
use gamevault_engine::crypto::hmac_sha256_hex;
use gamevault_engine::Notifier;
use serde_json::{json, Value};

async fn initiate(harness: &TestHarness) -> Value {
    harness
        .server
        .post("/v1/economy/purchase/initiate")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "product_id": "gems_pack_50", "idempotency_key": "webhook-1" }))
        .await
        .json()
}

async fn send_webhook(harness: &TestHarness, body: &Value, signature: &str) -> axum_test::TestResponse {
    harness
        .server
        .post("/webhooks/payments")
        .add_header("x-gateway-signature", signature.to_string())
        .text(body.to_string())
        .await
}

fn sign(body: &Value) -> String {
    hmac_sha256_hex(WEBHOOK_SECRET, &body.to_string()).unwrap()
}

#[tokio::test]
async fn signed_success_webhook_completes_the_purchase() {
    let harness = TestHarness::new();
    let initiated = initiate(&harness).await;
    let payment_id = initiated["payment_intent"]["id"].as_str().unwrap();
    harness.gateway.confirm(payment_id).unwrap();

    let body = json!({
        "id": "evt_1",
        "type": "payment.succeeded",
        "data": { "payment_id": payment_id }
    });
    let response = send_webhook(&harness, &body, &sign(&body)).await;

    response.assert_status_ok();
    assert_eq!(harness.wallet(harness.test_user_id).await["gems"], 50);

    // Redelivery is harmless.
    send_webhook(&harness, &body, &sign(&body)).await.assert_status_ok();
    assert_eq!(harness.wallet(harness.test_user_id).await["gems"], 50);
}

#[tokio::test]
async fn failure_webhook_marks_the_purchase_failed() {
    let harness = TestHarness::new();
    let initiated = initiate(&harness).await;
    let payment_id = initiated["payment_intent"]["id"].as_str().unwrap();
    harness.gateway.fail(payment_id).unwrap();

    let body = json!({
        "id": "evt_2",
        "type": "payment.failed",
        "data": { "payment_id": payment_id, "reason": "card_declined" }
    });
    send_webhook(&harness, &body, &sign(&body)).await.assert_status_ok();

    let purchases: Value = harness
        .server
        .get("/v1/economy/purchases")
        .add_header("authorization", harness.user_auth_header())
        .await
        .json();
    assert_eq!(purchases["purchases"][0]["status"], "failed");
}

#[tokio::test]
async fn forged_webhook_is_rejected() {
    let harness = TestHarness::new();
    let initiated = initiate(&harness).await;
    let payment_id = initiated["payment_intent"]["id"].as_str().unwrap();
    harness.gateway.confirm(payment_id).unwrap();

    let body = json!({
        "id": "evt_3",
        "type": "payment.succeeded",
        "data": { "payment_id": payment_id }
    });
    let forged = hmac_sha256_hex("wrong-secret", &body.to_string()).unwrap();
    let response = send_webhook(&harness, &body, &forged).await;

    assert_eq!(response.status_code(), 401);
    assert_eq!(harness.wallet(harness.test_user_id).await["gems"], 0);
}

#[tokio::test]
async fn committed_effects_reach_the_player_room() {
    let harness = TestHarness::new();
    let mut room = harness.state.hub.subscribe(Channel::Player(harness.test_user_id));
    harness.fund(harness.test_user_id, 40).await;

    let notifier: Arc<dyn Notifier> = harness.state.hub.clone();
    let stats = harness
        .state
        .economy
        .outbox_dispatcher(notifier)
        .dispatch_pending()
        .await
        .unwrap();
    assert!(stats.delivered >= 2);

    let first: Value = serde_json::from_str(&room.recv().await.unwrap()).unwrap();
    assert_eq!(first["event"], "wallet_updated");
    assert_eq!(first["coins"], 40);
    let second: Value = serde_json::from_str(&room.recv().await.unwrap()).unwrap();
    assert_eq!(second["event"], "transaction_recorded");
}
