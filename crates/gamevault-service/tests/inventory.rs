//! Inventory integration tests.

mod common;

use common::TestHarness;
use serde_json::{json, Value};

fn dragon_skin() -> Value {
    json!({
        "item_id": "dragon_skin",
        "item_type": "skin",
        "price": 200,
        "currency": "coins"
    })
}

#[tokio::test]
async fn buying_an_item_debits_the_wallet() {
    let harness = TestHarness::new();
    harness.fund(harness.test_user_id, 500).await;

    let response = harness
        .server
        .post("/v1/economy/inventory/purchase")
        .add_header("authorization", harness.user_auth_header())
        .json(&dragon_skin())
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["item"]["item_id"], "dragon_skin");
    assert_eq!(body["item"]["quantity"], 1);
    assert_eq!(body["wallet"]["coins"], 300);

    let inventory: Value = harness
        .server
        .get("/v1/economy/inventory")
        .add_header("authorization", harness.user_auth_header())
        .add_query_param("item_type", "skin")
        .await
        .json();
    assert_eq!(inventory["items"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn owned_skin_cannot_be_bought_twice() {
    let harness = TestHarness::new();
    harness.fund(harness.test_user_id, 500).await;

    for expected in [200, 409] {
        let response = harness
            .server
            .post("/v1/economy/inventory/purchase")
            .add_header("authorization", harness.user_auth_header())
            .json(&dragon_skin())
            .await;
        assert_eq!(response.status_code(), expected);
    }

    assert_eq!(harness.wallet(harness.test_user_id).await["coins"], 300);
}

#[tokio::test]
async fn purchase_without_funds_is_payment_required() {
    let harness = TestHarness::new();
    harness.fund(harness.test_user_id, 50).await;

    let response = harness
        .server
        .post("/v1/economy/inventory/purchase")
        .add_header("authorization", harness.user_auth_header())
        .json(&dragon_skin())
        .await;

    assert_eq!(response.status_code(), 402);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "insufficient_balance");
    assert_eq!(body["error"]["details"]["balance"], 50);
    assert_eq!(body["error"]["details"]["required"], 200);

    let inventory: Value = harness
        .server
        .get("/v1/economy/inventory")
        .add_header("authorization", harness.user_auth_header())
        .await
        .json();
    assert!(inventory["items"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn consumables_stack_and_are_used_up() {
    let harness = TestHarness::new();
    harness.fund(harness.test_user_id, 100).await;

    let potion = json!({
        "item_id": "health_potion",
        "item_type": "consumable",
        "price": 10,
        "currency": "coins",
        "quantity": 3
    });
    harness
        .server
        .post("/v1/economy/inventory/purchase")
        .add_header("authorization", harness.user_auth_header())
        .json(&potion)
        .await
        .assert_status_ok();

    let consumed: Value = harness
        .server
        .post("/v1/economy/inventory/consume")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "item_id": "health_potion", "quantity": 2 }))
        .await
        .json();
    assert_eq!(consumed["remaining"], 1);

    let response = harness
        .server
        .post("/v1/economy/inventory/consume")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "item_id": "health_potion", "quantity": 5 }))
        .await;
    assert_eq!(response.status_code(), 409);

    let last: Value = harness
        .server
        .post("/v1/economy/inventory/consume")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "item_id": "health_potion" }))
        .await
        .json();
    assert_eq!(last["remaining"], 0);
    assert!(last["item"].is_null());
}
