//! Common test utilities for gamevault integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use axum::Router;
use axum_test::TestServer;
use serde_json::{json, Value};

use gamevault_core::UserId;
use gamevault_engine::MockPaymentGateway;
use gamevault_service::{create_router, AppState, ServiceConfig};
use gamevault_store::MemoryStore;

/// Webhook secret configured on every harness.
pub const WEBHOOK_SECRET: &str = "whsec_test";

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// The state behind the server, for driving background work.
    pub state: AppState,
    /// The payment gateway, for confirming or declining payments.
    pub gateway: Arc<MockPaymentGateway>,
    /// A test user ID for authenticated requests.
    pub test_user_id: UserId,
    /// An admin user ID.
    pub admin_user_id: UserId,
}

impl TestHarness {
    /// Create a new test harness over an empty in-memory store.
    pub fn new() -> Self {
        Self::with_gateway(MockPaymentGateway::new("sk_test"))
    }

    /// Harness whose gateway settles every payment immediately.
    pub fn auto_confirming() -> Self {
        Self::with_gateway(MockPaymentGateway::new("sk_test").auto_confirming())
    }

    fn with_gateway(gateway: MockPaymentGateway) -> Self {
        let gateway = Arc::new(gateway);

        let config = ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            auth_base_url: "http://localhost".into(),
            auth_test_tokens: true,
            webhook_secret: Some(WEBHOOK_SECRET.into()),
            ..ServiceConfig::default()
        };

        let state = AppState::new(Arc::new(MemoryStore::new()), gateway.clone(), config);
        let router: Router = create_router(state.clone());

        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            state,
            gateway,
            test_user_id: UserId::generate(),
            admin_user_id: UserId::generate(),
        }
    }

    /// Get the authorization header for user authentication.
    pub fn user_auth_header(&self) -> String {
        format!("Bearer test-token:{}", self.test_user_id)
    }

    /// Get the authorization header for admin authentication.
    pub fn admin_auth_header(&self) -> String {
        format!("Bearer test-token:{}:admin", self.admin_user_id)
    }

    /// Authorization header for an arbitrary player.
    pub fn auth_header_for(user_id: UserId) -> String {
        format!("Bearer test-token:{user_id}")
    }

    /// Grant coins to `user_id` through the admin API.
    pub async fn fund(&self, user_id: UserId, coins: i64) {
        self.server
            .post("/v1/admin/grant-currency")
            .add_header("authorization", self.admin_auth_header())
            .json(&json!({
                "user_id": user_id.to_string(),
                "currency": "coins",
                "amount": coins,
                "reason": "Test funding"
            }))
            .await
            .assert_status_ok();
    }

    /// The caller's wallet as JSON.
    pub async fn wallet(&self, user_id: UserId) -> Value {
        let response = self
            .server
            .get("/v1/economy/wallet")
            .add_header("authorization", Self::auth_header_for(user_id))
            .await;
        response.assert_status_ok();
        response.json()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
