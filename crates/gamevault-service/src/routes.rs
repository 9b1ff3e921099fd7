//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post, put};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{admin, economy, health, inventory, liveops, progression, status, webhooks, ws};
use crate::state::AppState;

/// Maximum concurrent requests for player API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 200;

/// Maximum concurrent requests for admin endpoints.
const ADMIN_MAX_CONCURRENT_REQUESTS: usize = 20;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Player (JWT auth)
/// - `GET /v1/economy/wallet` - Coin and gem balances
/// - `GET /v1/economy/transactions` - Ledger history
/// - `GET /v1/economy/products` - Real-money catalog
/// - `POST /v1/economy/purchase/initiate` - Start a purchase
/// - `POST /v1/economy/purchase/verify` - Confirm payment and grant
/// - `GET /v1/economy/purchases` - Purchase history
/// - `GET /v1/economy/inventory` - Items held
/// - `POST /v1/economy/inventory/purchase` - Buy an item with currency
/// - `POST /v1/economy/inventory/consume` - Use up an item
/// - `GET /v1/progression` - Level, XP, stats and achievements
/// - `GET /v1/status` - Active events and XP multiplier
/// - `GET /ws` - Realtime effects
///
/// ## Admin (JWT with `admin` role)
/// - `POST /v1/admin/grant-currency`, `/grant-item`, `/grant-xp`, `/achievements`
/// - `POST /v1/admin/purchases/:id/refund`
/// - `GET /v1/admin/config`, `PUT /v1/admin/config/:key`
/// - `POST|GET /v1/admin/liveops/events`
/// - `POST /v1/admin/liveops/events/:id/trigger`, `/cancel`
/// - `GET /v1/admin/liveops/activity`
///
/// ## Webhooks (signature verification)
/// - `POST /webhooks/payments` - Payment gateway callbacks
pub fn create_router(state: AppState) -> Router {
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    let economy_routes = Router::new()
        .route("/wallet", get(economy::get_wallet))
        .route("/transactions", get(economy::list_transactions))
        .route("/products", get(economy::list_products))
        .route("/purchase/initiate", post(economy::initiate_purchase))
        .route("/purchase/verify", post(economy::verify_purchase))
        .route("/purchases", get(economy::list_purchases))
        .route("/inventory", get(inventory::list_inventory))
        .route("/inventory/purchase", post(inventory::purchase_item))
        .route("/inventory/consume", post(inventory::consume_item));

    let admin_routes = Router::new()
        .route("/grant-currency", post(admin::grant_currency))
        .route("/grant-item", post(admin::grant_item))
        .route("/grant-xp", post(admin::grant_xp))
        .route("/achievements", post(admin::unlock_achievement))
        .route("/purchases/:id/refund", post(admin::refund_purchase))
        .route("/config", get(admin::list_config))
        .route("/config/:key", put(admin::set_config))
        .route(
            "/liveops/events",
            post(liveops::create_event).get(liveops::list_events),
        )
        .route("/liveops/events/:id/trigger", post(liveops::trigger_event))
        .route("/liveops/events/:id/cancel", post(liveops::cancel_event))
        .route("/liveops/activity", get(liveops::list_activity))
        .layer(ConcurrencyLimitLayer::new(ADMIN_MAX_CONCURRENT_REQUESTS));

    let api_routes = Router::new()
        .nest("/economy", economy_routes)
        .route("/progression", get(progression::get_progression))
        .route("/status", get(status::get_status))
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS))
        .nest("/admin", admin_routes);

    Router::new()
        // Health (public, no rate limit)
        .route("/health", get(health::health))
        .nest("/v1", api_routes)
        // Webhooks (no rate limit - controlled by the gateway)
        .route("/webhooks/payments", post(webhooks::payment_webhook))
        .route("/ws", get(ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
