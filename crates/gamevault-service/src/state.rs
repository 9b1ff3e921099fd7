//! Application state.

use std::sync::Arc;

use gamevault_core::ProductCatalog;
use gamevault_engine::{Economy, PaymentGateway};
use gamevault_store::Store;

use crate::auth::JwksCache;
use crate::config::ServiceConfig;
use crate::realtime::RealtimeHub;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The economy engine.
    pub economy: Economy,

    /// Websocket rooms.
    pub hub: Arc<RealtimeHub>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Signing keys of the identity provider.
    pub jwks: Arc<JwksCache>,
}

impl AppState {
    /// Create a new application state over `store` and `gateway`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, gateway: Arc<dyn PaymentGateway>, config: ServiceConfig) -> Self {
        tracing::info!(provider = gateway.provider(), "Payment gateway configured");
        if config.auth_test_tokens {
            tracing::warn!("Test tokens are accepted - do not run this configuration in production");
        }
        if config.webhook_secret.is_none() {
            tracing::warn!("Webhook secret not configured - payment webhooks will be rejected");
        }

        let economy = Economy::new(store, gateway, ProductCatalog::default(), config.engine.clone());

        Self {
            economy,
            hub: Arc::new(RealtimeHub::new()),
            config,
            jwks: Arc::new(JwksCache::new()),
        }
    }
}
