//! Gamevault Service - economy and progression API
//!
//! This is the main entry point for the gamevault service.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gamevault_engine::{MockPaymentGateway, PaymentGateway};
use gamevault_service::{create_router, AppState, ServiceConfig};
use gamevault_store::{MemoryStore, PgStore, Store};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,gamevault=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Gamevault Service");

    let config = ServiceConfig::from_env();

    tracing::info!(
        listen_addr = %config.listen_addr,
        database_configured = %config.database_url.is_some(),
        webhook_secret_configured = %config.webhook_secret.is_some(),
        test_tokens = %config.auth_test_tokens,
        "Service configuration loaded"
    );

    let lock_timeout = config.engine.lock_timeout();
    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => {
            tracing::info!("Connecting to PostgreSQL");
            let store = PgStore::connect(url, config.database_max_connections)
                .await?
                .with_lock_timeout(lock_timeout);
            store.migrate().await?;
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set - state is kept in memory and lost on restart");
            Arc::new(MemoryStore::with_lock_timeout(lock_timeout))
        }
    };

    let mut gateway = MockPaymentGateway::new(config.gateway_secret.clone());
    if config.gateway_auto_confirm {
        gateway = gateway.auto_confirming();
    }
    let gateway: Arc<dyn PaymentGateway> = Arc::new(gateway);

    let state = AppState::new(store, gateway, config.clone());

    // Background workers: effect delivery and scheduled events
    let dispatcher = state.economy.outbox_dispatcher(state.hub.clone()).spawn();
    let scheduler = state.economy.scheduler().spawn();

    let app = create_router(state);
    tracing::info!("Router configured with all API endpoints");

    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app).await?;

    dispatcher.abort();
    scheduler.abort();
    Ok(())
}
