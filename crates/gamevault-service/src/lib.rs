//! Gamevault HTTP and websocket API.
//!
//! This crate exposes the economy engine over HTTP:
//!
//! - Wallets, transaction history and the product catalog
//! - Real-money purchases and payment gateway webhooks
//! - Inventory purchases and consumption
//! - Progression and game-wide status
//! - Admin grants, refunds, remote config and liveops events
//! - A websocket streaming committed effects to players
//!
//! # Authentication
//!
//! Requests carry an RS256 JWT validated against the identity provider's
//! JWKS. The `sub` claim is the player id; `role = "admin"` unlocks the
//! `/v1/admin` routes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Handlers must be async for axum

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod realtime;
pub mod routes;
pub mod state;

pub use config::ServiceConfig;
pub use error::ApiError;
pub use realtime::RealtimeHub;
pub use routes::create_router;
pub use state::AppState;
