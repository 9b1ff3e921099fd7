//! Game-wide status.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use gamevault_engine::SystemStatus;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Active events and the current XP multiplier.
pub async fn get_status(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
) -> Result<Json<SystemStatus>, ApiError> {
    Ok(Json(state.economy.liveops().system_status().await?))
}
