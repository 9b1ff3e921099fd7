//! Progression handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use gamevault_core::{xp_for_level, PlayerProgress};
use serde::Serialize;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Progress response.
#[derive(Debug, Serialize)]
pub struct ProgressionResponse {
    /// Stored progress.
    #[serde(flatten)]
    pub progress: PlayerProgress,
    /// Total XP at which the next level starts.
    pub next_level_xp: i64,
}

/// Get the caller's level, XP, stats, skills and achievements.
pub async fn get_progression(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<ProgressionResponse>, ApiError> {
    let progress = state.economy.progression().get_progress(auth.user_id).await?;
    let next_level_xp = xp_for_level(progress.level.saturating_add(1));
    Ok(Json(ProgressionResponse {
        progress,
        next_level_xp,
    }))
}
