//! LiveOps event administration.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use gamevault_core::{ActivityLogEntry, EventId, EventStatus, LiveOpsEvent, NewLiveOpsEvent};
use gamevault_engine::{TriggerReport, TriggerSource};
use serde::{Deserialize, Serialize};

use crate::auth::AdminUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Create an event. Events with `starts_at` are fired by the scheduler.
pub async fn create_event(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Json(body): Json<NewLiveOpsEvent>,
) -> Result<(StatusCode, Json<LiveOpsEvent>), ApiError> {
    let event = state.economy.liveops().create_event(body).await?;
    tracing::info!(
        admin_id = %admin.user_id,
        event_id = %event.id,
        action = event.action.name(),
        targets = event.target_users.len(),
        "LiveOps event created"
    );
    Ok((StatusCode::CREATED, Json(event)))
}

/// Event filter.
#[derive(Debug, Deserialize)]
pub struct ListEventsQuery {
    /// Only events in this state.
    #[serde(default)]
    pub status: Option<EventStatus>,
}

/// Event listing.
#[derive(Debug, Serialize)]
pub struct ListEventsResponse {
    /// Matching events.
    pub events: Vec<LiveOpsEvent>,
}

/// List events.
pub async fn list_events(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Query(query): Query<ListEventsQuery>,
) -> Result<Json<ListEventsResponse>, ApiError> {
    let events = state.economy.liveops().list_events(query.status).await?;
    Ok(Json(ListEventsResponse { events }))
}

/// Fire an event now.
pub async fn trigger_event(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(event_id): Path<EventId>,
) -> Result<Json<TriggerReport>, ApiError> {
    let report = state
        .economy
        .liveops()
        .trigger(event_id, TriggerSource::Manual)
        .await?;
    tracing::info!(
        admin_id = %admin.user_id,
        event_id = %event_id,
        succeeded = report.succeeded,
        failed = report.failed,
        "LiveOps event triggered"
    );
    Ok(Json(report))
}

/// Cancel a scheduled or running event.
pub async fn cancel_event(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(event_id): Path<EventId>,
) -> Result<Json<LiveOpsEvent>, ApiError> {
    let event = state.economy.liveops().cancel_event(event_id).await?;
    tracing::info!(admin_id = %admin.user_id, event_id = %event_id, "LiveOps event cancelled");
    Ok(Json(event))
}

/// Activity log filter.
#[derive(Debug, Deserialize)]
pub struct ActivityQuery {
    /// Only entries of this event.
    #[serde(default)]
    pub event_id: Option<EventId>,
    /// Maximum number of entries (default: 100).
    #[serde(default = "default_activity_limit")]
    pub limit: usize,
}

const fn default_activity_limit() -> usize {
    100
}

/// Activity log.
#[derive(Debug, Serialize)]
pub struct ActivityResponse {
    /// Entries, newest first.
    pub activity: Vec<ActivityLogEntry>,
}

/// Per-player outcomes of fired events.
pub async fn list_activity(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Query(query): Query<ActivityQuery>,
) -> Result<Json<ActivityResponse>, ApiError> {
    let activity = state
        .economy
        .liveops()
        .activity(query.event_id, query.limit.clamp(1, 500))
        .await?;
    Ok(Json(ActivityResponse { activity }))
}
