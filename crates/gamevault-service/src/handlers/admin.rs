//! Operator endpoints.
//!
//! All handlers here require a token with the `admin` role and log the
//! acting admin next to the affected player.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use gamevault_core::{
    ConfigType, CurrencyChange, CurrencyType, InventoryItem, ItemGrant, ItemType, PlayerProgress,
    Purchase, PurchaseId, RemoteConfig, RewardSource, TransactionType, UserId, Wallet,
};
use gamevault_engine::XpGrantOutcome;
use serde::{Deserialize, Serialize};

use crate::auth::AdminUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Currency grant request.
#[derive(Debug, Deserialize)]
pub struct GrantCurrencyRequest {
    /// Receiving player.
    pub user_id: UserId,
    /// Currency granted.
    pub currency: CurrencyType,
    /// Positive amount.
    pub amount: i64,
    /// Ledger reason (default: "admin grant").
    #[serde(default)]
    pub reason: Option<String>,
    /// Optional retry key.
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// Grant coins or gems to a player.
pub async fn grant_currency(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Json(body): Json<GrantCurrencyRequest>,
) -> Result<Json<Wallet>, ApiError> {
    let mut change = CurrencyChange::new(
        body.user_id,
        body.currency,
        body.amount,
        TransactionType::AdminGrant,
        body.reason.unwrap_or_else(|| "admin grant".into()),
    )
    .with_metadata(serde_json::json!({ "admin_id": admin.user_id }));
    if let Some(key) = body.idempotency_key {
        change = change.with_idempotency_key(key);
    }

    let wallet = state.economy.ledger().add_currency(&change, None).await?;

    tracing::info!(
        admin_id = %admin.user_id,
        user_id = %body.user_id,
        currency = %body.currency,
        amount = body.amount,
        "Admin granted currency"
    );
    Ok(Json(wallet))
}

/// Item grant request.
#[derive(Debug, Deserialize)]
pub struct GrantItemRequest {
    /// Receiving player.
    pub user_id: UserId,
    /// Item granted.
    pub item_id: String,
    /// Item category.
    pub item_type: ItemType,
    /// Units (default: 1).
    #[serde(default)]
    pub quantity: Option<i64>,
    /// Optional retry key.
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// Put an item into a player's inventory.
pub async fn grant_item(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Json(body): Json<GrantItemRequest>,
) -> Result<Json<InventoryItem>, ApiError> {
    let mut grant = ItemGrant::new(body.user_id, body.item_id, body.item_type)
        .with_quantity(body.quantity.unwrap_or(1));
    if let Some(key) = body.idempotency_key {
        grant = grant.with_idempotency_key(key);
    }

    let item = state.economy.inventory().add_item(&grant, None).await?;

    tracing::info!(
        admin_id = %admin.user_id,
        user_id = %body.user_id,
        item_id = %item.item_id,
        quantity = item.quantity,
        "Admin granted item"
    );
    Ok(Json(item))
}

/// XP grant request.
#[derive(Debug, Deserialize)]
pub struct GrantXpRequest {
    /// Receiving player.
    pub user_id: UserId,
    /// Base XP before the global multiplier.
    pub amount: i64,
    /// Reward curve to use (default: admin).
    #[serde(default)]
    pub source: Option<RewardSource>,
}

/// Award XP, with level-up and currency rewards.
pub async fn grant_xp(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Json(body): Json<GrantXpRequest>,
) -> Result<Json<XpGrantOutcome>, ApiError> {
    let source = body.source.unwrap_or(RewardSource::Admin);
    let outcome = state
        .economy
        .award_xp(body.user_id, body.amount, source, None)
        .await?;

    tracing::info!(
        admin_id = %admin.user_id,
        user_id = %body.user_id,
        xp_gained = outcome.xp_gained,
        levels_gained = outcome.levels_gained,
        "Admin granted XP"
    );
    Ok(Json(outcome))
}

/// Achievement unlock request.
#[derive(Debug, Deserialize)]
pub struct UnlockAchievementRequest {
    /// Player.
    pub user_id: UserId,
    /// Achievement key.
    pub achievement: String,
}

/// Achievement unlock response.
#[derive(Debug, Serialize)]
pub struct UnlockAchievementResponse {
    /// Progress after the unlock.
    pub progress: PlayerProgress,
    /// False when the player already had it.
    pub unlocked: bool,
}

/// Unlock an achievement for a player.
pub async fn unlock_achievement(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Json(body): Json<UnlockAchievementRequest>,
) -> Result<Json<UnlockAchievementResponse>, ApiError> {
    let (progress, unlocked) = state
        .economy
        .progression()
        .unlock_achievement(body.user_id, &body.achievement, None)
        .await?;

    tracing::info!(
        admin_id = %admin.user_id,
        user_id = %body.user_id,
        achievement = %body.achievement,
        unlocked,
        "Admin unlocked achievement"
    );
    Ok(Json(UnlockAchievementResponse { progress, unlocked }))
}

/// Refund request.
#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    /// Recorded on the purchase.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Refund a completed purchase and claw back its grants.
pub async fn refund_purchase(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(purchase_id): Path<PurchaseId>,
    Json(body): Json<RefundRequest>,
) -> Result<Json<Purchase>, ApiError> {
    let reason = body.reason.unwrap_or_else(|| "requested_by_admin".into());
    let purchase = state.economy.purchases().refund(purchase_id, &reason).await?;

    tracing::info!(
        admin_id = %admin.user_id,
        purchase_id = %purchase_id,
        reason = %reason,
        "Admin refunded purchase"
    );
    Ok(Json(purchase))
}

/// Config listing.
#[derive(Debug, Serialize)]
pub struct ConfigListResponse {
    /// Every config entry.
    pub configs: Vec<RemoteConfig>,
}

/// List remote config.
pub async fn list_config(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
) -> Result<Json<ConfigListResponse>, ApiError> {
    let configs = state.economy.remote_config().list().await?;
    Ok(Json(ConfigListResponse { configs }))
}

/// Config update request.
#[derive(Debug, Deserialize)]
pub struct SetConfigRequest {
    /// New value.
    pub value: serde_json::Value,
    /// Declared type of `value`.
    pub config_type: ConfigType,
}

/// Set a remote config value and broadcast the change.
pub async fn set_config(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(key): Path<String>,
    Json(body): Json<SetConfigRequest>,
) -> Result<Json<RemoteConfig>, ApiError> {
    let config = state
        .economy
        .set_config(&key, body.value, body.config_type)
        .await?;

    tracing::info!(
        admin_id = %admin.user_id,
        key = %key,
        version = config.version,
        "Admin updated config"
    );
    Ok(Json(config))
}
