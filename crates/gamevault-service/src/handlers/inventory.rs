//! Inventory handlers.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use gamevault_core::{CurrencyType, InventoryItem, ItemType, Wallet};
use gamevault_engine::ItemPurchase;
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Inventory filter.
#[derive(Debug, Deserialize)]
pub struct InventoryQuery {
    /// Only items of this type.
    #[serde(default)]
    pub item_type: Option<ItemType>,
}

/// Inventory response.
#[derive(Debug, Serialize)]
pub struct InventoryResponse {
    /// Items held.
    pub items: Vec<InventoryItem>,
}

/// List the caller's items.
pub async fn list_inventory(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<InventoryQuery>,
) -> Result<Json<InventoryResponse>, ApiError> {
    let items = state
        .economy
        .inventory()
        .list_items(auth.user_id, query.item_type)
        .await?;
    Ok(Json(InventoryResponse { items }))
}

/// In-game item purchase request.
#[derive(Debug, Deserialize)]
pub struct PurchaseItemRequest {
    /// Item to buy.
    pub item_id: String,
    /// Item category.
    pub item_type: ItemType,
    /// Price per purchase, in `currency`.
    pub price: i64,
    /// Currency paid with.
    pub currency: CurrencyType,
    /// Units bought (default: 1).
    #[serde(default = "default_quantity")]
    pub quantity: i64,
    /// Optional retry key.
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

const fn default_quantity() -> i64 {
    1
}

/// Item purchase response.
#[derive(Debug, Serialize)]
pub struct PurchaseItemResponse {
    /// The item as now held.
    pub item: InventoryItem,
    /// Balances after payment.
    pub wallet: Wallet,
}

/// Pay for an item with coins or gems.
pub async fn purchase_item(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<PurchaseItemRequest>,
) -> Result<Json<PurchaseItemResponse>, ApiError> {
    let request = ItemPurchase {
        user_id: auth.user_id,
        item_id: body.item_id,
        item_type: body.item_type,
        price: body.price,
        currency: body.currency,
        quantity: body.quantity,
        idempotency_key: body.idempotency_key,
    };
    let (item, wallet) = state.economy.inventory().purchase_item(&request, None).await?;
    Ok(Json(PurchaseItemResponse { item, wallet }))
}

/// Consume request.
#[derive(Debug, Deserialize)]
pub struct ConsumeItemRequest {
    /// Item to use up.
    pub item_id: String,
    /// Units consumed (default: 1).
    #[serde(default = "default_quantity")]
    pub quantity: i64,
}

/// Consume response.
#[derive(Debug, Serialize)]
pub struct ConsumeItemResponse {
    /// Item consumed.
    pub item_id: String,
    /// Units left; zero once the record is gone.
    pub remaining: i64,
    /// The record, while any units remain.
    pub item: Option<InventoryItem>,
}

/// Use up units of a held item.
pub async fn consume_item(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<ConsumeItemRequest>,
) -> Result<Json<ConsumeItemResponse>, ApiError> {
    let item = state
        .economy
        .inventory()
        .remove_item(auth.user_id, &body.item_id, body.quantity, None)
        .await?;

    Ok(Json(ConsumeItemResponse {
        item_id: body.item_id,
        remaining: item.as_ref().map_or(0, |item| item.quantity),
        item,
    }))
}
