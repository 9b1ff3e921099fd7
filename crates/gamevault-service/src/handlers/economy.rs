//! Wallet, product and real-money purchase handlers.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use gamevault_core::{LedgerEntry, Product, Purchase, PurchaseId};
use gamevault_engine::InitiatedPurchase;
use serde::{Deserialize, Serialize};

use super::{paginate, PageQuery};
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Balance response.
#[derive(Debug, Serialize)]
pub struct WalletResponse {
    /// Coin balance.
    pub coins: i64,
    /// Gem balance.
    pub gems: i64,
}

/// Get the caller's balances, creating an empty wallet on first use.
pub async fn get_wallet(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<WalletResponse>, ApiError> {
    let wallet = state.economy.ledger().get_or_create_wallet(auth.user_id).await?;
    Ok(Json(WalletResponse {
        coins: wallet.coins,
        gems: wallet.gems,
    }))
}

/// List transactions response.
#[derive(Debug, Serialize)]
pub struct ListTransactionsResponse {
    /// Ledger entries (newest first).
    pub transactions: Vec<LedgerEntry>,
    /// Whether there are more transactions.
    pub has_more: bool,
}

/// List transaction history.
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<PageQuery>,
) -> Result<Json<ListTransactionsResponse>, ApiError> {
    let limit = query.capped_limit();
    let entries = state
        .economy
        .ledger()
        .transaction_history(auth.user_id, limit + 1, query.offset)
        .await?;
    let (transactions, has_more) = paginate(entries, limit);

    Ok(Json(ListTransactionsResponse {
        transactions,
        has_more,
    }))
}

/// Product catalog response.
#[derive(Debug, Serialize)]
pub struct ProductsResponse {
    /// Products for sale.
    pub products: Vec<Product>,
}

/// List the real-money product catalog.
pub async fn list_products(State(state): State<Arc<AppState>>) -> Json<ProductsResponse> {
    let mut products: Vec<Product> = state.economy.purchases().catalog().iter().cloned().collect();
    products.sort_by(|a, b| a.price_cents.cmp(&b.price_cents).then_with(|| a.id.cmp(&b.id)));
    Json(ProductsResponse { products })
}

/// Purchase initiation request.
#[derive(Debug, Deserialize)]
pub struct InitiatePurchaseRequest {
    /// Catalog product.
    pub product_id: String,
    /// Client-chosen key; retrying with the same key returns the same purchase.
    pub idempotency_key: String,
}

/// Start a real-money purchase.
pub async fn initiate_purchase(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<InitiatePurchaseRequest>,
) -> Result<Json<InitiatedPurchase>, ApiError> {
    let initiated = state
        .economy
        .purchases()
        .initiate(auth.user_id, &body.product_id, &body.idempotency_key)
        .await?;

    tracing::info!(
        user_id = %auth.user_id,
        purchase_id = %initiated.purchase.id,
        product_id = %body.product_id,
        "Purchase initiated"
    );

    Ok(Json(initiated))
}

/// Purchase verification request.
#[derive(Debug, Deserialize)]
pub struct VerifyPurchaseRequest {
    /// Purchase returned by initiation.
    pub purchase_id: PurchaseId,
    /// Gateway payment id returned by initiation.
    pub payment_id: String,
}

/// Confirm payment with the gateway and issue the grants.
pub async fn verify_purchase(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<VerifyPurchaseRequest>,
) -> Result<Json<Purchase>, ApiError> {
    let purchase = state
        .economy
        .purchases()
        .verify(auth.user_id, body.purchase_id, &body.payment_id)
        .await?;
    Ok(Json(purchase))
}

/// List purchases response.
#[derive(Debug, Serialize)]
pub struct ListPurchasesResponse {
    /// Purchases (newest first).
    pub purchases: Vec<Purchase>,
    /// Whether there are more purchases.
    pub has_more: bool,
}

/// List the caller's purchases.
pub async fn list_purchases(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<PageQuery>,
) -> Result<Json<ListPurchasesResponse>, ApiError> {
    let limit = query.capped_limit();
    let records = state
        .economy
        .purchases()
        .list_purchases(auth.user_id, limit + 1, query.offset)
        .await?;
    let (purchases, has_more) = paginate(records, limit);

    Ok(Json(ListPurchasesResponse {
        purchases,
        has_more,
    }))
}
