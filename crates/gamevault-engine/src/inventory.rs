//! Player inventories.
//!
//! Items live in `(user, item)` slots locked for the duration of a write.
//! Keyed grants leave a [`GrantReceipt`], so a retried grant returns the
//! current item instead of adding it twice.

use gamevault_core::{
    CurrencyChange, CurrencyType, EconomyError, Effect, GrantReceipt, InventoryItem, ItemGrant,
    ItemType, Result, TransactionType, UserId, Wallet,
};
use gamevault_store::{Database, TxContext};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::ledger::Ledger;

/// A "pay then grant" item purchase with in-game currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemPurchase {
    /// Buyer.
    pub user_id: UserId,
    /// Item bought.
    pub item_id: String,
    /// Item category.
    pub item_type: ItemType,
    /// Price in `currency`.
    pub price: i64,
    /// Currency paid.
    pub currency: CurrencyType,
    /// Units bought.
    pub quantity: i64,
    /// Makes the purchase safe to retry.
    pub idempotency_key: Option<String>,
}

impl ItemPurchase {
    fn scoped_key(&self) -> Option<String> {
        self.idempotency_key
            .as_ref()
            .map(|key| format!("item_purchase:{}:{key}", self.user_id))
    }
}

/// Inventory operations.
#[derive(Debug, Clone)]
pub struct Inventory {
    db: Database,
    ledger: Ledger,
}

impl Inventory {
    /// Inventory over `db`, paying through `ledger`.
    #[must_use]
    pub const fn new(db: Database, ledger: Ledger) -> Self {
        Self { db, ledger }
    }

    /// Items held by a player, optionally of one type.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the read fails.
    pub async fn list_items(
        &self,
        user_id: UserId,
        item_type: Option<ItemType>,
    ) -> Result<Vec<InventoryItem>> {
        Ok(self.db.store().list_inventory(user_id, item_type).await?)
    }

    /// One held item.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the player does not hold the item.
    pub async fn get_item(&self, user_id: UserId, item_id: &str) -> Result<InventoryItem> {
        self.db
            .store()
            .get_inventory_item(user_id, item_id)
            .await?
            .ok_or_else(|| EconomyError::not_found("item", item_id))
    }

    /// Add items to a player's inventory.
    ///
    /// Stackable items accumulate; a second grant of a non-stackable item is
    /// rejected. A replayed keyed grant returns the item as currently held.
    ///
    /// # Errors
    ///
    /// - `InvalidAmount` if the quantity is not positive.
    /// - `AlreadyOwned` for a non-stackable item the player already holds.
    /// - `DuplicateIdempotencyKey` if the key was spent on another player or item.
    pub async fn add_item(&self, grant: &ItemGrant, tx: Option<&mut TxContext>) -> Result<InventoryItem> {
        if grant.quantity <= 0 {
            return Err(EconomyError::InvalidAmount(format!(
                "quantity must be positive, got {}",
                grant.quantity
            )));
        }
        match tx {
            Some(tx) => Self::add_item_in(tx, grant).await,
            None => {
                let mut tx = self.db.begin().await?;
                let result = Self::add_item_in(&mut tx, grant).await;
                match tx.finish(result).await {
                    Err(EconomyError::DuplicateIdempotencyKey { key }) => {
                        let mut check = self.db.begin().await?;
                        let receipt = check.find_grant_receipt(&key).await;
                        check.rollback().await?;
                        match receipt? {
                            Some(receipt) => ensure_receipt_owner(&receipt, grant)?,
                            None => return Err(EconomyError::DuplicateIdempotencyKey { key }),
                        }
                        debug!(user_id = %grant.user_id, key = %key, "concurrent duplicate grant");
                        self.held_or_empty(grant).await
                    }
                    other => other,
                }
            }
        }
    }

    /// Remove `quantity` units. The slot is deleted when it reaches zero, in
    /// which case `None` is returned.
    ///
    /// # Errors
    ///
    /// - `InvalidAmount` if the quantity is not positive.
    /// - `NotFound` if the player does not hold the item.
    /// - `InsufficientQuantity` if fewer units are held.
    pub async fn remove_item(
        &self,
        user_id: UserId,
        item_id: &str,
        quantity: i64,
        tx: Option<&mut TxContext>,
    ) -> Result<Option<InventoryItem>> {
        if quantity <= 0 {
            return Err(EconomyError::InvalidAmount(format!(
                "quantity must be positive, got {quantity}"
            )));
        }
        match tx {
            Some(tx) => Self::remove_item_in(tx, user_id, item_id, quantity).await,
            None => {
                let mut tx = self.db.begin().await?;
                let result = Self::remove_item_in(&mut tx, user_id, item_id, quantity).await;
                tx.finish(result).await
            }
        }
    }

    /// Deduct the price and grant the item in one transaction.
    ///
    /// # Errors
    ///
    /// Any error from the deduction or the grant; on error neither is applied.
    pub async fn purchase_item(
        &self,
        request: &ItemPurchase,
        tx: Option<&mut TxContext>,
    ) -> Result<(InventoryItem, Wallet)> {
        match tx {
            Some(tx) => self.purchase_item_in(tx, request).await,
            None => {
                let mut tx = self.db.begin().await?;
                let result = self.purchase_item_in(&mut tx, request).await;
                tx.finish(result).await
            }
        }
    }

    async fn purchase_item_in(
        &self,
        tx: &mut TxContext,
        request: &ItemPurchase,
    ) -> Result<(InventoryItem, Wallet)> {
        let key = request.scoped_key();

        let mut charge = CurrencyChange::new(
            request.user_id,
            request.currency,
            request.price,
            TransactionType::Spend,
            format!("purchase of {}", request.item_id),
        )
        .with_reference(request.item_id.clone());
        let mut grant = ItemGrant::new(request.user_id, request.item_id.clone(), request.item_type)
            .with_quantity(request.quantity);
        if let Some(key) = key {
            charge = charge.with_idempotency_key(key.clone());
            grant = grant.with_idempotency_key(key);
        }

        let wallet = self.ledger.deduct_currency(&charge, Some(&mut *tx)).await?;
        let item = self.add_item(&grant, Some(tx)).await?;

        info!(
            user_id = %request.user_id,
            item_id = %request.item_id,
            price = request.price,
            currency = %request.currency,
            "item purchased"
        );
        Ok((item, wallet))
    }

    async fn add_item_in(tx: &mut TxContext, grant: &ItemGrant) -> Result<InventoryItem> {
        if let Some(key) = &grant.idempotency_key {
            if let Some(receipt) = tx.find_grant_receipt(key).await? {
                ensure_receipt_owner(&receipt, grant)?;
                debug!(user_id = %grant.user_id, key = %key, "idempotent grant replay");
                let held = tx.lock_inventory_item(grant.user_id, &grant.item_id).await?;
                return Ok(held.unwrap_or_else(|| empty_slot(grant)));
            }
        }

        let held = tx.lock_inventory_item(grant.user_id, &grant.item_id).await?;

        if let Some(key) = &grant.idempotency_key {
            if let Some(receipt) = tx.find_grant_receipt(key).await? {
                ensure_receipt_owner(&receipt, grant)?;
                debug!(user_id = %grant.user_id, key = %key, "grant applied while waiting for lock");
                return Ok(held.unwrap_or_else(|| empty_slot(grant)));
            }
        }

        let item = match held {
            Some(mut item) if item.item_type.is_stackable() => {
                item.quantity = item
                    .quantity
                    .checked_add(grant.quantity)
                    .ok_or_else(|| EconomyError::InvalidAmount("quantity overflow".into()))?;
                item.updated_at = chrono::Utc::now();
                item
            }
            Some(_) => {
                return Err(EconomyError::AlreadyOwned {
                    item_id: grant.item_id.clone(),
                })
            }
            None => grant.to_item(),
        };

        tx.put_inventory_item(&item).await?;
        if let Some(key) = &grant.idempotency_key {
            tx.insert_grant_receipt(&GrantReceipt::new(key.clone(), grant.user_id, grant.item_id.clone()))
                .await?;
        }
        tx.publish(Effect::ItemGranted {
            user_id: grant.user_id,
            item_id: item.item_id.clone(),
            item_type: item.item_type,
            quantity: item.quantity,
        })
        .await?;

        info!(
            user_id = %grant.user_id,
            item_id = %grant.item_id,
            quantity = grant.quantity,
            held = item.quantity,
            "item granted"
        );
        Ok(item)
    }

    async fn remove_item_in(
        tx: &mut TxContext,
        user_id: UserId,
        item_id: &str,
        quantity: i64,
    ) -> Result<Option<InventoryItem>> {
        let mut item = tx
            .lock_inventory_item(user_id, item_id)
            .await?
            .ok_or_else(|| EconomyError::not_found("item", item_id))?;

        if item.quantity < quantity {
            return Err(EconomyError::InsufficientQuantity {
                item_id: item_id.to_string(),
                held: item.quantity,
                requested: quantity,
            });
        }

        item.quantity -= quantity;
        info!(user_id = %user_id, item_id = %item_id, quantity, remaining = item.quantity, "item removed");

        if item.quantity == 0 {
            tx.delete_inventory_item(user_id, item_id).await?;
            return Ok(None);
        }
        item.updated_at = chrono::Utc::now();
        tx.put_inventory_item(&item).await?;
        Ok(Some(item))
    }

    async fn held_or_empty(&self, grant: &ItemGrant) -> Result<InventoryItem> {
        Ok(self
            .db
            .store()
            .get_inventory_item(grant.user_id, &grant.item_id)
            .await?
            .unwrap_or_else(|| empty_slot(grant)))
    }
}

/// A replayed grant key must have been spent on the same player and item.
fn ensure_receipt_owner(receipt: &GrantReceipt, grant: &ItemGrant) -> Result<()> {
    if receipt.user_id == grant.user_id && receipt.reference == grant.item_id {
        return Ok(());
    }
    warn!(
        user_id = %grant.user_id,
        owner = %receipt.user_id,
        key = %receipt.key,
        "grant key reused for a different grant"
    );
    Err(EconomyError::DuplicateIdempotencyKey {
        key: receipt.key.clone(),
    })
}

/// A replayed grant whose item has since been consumed.
fn empty_slot(grant: &ItemGrant) -> InventoryItem {
    let mut item = grant.to_item();
    item.quantity = 0;
    item
}

#[cfg(test)]
mod tests {
    use super::*;
    use gamevault_store::MemoryStore;
    use std::sync::Arc;

    fn inventory() -> (Inventory, Ledger) {
        let db = Database::new(Arc::new(MemoryStore::new()));
        let ledger = Ledger::new(db.clone());
        (Inventory::new(db, ledger.clone()), ledger)
    }

    async fn fund(ledger: &Ledger, user_id: UserId, coins: i64) {
        ledger
            .add_currency(
                &CurrencyChange::new(user_id, CurrencyType::Coins, coins, TransactionType::AdminGrant, "fund"),
                None,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn stackable_items_accumulate() {
        let (inventory, _) = inventory();
        let user_id = UserId::generate();
        let grant = ItemGrant::new(user_id, "shield", ItemType::Powerup).with_quantity(2);

        inventory.add_item(&grant, None).await.unwrap();
        let item = inventory.add_item(&grant, None).await.unwrap();
        assert_eq!(item.quantity, 4);
    }

    #[tokio::test]
    async fn grant_key_of_another_player_is_rejected() {
        let (inventory, _) = inventory();
        let (a, b) = (UserId::generate(), UserId::generate());
        let grant = |user_id| {
            ItemGrant::new(user_id, "shield", ItemType::Powerup).with_idempotency_key("gift-1")
        };

        inventory.add_item(&grant(a), None).await.unwrap();
        let err = inventory.add_item(&grant(b), None).await.unwrap_err();

        assert!(matches!(err, EconomyError::DuplicateIdempotencyKey { .. }));
        assert!(matches!(
            inventory.get_item(b, "shield").await,
            Err(EconomyError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn second_skin_is_rejected() {
        let (inventory, _) = inventory();
        let user_id = UserId::generate();
        let grant = ItemGrant::new(user_id, "golden_hat", ItemType::Skin);

        inventory.add_item(&grant, None).await.unwrap();
        let err = inventory.add_item(&grant, None).await.unwrap_err();
        assert!(matches!(err, EconomyError::AlreadyOwned { .. }));
    }

    #[tokio::test]
    async fn keyed_grant_replays_once() {
        let (inventory, _) = inventory();
        let user_id = UserId::generate();
        let grant = ItemGrant::new(user_id, "potion", ItemType::Consumable)
            .with_quantity(3)
            .with_idempotency_key("reward-7");

        inventory.add_item(&grant, None).await.unwrap();
        let replay = inventory.add_item(&grant, None).await.unwrap();
        assert_eq!(replay.quantity, 3);
    }

    #[tokio::test]
    async fn remove_decrements_then_deletes() {
        let (inventory, _) = inventory();
        let user_id = UserId::generate();
        let grant = ItemGrant::new(user_id, "potion", ItemType::Consumable).with_quantity(3);
        inventory.add_item(&grant, None).await.unwrap();

        let left = inventory.remove_item(user_id, "potion", 2, None).await.unwrap();
        assert_eq!(left.map(|item| item.quantity), Some(1));

        let err = inventory.remove_item(user_id, "potion", 2, None).await.unwrap_err();
        assert!(matches!(err, EconomyError::InsufficientQuantity { held: 1, requested: 2, .. }));

        assert!(inventory.remove_item(user_id, "potion", 1, None).await.unwrap().is_none());
        let err = inventory.get_item(user_id, "potion").await.unwrap_err();
        assert!(matches!(err, EconomyError::NotFound { .. }));
    }

    #[tokio::test]
    async fn purchase_deducts_and_grants() {
        let (inventory, ledger) = inventory();
        let user_id = UserId::generate();
        fund(&ledger, user_id, 500).await;

        let request = ItemPurchase {
            user_id,
            item_id: "red_cape".into(),
            item_type: ItemType::Skin,
            price: 200,
            currency: CurrencyType::Coins,
            quantity: 1,
            idempotency_key: Some("buy-1".into()),
        };
        let (item, wallet) = inventory.purchase_item(&request, None).await.unwrap();
        assert_eq!(item.item_id, "red_cape");
        assert_eq!(wallet.coins, 300);

        let (_, replay) = inventory.purchase_item(&request, None).await.unwrap();
        assert_eq!(replay.coins, 300);
    }

    #[tokio::test]
    async fn purchase_without_funds_grants_nothing() {
        let (inventory, ledger) = inventory();
        let user_id = UserId::generate();
        fund(&ledger, user_id, 50).await;

        let request = ItemPurchase {
            user_id,
            item_id: "red_cape".into(),
            item_type: ItemType::Skin,
            price: 200,
            currency: CurrencyType::Coins,
            quantity: 1,
            idempotency_key: None,
        };
        let err = inventory.purchase_item(&request, None).await.unwrap_err();
        assert!(matches!(err, EconomyError::InsufficientBalance { .. }));
        assert!(inventory.list_items(user_id, None).await.unwrap().is_empty());
    }
}
