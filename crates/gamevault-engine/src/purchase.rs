//! Real-money purchase pipeline.
//!
//! A purchase is created `pending` by [`PurchasePipeline::initiate`] together
//! with a gateway payment intent. Once the client has paid, [`verify`] asks
//! the gateway and, on success, [`complete`] issues the product's grants under
//! keys derived from the purchase id and flips the purchase to `completed`,
//! all in one transaction. Completing twice grants once.
//!
//! [`verify`]: PurchasePipeline::verify
//! [`complete`]: PurchasePipeline::complete

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use gamevault_core::{
    CurrencyChange, EconomyError, Effect, ItemGrant, Product, ProductCatalog, ProductGrant,
    Purchase, PurchaseId, PurchaseStatus, Result, TransactionType, UserId,
};
use gamevault_store::{Database, StoreError, TxContext};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::gateway::{PaymentGateway, PaymentIntent, PaymentRequest, PaymentStatus};
use crate::inventory::Inventory;
use crate::ledger::Ledger;
use crate::rate_limit::RateLimiter;

/// A pending purchase and the intent the client pays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitiatedPurchase {
    /// The purchase record.
    pub purchase: Purchase,
    /// Gateway payment to confirm client-side.
    pub payment_intent: PaymentIntent,
}

/// Purchase initiation, verification, completion and refunds.
#[derive(Clone)]
pub struct PurchasePipeline {
    db: Database,
    ledger: Ledger,
    inventory: Inventory,
    gateway: Arc<dyn PaymentGateway>,
    limiter: Arc<dyn RateLimiter>,
    catalog: Arc<ProductCatalog>,
}

impl fmt::Debug for PurchasePipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PurchasePipeline")
            .field("provider", &self.gateway.provider())
            .field("max_attempts", &self.limiter.max_attempts())
            .finish_non_exhaustive()
    }
}

impl PurchasePipeline {
    /// Pipeline granting through `ledger` and `inventory`.
    #[must_use]
    pub fn new(
        db: Database,
        ledger: Ledger,
        inventory: Inventory,
        gateway: Arc<dyn PaymentGateway>,
        limiter: Arc<dyn RateLimiter>,
        catalog: ProductCatalog,
    ) -> Self {
        Self {
            db,
            ledger,
            inventory,
            gateway,
            limiter,
            catalog: Arc::new(catalog),
        }
    }

    /// Products for sale.
    #[must_use]
    pub fn catalog(&self) -> &ProductCatalog {
        &self.catalog
    }

    /// Start a purchase of `product_id`.
    ///
    /// A key already used by this player returns the original purchase and
    /// intent without counting against the rate limit.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` for an empty key.
    /// - `DuplicateIdempotencyKey` if another player used the key.
    /// - `NotFound` for an unknown product.
    /// - `RateLimitExceeded` if the player initiated too many purchases recently.
    /// - `Gateway` if the payment intent cannot be created.
    pub async fn initiate(
        &self,
        user_id: UserId,
        product_id: &str,
        idempotency_key: &str,
    ) -> Result<InitiatedPurchase> {
        if idempotency_key.trim().is_empty() {
            return Err(EconomyError::InvalidInput("idempotency_key is empty".into()));
        }

        if let Some(existing) = self.db.store().find_purchase_by_key(idempotency_key).await? {
            return self.replay(user_id, existing).await;
        }

        let product = self
            .catalog
            .get(product_id)
            .ok_or_else(|| EconomyError::not_found("product", product_id))?;

        if !self.limiter.check_and_record(user_id) {
            warn!(user_id = %user_id, product_id = %product_id, "purchase rate limit exceeded");
            return Err(EconomyError::RateLimitExceeded {
                max_attempts: self.limiter.max_attempts(),
                window_secs: self.limiter.window().as_secs(),
            });
        }

        let purchase_id = PurchaseId::generate();
        let intent = self
            .gateway
            .create_payment_intent(&PaymentRequest {
                purchase_id,
                user_id,
                amount_cents: product.price_cents,
                currency: product.currency.clone(),
                idempotency_key: idempotency_key.to_string(),
            })
            .await?;

        let now = Utc::now();
        let purchase = Purchase {
            id: purchase_id,
            user_id,
            product_id: product.id.clone(),
            amount_cents: product.price_cents,
            currency: product.currency.clone(),
            status: PurchaseStatus::Pending,
            payment_provider: self.gateway.provider().to_string(),
            payment_id: Some(intent.id.clone()),
            idempotency_key: idempotency_key.to_string(),
            verified_at: None,
            metadata: json!({ "product_name": product.name }),
            created_at: now,
            updated_at: now,
        };

        match self.db.store().insert_purchase(&purchase).await {
            Ok(()) => {}
            Err(StoreError::UniqueViolation(_)) => {
                debug!(key = %idempotency_key, "concurrent initiation won the key");
                let existing = self
                    .db
                    .store()
                    .find_purchase_by_key(idempotency_key)
                    .await?
                    .ok_or_else(|| EconomyError::not_found("purchase", idempotency_key))?;
                return self.replay(user_id, existing).await;
            }
            Err(err) => return Err(err.into()),
        }

        info!(
            purchase_id = %purchase.id,
            user_id = %user_id,
            product_id = %product_id,
            amount_cents = purchase.amount_cents,
            "purchase initiated"
        );
        Ok(InitiatedPurchase {
            purchase,
            payment_intent: intent,
        })
    }

    /// Confirm payment with the gateway and complete the purchase.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the purchase does not exist or belongs to someone else.
    /// - `PaymentVerificationFailed` if the payment id does not match, the
    ///   payment is not captured, or the amount differs. A declined payment or
    ///   a mismatched amount also marks the purchase failed.
    /// - `InvalidState` for a refunded purchase.
    pub async fn verify(
        &self,
        user_id: UserId,
        purchase_id: PurchaseId,
        payment_id: &str,
    ) -> Result<Purchase> {
        let purchase = self
            .db
            .store()
            .get_purchase(purchase_id)
            .await?
            .filter(|purchase| purchase.user_id == user_id)
            .ok_or_else(|| EconomyError::not_found("purchase", purchase_id))?;

        match purchase.status {
            PurchaseStatus::Completed => {
                debug!(purchase_id = %purchase_id, "purchase already completed");
                return Ok(purchase);
            }
            PurchaseStatus::Failed => {
                return Err(EconomyError::PaymentVerificationFailed(
                    "purchase has failed".into(),
                ))
            }
            PurchaseStatus::Refunded => {
                return Err(EconomyError::InvalidState("purchase was refunded".into()))
            }
            PurchaseStatus::Pending => {}
        }

        if purchase.payment_id.as_deref() != Some(payment_id) {
            return Err(EconomyError::PaymentVerificationFailed(
                "payment does not belong to this purchase".into(),
            ));
        }

        let verification = self.gateway.verify_payment(payment_id).await?;
        match verification.status {
            PaymentStatus::Succeeded if verification.amount_cents == purchase.amount_cents => {
                self.complete(purchase_id).await
            }
            PaymentStatus::Succeeded => {
                let reason = format!(
                    "amount mismatch: expected {}, captured {}",
                    purchase.amount_cents, verification.amount_cents
                );
                self.mark_failed(purchase_id, &reason).await?;
                Err(EconomyError::PaymentVerificationFailed(reason))
            }
            PaymentStatus::Failed | PaymentStatus::Refunded => {
                let reason = format!("payment {payment_id} was not captured");
                self.mark_failed(purchase_id, &reason).await?;
                Err(EconomyError::PaymentVerificationFailed(reason))
            }
            PaymentStatus::RequiresConfirmation => Err(EconomyError::PaymentVerificationFailed(
                "payment not confirmed yet".into(),
            )),
        }
    }

    /// Issue the product's grants and mark the purchase completed.
    ///
    /// A completed purchase is returned unchanged.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the purchase or its product does not exist.
    /// - `InvalidState` if the purchase is failed or refunded.
    pub async fn complete(&self, purchase_id: PurchaseId) -> Result<Purchase> {
        let mut tx = self.db.begin().await?;
        let result = self.complete_in(&mut tx, purchase_id).await;
        match tx.finish(result).await {
            Err(EconomyError::DuplicateIdempotencyKey { key }) => {
                debug!(purchase_id = %purchase_id, key = %key, "grants already issued");
                self.get(purchase_id).await
            }
            other => other,
        }
    }

    /// Complete the purchase paid by `payment_id`, as reported by a signed
    /// gateway callback. The payment is still checked with the gateway.
    ///
    /// # Errors
    ///
    /// Same as [`verify`](Self::verify).
    pub async fn complete_from_webhook(&self, payment_id: &str) -> Result<Purchase> {
        let purchase = self.by_payment_id(payment_id).await?;
        self.verify(purchase.user_id, purchase.id, payment_id).await
    }

    /// Mark the purchase paid by `payment_id` failed, as reported by the gateway.
    ///
    /// # Errors
    ///
    /// `NotFound` if no purchase uses the payment.
    pub async fn fail_from_webhook(&self, payment_id: &str, reason: &str) -> Result<Purchase> {
        let purchase = self.by_payment_id(payment_id).await?;
        self.mark_failed(purchase.id, reason).await
    }

    /// Refund a completed purchase.
    ///
    /// Granted currency is clawed back up to the current balance and granted
    /// items still held are removed, then the payment is refunded at the
    /// gateway. A gateway failure rolls everything back.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the purchase does not exist.
    /// - `InvalidState` unless the purchase is completed.
    /// - `Gateway` if the refund is refused.
    pub async fn refund(&self, purchase_id: PurchaseId, reason: &str) -> Result<Purchase> {
        let mut tx = self.db.begin().await?;
        let result = self.refund_in(&mut tx, purchase_id, reason).await;
        tx.finish(result).await
    }

    /// One purchase.
    ///
    /// # Errors
    ///
    /// `NotFound` if the purchase does not exist.
    pub async fn get(&self, purchase_id: PurchaseId) -> Result<Purchase> {
        self.db
            .store()
            .get_purchase(purchase_id)
            .await?
            .ok_or_else(|| EconomyError::not_found("purchase", purchase_id))
    }

    /// A player's purchases, newest first.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the read fails.
    pub async fn list_purchases(
        &self,
        user_id: UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Purchase>> {
        Ok(self.db.store().list_purchases(user_id, limit, offset).await?)
    }

    async fn replay(&self, user_id: UserId, existing: Purchase) -> Result<InitiatedPurchase> {
        if existing.user_id != user_id {
            return Err(EconomyError::DuplicateIdempotencyKey {
                key: existing.idempotency_key,
            });
        }
        debug!(purchase_id = %existing.id, key = %existing.idempotency_key, "initiate replay");
        let intent = self
            .gateway
            .create_payment_intent(&PaymentRequest {
                purchase_id: existing.id,
                user_id,
                amount_cents: existing.amount_cents,
                currency: existing.currency.clone(),
                idempotency_key: existing.idempotency_key.clone(),
            })
            .await?;
        Ok(InitiatedPurchase {
            purchase: existing,
            payment_intent: intent,
        })
    }

    async fn by_payment_id(&self, payment_id: &str) -> Result<Purchase> {
        self.db
            .store()
            .find_purchase_by_payment_id(payment_id)
            .await?
            .ok_or_else(|| EconomyError::not_found("purchase", payment_id))
    }

    fn product_of(&self, purchase: &Purchase) -> Result<&Product> {
        self.catalog
            .get(&purchase.product_id)
            .ok_or_else(|| EconomyError::not_found("product", &purchase.product_id))
    }

    async fn complete_in(&self, tx: &mut TxContext, purchase_id: PurchaseId) -> Result<Purchase> {
        let mut purchase = tx
            .lock_purchase(purchase_id)
            .await?
            .ok_or_else(|| EconomyError::not_found("purchase", purchase_id))?;

        match purchase.status {
            PurchaseStatus::Completed => return Ok(purchase),
            PurchaseStatus::Pending => {}
            status => {
                return Err(EconomyError::InvalidState(format!(
                    "cannot complete a {status} purchase"
                )))
            }
        }

        let product = self.product_of(&purchase)?;
        for grant in &product.grants {
            match grant {
                ProductGrant::Currency { currency, amount } => {
                    let change = CurrencyChange::new(
                        purchase.user_id,
                        *currency,
                        *amount,
                        TransactionType::Purchase,
                        format!("purchase of {}", product.name),
                    )
                    .with_idempotency_key(purchase.grant_key(*currency))
                    .with_reference(purchase.id.to_string());
                    self.ledger.add_currency(&change, Some(&mut *tx)).await?;
                }
                ProductGrant::Item {
                    item_id,
                    item_type,
                    quantity,
                } => {
                    let grant = ItemGrant::new(purchase.user_id, item_id.clone(), *item_type)
                        .with_quantity(*quantity)
                        .with_idempotency_key(purchase.item_grant_key(item_id));
                    match self.inventory.add_item(&grant, Some(&mut *tx)).await {
                        Ok(_) => {}
                        Err(EconomyError::AlreadyOwned { item_id }) => {
                            warn!(purchase_id = %purchase.id, item_id = %item_id, "bundle item already owned, skipped");
                        }
                        Err(err) => return Err(err),
                    }
                }
            }
        }

        purchase.transition(PurchaseStatus::Completed);
        purchase.verified_at = Some(purchase.updated_at);
        tx.put_purchase(&purchase).await?;
        tx.publish(Effect::PurchaseCompleted {
            user_id: purchase.user_id,
            purchase_id: purchase.id,
            product_id: purchase.product_id.clone(),
        })
        .await?;

        info!(
            purchase_id = %purchase.id,
            user_id = %purchase.user_id,
            product_id = %purchase.product_id,
            "purchase completed"
        );
        Ok(purchase)
    }

    async fn mark_failed(&self, purchase_id: PurchaseId, reason: &str) -> Result<Purchase> {
        let mut tx = self.db.begin().await?;
        let result: Result<Purchase> = async {
            let mut purchase = tx
                .lock_purchase(purchase_id)
                .await?
                .ok_or_else(|| EconomyError::not_found("purchase", purchase_id))?;
            if purchase.status != PurchaseStatus::Pending {
                return Ok(purchase);
            }
            purchase.transition(PurchaseStatus::Failed);
            annotate(&mut purchase.metadata, "failure_reason", json!(reason));
            tx.put_purchase(&purchase).await?;
            warn!(purchase_id = %purchase_id, reason = %reason, "purchase failed");
            Ok(purchase)
        }
        .await;
        tx.finish(result).await
    }

    async fn refund_in(
        &self,
        tx: &mut TxContext,
        purchase_id: PurchaseId,
        reason: &str,
    ) -> Result<Purchase> {
        let mut purchase = tx
            .lock_purchase(purchase_id)
            .await?
            .ok_or_else(|| EconomyError::not_found("purchase", purchase_id))?;
        if purchase.status != PurchaseStatus::Completed {
            return Err(EconomyError::InvalidState(format!(
                "cannot refund a {} purchase",
                purchase.status
            )));
        }
        let payment_id = purchase
            .payment_id
            .clone()
            .ok_or_else(|| EconomyError::InvalidState("purchase has no payment".into()))?;

        let product = self.product_of(&purchase)?;
        for grant in &product.grants {
            match grant {
                ProductGrant::Currency { currency, amount } => {
                    let wallet = tx.lock_wallet(purchase.user_id).await?;
                    let clawback = (*amount).min(wallet.balance(*currency));
                    if clawback <= 0 {
                        continue;
                    }
                    if clawback < *amount {
                        warn!(
                            purchase_id = %purchase.id,
                            currency = %currency,
                            granted = *amount,
                            clawback,
                            "balance spent, partial clawback"
                        );
                    }
                    let change = CurrencyChange::new(
                        purchase.user_id,
                        *currency,
                        clawback,
                        TransactionType::Refund,
                        format!("refund of {}", product.name),
                    )
                    .with_idempotency_key(purchase.refund_key(*currency))
                    .with_reference(purchase.id.to_string());
                    self.ledger.deduct_currency(&change, Some(&mut *tx)).await?;
                }
                ProductGrant::Item {
                    item_id, quantity, ..
                } => {
                    if tx
                        .find_grant_receipt(&purchase.item_grant_key(item_id))
                        .await?
                        .is_none()
                    {
                        debug!(purchase_id = %purchase.id, item_id = %item_id, "item not granted by this purchase, kept");
                        continue;
                    }
                    let Some(held) = tx.lock_inventory_item(purchase.user_id, item_id).await?
                    else {
                        continue;
                    };
                    let removed = (*quantity).min(held.quantity);
                    if removed > 0 {
                        self.inventory
                            .remove_item(purchase.user_id, item_id, removed, Some(&mut *tx))
                            .await?;
                    }
                }
            }
        }

        let refund = self.gateway.process_refund(&payment_id, reason).await?;

        purchase.transition(PurchaseStatus::Refunded);
        annotate(&mut purchase.metadata, "refund_id", json!(refund.id));
        annotate(&mut purchase.metadata, "refund_reason", json!(reason));
        tx.put_purchase(&purchase).await?;

        info!(
            purchase_id = %purchase.id,
            refund_id = %refund.id,
            reason = %reason,
            "purchase refunded"
        );
        Ok(purchase)
    }
}

fn annotate(metadata: &mut Value, key: &str, value: Value) {
    if !metadata.is_object() {
        *metadata = json!({});
    }
    if let Value::Object(map) = metadata {
        map.insert(key.to_string(), value);
    }
}
