//! Payment gateway seam and the mock gateway used in development and tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use gamevault_core::{EconomyError, PurchaseId, UserId};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::crypto::hmac_sha256_hex;

/// Error type for gateway operations.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The gateway has no record of the payment.
    #[error("payment not found: {0}")]
    NotFound(String),

    /// The gateway refused the request.
    #[error("gateway rejected request: {0}")]
    Rejected(String),

    /// The signing key is unusable.
    #[error("invalid signing key")]
    InvalidKey,

    /// Transport or provider failure.
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
}

impl From<GatewayError> for EconomyError {
    fn from(err: GatewayError) -> Self {
        Self::Gateway(err.to_string())
    }
}

/// Gateway result type.
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Request to collect a payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
    /// Purchase being paid.
    pub purchase_id: PurchaseId,
    /// Payer.
    pub user_id: UserId,
    /// Amount in minor units.
    pub amount_cents: i64,
    /// ISO currency code.
    pub currency: String,
    /// Forwarded so the gateway deduplicates retries too.
    pub idempotency_key: String,
}

/// Gateway-side state of a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Created; the client has not confirmed yet.
    RequiresConfirmation,
    /// Funds captured.
    Succeeded,
    /// Declined or cancelled.
    Failed,
    /// Returned to the payer.
    Refunded,
}

/// A payment the client confirms with `client_secret`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    /// Gateway payment id.
    pub id: String,
    /// Secret handed to the client SDK.
    pub client_secret: String,
    /// Amount in minor units.
    pub amount_cents: i64,
    /// ISO currency code.
    pub currency: String,
    /// Current status.
    pub status: PaymentStatus,
}

/// Result of looking a payment up at the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentVerification {
    /// Gateway payment id.
    pub payment_id: String,
    /// Current status.
    pub status: PaymentStatus,
    /// Amount captured, in minor units.
    pub amount_cents: i64,
}

/// A processed refund.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Refund {
    /// Gateway refund id.
    pub id: String,
    /// Refunded payment.
    pub payment_id: String,
    /// Amount returned, in minor units.
    pub amount_cents: i64,
}

/// Real-money payment provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Provider name stored on purchases.
    fn provider(&self) -> &'static str;

    /// Create a payment for `request`.
    async fn create_payment_intent(&self, request: &PaymentRequest) -> GatewayResult<PaymentIntent>;

    /// Current state of a payment.
    async fn verify_payment(&self, payment_id: &str) -> GatewayResult<PaymentVerification>;

    /// Refund a captured payment in full.
    async fn process_refund(&self, payment_id: &str, reason: &str) -> GatewayResult<Refund>;
}

/// In-process gateway.
///
/// Intents are keyed by the request's idempotency key, so retries return the
/// same intent. With `auto_confirm` every intent succeeds at creation;
/// otherwise tests drive it with [`confirm`](Self::confirm) and
/// [`fail`](Self::fail).
#[derive(Debug)]
pub struct MockPaymentGateway {
    secret: String,
    auto_confirm: AtomicBool,
    intents: DashMap<String, PaymentIntent>,
    by_key: DashMap<String, String>,
    created: AtomicUsize,
}

impl MockPaymentGateway {
    /// Mock signing client secrets with `secret`.
    #[must_use]
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            auto_confirm: AtomicBool::new(false),
            intents: DashMap::new(),
            by_key: DashMap::new(),
            created: AtomicUsize::new(0),
        }
    }

    /// Succeed every payment as soon as it is created.
    #[must_use]
    pub fn auto_confirming(self) -> Self {
        self.auto_confirm.store(true, Ordering::SeqCst);
        self
    }

    /// Mark a payment as paid.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotFound`] for unknown payments.
    pub fn confirm(&self, payment_id: &str) -> GatewayResult<()> {
        self.set_status(payment_id, PaymentStatus::Succeeded)
    }

    /// Mark a payment as declined.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotFound`] for unknown payments.
    pub fn fail(&self, payment_id: &str) -> GatewayResult<()> {
        self.set_status(payment_id, PaymentStatus::Failed)
    }

    /// Number of distinct intents created.
    #[must_use]
    pub fn intents_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    fn set_status(&self, payment_id: &str, status: PaymentStatus) -> GatewayResult<()> {
        let mut intent = self
            .intents
            .get_mut(payment_id)
            .ok_or_else(|| GatewayError::NotFound(payment_id.to_string()))?;
        intent.status = status;
        Ok(())
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    fn provider(&self) -> &'static str {
        "mock"
    }

    async fn create_payment_intent(&self, request: &PaymentRequest) -> GatewayResult<PaymentIntent> {
        if request.amount_cents <= 0 {
            return Err(GatewayError::Rejected(format!(
                "amount must be positive, got {}",
                request.amount_cents
            )));
        }

        // The entry guard serializes creators racing on one key.
        let entry = self.by_key.entry(request.idempotency_key.clone());
        if let Entry::Occupied(existing) = &entry {
            if let Some(intent) = self.intents.get(existing.get()) {
                return Ok(intent.clone());
            }
        }

        let id = format!("pi_mock_{}", uuid::Uuid::new_v4().simple());
        let signature = hmac_sha256_hex(&self.secret, &id).map_err(|_| GatewayError::InvalidKey)?;
        let status = if self.auto_confirm.load(Ordering::SeqCst) {
            PaymentStatus::Succeeded
        } else {
            PaymentStatus::RequiresConfirmation
        };
        let intent = PaymentIntent {
            client_secret: format!("{id}_secret_{}", &signature[..24]),
            id: id.clone(),
            amount_cents: request.amount_cents,
            currency: request.currency.clone(),
            status,
        };

        self.intents.insert(id.clone(), intent.clone());
        entry.insert(id);
        self.created.fetch_add(1, Ordering::SeqCst);

        info!(
            payment_id = %intent.id,
            purchase_id = %request.purchase_id,
            amount_cents = request.amount_cents,
            "mock payment intent created"
        );
        Ok(intent)
    }

    async fn verify_payment(&self, payment_id: &str) -> GatewayResult<PaymentVerification> {
        let intent = self
            .intents
            .get(payment_id)
            .ok_or_else(|| GatewayError::NotFound(payment_id.to_string()))?;
        Ok(PaymentVerification {
            payment_id: intent.id.clone(),
            status: intent.status,
            amount_cents: intent.amount_cents,
        })
    }

    async fn process_refund(&self, payment_id: &str, reason: &str) -> GatewayResult<Refund> {
        let mut intent = self
            .intents
            .get_mut(payment_id)
            .ok_or_else(|| GatewayError::NotFound(payment_id.to_string()))?;
        match intent.status {
            PaymentStatus::Succeeded => {}
            PaymentStatus::Refunded => {
                return Err(GatewayError::Rejected("payment already refunded".into()))
            }
            status => {
                return Err(GatewayError::Rejected(format!(
                    "payment not captured: {status:?}"
                )))
            }
        }
        intent.status = PaymentStatus::Refunded;

        info!(payment_id = %payment_id, reason = %reason, "mock payment refunded");
        Ok(Refund {
            id: format!("re_mock_{}", uuid::Uuid::new_v4().simple()),
            payment_id: payment_id.to_string(),
            amount_cents: intent.amount_cents,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(key: &str) -> PaymentRequest {
        PaymentRequest {
            purchase_id: PurchaseId::generate(),
            user_id: UserId::generate(),
            amount_cents: 99,
            currency: "USD".into(),
            idempotency_key: key.into(),
        }
    }

    #[tokio::test]
    async fn same_key_returns_same_intent() {
        let gateway = MockPaymentGateway::new("sk_mock");
        let first = gateway.create_payment_intent(&request("k1")).await.unwrap();
        let second = gateway.create_payment_intent(&request("k1")).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(gateway.intents_created(), 1);
        assert!(first.client_secret.starts_with(&format!("{}_secret_", first.id)));
    }

    #[tokio::test]
    async fn confirm_then_refund() {
        let gateway = MockPaymentGateway::new("sk_mock");
        let intent = gateway.create_payment_intent(&request("k2")).await.unwrap();
        assert_eq!(intent.status, PaymentStatus::RequiresConfirmation);

        let err = gateway.process_refund(&intent.id, "test").await.unwrap_err();
        assert!(matches!(err, GatewayError::Rejected(_)));

        gateway.confirm(&intent.id).unwrap();
        let verification = gateway.verify_payment(&intent.id).await.unwrap();
        assert_eq!(verification.status, PaymentStatus::Succeeded);
        assert_eq!(verification.amount_cents, 99);

        let refund = gateway.process_refund(&intent.id, "test").await.unwrap();
        assert_eq!(refund.amount_cents, 99);
        assert_eq!(
            gateway.verify_payment(&intent.id).await.unwrap().status,
            PaymentStatus::Refunded
        );
    }

    #[tokio::test]
    async fn auto_confirm_succeeds_immediately() {
        let gateway = MockPaymentGateway::new("sk_mock").auto_confirming();
        let intent = gateway.create_payment_intent(&request("k3")).await.unwrap();
        assert_eq!(intent.status, PaymentStatus::Succeeded);
    }

    #[tokio::test]
    async fn unknown_payment_is_not_found() {
        let gateway = MockPaymentGateway::new("sk_mock");
        let err = gateway.verify_payment("pi_missing").await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));
    }
}
