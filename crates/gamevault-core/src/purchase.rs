//! Real-money purchases.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CurrencyType, PurchaseId, UserId};

/// Lifecycle of a purchase.
///
/// `pending → completed → refunded`, or `pending → failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseStatus {
    /// Awaiting payment verification.
    Pending,
    /// Verified; grants issued.
    Completed,
    /// Verification failed.
    Failed,
    /// Refunded after completion; grants clawed back.
    Refunded,
}

impl PurchaseStatus {
    /// Storage / wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }
}

impl fmt::Display for PurchaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PurchaseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "refunded" => Ok(Self::Refunded),
            other => Err(format!("unknown purchase status: {other}")),
        }
    }
}

/// A real-money purchase of a catalog product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Purchase {
    /// Purchase identifier.
    pub id: PurchaseId,
    /// Buying player.
    pub user_id: UserId,
    /// Catalog product.
    pub product_id: String,
    /// Price in minor units of `currency`.
    pub amount_cents: i64,
    /// Fiat currency code (e.g. `USD`).
    pub currency: String,
    /// Lifecycle state.
    pub status: PurchaseStatus,
    /// Gateway name.
    pub payment_provider: String,
    /// Gateway payment intent id.
    pub payment_id: Option<String>,
    /// Client-supplied key; unique across purchases.
    pub idempotency_key: String,
    /// When the payment was verified.
    pub verified_at: Option<DateTime<Utc>>,
    /// Gateway details (client secret, failure reason, refund id).
    pub metadata: serde_json::Value,
    /// When the purchase was initiated.
    pub created_at: DateTime<Utc>,
    /// When the status last changed.
    pub updated_at: DateTime<Utc>,
}

impl Purchase {
    /// Key guarding the currency grant of a completed purchase.
    #[must_use]
    pub fn grant_key(&self, currency: CurrencyType) -> String {
        format!("purchase:{}:{}", self.id, currency)
    }

    /// Key guarding an item grant of a completed purchase.
    #[must_use]
    pub fn item_grant_key(&self, item_id: &str) -> String {
        format!("purchase:{}:item:{item_id}", self.id)
    }

    /// Key guarding the clawback of a refunded purchase.
    #[must_use]
    pub fn refund_key(&self, currency: CurrencyType) -> String {
        format!("refund:{}:{}", self.id, currency)
    }

    /// Move to `status`, stamping `updated_at`.
    pub fn transition(&mut self, status: PurchaseStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grant_keys_are_derived_from_purchase_id() {
        let now = Utc::now();
        let purchase = Purchase {
            id: PurchaseId::generate(),
            user_id: UserId::generate(),
            product_id: "coins_pack_100".into(),
            amount_cents: 99,
            currency: "USD".into(),
            status: PurchaseStatus::Pending,
            payment_provider: "mock".into(),
            payment_id: None,
            idempotency_key: "K1".into(),
            verified_at: None,
            metadata: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
        };

        assert_eq!(
            purchase.grant_key(CurrencyType::Coins),
            format!("purchase:{}:coins", purchase.id)
        );
        assert_ne!(
            purchase.grant_key(CurrencyType::Coins),
            purchase.refund_key(CurrencyType::Coins)
        );
    }

    #[test]
    fn status_names_roundtrip() {
        for status in [
            PurchaseStatus::Pending,
            PurchaseStatus::Completed,
            PurchaseStatus::Failed,
            PurchaseStatus::Refunded,
        ] {
            assert_eq!(status.as_str().parse::<PurchaseStatus>(), Ok(status));
        }
    }
}
