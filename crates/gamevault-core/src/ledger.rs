//! Ledger entries.
//!
//! Every balance change appends one immutable [`LedgerEntry`]. For a given player and
//! currency, the newest entry's `balance_after` equals the wallet balance.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::wallet::CurrencyType;
use crate::{TransactionId, UserId};

/// An immutable record of one balance change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Time-ordered identifier.
    pub id: TransactionId,

    /// Player whose wallet changed.
    pub user_id: UserId,

    /// Why the balance changed.
    pub transaction_type: TransactionType,

    /// Currency that changed.
    pub currency: CurrencyType,

    /// Signed amount. Negative for deductions.
    pub amount: i64,

    /// Balance before the change.
    pub balance_before: i64,

    /// Balance after the change.
    pub balance_after: i64,

    /// Free-text reason.
    pub reason: String,

    /// Globally unique key for at-most-once application.
    pub idempotency_key: Option<String>,

    /// Purchase id, event id, item id, ...
    pub reference_id: Option<String>,

    /// Arbitrary structured context.
    pub metadata: serde_json::Value,

    /// When the entry was written.
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Whether `balance_after = balance_before + amount` holds.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.balance_before.checked_add(self.amount) == Some(self.balance_after)
    }
}

/// Reason category of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Currency bought with real money.
    Purchase,
    /// Gameplay reward (XP conversion, level-up bonus, liveops grant).
    Reward,
    /// Currency spent on items.
    Spend,
    /// Manual grant by an operator.
    AdminGrant,
    /// Currency returned or clawed back by a refund.
    Refund,
}

impl TransactionType {
    /// Storage / wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Purchase => "purchase",
            Self::Reward => "reward",
            Self::Spend => "spend",
            Self::AdminGrant => "admin_grant",
            Self::Refund => "refund",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "purchase" => Ok(Self::Purchase),
            "reward" => Ok(Self::Reward),
            "spend" => Ok(Self::Spend),
            "admin_grant" => Ok(Self::AdminGrant),
            "refund" => Ok(Self::Refund),
            other => Err(format!("unknown transaction type: {other}")),
        }
    }
}

/// A requested change to one currency balance.
///
/// `amount` is always the positive magnitude; the ledger operation decides the sign.
#[derive(Debug, Clone)]
pub struct CurrencyChange {
    /// Player whose wallet changes.
    pub user_id: UserId,
    /// Currency to change.
    pub currency: CurrencyType,
    /// Positive magnitude.
    pub amount: i64,
    /// Category recorded on the entry.
    pub transaction_type: TransactionType,
    /// Free-text reason.
    pub reason: String,
    /// Structured context.
    pub metadata: serde_json::Value,
    /// At-most-once key.
    pub idempotency_key: Option<String>,
    /// Related record.
    pub reference_id: Option<String>,
}

impl CurrencyChange {
    /// Build a change without idempotency key, reference or metadata.
    #[must_use]
    pub fn new(
        user_id: UserId,
        currency: CurrencyType,
        amount: i64,
        transaction_type: TransactionType,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            currency,
            amount,
            transaction_type,
            reason: reason.into(),
            metadata: serde_json::Value::Null,
            idempotency_key: None,
            reference_id: None,
        }
    }

    /// Attach an idempotency key.
    #[must_use]
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Attach a reference id.
    #[must_use]
    pub fn with_reference(mut self, reference_id: impl Into<String>) -> Self {
        self.reference_id = Some(reference_id.into());
        self
    }

    /// Attach metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Build the entry this change produces, given the signed amount and prior balance.
    #[must_use]
    pub fn to_entry(&self, signed_amount: i64, balance_before: i64, balance_after: i64) -> LedgerEntry {
        LedgerEntry {
            id: TransactionId::generate(),
            user_id: self.user_id,
            transaction_type: self.transaction_type,
            currency: self.currency,
            amount: signed_amount,
            balance_before,
            balance_after,
            reason: self.reason.clone(),
            idempotency_key: self.idempotency_key.clone(),
            reference_id: self.reference_id.clone(),
            metadata: self.metadata.clone(),
            created_at: Utc::now(),
        }
    }
}
