//! Error taxonomy for the economy engine.

use crate::ids::IdError;
use crate::wallet::CurrencyType;

/// Result type for economy operations.
pub type Result<T> = std::result::Result<T, EconomyError>;

/// Errors returned by ledger, inventory, purchase, progression and liveops operations.
#[derive(Debug, thiserror::Error)]
pub enum EconomyError {
    /// The amount (or quantity) was zero, negative or overflowed.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// A deduction would drive the balance below zero.
    #[error("insufficient {currency} balance: balance={balance}, required={required}")]
    InsufficientBalance {
        /// Currency being deducted.
        currency: CurrencyType,
        /// Current balance.
        balance: i64,
        /// Requested deduction.
        required: i64,
    },

    /// Wallet, item, progress, purchase, product or event is absent.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record.
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// A non-stackable item was granted to a player who already owns it.
    #[error("item already owned: {item_id}")]
    AlreadyOwned {
        /// The item identifier.
        item_id: String,
    },

    /// More items were requested for removal than the player holds.
    #[error("insufficient quantity of {item_id}: held={held}, requested={requested}")]
    InsufficientQuantity {
        /// The item identifier.
        item_id: String,
        /// Quantity currently held.
        held: i64,
        /// Quantity requested.
        requested: i64,
    },

    /// An idempotency key was already consumed by another write.
    ///
    /// Callers of the ledger never see this when the original write succeeded;
    /// it is resolved into a no-op before returning.
    #[error("duplicate idempotency key: {key}")]
    DuplicateIdempotencyKey {
        /// The conflicting key.
        key: String,
    },

    /// Purchase initiation throttled for this player.
    #[error("rate limit exceeded: max {max_attempts} attempts per {window_secs}s")]
    RateLimitExceeded {
        /// Allowed attempts per window.
        max_attempts: usize,
        /// Window length in seconds.
        window_secs: u64,
    },

    /// The payment gateway did not confirm the payment.
    #[error("payment verification failed: {0}")]
    PaymentVerificationFailed(String),

    /// A row lock could not be acquired within the configured timeout.
    #[error("timed out waiting for a row lock")]
    LockTimeout,

    /// Request payload failed validation.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The record is not in a state that allows the operation.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The payment gateway returned an error.
    #[error("payment gateway error: {0}")]
    Gateway(String),

    /// Storage backend failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),
}

impl EconomyError {
    /// Shorthand for [`EconomyError::NotFound`].
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}
