//! Transactional storage layer for gamevault.
//!
//! Two backends implement the same [`Store`] / [`StoreTx`] traits:
//!
//! - [`PgStore`]: PostgreSQL via `sqlx`. Rows are locked with `SELECT … FOR UPDATE`
//!   and lock waits are bounded by `lock_timeout`.
//! - [`MemoryStore`]: in-process tables guarded by per-row async mutexes. Writes are
//!   buffered in the transaction and applied atomically on commit.
//!
//! Engine code never talks to a backend transaction directly. It goes through
//! [`TxContext`], which also records outbox effects and wakes the dispatcher after
//! a commit that published any.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use gamevault_core::{CurrencyType, UserId};
//! use gamevault_store::{Database, MemoryStore};
//!
//! # async fn run() -> gamevault_store::Result<()> {
//! let db = Database::new(Arc::new(MemoryStore::new()));
//! let user_id = UserId::generate();
//!
//! let mut tx = db.begin().await?;
//! let mut wallet = tx.lock_wallet(user_id).await?;
//! wallet.set_balance(CurrencyType::Coins, 100);
//! tx.put_wallet(&wallet).await?;
//! tx.commit().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod memory;
pub mod postgres;
pub mod tx;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use tx::{Database, TxContext};

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gamevault_core::{
    ActivityLogEntry, ConfigType, Effect, EventId, EventStatus, GrantReceipt, InventoryItem,
    ItemType, LedgerEntry, LiveOpsEvent, OutboxRecord, PlayerProgress, Purchase, PurchaseId,
    RemoteConfig, UserId, Wallet,
};

/// How long a transaction waits for a row lock before giving up.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Reads and non-transactional writes.
///
/// Reads see committed data only. Anything that must be atomic with other writes
/// goes through a [`StoreTx`] from [`Store::begin`].
#[async_trait]
pub trait Store: Send + Sync {
    /// Open a transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot start a transaction.
    async fn begin(&self) -> Result<Box<dyn StoreTx>>;

    // =========================================================================
    // Wallets & Ledger
    // =========================================================================

    /// Get a wallet.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_wallet(&self, user_id: UserId) -> Result<Option<Wallet>>;

    /// Get a wallet, creating an empty one if absent. Concurrent callers converge on
    /// one row.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_or_create_wallet(&self, user_id: UserId) -> Result<Wallet>;

    /// List ledger entries for a user, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_ledger_entries(
        &self,
        user_id: UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>>;

    // =========================================================================
    // Inventory
    // =========================================================================

    /// List a user's items, optionally filtered by type.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_inventory(
        &self,
        user_id: UserId,
        item_type: Option<ItemType>,
    ) -> Result<Vec<InventoryItem>>;

    /// Get one item.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_inventory_item(&self, user_id: UserId, item_id: &str)
        -> Result<Option<InventoryItem>>;

    // =========================================================================
    // Progression
    // =========================================================================

    /// Get a player's progress.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_progress(&self, user_id: UserId) -> Result<Option<PlayerProgress>>;

    /// Get a player's progress, creating level-1 progress if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_or_create_progress(&self, user_id: UserId) -> Result<PlayerProgress>;

    // =========================================================================
    // Purchases
    // =========================================================================

    /// Insert a new purchase.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::UniqueViolation` if the idempotency key is taken.
    async fn insert_purchase(&self, purchase: &Purchase) -> Result<()>;

    /// Get a purchase by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_purchase(&self, purchase_id: PurchaseId) -> Result<Option<Purchase>>;

    /// Find a purchase by its idempotency key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn find_purchase_by_key(&self, idempotency_key: &str) -> Result<Option<Purchase>>;

    /// Find a purchase by its gateway payment id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn find_purchase_by_payment_id(&self, payment_id: &str) -> Result<Option<Purchase>>;

    /// List a user's purchases, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_purchases(
        &self,
        user_id: UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Purchase>>;

    // =========================================================================
    // Remote Config
    // =========================================================================

    /// Get a config value.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_config(&self, key: &str) -> Result<Option<RemoteConfig>>;

    /// List all config values ordered by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_configs(&self) -> Result<Vec<RemoteConfig>>;

    // =========================================================================
    // LiveOps
    // =========================================================================

    /// Get an event.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_event(&self, event_id: EventId) -> Result<Option<LiveOpsEvent>>;

    /// List events, newest first, optionally filtered by status.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_events(&self, status: Option<EventStatus>) -> Result<Vec<LiveOpsEvent>>;

    /// Scheduled events whose `starts_at` has passed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_due_events(&self, now: DateTime<Utc>) -> Result<Vec<LiveOpsEvent>>;

    /// Active events whose `ends_at` has passed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_expired_events(&self, now: DateTime<Utc>) -> Result<Vec<LiveOpsEvent>>;

    /// Append to the activity log.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn append_activity(&self, entry: &ActivityLogEntry) -> Result<()>;

    /// Newest activity first, optionally for one event.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_activity(
        &self,
        event_id: Option<EventId>,
        limit: usize,
    ) -> Result<Vec<ActivityLogEntry>>;

    // =========================================================================
    // Outbox
    // =========================================================================

    /// Oldest undelivered effects.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn pending_effects(&self, limit: usize) -> Result<Vec<OutboxRecord>>;

    /// Remove a delivered (or abandoned) effect.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn ack_effect(&self, id: i64) -> Result<()>;

    /// Count a failed delivery. Returns the attempts so far.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the record is gone.
    async fn record_failed_delivery(&self, id: i64) -> Result<u32>;
}

/// An open transaction.
///
/// `lock_*` methods take a pessimistic row lock held until commit or rollback and
/// return `StoreError::LockTimeout` if the wait exceeds the store's lock timeout.
/// Reads inside the transaction see its own uncommitted writes. Dropping a
/// transaction without committing rolls it back.
#[async_trait]
pub trait StoreTx: Send {
    // =========================================================================
    // Wallets & Ledger
    // =========================================================================

    /// Read a wallet without locking it.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    async fn wallet(&mut self, user_id: UserId) -> Result<Option<Wallet>>;

    /// Lock a wallet, creating an empty one if absent.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::LockTimeout` if the row stays locked past the timeout.
    async fn lock_wallet(&mut self, user_id: UserId) -> Result<Wallet>;

    /// Write a wallet. The row must be locked.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails, or if the row is not locked by this
    /// transaction.
    async fn put_wallet(&mut self, wallet: &Wallet) -> Result<()>;

    /// Find the ledger entry that consumed `idempotency_key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    async fn find_ledger_entry(&mut self, idempotency_key: &str) -> Result<Option<LedgerEntry>>;

    /// Append a ledger entry. A taken idempotency key fails with
    /// `StoreError::UniqueViolation`, at the latest on commit.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::UniqueViolation` if the idempotency key is taken.
    async fn insert_ledger_entry(&mut self, entry: &LedgerEntry) -> Result<()>;

    // =========================================================================
    // Inventory
    // =========================================================================

    /// Lock the `(user, item)` slot and return the item if held.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::LockTimeout` if the slot stays locked past the timeout.
    async fn lock_inventory_item(
        &mut self,
        user_id: UserId,
        item_id: &str,
    ) -> Result<Option<InventoryItem>>;

    /// Insert or update an item. The slot must be locked.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails, or if the slot is not locked by this
    /// transaction.
    async fn put_inventory_item(&mut self, item: &InventoryItem) -> Result<()>;

    /// Delete an item. The slot must be locked.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails, or if the slot is not locked by this
    /// transaction.
    async fn delete_inventory_item(&mut self, user_id: UserId, item_id: &str) -> Result<()>;

    /// Find a grant receipt.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    async fn find_grant_receipt(&mut self, key: &str) -> Result<Option<GrantReceipt>>;

    /// Record a grant receipt. A taken key fails with `StoreError::UniqueViolation`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::UniqueViolation` if the key is taken.
    async fn insert_grant_receipt(&mut self, receipt: &GrantReceipt) -> Result<()>;

    // =========================================================================
    // Progression
    // =========================================================================

    /// Lock a player's progress, creating level-1 progress if absent.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::LockTimeout` if the row stays locked past the timeout.
    async fn lock_progress(&mut self, user_id: UserId) -> Result<PlayerProgress>;

    /// Write progress. The row must be locked.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails, or if the row is not locked by this
    /// transaction.
    async fn put_progress(&mut self, progress: &PlayerProgress) -> Result<()>;

    // =========================================================================
    // Purchases
    // =========================================================================

    /// Lock a purchase.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::LockTimeout` if the row stays locked past the timeout.
    async fn lock_purchase(&mut self, purchase_id: PurchaseId) -> Result<Option<Purchase>>;

    /// Write a purchase. The row must be locked.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails, or if the row is not locked by this
    /// transaction.
    async fn put_purchase(&mut self, purchase: &Purchase) -> Result<()>;

    // =========================================================================
    // Remote Config & LiveOps
    // =========================================================================

    /// Set a config value, bumping its version.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::LockTimeout` if the key stays locked past the timeout.
    async fn upsert_config(
        &mut self,
        key: &str,
        value: serde_json::Value,
        config_type: ConfigType,
    ) -> Result<RemoteConfig>;

    /// Lock an event.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::LockTimeout` if the row stays locked past the timeout.
    async fn lock_event(&mut self, event_id: EventId) -> Result<Option<LiveOpsEvent>>;

    /// Insert or update an event. The row must be locked, which for a new event
    /// means calling [`StoreTx::lock_event`] first.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails, or if the row is not locked by this
    /// transaction.
    async fn put_event(&mut self, event: &LiveOpsEvent) -> Result<()>;

    // =========================================================================
    // Outbox
    // =========================================================================

    /// Record an effect for delivery after commit.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Serialization` if the effect cannot be encoded.
    async fn enqueue_effect(&mut self, effect: &Effect) -> Result<()>;

    // =========================================================================
    // Completion
    // =========================================================================

    /// Commit all writes and release locks.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::UniqueViolation` if a buffered key was taken concurrently; nothing is written in that case.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard all writes and release locks.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to roll back.
    async fn rollback(self: Box<Self>) -> Result<()>;
}
