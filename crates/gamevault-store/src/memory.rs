//! In-memory transactional store.
//!
//! Committed data lives in [`Tables`] behind a `std::sync::RwLock`, which is only
//! ever held for synchronous sections. Row exclusivity comes from a separate map of
//! per-row `tokio::sync::Mutex`es: a transaction acquires a row's mutex on its first
//! `lock_*` call and keeps the guard until it commits or is dropped. Writes are
//! buffered in the transaction and applied under the table write lock on commit,
//! before the row guards are released.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use gamevault_core::{
    ActivityLogEntry, ConfigType, Effect, EventId, EventStatus, GrantReceipt, InventoryItem,
    ItemType, LedgerEntry, LiveOpsEvent, OutboxRecord, PlayerProgress, Purchase, PurchaseId,
    RemoteConfig, UserId, Wallet,
};

use crate::error::{Result, StoreError};
use crate::{Store, StoreTx, DEFAULT_LOCK_TIMEOUT};

type ItemSlot = (UserId, String);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum RowKey {
    Wallet(UserId),
    Progress(UserId),
    Item(UserId, String),
    Purchase(PurchaseId),
    Config(String),
    Event(EventId),
}

/// Per-row async mutexes.
#[derive(Default)]
struct RowLocks {
    rows: DashMap<RowKey, Arc<Mutex<()>>>,
}

impl RowLocks {
    async fn acquire(&self, key: RowKey, wait: Duration) -> Result<OwnedMutexGuard<()>> {
        let row = Arc::clone(self.rows.entry(key).or_default().value());
        tokio::time::timeout(wait, row.lock_owned())
            .await
            .map_err(|_| StoreError::LockTimeout)
    }
}

#[derive(Default)]
struct Tables {
    wallets: HashMap<UserId, Wallet>,
    ledger: Vec<LedgerEntry>,
    ledger_keys: HashMap<String, usize>,
    inventory: BTreeMap<ItemSlot, InventoryItem>,
    receipts: HashMap<String, GrantReceipt>,
    progress: HashMap<UserId, PlayerProgress>,
    purchases: HashMap<PurchaseId, Purchase>,
    purchase_keys: HashMap<String, PurchaseId>,
    configs: BTreeMap<String, RemoteConfig>,
    events: HashMap<EventId, LiveOpsEvent>,
    activity: Vec<ActivityLogEntry>,
    outbox: BTreeMap<i64, OutboxRecord>,
    next_outbox_id: i64,
}

impl Tables {
    /// Fail if any unique key written by `writes` is already committed.
    fn check_unique(&self, writes: &Writes) -> Result<()> {
        for key in writes.ledger.iter().filter_map(|e| e.idempotency_key.as_ref()) {
            if self.ledger_keys.contains_key(key) {
                return Err(StoreError::UniqueViolation(key.clone()));
            }
        }
        for key in writes.receipts.keys() {
            if self.receipts.contains_key(key) {
                return Err(StoreError::UniqueViolation(key.clone()));
            }
        }
        Ok(())
    }

    fn apply(&mut self, writes: Writes) {
        self.wallets.extend(writes.wallets);

        for entry in writes.ledger {
            if let Some(key) = &entry.idempotency_key {
                self.ledger_keys.insert(key.clone(), self.ledger.len());
            }
            self.ledger.push(entry);
        }

        for (slot, item) in writes.items {
            match item {
                Some(item) => {
                    self.inventory.insert(slot, item);
                }
                None => {
                    self.inventory.remove(&slot);
                }
            }
        }

        self.receipts.extend(writes.receipts);
        self.progress.extend(writes.progress);

        for (id, purchase) in writes.purchases {
            self.purchase_keys
                .insert(purchase.idempotency_key.clone(), id);
            self.purchases.insert(id, purchase);
        }

        self.configs.extend(writes.configs);
        self.events.extend(writes.events);

        let now = Utc::now();
        for effect in writes.effects {
            self.next_outbox_id += 1;
            self.outbox.insert(
                self.next_outbox_id,
                OutboxRecord {
                    id: self.next_outbox_id,
                    effect,
                    attempts: 0,
                    created_at: now,
                },
            );
        }
    }
}

fn read(tables: &RwLock<Tables>) -> RwLockReadGuard<'_, Tables> {
    tables.read().unwrap_or_else(PoisonError::into_inner)
}

fn write(tables: &RwLock<Tables>) -> RwLockWriteGuard<'_, Tables> {
    tables.write().unwrap_or_else(PoisonError::into_inner)
}

/// In-process store for development and tests.
///
/// Cloning shares the same tables.
#[derive(Clone)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
    locks: Arc<RowLocks>,
    lock_timeout: Duration,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Empty store with the default lock timeout.
    #[must_use]
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    /// Empty store whose row-lock waits give up after `lock_timeout`.
    #[must_use]
    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
            locks: Arc::new(RowLocks::default()),
            lock_timeout,
        }
    }

    /// Number of committed ledger entries across all players.
    #[must_use]
    pub fn ledger_len(&self) -> usize {
        read(&self.tables).ledger.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>> {
        Ok(Box::new(MemoryTx {
            tables: Arc::clone(&self.tables),
            locks: Arc::clone(&self.locks),
            lock_timeout: self.lock_timeout,
            held: HashMap::new(),
            writes: Writes::default(),
        }))
    }

    // =========================================================================
    // Wallets & Ledger
    // =========================================================================

    async fn get_wallet(&self, user_id: UserId) -> Result<Option<Wallet>> {
        Ok(read(&self.tables).wallets.get(&user_id).cloned())
    }

    async fn get_or_create_wallet(&self, user_id: UserId) -> Result<Wallet> {
        let mut tables = write(&self.tables);
        Ok(tables
            .wallets
            .entry(user_id)
            .or_insert_with(|| Wallet::new(user_id))
            .clone())
    }

    async fn list_ledger_entries(
        &self,
        user_id: UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>> {
        let tables = read(&self.tables);
        Ok(tables
            .ledger
            .iter()
            .rev()
            .filter(|entry| entry.user_id == user_id)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    // =========================================================================
    // Inventory
    // =========================================================================

    async fn list_inventory(
        &self,
        user_id: UserId,
        item_type: Option<ItemType>,
    ) -> Result<Vec<InventoryItem>> {
        let tables = read(&self.tables);
        Ok(tables
            .inventory
            .values()
            .filter(|item| item.user_id == user_id)
            .filter(|item| item_type.map_or(true, |t| item.item_type == t))
            .cloned()
            .collect())
    }

    async fn get_inventory_item(
        &self,
        user_id: UserId,
        item_id: &str,
    ) -> Result<Option<InventoryItem>> {
        Ok(read(&self.tables)
            .inventory
            .get(&(user_id, item_id.to_string()))
            .cloned())
    }

    // =========================================================================
    // Progression
    // =========================================================================

    async fn get_progress(&self, user_id: UserId) -> Result<Option<PlayerProgress>> {
        Ok(read(&self.tables).progress.get(&user_id).cloned())
    }

    async fn get_or_create_progress(&self, user_id: UserId) -> Result<PlayerProgress> {
        let mut tables = write(&self.tables);
        Ok(tables
            .progress
            .entry(user_id)
            .or_insert_with(|| PlayerProgress::new(user_id))
            .clone())
    }

    // =========================================================================
    // Purchases
    // =========================================================================

    async fn insert_purchase(&self, purchase: &Purchase) -> Result<()> {
        let mut tables = write(&self.tables);
        if tables.purchase_keys.contains_key(&purchase.idempotency_key) {
            return Err(StoreError::UniqueViolation(
                purchase.idempotency_key.clone(),
            ));
        }
        tables
            .purchase_keys
            .insert(purchase.idempotency_key.clone(), purchase.id);
        tables.purchases.insert(purchase.id, purchase.clone());
        Ok(())
    }

    async fn get_purchase(&self, purchase_id: PurchaseId) -> Result<Option<Purchase>> {
        Ok(read(&self.tables).purchases.get(&purchase_id).cloned())
    }

    async fn find_purchase_by_key(&self, idempotency_key: &str) -> Result<Option<Purchase>> {
        let tables = read(&self.tables);
        Ok(tables
            .purchase_keys
            .get(idempotency_key)
            .and_then(|id| tables.purchases.get(id))
            .cloned())
    }

    async fn find_purchase_by_payment_id(&self, payment_id: &str) -> Result<Option<Purchase>> {
        Ok(read(&self.tables)
            .purchases
            .values()
            .find(|p| p.payment_id.as_deref() == Some(payment_id))
            .cloned())
    }

    async fn list_purchases(
        &self,
        user_id: UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Purchase>> {
        let mut purchases: Vec<Purchase> = read(&self.tables)
            .purchases
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        purchases.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(purchases.into_iter().skip(offset).take(limit).collect())
    }

    // =========================================================================
    // Remote Config
    // =========================================================================

    async fn get_config(&self, key: &str) -> Result<Option<RemoteConfig>> {
        Ok(read(&self.tables).configs.get(key).cloned())
    }

    async fn list_configs(&self) -> Result<Vec<RemoteConfig>> {
        Ok(read(&self.tables).configs.values().cloned().collect())
    }

    // =========================================================================
    // LiveOps
    // =========================================================================

    async fn get_event(&self, event_id: EventId) -> Result<Option<LiveOpsEvent>> {
        Ok(read(&self.tables).events.get(&event_id).cloned())
    }

    async fn list_events(&self, status: Option<EventStatus>) -> Result<Vec<LiveOpsEvent>> {
        let mut events: Vec<LiveOpsEvent> = read(&self.tables)
            .events
            .values()
            .filter(|e| status.map_or(true, |s| e.status == s))
            .cloned()
            .collect();
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(events)
    }

    async fn list_due_events(&self, now: DateTime<Utc>) -> Result<Vec<LiveOpsEvent>> {
        Ok(read(&self.tables)
            .events
            .values()
            .filter(|e| e.status == EventStatus::Scheduled)
            .filter(|e| e.starts_at.is_some_and(|start| start <= now))
            .cloned()
            .collect())
    }

    async fn list_expired_events(&self, now: DateTime<Utc>) -> Result<Vec<LiveOpsEvent>> {
        Ok(read(&self.tables)
            .events
            .values()
            .filter(|e| e.status == EventStatus::Active)
            .filter(|e| e.ends_at.is_some_and(|end| end <= now))
            .cloned()
            .collect())
    }

    async fn append_activity(&self, entry: &ActivityLogEntry) -> Result<()> {
        write(&self.tables).activity.push(entry.clone());
        Ok(())
    }

    async fn list_activity(
        &self,
        event_id: Option<EventId>,
        limit: usize,
    ) -> Result<Vec<ActivityLogEntry>> {
        Ok(read(&self.tables)
            .activity
            .iter()
            .rev()
            .filter(|a| event_id.map_or(true, |id| a.event_id == id))
            .take(limit)
            .cloned()
            .collect())
    }

    // =========================================================================
    // Outbox
    // =========================================================================

    async fn pending_effects(&self, limit: usize) -> Result<Vec<OutboxRecord>> {
        Ok(read(&self.tables)
            .outbox
            .values()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn ack_effect(&self, id: i64) -> Result<()> {
        write(&self.tables).outbox.remove(&id);
        Ok(())
    }

    async fn record_failed_delivery(&self, id: i64) -> Result<u32> {
        let mut tables = write(&self.tables);
        let record = tables.outbox.get_mut(&id).ok_or_else(|| StoreError::NotFound {
            entity: "outbox record",
            id: id.to_string(),
        })?;
        record.attempts += 1;
        Ok(record.attempts)
    }
}

/// Writes buffered by an open transaction. `None` in `items` is a deletion.
#[derive(Default)]
struct Writes {
    wallets: HashMap<UserId, Wallet>,
    ledger: Vec<LedgerEntry>,
    items: HashMap<ItemSlot, Option<InventoryItem>>,
    receipts: HashMap<String, GrantReceipt>,
    progress: HashMap<UserId, PlayerProgress>,
    purchases: HashMap<PurchaseId, Purchase>,
    configs: HashMap<String, RemoteConfig>,
    events: HashMap<EventId, LiveOpsEvent>,
    effects: Vec<Effect>,
}

struct MemoryTx {
    tables: Arc<RwLock<Tables>>,
    locks: Arc<RowLocks>,
    lock_timeout: Duration,
    held: HashMap<RowKey, OwnedMutexGuard<()>>,
    writes: Writes,
}

impl MemoryTx {
    async fn lock(&mut self, key: RowKey) -> Result<()> {
        if self.held.contains_key(&key) {
            return Ok(());
        }
        let guard = self.locks.acquire(key.clone(), self.lock_timeout).await?;
        self.held.insert(key, guard);
        Ok(())
    }

    fn ensure_locked(&self, key: &RowKey) -> Result<()> {
        if self.held.contains_key(key) {
            Ok(())
        } else {
            Err(StoreError::Database(format!("row not locked: {key:?}")))
        }
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    // =========================================================================
    // Wallets & Ledger
    // =========================================================================

    async fn wallet(&mut self, user_id: UserId) -> Result<Option<Wallet>> {
        if let Some(wallet) = self.writes.wallets.get(&user_id) {
            return Ok(Some(wallet.clone()));
        }
        Ok(read(&self.tables).wallets.get(&user_id).cloned())
    }

    async fn lock_wallet(&mut self, user_id: UserId) -> Result<Wallet> {
        self.lock(RowKey::Wallet(user_id)).await?;
        let wallet = self.wallet(user_id).await?;
        Ok(wallet.unwrap_or_else(|| Wallet::new(user_id)))
    }

    async fn put_wallet(&mut self, wallet: &Wallet) -> Result<()> {
        self.ensure_locked(&RowKey::Wallet(wallet.user_id))?;
        self.writes.wallets.insert(wallet.user_id, wallet.clone());
        Ok(())
    }

    async fn find_ledger_entry(&mut self, idempotency_key: &str) -> Result<Option<LedgerEntry>> {
        if let Some(entry) = self
            .writes
            .ledger
            .iter()
            .find(|e| e.idempotency_key.as_deref() == Some(idempotency_key))
        {
            return Ok(Some(entry.clone()));
        }
        let tables = read(&self.tables);
        Ok(tables
            .ledger_keys
            .get(idempotency_key)
            .and_then(|&idx| tables.ledger.get(idx))
            .cloned())
    }

    async fn insert_ledger_entry(&mut self, entry: &LedgerEntry) -> Result<()> {
        if let Some(key) = &entry.idempotency_key {
            if self.find_ledger_entry(key).await?.is_some() {
                return Err(StoreError::UniqueViolation(key.clone()));
            }
        }
        self.writes.ledger.push(entry.clone());
        Ok(())
    }

    // =========================================================================
    // Inventory
    // =========================================================================

    async fn lock_inventory_item(
        &mut self,
        user_id: UserId,
        item_id: &str,
    ) -> Result<Option<InventoryItem>> {
        self.lock(RowKey::Item(user_id, item_id.to_string())).await?;
        let slot = (user_id, item_id.to_string());
        if let Some(pending) = self.writes.items.get(&slot) {
            return Ok(pending.clone());
        }
        Ok(read(&self.tables).inventory.get(&slot).cloned())
    }

    async fn put_inventory_item(&mut self, item: &InventoryItem) -> Result<()> {
        self.ensure_locked(&RowKey::Item(item.user_id, item.item_id.clone()))?;
        self.writes
            .items
            .insert((item.user_id, item.item_id.clone()), Some(item.clone()));
        Ok(())
    }

    async fn delete_inventory_item(&mut self, user_id: UserId, item_id: &str) -> Result<()> {
        self.ensure_locked(&RowKey::Item(user_id, item_id.to_string()))?;
        self.writes.items.insert((user_id, item_id.to_string()), None);
        Ok(())
    }

    async fn find_grant_receipt(&mut self, key: &str) -> Result<Option<GrantReceipt>> {
        if let Some(receipt) = self.writes.receipts.get(key) {
            return Ok(Some(receipt.clone()));
        }
        Ok(read(&self.tables).receipts.get(key).cloned())
    }

    async fn insert_grant_receipt(&mut self, receipt: &GrantReceipt) -> Result<()> {
        if self.find_grant_receipt(&receipt.key).await?.is_some() {
            return Err(StoreError::UniqueViolation(receipt.key.clone()));
        }
        self.writes
            .receipts
            .insert(receipt.key.clone(), receipt.clone());
        Ok(())
    }

    // =========================================================================
    // Progression
    // =========================================================================

    async fn lock_progress(&mut self, user_id: UserId) -> Result<PlayerProgress> {
        self.lock(RowKey::Progress(user_id)).await?;
        if let Some(progress) = self.writes.progress.get(&user_id) {
            return Ok(progress.clone());
        }
        let committed = read(&self.tables).progress.get(&user_id).cloned();
        Ok(committed.unwrap_or_else(|| PlayerProgress::new(user_id)))
    }

    async fn put_progress(&mut self, progress: &PlayerProgress) -> Result<()> {
        self.ensure_locked(&RowKey::Progress(progress.user_id))?;
        self.writes
            .progress
            .insert(progress.user_id, progress.clone());
        Ok(())
    }

    // =========================================================================
    // Purchases
    // =========================================================================

    async fn lock_purchase(&mut self, purchase_id: PurchaseId) -> Result<Option<Purchase>> {
        self.lock(RowKey::Purchase(purchase_id)).await?;
        if let Some(purchase) = self.writes.purchases.get(&purchase_id) {
            return Ok(Some(purchase.clone()));
        }
        Ok(read(&self.tables).purchases.get(&purchase_id).cloned())
    }

    async fn put_purchase(&mut self, purchase: &Purchase) -> Result<()> {
        self.ensure_locked(&RowKey::Purchase(purchase.id))?;
        self.writes.purchases.insert(purchase.id, purchase.clone());
        Ok(())
    }

    // =========================================================================
    // Remote Config & LiveOps
    // =========================================================================

    async fn upsert_config(
        &mut self,
        key: &str,
        value: serde_json::Value,
        config_type: ConfigType,
    ) -> Result<RemoteConfig> {
        self.lock(RowKey::Config(key.to_string())).await?;
        let current_version = match self.writes.configs.get(key) {
            Some(pending) => Some(pending.version),
            None => read(&self.tables).configs.get(key).map(|c| c.version),
        };
        let config = RemoteConfig {
            key: key.to_string(),
            value,
            config_type,
            version: current_version.map_or(1, |v| v + 1),
            updated_at: Utc::now(),
        };
        self.writes.configs.insert(key.to_string(), config.clone());
        Ok(config)
    }

    async fn lock_event(&mut self, event_id: EventId) -> Result<Option<LiveOpsEvent>> {
        self.lock(RowKey::Event(event_id)).await?;
        if let Some(event) = self.writes.events.get(&event_id) {
            return Ok(Some(event.clone()));
        }
        Ok(read(&self.tables).events.get(&event_id).cloned())
    }

    async fn put_event(&mut self, event: &LiveOpsEvent) -> Result<()> {
        self.ensure_locked(&RowKey::Event(event.id))?;
        self.writes.events.insert(event.id, event.clone());
        Ok(())
    }

    // =========================================================================
    // Outbox
    // =========================================================================

    async fn enqueue_effect(&mut self, effect: &Effect) -> Result<()> {
        self.writes.effects.push(effect.clone());
        Ok(())
    }

    // =========================================================================
    // Completion
    // =========================================================================

    async fn commit(self: Box<Self>) -> Result<()> {
        let Self {
            tables,
            held,
            writes,
            ..
        } = *self;
        {
            let mut tables = write(&tables);
            tables.check_unique(&writes)?;
            tables.apply(writes);
        }
        debug!(rows = held.len(), "memory transaction committed");
        drop(held);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gamevault_core::{CurrencyChange, CurrencyType, TransactionType};

    fn entry(user_id: UserId, key: &str) -> LedgerEntry {
        CurrencyChange::new(user_id, CurrencyType::Coins, 10, TransactionType::Reward, "test")
            .with_idempotency_key(key)
            .to_entry(10, 0, 10)
    }

    #[tokio::test]
    async fn uncommitted_writes_are_invisible() {
        let store = MemoryStore::new();
        let user_id = UserId::generate();

        let mut tx = store.begin().await.unwrap();
        let mut wallet = tx.lock_wallet(user_id).await.unwrap();
        wallet.set_balance(CurrencyType::Coins, 40);
        tx.put_wallet(&wallet).await.unwrap();

        assert_eq!(tx.wallet(user_id).await.unwrap().unwrap().coins, 40);
        assert!(store.get_wallet(user_id).await.unwrap().is_none());

        tx.commit().await.unwrap();
        assert_eq!(store.get_wallet(user_id).await.unwrap().unwrap().coins, 40);
    }

    #[tokio::test]
    async fn rollback_discards_writes_and_effects() {
        let store = MemoryStore::new();
        let user_id = UserId::generate();

        let mut tx = store.begin().await.unwrap();
        tx.insert_ledger_entry(&entry(user_id, "k")).await.unwrap();
        tx.enqueue_effect(&Effect::wallet(&Wallet::new(user_id)))
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(store.ledger_len(), 0);
        assert!(store.pending_effects(10).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn second_locker_times_out() {
        let store = MemoryStore::with_lock_timeout(Duration::from_millis(50));
        let user_id = UserId::generate();

        let mut first = store.begin().await.unwrap();
        first.lock_wallet(user_id).await.unwrap();

        let mut second = store.begin().await.unwrap();
        let err = second.lock_wallet(user_id).await.unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout));

        first.commit().await.unwrap();
        assert!(second.lock_wallet(user_id).await.is_ok());
    }

    #[tokio::test]
    async fn relocking_in_same_transaction_is_reentrant() {
        let store = MemoryStore::new();
        let user_id = UserId::generate();

        let mut tx = store.begin().await.unwrap();
        tx.lock_progress(user_id).await.unwrap();
        tx.lock_progress(user_id).await.unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn put_without_lock_is_rejected() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let err = tx.put_wallet(&Wallet::new(UserId::generate())).await;
        assert!(matches!(err, Err(StoreError::Database(_))));
    }

    #[tokio::test]
    async fn new_event_is_written_under_its_row_lock() {
        let store = MemoryStore::new();
        let event = LiveOpsEvent::create(gamevault_core::NewLiveOpsEvent {
            name: "notice".into(),
            action: gamevault_core::EventAction::Announcement {
                message: "maintenance".into(),
            },
            target_users: Vec::new(),
            starts_at: None,
            ends_at: None,
        })
        .unwrap();

        let mut tx = store.begin().await.unwrap();
        let err = tx.put_event(&event).await;
        assert!(matches!(err, Err(StoreError::Database(_))));

        assert!(tx.lock_event(event.id).await.unwrap().is_none());
        tx.put_event(&event).await.unwrap();
        tx.commit().await.unwrap();
        assert!(store.get_event(event.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn duplicate_ledger_key_fails_at_commit() {
        let store = MemoryStore::new();
        let user_id = UserId::generate();

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        first.insert_ledger_entry(&entry(user_id, "dup")).await.unwrap();
        second.insert_ledger_entry(&entry(user_id, "dup")).await.unwrap();

        first.commit().await.unwrap();
        let err = second.commit().await.unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(key) if key == "dup"));
        assert_eq!(store.ledger_len(), 1);
    }

    #[tokio::test]
    async fn duplicate_purchase_key_is_rejected() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let purchase = Purchase {
            id: PurchaseId::generate(),
            user_id: UserId::generate(),
            product_id: "coins_pack_100".into(),
            amount_cents: 99,
            currency: "USD".into(),
            status: gamevault_core::PurchaseStatus::Pending,
            payment_provider: "mock".into(),
            payment_id: None,
            idempotency_key: "K1".into(),
            verified_at: None,
            metadata: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
        };
        store.insert_purchase(&purchase).await.unwrap();

        let mut again = purchase.clone();
        again.id = PurchaseId::generate();
        assert!(matches!(
            store.insert_purchase(&again).await,
            Err(StoreError::UniqueViolation(_))
        ));
        assert_eq!(
            store.find_purchase_by_key("K1").await.unwrap().unwrap().id,
            purchase.id
        );
    }

    #[tokio::test]
    async fn config_versions_increase() {
        let store = MemoryStore::new();
        for expected in 1..=3 {
            let mut tx = store.begin().await.unwrap();
            let config = tx
                .upsert_config("xp_multiplier", serde_json::json!(2.0), ConfigType::Number)
                .await
                .unwrap();
            assert_eq!(config.version, expected);
            tx.commit().await.unwrap();
        }
    }

    #[tokio::test]
    async fn outbox_preserves_order_and_counts_failures() {
        let store = MemoryStore::new();
        let user_id = UserId::generate();

        let mut tx = store.begin().await.unwrap();
        for coins in [1, 2, 3] {
            let mut wallet = Wallet::new(user_id);
            wallet.coins = coins;
            tx.enqueue_effect(&Effect::wallet(&wallet)).await.unwrap();
        }
        tx.commit().await.unwrap();

        let pending = store.pending_effects(10).await.unwrap();
        let ids: Vec<i64> = pending.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);

        assert_eq!(store.record_failed_delivery(1).await.unwrap(), 1);
        assert_eq!(store.record_failed_delivery(1).await.unwrap(), 2);
        store.ack_effect(1).await.unwrap();
        assert_eq!(store.pending_effects(10).await.unwrap().len(), 2);
    }
}
