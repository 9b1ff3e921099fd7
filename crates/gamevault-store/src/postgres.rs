//! PostgreSQL storage implementation.
//!
//! Row locks are `SELECT … FOR UPDATE` inside the transaction, preceded by an
//! `INSERT … ON CONFLICT DO NOTHING` for rows created lazily (wallets, progress).
//! Inventory slots that may not exist yet are serialized with a transaction-scoped
//! advisory lock on `(user_id, item_id)`. Every transaction sets `lock_timeout`, so
//! a blocked lock surfaces as [`StoreError::LockTimeout`].

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{Postgres, Row, Transaction};
use tracing::info;
use uuid::Uuid;

use gamevault_core::{
    ActivityId, ActivityLogEntry, ConfigType, Effect, EventAction, EventId, EventStatus,
    GrantReceipt, InventoryItem, ItemType, LedgerEntry, LiveOpsEvent, OutboxRecord,
    PlayerProgress, Purchase, PurchaseId, RemoteConfig, TransactionId, UserId, Wallet,
};

use crate::error::{Result, StoreError};
use crate::{Store, StoreTx, DEFAULT_LOCK_TIMEOUT};

const WALLET_COLUMNS: &str = "user_id, coins, gems, created_at, updated_at";
const LEDGER_COLUMNS: &str = "id, user_id, transaction_type, currency, amount, balance_before, \
     balance_after, reason, idempotency_key, reference_id, metadata, created_at";
const ITEM_COLUMNS: &str =
    "user_id, item_id, item_type, quantity, metadata, purchased_at, updated_at";
const PROGRESS_COLUMNS: &str =
    "user_id, level, xp, stats, skills, achievements, created_at, updated_at";
const PURCHASE_COLUMNS: &str = "id, user_id, product_id, amount_cents, currency, status, \
     payment_provider, payment_id, idempotency_key, verified_at, metadata, created_at, updated_at";
const CONFIG_COLUMNS: &str = "key, value, config_type, version, updated_at";
const EVENT_COLUMNS: &str = "id, name, action, target_users, status, starts_at, ends_at, \
     created_at, triggered_at, completed_at";
const ACTIVITY_COLUMNS: &str = "id, event_id, user_id, action, status, detail, created_at";

/// PostgreSQL-backed storage.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgStore {
    /// Wrap an existing pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Connect to `database_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot connect.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Set how long transactions wait for row locks.
    #[must_use]
    pub const fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Apply pending migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("database migrations applied");
        Ok(())
    }

    /// The connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// =============================================================================
// Row mapping
// =============================================================================

fn parse<T: FromStr<Err = String>>(value: &str) -> Result<T> {
    value.parse().map_err(StoreError::Serialization)
}

fn to_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn wallet_from_row(row: &PgRow) -> Result<Wallet> {
    Ok(Wallet {
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        coins: row.try_get("coins")?,
        gems: row.try_get("gems")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn ledger_from_row(row: &PgRow) -> Result<LedgerEntry> {
    let id: String = row.try_get("id")?;
    Ok(LedgerEntry {
        id: TransactionId::from_str(&id).map_err(|e| StoreError::Serialization(e.to_string()))?,
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        transaction_type: parse(row.try_get("transaction_type")?)?,
        currency: parse(row.try_get("currency")?)?,
        amount: row.try_get("amount")?,
        balance_before: row.try_get("balance_before")?,
        balance_after: row.try_get("balance_after")?,
        reason: row.try_get("reason")?,
        idempotency_key: row.try_get("idempotency_key")?,
        reference_id: row.try_get("reference_id")?,
        metadata: row.try_get("metadata")?,
        created_at: row.try_get("created_at")?,
    })
}

fn item_from_row(row: &PgRow) -> Result<InventoryItem> {
    Ok(InventoryItem {
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        item_id: row.try_get("item_id")?,
        item_type: parse(row.try_get("item_type")?)?,
        quantity: row.try_get("quantity")?,
        metadata: row.try_get("metadata")?,
        purchased_at: row.try_get("purchased_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn receipt_from_row(row: &PgRow) -> Result<GrantReceipt> {
    Ok(GrantReceipt {
        key: row.try_get("key")?,
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        reference: row.try_get("reference")?,
        created_at: row.try_get("created_at")?,
    })
}

fn progress_from_row(row: &PgRow) -> Result<PlayerProgress> {
    let Json(stats): Json<BTreeMap<String, i64>> = row.try_get("stats")?;
    let Json(skills): Json<BTreeMap<String, i64>> = row.try_get("skills")?;
    let Json(achievements): Json<BTreeMap<String, DateTime<Utc>>> =
        row.try_get("achievements")?;
    Ok(PlayerProgress {
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        level: row.try_get("level")?,
        xp: row.try_get("xp")?,
        stats,
        skills,
        achievements,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn purchase_from_row(row: &PgRow) -> Result<Purchase> {
    Ok(Purchase {
        id: PurchaseId::from_uuid(row.try_get("id")?),
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        product_id: row.try_get("product_id")?,
        amount_cents: row.try_get("amount_cents")?,
        currency: row.try_get("currency")?,
        status: parse(row.try_get("status")?)?,
        payment_provider: row.try_get("payment_provider")?,
        payment_id: row.try_get("payment_id")?,
        idempotency_key: row.try_get("idempotency_key")?,
        verified_at: row.try_get("verified_at")?,
        metadata: row.try_get("metadata")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn config_from_row(row: &PgRow) -> Result<RemoteConfig> {
    Ok(RemoteConfig {
        key: row.try_get("key")?,
        value: row.try_get("value")?,
        config_type: parse(row.try_get("config_type")?)?,
        version: row.try_get("version")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn event_from_row(row: &PgRow) -> Result<LiveOpsEvent> {
    let Json(action): Json<EventAction> = row.try_get("action")?;
    let Json(target_users): Json<Vec<UserId>> = row.try_get("target_users")?;
    Ok(LiveOpsEvent {
        id: EventId::from_uuid(row.try_get("id")?),
        name: row.try_get("name")?,
        action,
        target_users,
        status: parse(row.try_get("status")?)?,
        starts_at: row.try_get("starts_at")?,
        ends_at: row.try_get("ends_at")?,
        created_at: row.try_get("created_at")?,
        triggered_at: row.try_get("triggered_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn activity_from_row(row: &PgRow) -> Result<ActivityLogEntry> {
    let user_id: Option<Uuid> = row.try_get("user_id")?;
    Ok(ActivityLogEntry {
        id: ActivityId::from_uuid(row.try_get("id")?),
        event_id: EventId::from_uuid(row.try_get("event_id")?),
        user_id: user_id.map(UserId::from_uuid),
        action: row.try_get("action")?,
        status: parse(row.try_get("status")?)?,
        detail: row.try_get("detail")?,
        created_at: row.try_get("created_at")?,
    })
}

fn outbox_from_row(row: &PgRow) -> Result<OutboxRecord> {
    let Json(effect): Json<Effect> = row.try_get("effect")?;
    let attempts: i32 = row.try_get("attempts")?;
    Ok(OutboxRecord {
        id: row.try_get("id")?,
        effect,
        attempts: u32::try_from(attempts).unwrap_or_default(),
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>> {
        let mut tx = self.pool.begin().await?;
        // SET does not accept bind parameters.
        let set_timeout = format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.lock_timeout.as_millis()
        );
        sqlx::query(&set_timeout).execute(&mut *tx).await?;
        Ok(Box::new(PgTx { tx }))
    }

    // =========================================================================
    // Wallets & Ledger
    // =========================================================================

    async fn get_wallet(&self, user_id: UserId) -> Result<Option<Wallet>> {
        let sql = format!("SELECT {WALLET_COLUMNS} FROM wallets WHERE user_id = $1");
        sqlx::query(&sql)
            .bind(*user_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(wallet_from_row)
            .transpose()
    }

    async fn get_or_create_wallet(&self, user_id: UserId) -> Result<Wallet> {
        sqlx::query("INSERT INTO wallets (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(*user_id.as_uuid())
            .execute(&self.pool)
            .await?;
        let sql = format!("SELECT {WALLET_COLUMNS} FROM wallets WHERE user_id = $1");
        let row = sqlx::query(&sql)
            .bind(*user_id.as_uuid())
            .fetch_one(&self.pool)
            .await?;
        wallet_from_row(&row)
    }

    async fn list_ledger_entries(
        &self,
        user_id: UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>> {
        let sql = format!(
            "SELECT {LEDGER_COLUMNS} FROM ledger_entries WHERE user_id = $1 \
             ORDER BY seq DESC LIMIT $2 OFFSET $3"
        );
        sqlx::query(&sql)
            .bind(*user_id.as_uuid())
            .bind(to_i64(limit))
            .bind(to_i64(offset))
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(ledger_from_row)
            .collect()
    }

    // =========================================================================
    // Inventory
    // =========================================================================

    async fn list_inventory(
        &self,
        user_id: UserId,
        item_type: Option<ItemType>,
    ) -> Result<Vec<InventoryItem>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM inventory_items \
             WHERE user_id = $1 AND ($2::TEXT IS NULL OR item_type = $2) ORDER BY item_id"
        );
        sqlx::query(&sql)
            .bind(*user_id.as_uuid())
            .bind(item_type.map(|t| t.as_str()))
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(item_from_row)
            .collect()
    }

    async fn get_inventory_item(
        &self,
        user_id: UserId,
        item_id: &str,
    ) -> Result<Option<InventoryItem>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM inventory_items WHERE user_id = $1 AND item_id = $2"
        );
        sqlx::query(&sql)
            .bind(*user_id.as_uuid())
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(item_from_row)
            .transpose()
    }

    // =========================================================================
    // Progression
    // =========================================================================

    async fn get_progress(&self, user_id: UserId) -> Result<Option<PlayerProgress>> {
        let sql = format!("SELECT {PROGRESS_COLUMNS} FROM player_progress WHERE user_id = $1");
        sqlx::query(&sql)
            .bind(*user_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(progress_from_row)
            .transpose()
    }

    async fn get_or_create_progress(&self, user_id: UserId) -> Result<PlayerProgress> {
        sqlx::query(
            "INSERT INTO player_progress (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(*user_id.as_uuid())
        .execute(&self.pool)
        .await?;
        let sql = format!("SELECT {PROGRESS_COLUMNS} FROM player_progress WHERE user_id = $1");
        let row = sqlx::query(&sql)
            .bind(*user_id.as_uuid())
            .fetch_one(&self.pool)
            .await?;
        progress_from_row(&row)
    }

    // =========================================================================
    // Purchases
    // =========================================================================

    async fn insert_purchase(&self, purchase: &Purchase) -> Result<()> {
        let sql = format!(
            "INSERT INTO purchases ({PURCHASE_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
        );
        sqlx::query(&sql)
            .bind(*purchase.id.as_uuid())
            .bind(*purchase.user_id.as_uuid())
            .bind(&purchase.product_id)
            .bind(purchase.amount_cents)
            .bind(&purchase.currency)
            .bind(purchase.status.as_str())
            .bind(&purchase.payment_provider)
            .bind(purchase.payment_id.as_deref())
            .bind(&purchase.idempotency_key)
            .bind(purchase.verified_at)
            .bind(&purchase.metadata)
            .bind(purchase.created_at)
            .bind(purchase.updated_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_purchase(&self, purchase_id: PurchaseId) -> Result<Option<Purchase>> {
        let sql = format!("SELECT {PURCHASE_COLUMNS} FROM purchases WHERE id = $1");
        sqlx::query(&sql)
            .bind(*purchase_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(purchase_from_row)
            .transpose()
    }

    async fn find_purchase_by_key(&self, idempotency_key: &str) -> Result<Option<Purchase>> {
        let sql = format!("SELECT {PURCHASE_COLUMNS} FROM purchases WHERE idempotency_key = $1");
        sqlx::query(&sql)
            .bind(idempotency_key)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(purchase_from_row)
            .transpose()
    }

    async fn find_purchase_by_payment_id(&self, payment_id: &str) -> Result<Option<Purchase>> {
        let sql = format!("SELECT {PURCHASE_COLUMNS} FROM purchases WHERE payment_id = $1");
        sqlx::query(&sql)
            .bind(payment_id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(purchase_from_row)
            .transpose()
    }

    async fn list_purchases(
        &self,
        user_id: UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Purchase>> {
        let sql = format!(
            "SELECT {PURCHASE_COLUMNS} FROM purchases WHERE user_id = $1 \
             ORDER BY created_at DESC LIMIT $2 OFFSET $3"
        );
        sqlx::query(&sql)
            .bind(*user_id.as_uuid())
            .bind(to_i64(limit))
            .bind(to_i64(offset))
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(purchase_from_row)
            .collect()
    }

    // =========================================================================
    // Remote Config
    // =========================================================================

    async fn get_config(&self, key: &str) -> Result<Option<RemoteConfig>> {
        let sql = format!("SELECT {CONFIG_COLUMNS} FROM remote_configs WHERE key = $1");
        sqlx::query(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(config_from_row)
            .transpose()
    }

    async fn list_configs(&self) -> Result<Vec<RemoteConfig>> {
        let sql = format!("SELECT {CONFIG_COLUMNS} FROM remote_configs ORDER BY key");
        sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(config_from_row)
            .collect()
    }

    // =========================================================================
    // LiveOps
    // =========================================================================

    async fn get_event(&self, event_id: EventId) -> Result<Option<LiveOpsEvent>> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM liveops_events WHERE id = $1");
        sqlx::query(&sql)
            .bind(*event_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(event_from_row)
            .transpose()
    }

    async fn list_events(&self, status: Option<EventStatus>) -> Result<Vec<LiveOpsEvent>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM liveops_events \
             WHERE ($1::TEXT IS NULL OR status = $1) ORDER BY created_at DESC"
        );
        sqlx::query(&sql)
            .bind(status.map(|s| s.as_str()))
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(event_from_row)
            .collect()
    }

    async fn list_due_events(&self, now: DateTime<Utc>) -> Result<Vec<LiveOpsEvent>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM liveops_events \
             WHERE status = 'scheduled' AND starts_at <= $1 ORDER BY starts_at"
        );
        sqlx::query(&sql)
            .bind(now)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(event_from_row)
            .collect()
    }

    async fn list_expired_events(&self, now: DateTime<Utc>) -> Result<Vec<LiveOpsEvent>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM liveops_events \
             WHERE status = 'active' AND ends_at <= $1 ORDER BY ends_at"
        );
        sqlx::query(&sql)
            .bind(now)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(event_from_row)
            .collect()
    }

    async fn append_activity(&self, entry: &ActivityLogEntry) -> Result<()> {
        let sql = format!(
            "INSERT INTO liveops_activity ({ACTIVITY_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7)"
        );
        sqlx::query(&sql)
            .bind(*entry.id.as_uuid())
            .bind(*entry.event_id.as_uuid())
            .bind(entry.user_id.map(|u| *u.as_uuid()))
            .bind(&entry.action)
            .bind(entry.status.as_str())
            .bind(entry.detail.as_deref())
            .bind(entry.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_activity(
        &self,
        event_id: Option<EventId>,
        limit: usize,
    ) -> Result<Vec<ActivityLogEntry>> {
        let sql = format!(
            "SELECT {ACTIVITY_COLUMNS} FROM liveops_activity \
             WHERE ($1::UUID IS NULL OR event_id = $1) ORDER BY seq DESC LIMIT $2"
        );
        sqlx::query(&sql)
            .bind(event_id.map(|id| *id.as_uuid()))
            .bind(to_i64(limit))
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(activity_from_row)
            .collect()
    }

    // =========================================================================
    // Outbox
    // =========================================================================

    async fn pending_effects(&self, limit: usize) -> Result<Vec<OutboxRecord>> {
        sqlx::query("SELECT id, effect, attempts, created_at FROM outbox ORDER BY id LIMIT $1")
            .bind(to_i64(limit))
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(outbox_from_row)
            .collect()
    }

    async fn ack_effect(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM outbox WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_failed_delivery(&self, id: i64) -> Result<u32> {
        let attempts: Option<i32> = sqlx::query_scalar(
            "UPDATE outbox SET attempts = attempts + 1 WHERE id = $1 RETURNING attempts",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        let attempts = attempts.ok_or_else(|| StoreError::NotFound {
            entity: "outbox record",
            id: id.to_string(),
        })?;
        Ok(u32::try_from(attempts).unwrap_or_default())
    }
}

/// An open PostgreSQL transaction. Dropping it rolls back.
struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
    // =========================================================================
    // Wallets & Ledger
    // =========================================================================

    async fn wallet(&mut self, user_id: UserId) -> Result<Option<Wallet>> {
        let sql = format!("SELECT {WALLET_COLUMNS} FROM wallets WHERE user_id = $1");
        sqlx::query(&sql)
            .bind(*user_id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await?
            .as_ref()
            .map(wallet_from_row)
            .transpose()
    }

    async fn lock_wallet(&mut self, user_id: UserId) -> Result<Wallet> {
        sqlx::query("INSERT INTO wallets (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(*user_id.as_uuid())
            .execute(&mut *self.tx)
            .await?;
        let sql = format!("SELECT {WALLET_COLUMNS} FROM wallets WHERE user_id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(*user_id.as_uuid())
            .fetch_one(&mut *self.tx)
            .await?;
        wallet_from_row(&row)
    }

    async fn put_wallet(&mut self, wallet: &Wallet) -> Result<()> {
        sqlx::query(
            "UPDATE wallets SET coins = $2, gems = $3, updated_at = $4 WHERE user_id = $1",
        )
        .bind(*wallet.user_id.as_uuid())
        .bind(wallet.coins)
        .bind(wallet.gems)
        .bind(wallet.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn find_ledger_entry(&mut self, idempotency_key: &str) -> Result<Option<LedgerEntry>> {
        let sql = format!("SELECT {LEDGER_COLUMNS} FROM ledger_entries WHERE idempotency_key = $1");
        sqlx::query(&sql)
            .bind(idempotency_key)
            .fetch_optional(&mut *self.tx)
            .await?
            .as_ref()
            .map(ledger_from_row)
            .transpose()
    }

    async fn insert_ledger_entry(&mut self, entry: &LedgerEntry) -> Result<()> {
        let sql = format!(
            "INSERT INTO ledger_entries ({LEDGER_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"
        );
        sqlx::query(&sql)
            .bind(entry.id.to_string())
            .bind(*entry.user_id.as_uuid())
            .bind(entry.transaction_type.as_str())
            .bind(entry.currency.as_str())
            .bind(entry.amount)
            .bind(entry.balance_before)
            .bind(entry.balance_after)
            .bind(&entry.reason)
            .bind(entry.idempotency_key.as_deref())
            .bind(entry.reference_id.as_deref())
            .bind(&entry.metadata)
            .bind(entry.created_at)
            .execute(&mut *self.tx)
            .await?;
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
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(format!("inventory:{user_id}:{item_id}"))
            .execute(&mut *self.tx)
            .await?;
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM inventory_items \
             WHERE user_id = $1 AND item_id = $2 FOR UPDATE"
        );
        sqlx::query(&sql)
            .bind(*user_id.as_uuid())
            .bind(item_id)
            .fetch_optional(&mut *self.tx)
            .await?
            .as_ref()
            .map(item_from_row)
            .transpose()
    }

    async fn put_inventory_item(&mut self, item: &InventoryItem) -> Result<()> {
        let sql = format!(
            "INSERT INTO inventory_items ({ITEM_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (user_id, item_id) DO UPDATE SET \
             item_type = EXCLUDED.item_type, quantity = EXCLUDED.quantity, \
             metadata = EXCLUDED.metadata, updated_at = EXCLUDED.updated_at"
        );
        sqlx::query(&sql)
            .bind(*item.user_id.as_uuid())
            .bind(&item.item_id)
            .bind(item.item_type.as_str())
            .bind(item.quantity)
            .bind(&item.metadata)
            .bind(item.purchased_at)
            .bind(item.updated_at)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn delete_inventory_item(&mut self, user_id: UserId, item_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM inventory_items WHERE user_id = $1 AND item_id = $2")
            .bind(*user_id.as_uuid())
            .bind(item_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn find_grant_receipt(&mut self, key: &str) -> Result<Option<GrantReceipt>> {
        sqlx::query("SELECT key, user_id, reference, created_at FROM grant_receipts WHERE key = $1")
            .bind(key)
            .fetch_optional(&mut *self.tx)
            .await?
            .as_ref()
            .map(receipt_from_row)
            .transpose()
    }

    async fn insert_grant_receipt(&mut self, receipt: &GrantReceipt) -> Result<()> {
        sqlx::query(
            "INSERT INTO grant_receipts (key, user_id, reference, created_at) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(&receipt.key)
        .bind(*receipt.user_id.as_uuid())
        .bind(&receipt.reference)
        .bind(receipt.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    // =========================================================================
    // Progression
    // =========================================================================

    async fn lock_progress(&mut self, user_id: UserId) -> Result<PlayerProgress> {
        sqlx::query(
            "INSERT INTO player_progress (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(*user_id.as_uuid())
        .execute(&mut *self.tx)
        .await?;
        let sql = format!(
            "SELECT {PROGRESS_COLUMNS} FROM player_progress WHERE user_id = $1 FOR UPDATE"
        );
        let row = sqlx::query(&sql)
            .bind(*user_id.as_uuid())
            .fetch_one(&mut *self.tx)
            .await?;
        progress_from_row(&row)
    }

    async fn put_progress(&mut self, progress: &PlayerProgress) -> Result<()> {
        sqlx::query(
            "UPDATE player_progress SET level = $2, xp = $3, stats = $4, skills = $5, \
             achievements = $6, updated_at = $7 WHERE user_id = $1",
        )
        .bind(*progress.user_id.as_uuid())
        .bind(progress.level)
        .bind(progress.xp)
        .bind(Json(&progress.stats))
        .bind(Json(&progress.skills))
        .bind(Json(&progress.achievements))
        .bind(progress.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    // =========================================================================
    // Purchases
    // =========================================================================

    async fn lock_purchase(&mut self, purchase_id: PurchaseId) -> Result<Option<Purchase>> {
        let sql = format!("SELECT {PURCHASE_COLUMNS} FROM purchases WHERE id = $1 FOR UPDATE");
        sqlx::query(&sql)
            .bind(*purchase_id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await?
            .as_ref()
            .map(purchase_from_row)
            .transpose()
    }

    async fn put_purchase(&mut self, purchase: &Purchase) -> Result<()> {
        sqlx::query(
            "UPDATE purchases SET status = $2, payment_id = $3, verified_at = $4, \
             metadata = $5, updated_at = $6 WHERE id = $1",
        )
        .bind(*purchase.id.as_uuid())
        .bind(purchase.status.as_str())
        .bind(purchase.payment_id.as_deref())
        .bind(purchase.verified_at)
        .bind(&purchase.metadata)
        .bind(purchase.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    // =========================================================================
    // Remote Config & LiveOps
    // =========================================================================

    async fn upsert_config(
        &mut self,
        key: &str,
        value: Value,
        config_type: ConfigType,
    ) -> Result<RemoteConfig> {
        let sql = format!(
            "INSERT INTO remote_configs (key, value, config_type, version, updated_at) \
             VALUES ($1, $2, $3, 1, NOW()) \
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, \
             config_type = EXCLUDED.config_type, version = remote_configs.version + 1, \
             updated_at = NOW() \
             RETURNING {CONFIG_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(key)
            .bind(&value)
            .bind(config_type.as_str())
            .fetch_one(&mut *self.tx)
            .await?;
        config_from_row(&row)
    }

    async fn lock_event(&mut self, event_id: EventId) -> Result<Option<LiveOpsEvent>> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM liveops_events WHERE id = $1 FOR UPDATE");
        sqlx::query(&sql)
            .bind(*event_id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await?
            .as_ref()
            .map(event_from_row)
            .transpose()
    }

    async fn put_event(&mut self, event: &LiveOpsEvent) -> Result<()> {
        let sql = format!(
            "INSERT INTO liveops_events ({EVENT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (id) DO UPDATE SET status = EXCLUDED.status, \
             triggered_at = EXCLUDED.triggered_at, completed_at = EXCLUDED.completed_at"
        );
        sqlx::query(&sql)
            .bind(*event.id.as_uuid())
            .bind(&event.name)
            .bind(Json(&event.action))
            .bind(Json(&event.target_users))
            .bind(event.status.as_str())
            .bind(event.starts_at)
            .bind(event.ends_at)
            .bind(event.created_at)
            .bind(event.triggered_at)
            .bind(event.completed_at)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    // =========================================================================
    // Outbox
    // =========================================================================

    async fn enqueue_effect(&mut self, effect: &Effect) -> Result<()> {
        sqlx::query("INSERT INTO outbox (effect) VALUES ($1)")
            .bind(Json(effect))
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    // =========================================================================
    // Completion
    // =========================================================================

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
