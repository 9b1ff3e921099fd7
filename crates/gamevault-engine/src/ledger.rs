//! Wallet ledger.
//!
//! Every balance change runs the same sequence inside one transaction:
//!
//! 1. If the change carries an idempotency key that the ledger already holds,
//!    return the wallet unchanged. The held entry must describe the same change
//!    (player, currency, signed amount); a key reused for anything else is
//!    rejected with `DuplicateIdempotencyKey`.
//! 2. Lock the wallet row (created on first use).
//! 3. Check the key again under the lock, so a duplicate that waited on the lock
//!    becomes a no-op instead of a second application.
//! 4. Compute the new balance and reject it if negative.
//! 5. Write the wallet and the ledger entry, and publish `wallet_updated` and
//!    `transaction_recorded`.
//!
//! With a caller-supplied [`TxContext`] the caller commits. Otherwise the ledger
//! opens and finishes its own transaction, and a unique violation on commit is
//! taken to mean a concurrent duplicate already applied the change, provided the
//! committed entry matches.

use gamevault_core::{
    CurrencyChange, EconomyError, Effect, LedgerEntry, Result, UserId, Wallet,
};
use gamevault_store::{Database, TxContext};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Credit,
    Debit,
}

/// Per-player balances and their append-only transaction log.
#[derive(Debug, Clone)]
pub struct Ledger {
    db: Database,
}

impl Ledger {
    /// Ledger over `db`.
    #[must_use]
    pub const fn new(db: Database) -> Self {
        Self { db }
    }

    /// The player's wallet, created empty on first access.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the read fails.
    pub async fn get_or_create_wallet(&self, user_id: UserId) -> Result<Wallet> {
        Ok(self.db.store().get_or_create_wallet(user_id).await?)
    }

    /// Credit `change.amount` to the wallet.
    ///
    /// # Errors
    ///
    /// - `InvalidAmount` if the amount is not positive or the balance would overflow.
    /// - `DuplicateIdempotencyKey` if the key was spent on a different change.
    /// - `LockTimeout` if the wallet stays locked past the store's timeout.
    pub async fn add_currency(
        &self,
        change: &CurrencyChange,
        tx: Option<&mut TxContext>,
    ) -> Result<Wallet> {
        self.apply(change, Direction::Credit, tx).await
    }

    /// Debit `change.amount` from the wallet.
    ///
    /// # Errors
    ///
    /// - `InvalidAmount` if the amount is not positive.
    /// - `InsufficientBalance` if the balance is below the amount.
    /// - `DuplicateIdempotencyKey` if the key was spent on a different change.
    /// - `LockTimeout` if the wallet stays locked past the store's timeout.
    pub async fn deduct_currency(
        &self,
        change: &CurrencyChange,
        tx: Option<&mut TxContext>,
    ) -> Result<Wallet> {
        self.apply(change, Direction::Debit, tx).await
    }

    /// Ledger entries for a player, newest first.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the read fails.
    pub async fn transaction_history(
        &self,
        user_id: UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>> {
        Ok(self
            .db
            .store()
            .list_ledger_entries(user_id, limit, offset)
            .await?)
    }

    async fn apply(
        &self,
        change: &CurrencyChange,
        direction: Direction,
        tx: Option<&mut TxContext>,
    ) -> Result<Wallet> {
        if change.amount <= 0 {
            return Err(EconomyError::InvalidAmount(format!(
                "amount must be positive, got {}",
                change.amount
            )));
        }

        let Some(tx) = tx else {
            let mut tx = self.db.begin().await?;
            let result = Self::apply_in(&mut tx, change, direction).await;
            return match tx.finish(result).await {
                Err(EconomyError::DuplicateIdempotencyKey { key }) => {
                    self.settle_concurrent_duplicate(change, direction, key).await
                }
                other => other,
            };
        };
        Self::apply_in(tx, change, direction).await
    }

    /// `key` is already in the ledger. Succeed only if the entry holding it
    /// records this same change.
    async fn settle_concurrent_duplicate(
        &self,
        change: &CurrencyChange,
        direction: Direction,
        key: String,
    ) -> Result<Wallet> {
        let mut tx = self.db.begin().await?;
        let existing = tx.find_ledger_entry(&key).await;
        tx.rollback().await?;
        match existing? {
            Some(entry) => {
                ensure_same_change(&entry, change, direction)?;
                debug!(user_id = %change.user_id, key = %key, "concurrent duplicate already applied");
                self.get_or_create_wallet(change.user_id).await
            }
            None => Err(EconomyError::DuplicateIdempotencyKey { key }),
        }
    }

    async fn apply_in(
        tx: &mut TxContext,
        change: &CurrencyChange,
        direction: Direction,
    ) -> Result<Wallet> {
        if let Some(key) = &change.idempotency_key {
            if let Some(entry) = tx.find_ledger_entry(key).await? {
                ensure_same_change(&entry, change, direction)?;
                debug!(user_id = %change.user_id, key = %key, "idempotent replay");
                let wallet = tx.wallet(change.user_id).await?;
                return Ok(wallet.unwrap_or_else(|| Wallet::new(change.user_id)));
            }
        }

        let mut wallet = tx.lock_wallet(change.user_id).await?;

        if let Some(key) = &change.idempotency_key {
            if let Some(entry) = tx.find_ledger_entry(key).await? {
                ensure_same_change(&entry, change, direction)?;
                debug!(user_id = %change.user_id, key = %key, "duplicate applied while waiting for lock");
                return Ok(wallet);
            }
        }

        let before = wallet.balance(change.currency);
        let signed = direction.signed(change.amount);
        let after = before
            .checked_add(signed)
            .ok_or_else(|| EconomyError::InvalidAmount("balance overflow".into()))?;
        if after < 0 {
            return Err(EconomyError::InsufficientBalance {
                currency: change.currency,
                balance: before,
                required: change.amount,
            });
        }

        wallet.set_balance(change.currency, after);
        tx.put_wallet(&wallet).await?;

        let entry = change.to_entry(signed, before, after);
        tx.insert_ledger_entry(&entry).await?;

        tx.publish(Effect::wallet(&wallet)).await?;
        tx.publish(Effect::TransactionRecorded {
            user_id: change.user_id,
            transaction: entry,
        })
        .await?;

        info!(
            user_id = %change.user_id,
            currency = %change.currency,
            amount = signed,
            balance = after,
            transaction_type = %change.transaction_type,
            "balance changed"
        );
        Ok(wallet)
    }
}

impl Direction {
    const fn signed(self, amount: i64) -> i64 {
        match self {
            Self::Credit => amount,
            Self::Debit => -amount,
        }
    }
}

/// A replayed key must belong to the same player, currency and signed amount.
fn ensure_same_change(entry: &LedgerEntry, change: &CurrencyChange, direction: Direction) -> Result<()> {
    if entry.user_id == change.user_id
        && entry.currency == change.currency
        && entry.amount == direction.signed(change.amount)
    {
        return Ok(());
    }
    warn!(
        user_id = %change.user_id,
        owner = %entry.user_id,
        key = entry.idempotency_key.as_deref().unwrap_or_default(),
        "idempotency key reused for a different change"
    );
    Err(EconomyError::DuplicateIdempotencyKey {
        key: entry.idempotency_key.clone().unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gamevault_core::{CurrencyType, TransactionType};
    use gamevault_store::MemoryStore;
    use std::sync::Arc;

    fn ledger() -> Ledger {
        Ledger::new(Database::new(Arc::new(MemoryStore::new())))
    }

    fn grant(user_id: UserId, amount: i64) -> CurrencyChange {
        CurrencyChange::new(
            user_id,
            CurrencyType::Coins,
            amount,
            TransactionType::AdminGrant,
            "test grant",
        )
    }

    #[tokio::test]
    async fn add_then_deduct_writes_consistent_entries() {
        let ledger = ledger();
        let user_id = UserId::generate();

        ledger.add_currency(&grant(user_id, 100), None).await.unwrap();
        let wallet = ledger
            .deduct_currency(&grant(user_id, 30), None)
            .await
            .unwrap();
        assert_eq!(wallet.coins, 70);

        let history = ledger.transaction_history(user_id, 10, 0).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].amount, -30);
        assert_eq!(history[0].balance_after, 70);
        assert!(history.iter().all(LedgerEntry::is_consistent));
    }

    #[tokio::test]
    async fn non_positive_amounts_are_rejected() {
        let ledger = ledger();
        let user_id = UserId::generate();
        for amount in [0, -5] {
            let err = ledger
                .add_currency(&grant(user_id, amount), None)
                .await
                .unwrap_err();
            assert!(matches!(err, EconomyError::InvalidAmount(_)));
        }
    }

    #[tokio::test]
    async fn overdraft_is_rejected_without_writing() {
        let ledger = ledger();
        let user_id = UserId::generate();
        ledger.add_currency(&grant(user_id, 10), None).await.unwrap();

        let err = ledger
            .deduct_currency(&grant(user_id, 11), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EconomyError::InsufficientBalance { balance: 10, required: 11, .. }
        ));
        assert_eq!(ledger.get_or_create_wallet(user_id).await.unwrap().coins, 10);
        assert_eq!(ledger.transaction_history(user_id, 10, 0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn replayed_key_applies_once() {
        let ledger = ledger();
        let user_id = UserId::generate();
        let change = grant(user_id, 25).with_idempotency_key("grant-1");

        for _ in 0..5 {
            let wallet = ledger.add_currency(&change, None).await.unwrap();
            assert_eq!(wallet.coins, 25);
        }
        assert_eq!(ledger.transaction_history(user_id, 10, 0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn key_spent_by_another_player_is_rejected() {
        let ledger = ledger();
        let (a, b) = (UserId::generate(), UserId::generate());
        ledger
            .add_currency(&grant(a, 100).with_idempotency_key("grant-1"), None)
            .await
            .unwrap();

        let err = ledger
            .add_currency(&grant(b, 100).with_idempotency_key("grant-1"), None)
            .await
            .unwrap_err();

        assert!(matches!(err, EconomyError::DuplicateIdempotencyKey { ref key } if key == "grant-1"));
        assert_eq!(ledger.get_or_create_wallet(a).await.unwrap().coins, 100);
        assert_eq!(ledger.get_or_create_wallet(b).await.unwrap().coins, 0);
    }

    #[tokio::test]
    async fn key_reused_for_a_different_amount_is_rejected() {
        let ledger = ledger();
        let user_id = UserId::generate();
        ledger
            .add_currency(&grant(user_id, 100).with_idempotency_key("grant-1"), None)
            .await
            .unwrap();

        let err = ledger
            .deduct_currency(&grant(user_id, 100).with_idempotency_key("grant-1"), None)
            .await
            .unwrap_err();

        assert!(matches!(err, EconomyError::DuplicateIdempotencyKey { .. }));
        assert_eq!(ledger.get_or_create_wallet(user_id).await.unwrap().coins, 100);
        assert_eq!(ledger.transaction_history(user_id, 10, 0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn nested_call_commits_with_caller() {
        let db = Database::new(Arc::new(MemoryStore::new()));
        let ledger = Ledger::new(db.clone());
        let user_id = UserId::generate();

        let mut tx = db.begin().await.unwrap();
        ledger
            .add_currency(&grant(user_id, 40), Some(&mut tx))
            .await
            .unwrap();
        assert!(db.store().get_wallet(user_id).await.unwrap().is_none());
        tx.commit().await.unwrap();

        assert_eq!(ledger.get_or_create_wallet(user_id).await.unwrap().coins, 40);
    }

    #[tokio::test]
    async fn rolled_back_caller_transaction_discards_change() {
        let db = Database::new(Arc::new(MemoryStore::new()));
        let ledger = Ledger::new(db.clone());
        let user_id = UserId::generate();

        let mut tx = db.begin().await.unwrap();
        ledger
            .add_currency(&grant(user_id, 40), Some(&mut tx))
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(ledger.get_or_create_wallet(user_id).await.unwrap().coins, 0);
        assert!(db.store().pending_effects(10).await.unwrap().is_empty());
    }
}
