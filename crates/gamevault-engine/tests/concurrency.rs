//! Ledger and inventory behavior under concurrent writers.

use std::sync::Arc;
use std::time::Duration;

use gamevault_core::{
    CurrencyChange, CurrencyType, EconomyError, ItemGrant, ItemType, TransactionType, UserId,
};
use gamevault_engine::{Inventory, ItemPurchase, Ledger};
use gamevault_store::{Database, MemoryStore};

fn ledger_over(store: MemoryStore) -> (Ledger, Database) {
    let db = Database::new(Arc::new(store));
    (Ledger::new(db.clone()), db)
}

fn coins(user_id: UserId, amount: i64) -> CurrencyChange {
    CurrencyChange::new(user_id, CurrencyType::Coins, amount, TransactionType::AdminGrant, "test")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_adds_and_deducts_keep_a_consistent_chain() {
    let (ledger, _) = ledger_over(MemoryStore::new());
    let user_id = UserId::generate();
    ledger.add_currency(&coins(user_id, 1_000), None).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..40 {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            if i % 2 == 0 {
                ledger.add_currency(&coins(user_id, 10), None).await
            } else {
                ledger.deduct_currency(&coins(user_id, 5), None).await
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let wallet = ledger.get_or_create_wallet(user_id).await.unwrap();
    assert_eq!(wallet.coins, 1_000 + 20 * 10 - 20 * 5);

    let history = ledger.transaction_history(user_id, 100, 0).await.unwrap();
    assert_eq!(history.len(), 41);
    assert_eq!(history[0].balance_after, wallet.coins);
    for pair in history.windows(2) {
        assert!(pair[0].is_consistent());
        assert_eq!(pair[0].balance_before, pair[1].balance_after);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fifty_concurrent_deductions_never_overdraw() {
    let (ledger, _) = ledger_over(MemoryStore::new());
    let user_id = UserId::generate();
    ledger.add_currency(&coins(user_id, 100), None).await.unwrap();

    let handles: Vec<_> = (0..50)
        .map(|_| {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.deduct_currency(&coins(user_id, 5), None).await })
        })
        .collect();

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(wallet) => {
                assert!(wallet.coins >= 0);
                succeeded += 1;
            }
            Err(EconomyError::InsufficientBalance { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(succeeded, 20);
    assert_eq!(ledger.get_or_create_wallet(user_id).await.unwrap().coins, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_replays_of_one_key_apply_once() {
    let (ledger, _) = ledger_over(MemoryStore::new());
    let user_id = UserId::generate();
    let change = coins(user_id, 25).with_idempotency_key("daily-login:2024-05-01");

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let ledger = ledger.clone();
            let change = change.clone();
            tokio::spawn(async move { ledger.add_currency(&change, None).await })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap().coins, 25);
    }

    assert_eq!(ledger.transaction_history(user_id, 10, 0).await.unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn blocked_wallet_times_out() {
    let (ledger, db) = ledger_over(MemoryStore::with_lock_timeout(Duration::from_millis(100)));
    let user_id = UserId::generate();

    let mut holder = db.begin().await.unwrap();
    holder.lock_wallet(user_id).await.unwrap();

    let err = ledger.add_currency(&coins(user_id, 1), None).await.unwrap_err();
    assert!(matches!(err, EconomyError::LockTimeout));

    holder.rollback().await.unwrap();
    ledger.add_currency(&coins(user_id, 1), None).await.unwrap();
}

#[tokio::test]
async fn already_owned_item_purchase_leaves_wallet_unchanged() {
    let (ledger, db) = ledger_over(MemoryStore::new());
    let inventory = Inventory::new(db.clone(), ledger.clone());
    let user_id = UserId::generate();
    ledger.add_currency(&coins(user_id, 500), None).await.unwrap();
    inventory
        .add_item(&ItemGrant::new(user_id, "dragon_skin", ItemType::Skin), None)
        .await
        .unwrap();
    let effects_before = db.store().pending_effects(100).await.unwrap().len();

    let err = inventory
        .purchase_item(
            &ItemPurchase {
                user_id,
                item_id: "dragon_skin".into(),
                item_type: ItemType::Skin,
                price: 200,
                currency: CurrencyType::Coins,
                quantity: 1,
                idempotency_key: None,
            },
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EconomyError::AlreadyOwned { .. }));

    assert_eq!(ledger.get_or_create_wallet(user_id).await.unwrap().coins, 500);
    assert_eq!(ledger.transaction_history(user_id, 10, 0).await.unwrap().len(), 1);
    assert_eq!(db.store().pending_effects(100).await.unwrap().len(), effects_before);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_players_do_not_contend() {
    let (ledger, _) = ledger_over(MemoryStore::with_lock_timeout(Duration::from_secs(1)));
    let users: Vec<_> = (0..20).map(|_| UserId::generate()).collect();

    let handles: Vec<_> = users
        .iter()
        .map(|user_id| {
            let ledger = ledger.clone();
            let user_id = *user_id;
            tokio::spawn(async move { ledger.add_currency(&coins(user_id, 7), None).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    for user_id in users {
        assert_eq!(ledger.get_or_create_wallet(user_id).await.unwrap().coins, 7);
    }
}
