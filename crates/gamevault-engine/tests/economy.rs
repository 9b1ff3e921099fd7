//! End-to-end flows through the `Economy` facade.

use std::sync::Arc;

use async_trait::async_trait;
use gamevault_core::{
    Channel, ConfigType, CurrencyType, Effect, EventAction, NewLiveOpsEvent, ProductCatalog,
    PurchaseStatus, RewardSource, UserId, XP_MULTIPLIER_KEY,
};
use gamevault_engine::{
    Economy, EngineConfig, MockPaymentGateway, Notifier, NotifyError, TriggerSource,
};
use gamevault_store::MemoryStore;
use serde_json::json;
use tokio::sync::Mutex;

fn economy() -> (Economy, Arc<MockPaymentGateway>) {
    let gateway = Arc::new(MockPaymentGateway::new("sk_mock"));
    let economy = Economy::new(
        Arc::new(MemoryStore::new()),
        gateway.clone(),
        ProductCatalog::default(),
        EngineConfig::default(),
    );
    (economy, gateway)
}

#[derive(Default)]
struct Collect(Mutex<Vec<(Channel, Effect)>>);

#[async_trait]
impl Notifier for Collect {
    async fn deliver(&self, channel: &Channel, effect: &Effect) -> Result<(), NotifyError> {
        self.0.lock().await.push((*channel, effect.clone()));
        Ok(())
    }
}

#[tokio::test]
async fn coin_pack_purchase_end_to_end() {
    let (economy, gateway) = economy();
    let user_id = UserId::generate();

    let initiated = economy
        .purchases()
        .initiate(user_id, "coins_pack_100", "K1")
        .await
        .unwrap();
    let replay = economy
        .purchases()
        .initiate(user_id, "coins_pack_100", "K1")
        .await
        .unwrap();
    assert_eq!(initiated.purchase.id, replay.purchase.id);
    assert_eq!(gateway.intents_created(), 1);

    gateway.confirm(&initiated.payment_intent.id).unwrap();
    let purchase = economy
        .purchases()
        .verify(user_id, initiated.purchase.id, &initiated.payment_intent.id)
        .await
        .unwrap();
    assert_eq!(purchase.status, PurchaseStatus::Completed);
    assert_eq!(economy.ledger().get_or_create_wallet(user_id).await.unwrap().coins, 100);

    let purchases = economy.purchases().list_purchases(user_id, 10, 0).await.unwrap();
    assert_eq!(purchases.len(), 1);
}

#[tokio::test]
async fn award_xp_applies_the_global_multiplier() {
    let (economy, _) = economy();
    let user_id = UserId::generate();
    economy
        .set_config(XP_MULTIPLIER_KEY, json!(2), ConfigType::Number)
        .await
        .unwrap();

    let outcome = economy
        .award_xp(user_id, 50, RewardSource::MatchSession, None)
        .await
        .unwrap();
    assert_eq!(outcome.xp_gained, 100);
    assert_eq!(outcome.progress.level, 2);

    let status = economy.liveops().system_status().await.unwrap();
    assert!((status.xp_multiplier - 2.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn liveops_grant_to_two_players() {
    let (economy, _) = economy();
    let (a, b) = (UserId::generate(), UserId::generate());

    let event = economy
        .liveops()
        .create_event(NewLiveOpsEvent {
            name: "launch gift".into(),
            action: EventAction::GrantCurrency {
                currency: CurrencyType::Coins,
                amount: 50,
            },
            target_users: vec![a, b],
            starts_at: None,
            ends_at: None,
        })
        .await
        .unwrap();
    let report = economy
        .liveops()
        .trigger(event.id, TriggerSource::Manual)
        .await
        .unwrap();
    assert_eq!(report.succeeded, 2);

    for user_id in [a, b] {
        let history = economy.ledger().transaction_history(user_id, 10, 0).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].amount, 50);
        assert_eq!(history[0].idempotency_key, Some(format!("liveops:{}:{user_id}", event.id)));
    }
}

#[tokio::test]
async fn only_committed_effects_are_delivered() {
    let (economy, _) = economy();
    let user_id = UserId::generate();

    let mut tx = economy.db().begin().await.unwrap();
    economy
        .award_xp(user_id, 500, RewardSource::Quiz, Some(&mut tx))
        .await
        .unwrap();
    tx.rollback().await.unwrap();

    economy
        .progression()
        .unlock_achievement(user_id, "first_login", None)
        .await
        .unwrap();

    let notifier = Arc::new(Collect::default());
    let stats = economy
        .outbox_dispatcher(notifier.clone())
        .dispatch_pending()
        .await
        .unwrap();
    assert_eq!(stats.delivered, 1);

    let delivered = notifier.0.lock().await;
    assert_eq!(delivered[0].0, Channel::Player(user_id));
    assert!(matches!(delivered[0].1, Effect::AchievementUnlocked { .. }));
}
