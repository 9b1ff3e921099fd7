//! Wiring of every engine component over one store.

use std::sync::Arc;

use gamevault_core::{
    ConfigType, ProductCatalog, RemoteConfig, Result, RewardSource, UserId,
};
use gamevault_store::{Database, Store, TxContext};
use serde_json::Value;

use crate::cache::TtlCache;
use crate::config::EngineConfig;
use crate::gateway::PaymentGateway;
use crate::inventory::Inventory;
use crate::ledger::Ledger;
use crate::liveops::{LiveOps, LiveOpsScheduler};
use crate::outbox::{Notifier, OutboxDispatcher};
use crate::progression::{Progression, XpGrant, XpGrantOutcome};
use crate::purchase::PurchasePipeline;
use crate::rate_limit::SlidingWindowLimiter;
use crate::remote_config::RemoteConfigService;

/// The economy and progression engine.
#[derive(Debug, Clone)]
pub struct Economy {
    db: Database,
    config: Arc<EngineConfig>,
    ledger: Ledger,
    inventory: Inventory,
    purchases: PurchasePipeline,
    progression: Progression,
    remote_config: RemoteConfigService,
    liveops: LiveOps,
}

impl Economy {
    /// Build every component over `store`.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        catalog: ProductCatalog,
        config: EngineConfig,
    ) -> Self {
        let db = Database::new(store);
        let ledger = Ledger::new(db.clone());
        let inventory = Inventory::new(db.clone(), ledger.clone());
        let purchases = PurchasePipeline::new(
            db.clone(),
            ledger.clone(),
            inventory.clone(),
            gateway,
            Arc::new(SlidingWindowLimiter::new(
                config.purchase_rate_limit,
                config.purchase_rate_window(),
            )),
            catalog,
        );
        let progression = Progression::new(
            db.clone(),
            ledger.clone(),
            Arc::new(TtlCache::new()),
            config.reward_curves.clone(),
            config.progress_cache_ttl(),
        );
        let remote_config = RemoteConfigService::new(
            db.clone(),
            Arc::new(TtlCache::new()),
            config.config_cache_ttl(),
        );
        let liveops = LiveOps::new(
            db.clone(),
            ledger.clone(),
            progression.clone(),
            remote_config.clone(),
            Arc::new(TtlCache::new()),
            config.status_cache_ttl(),
        );

        Self {
            db,
            config: Arc::new(config),
            ledger,
            inventory,
            purchases,
            progression,
            remote_config,
            liveops,
        }
    }

    /// Store handle and transaction factory.
    #[must_use]
    pub const fn db(&self) -> &Database {
        &self.db
    }

    /// Engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Wallet ledger.
    #[must_use]
    pub const fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Inventories.
    #[must_use]
    pub const fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    /// Real-money purchases.
    #[must_use]
    pub const fn purchases(&self) -> &PurchasePipeline {
        &self.purchases
    }

    /// Progression engine.
    #[must_use]
    pub const fn progression(&self) -> &Progression {
        &self.progression
    }

    /// Remote config.
    #[must_use]
    pub const fn remote_config(&self) -> &RemoteConfigService {
        &self.remote_config
    }

    /// LiveOps events.
    #[must_use]
    pub const fn liveops(&self) -> &LiveOps {
        &self.liveops
    }

    /// Grant XP scaled by the global multiplier.
    ///
    /// With a caller-supplied transaction, call `progression().invalidate(user_id)`
    /// after finishing it.
    ///
    /// # Errors
    ///
    /// See [`Progression::grant_xp`].
    pub async fn award_xp(
        &self,
        user_id: UserId,
        amount: i64,
        source: RewardSource,
        tx: Option<&mut TxContext>,
    ) -> Result<XpGrantOutcome> {
        let multiplier = self.remote_config.global_xp_multiplier().await?;
        let grant = XpGrant::new(user_id, amount, source).with_multiplier(multiplier);
        self.progression.grant_xp(&grant, tx).await
    }

    /// Set a config value and refresh the status snapshot.
    ///
    /// # Errors
    ///
    /// See [`RemoteConfigService::set`].
    pub async fn set_config(
        &self,
        key: &str,
        value: Value,
        config_type: ConfigType,
    ) -> Result<RemoteConfig> {
        let config = self.remote_config.set(key, value, config_type, None).await?;
        self.liveops.invalidate_status();
        Ok(config)
    }

    /// Dispatcher delivering this engine's effects through `notifier`.
    #[must_use]
    pub fn outbox_dispatcher(&self, notifier: Arc<dyn Notifier>) -> OutboxDispatcher {
        OutboxDispatcher::new(
            Arc::clone(self.db.store()),
            notifier,
            self.db.outbox_signal(),
            self.config.outbox_batch_size,
            self.config.outbox_poll_interval(),
            self.config.outbox_max_attempts,
        )
    }

    /// Scheduler for this engine's liveops events.
    #[must_use]
    pub fn scheduler(&self) -> LiveOpsScheduler {
        LiveOpsScheduler::new(self.liveops.clone(), self.config.scheduler_interval())
    }
}
