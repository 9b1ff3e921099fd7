//! Economy and progression engine for gamevault.
//!
//! Components, each usable alone or through the [`Economy`] facade:
//!
//! - [`Ledger`]: coin and gem balances with an append-only transaction log
//! - [`Inventory`]: owned items and "pay then grant" item purchases
//! - [`PurchasePipeline`]: real-money purchases against a [`PaymentGateway`]
//! - [`Progression`]: XP, levels, stats, skills and achievements
//! - [`RemoteConfigService`]: versioned runtime configuration
//! - [`LiveOps`]: scheduled and manual game-wide events
//! - [`OutboxDispatcher`]: delivery of committed effects to a [`Notifier`]
//!
//! Every mutating operation takes an optional [`TxContext`](gamevault_store::TxContext).
//! Passed in, the operation joins the caller's transaction and the caller
//! commits; omitted, the operation runs in a transaction of its own.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use gamevault_core::{ProductCatalog, RewardSource, UserId};
//! use gamevault_engine::{Economy, EngineConfig, MockPaymentGateway};
//! use gamevault_store::MemoryStore;
//!
//! # async fn run() -> gamevault_core::Result<()> {
//! let economy = Economy::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(MockPaymentGateway::new("sk_mock")),
//!     ProductCatalog::default(),
//!     EngineConfig::default(),
//! );
//!
//! let user_id = UserId::generate();
//! let outcome = economy.award_xp(user_id, 150, RewardSource::Quiz, None).await?;
//! assert_eq!(outcome.progress.level, 2);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod cache;
pub mod config;
pub mod crypto;
pub mod economy;
pub mod gateway;
pub mod inventory;
pub mod ledger;
pub mod liveops;
pub mod outbox;
pub mod progression;
pub mod purchase;
pub mod rate_limit;
pub mod remote_config;

pub use cache::{Cache, CacheExt, TtlCache};
pub use config::EngineConfig;
pub use economy::Economy;
pub use gateway::{
    GatewayError, MockPaymentGateway, PaymentGateway, PaymentIntent, PaymentRequest,
    PaymentStatus, PaymentVerification, Refund,
};
pub use inventory::{Inventory, ItemPurchase};
pub use ledger::Ledger;
pub use liveops::{
    LiveOps, LiveOpsScheduler, SchedulerTick, SystemStatus, TriggerReport, TriggerSource,
    UserFailure,
};
pub use outbox::{DispatchStats, Notifier, NotifyError, OutboxDispatcher};
pub use progression::{Progression, XpGrant, XpGrantOutcome};
pub use purchase::{InitiatedPurchase, PurchasePipeline};
pub use rate_limit::{RateLimiter, SlidingWindowLimiter};
pub use remote_config::RemoteConfigService;
