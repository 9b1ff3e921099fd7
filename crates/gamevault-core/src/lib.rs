//! Core types for the gamevault economy and progression engine.
//!
//! This crate provides the domain model shared by the store, engine and service crates:
//!
//! - **Identifiers**: `UserId`, `PurchaseId`, `EventId`, `ActivityId`, `TransactionId`
//! - **Wallets & ledger**: `Wallet`, `CurrencyType`, `LedgerEntry`, `CurrencyChange`
//! - **Purchases**: `Purchase`, `PurchaseStatus`, `ProductCatalog`
//! - **Inventory**: `InventoryItem`, `ItemType`, `ItemGrant`, `GrantReceipt`
//! - **Progression**: `PlayerProgress`, `level_for_xp`, `RewardCurves`
//! - **LiveOps & config**: `LiveOpsEvent`, `EventAction`, `RemoteConfig`
//! - **Effects**: `Effect`, `Channel`, `OutboxRecord`
//!
//! # Currency units
//!
//! Coins and gems are whole units stored as `i64`. Real-money prices are stored in
//! minor units (`price_cents`), so `coins_pack_100` costs 99 and grants 100 coins.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod catalog;
pub mod effects;
pub mod error;
pub mod ids;
pub mod inventory;
pub mod ledger;
pub mod liveops;
pub mod progress;
pub mod purchase;
pub mod remote_config;
pub mod wallet;

pub use catalog::{Product, ProductCatalog, ProductGrant};
pub use effects::{Channel, Effect, OutboxRecord};
pub use error::{EconomyError, Result};
pub use ids::{ActivityId, EventId, IdError, PurchaseId, TransactionId, UserId};
pub use inventory::{GrantReceipt, InventoryItem, ItemGrant, ItemType};
pub use ledger::{CurrencyChange, LedgerEntry, TransactionType};
pub use liveops::{
    ActivityLogEntry, ActivityStatus, EventAction, EventStatus, LiveOpsEvent, NewLiveOpsEvent,
};
pub use progress::{
    level_for_xp, xp_for_level, PlayerProgress, RewardCurve, RewardCurves, RewardSource,
    XP_PER_LEVEL_UNIT,
};
pub use purchase::{Purchase, PurchaseStatus};
pub use remote_config::{ConfigType, RemoteConfig, XP_MULTIPLIER_KEY};
pub use wallet::{CurrencyType, Wallet};
