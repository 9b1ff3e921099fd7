//! State-change notifications delivered to realtime clients.
//!
//! Effects are written to the outbox inside the transaction that caused them and
//! delivered only after that transaction commits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    CurrencyType, EventAction, EventId, EventStatus, ItemType, LedgerEntry, PurchaseId, UserId,
};

/// Where an effect is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// One player's room.
    Player(UserId),
    /// Every connected client.
    Global,
}

/// A change clients should hear about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Effect {
    /// Balances changed.
    WalletUpdated {
        /// Wallet owner.
        user_id: UserId,
        /// New coin balance.
        coins: i64,
        /// New gem balance.
        gems: i64,
    },
    /// A ledger entry was written.
    TransactionRecorded {
        /// Wallet owner.
        user_id: UserId,
        /// The entry.
        transaction: LedgerEntry,
    },
    /// A purchase completed and its grants were issued.
    PurchaseCompleted {
        /// Buyer.
        user_id: UserId,
        /// The purchase.
        purchase_id: PurchaseId,
        /// Product bought.
        product_id: String,
    },
    /// Items were added to an inventory.
    ItemGranted {
        /// Receiving player.
        user_id: UserId,
        /// Item identifier.
        item_id: String,
        /// Item category.
        item_type: ItemType,
        /// Units now held.
        quantity: i64,
    },
    /// XP, level, stats or skills changed.
    ProgressUpdated {
        /// Player.
        user_id: UserId,
        /// Current level.
        level: i32,
        /// Current XP.
        xp: i64,
        /// Levels gained by this change.
        levels_gained: i32,
    },
    /// An achievement was unlocked for the first time.
    AchievementUnlocked {
        /// Player.
        user_id: UserId,
        /// Achievement key.
        achievement: String,
    },
    /// A liveops event changed state.
    #[serde(rename = "liveops_event")]
    LiveOpsEvent {
        /// Event.
        event_id: EventId,
        /// Display name.
        name: String,
        /// What the event does.
        action: EventAction,
        /// New state.
        status: EventStatus,
    },
    /// A remote config value changed.
    ConfigUpdated {
        /// Config key.
        key: String,
        /// New value.
        value: serde_json::Value,
        /// New version.
        version: i64,
    },
}

impl Effect {
    /// Delivery channel.
    #[must_use]
    pub const fn channel(&self) -> Channel {
        match self {
            Self::WalletUpdated { user_id, .. }
            | Self::TransactionRecorded { user_id, .. }
            | Self::PurchaseCompleted { user_id, .. }
            | Self::ItemGranted { user_id, .. }
            | Self::ProgressUpdated { user_id, .. }
            | Self::AchievementUnlocked { user_id, .. } => Channel::Player(*user_id),
            Self::LiveOpsEvent { .. } | Self::ConfigUpdated { .. } => Channel::Global,
        }
    }

    /// Wire name of the effect.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::WalletUpdated { .. } => "wallet_updated",
            Self::TransactionRecorded { .. } => "transaction_recorded",
            Self::PurchaseCompleted { .. } => "purchase_completed",
            Self::ItemGranted { .. } => "item_granted",
            Self::ProgressUpdated { .. } => "progress_updated",
            Self::AchievementUnlocked { .. } => "achievement_unlocked",
            Self::LiveOpsEvent { .. } => "liveops_event",
            Self::ConfigUpdated { .. } => "config_updated",
        }
    }

    /// `wallet_updated` for the given balances.
    #[must_use]
    pub fn wallet(wallet: &crate::Wallet) -> Self {
        Self::WalletUpdated {
            user_id: wallet.user_id,
            coins: wallet.balance(CurrencyType::Coins),
            gems: wallet.balance(CurrencyType::Gems),
        }
    }
}

/// An effect waiting in the outbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxRecord {
    /// Sequence number; delivery follows this order.
    pub id: i64,
    /// The effect.
    pub effect: Effect,
    /// Failed delivery attempts so far.
    pub attempts: u32,
    /// When the effect was recorded.
    pub created_at: DateTime<Utc>,
}
