//! Inventory items owned by players.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::UserId;

/// Item categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    /// Cosmetic, owned once.
    Skin,
    /// Stackable boost.
    Powerup,
    /// Stackable single-use item.
    Consumable,
    /// Permanent unlock, owned once.
    Permanent,
}

impl ItemType {
    /// Whether repeated grants accumulate quantity.
    #[must_use]
    pub const fn is_stackable(&self) -> bool {
        matches!(self, Self::Powerup | Self::Consumable)
    }

    /// Storage / wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Skin => "skin",
            Self::Powerup => "powerup",
            Self::Consumable => "consumable",
            Self::Permanent => "permanent",
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "skin" => Ok(Self::Skin),
            "powerup" => Ok(Self::Powerup),
            "consumable" => Ok(Self::Consumable),
            "permanent" => Ok(Self::Permanent),
            other => Err(format!("unknown item type: {other}")),
        }
    }
}

/// A player's holding of one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryItem {
    /// Owning player.
    pub user_id: UserId,
    /// Catalog item identifier.
    pub item_id: String,
    /// Item category.
    pub item_type: ItemType,
    /// Units held. Records at zero are deleted.
    pub quantity: i64,
    /// Arbitrary item data.
    pub metadata: serde_json::Value,
    /// When the item was first acquired.
    pub purchased_at: DateTime<Utc>,
    /// When the quantity last changed.
    pub updated_at: DateTime<Utc>,
}

/// A request to put items into a player's inventory.
#[derive(Debug, Clone)]
pub struct ItemGrant {
    /// Receiving player.
    pub user_id: UserId,
    /// Catalog item identifier.
    pub item_id: String,
    /// Item category.
    pub item_type: ItemType,
    /// Units to grant.
    pub quantity: i64,
    /// Data stored on a newly created record.
    pub metadata: serde_json::Value,
    /// At-most-once key.
    pub idempotency_key: Option<String>,
}

impl ItemGrant {
    /// Grant a single unit.
    #[must_use]
    pub fn new(user_id: UserId, item_id: impl Into<String>, item_type: ItemType) -> Self {
        Self {
            user_id,
            item_id: item_id.into(),
            item_type,
            quantity: 1,
            metadata: serde_json::Value::Null,
            idempotency_key: None,
        }
    }

    /// Grant `quantity` units.
    #[must_use]
    pub fn with_quantity(mut self, quantity: i64) -> Self {
        self.quantity = quantity;
        self
    }

    /// Attach an idempotency key.
    #[must_use]
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Attach metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// The record created when the player holds none of this item yet.
    #[must_use]
    pub fn to_item(&self) -> InventoryItem {
        let now = Utc::now();
        InventoryItem {
            user_id: self.user_id,
            item_id: self.item_id.clone(),
            item_type: self.item_type,
            quantity: self.quantity,
            metadata: self.metadata.clone(),
            purchased_at: now,
            updated_at: now,
        }
    }
}

/// Marks that a keyed, non-ledger grant has been applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantReceipt {
    /// The idempotency key.
    pub key: String,
    /// Player that received the grant.
    pub user_id: UserId,
    /// What was granted (item id, event id, ...).
    pub reference: String,
    /// When the grant was applied.
    pub created_at: DateTime<Utc>,
}

impl GrantReceipt {
    /// Create a receipt stamped now.
    #[must_use]
    pub fn new(key: impl Into<String>, user_id: UserId, reference: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            user_id,
            reference: reference.into(),
            created_at: Utc::now(),
        }
    }
}
