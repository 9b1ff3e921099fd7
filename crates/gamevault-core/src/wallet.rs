//! Player wallets.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::UserId;

/// In-game currencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurrencyType {
    /// Soft currency earned through play.
    Coins,
    /// Premium currency.
    Gems,
}

impl CurrencyType {
    /// Storage / wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Coins => "coins",
            Self::Gems => "gems",
        }
    }
}

impl fmt::Display for CurrencyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CurrencyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "coins" => Ok(Self::Coins),
            "gems" => Ok(Self::Gems),
            other => Err(format!("unknown currency: {other}")),
        }
    }
}

/// A player's currency balances.
///
/// Balances never go negative. The wallet is only mutated by the ledger while it
/// holds the row lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    /// Owning player.
    pub user_id: UserId,
    /// Coin balance.
    pub coins: i64,
    /// Gem balance.
    pub gems: i64,
    /// When the wallet was created.
    pub created_at: DateTime<Utc>,
    /// When a balance last changed.
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// Create an empty wallet.
    #[must_use]
    pub fn new(user_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            coins: 0,
            gems: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Balance of one currency.
    #[must_use]
    pub const fn balance(&self, currency: CurrencyType) -> i64 {
        match currency {
            CurrencyType::Coins => self.coins,
            CurrencyType::Gems => self.gems,
        }
    }

    /// Overwrite the balance of one currency.
    pub fn set_balance(&mut self, currency: CurrencyType, balance: i64) {
        match currency {
            CurrencyType::Coins => self.coins = balance,
            CurrencyType::Gems => self.gems = balance,
        }
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_wallet_is_empty() {
        let wallet = Wallet::new(UserId::generate());
        assert_eq!(wallet.balance(CurrencyType::Coins), 0);
        assert_eq!(wallet.balance(CurrencyType::Gems), 0);
    }

    #[test]
    fn set_balance_touches_only_one_currency() {
        let mut wallet = Wallet::new(UserId::generate());
        wallet.set_balance(CurrencyType::Gems, 40);
        assert_eq!(wallet.gems, 40);
        assert_eq!(wallet.coins, 0);
    }

    #[test]
    fn currency_names_roundtrip() {
        for currency in [CurrencyType::Coins, CurrencyType::Gems] {
            assert_eq!(currency.as_str().parse::<CurrencyType>(), Ok(currency));
        }
        assert!("gold".parse::<CurrencyType>().is_err());
    }
}
