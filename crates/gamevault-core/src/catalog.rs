//! Product catalog for real-money purchases.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{CurrencyType, ItemType};

/// Something a product hands out on completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProductGrant {
    /// A currency amount.
    Currency {
        /// Currency granted.
        currency: CurrencyType,
        /// Amount granted.
        amount: i64,
    },
    /// An inventory item.
    Item {
        /// Catalog item identifier.
        item_id: String,
        /// Item category.
        item_type: ItemType,
        /// Units granted.
        quantity: i64,
    },
}

/// A product sold for real money.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    /// Product identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Price in minor units.
    pub price_cents: i64,
    /// Fiat currency code.
    pub currency: String,
    /// What the player receives.
    pub grants: Vec<ProductGrant>,
}

impl Product {
    fn currency_pack(id: &str, name: &str, price_cents: i64, currency: CurrencyType, amount: i64) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            price_cents,
            currency: "USD".to_string(),
            grants: vec![ProductGrant::Currency { currency, amount }],
        }
    }

    /// Total amount of `currency` granted.
    #[must_use]
    pub fn currency_amount(&self, currency: CurrencyType) -> i64 {
        self.grants
            .iter()
            .map(|grant| match grant {
                ProductGrant::Currency { currency: c, amount } if *c == currency => *amount,
                _ => 0,
            })
            .sum()
    }
}

/// All purchasable products, keyed by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductCatalog {
    products: BTreeMap<String, Product>,
}

impl Default for ProductCatalog {
    fn default() -> Self {
        let mut catalog = Self {
            products: BTreeMap::new(),
        };

        catalog.insert(Product::currency_pack(
            "coins_pack_100",
            "100 Coins",
            99, // $0.99
            CurrencyType::Coins,
            100,
        ));
        catalog.insert(Product::currency_pack(
            "coins_pack_550",
            "550 Coins",
            499, // $4.99
            CurrencyType::Coins,
            550,
        ));
        catalog.insert(Product::currency_pack(
            "coins_pack_1200",
            "1200 Coins",
            999, // $9.99
            CurrencyType::Coins,
            1200,
        ));
        catalog.insert(Product::currency_pack(
            "gems_pack_50",
            "50 Gems",
            199, // $1.99
            CurrencyType::Gems,
            50,
        ));
        catalog.insert(Product {
            id: "starter_bundle".to_string(),
            name: "Starter Bundle".to_string(),
            price_cents: 999,
            currency: "USD".to_string(),
            grants: vec![
                ProductGrant::Currency {
                    currency: CurrencyType::Coins,
                    amount: 1000,
                },
                ProductGrant::Currency {
                    currency: CurrencyType::Gems,
                    amount: 100,
                },
                ProductGrant::Item {
                    item_id: "starter_skin".to_string(),
                    item_type: ItemType::Skin,
                    quantity: 1,
                },
            ],
        });

        catalog
    }
}

impl ProductCatalog {
    /// An empty catalog.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            products: BTreeMap::new(),
        }
    }

    /// Add or replace a product.
    pub fn insert(&mut self, product: Product) {
        self.products.insert(product.id.clone(), product);
    }

    /// Look up a product.
    #[must_use]
    pub fn get(&self, product_id: &str) -> Option<&Product> {
        self.products.get(product_id)
    }

    /// All products, ordered by id.
    pub fn iter(&self) -> impl Iterator<Item = &Product> {
        self.products.values()
    }
}
