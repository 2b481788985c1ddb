use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

// ============================================================================
// Collaborator Models
// ============================================================================
//
// Records owned by neighbouring parts of the storefront (catalog, carts,
// addresses, identity). The order core reads them and, for `Product.stock`
// only, writes them through the inventory ledger.
//
// ============================================================================

/// Authenticated principal passed explicitly into every core call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Product {
    pub id: Uuid,
    pub seller_id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub stock: u32,
    pub sold_out: bool,
}

impl Product {
    pub fn new(seller_id: Uuid, name: impl Into<String>, price: Decimal, stock: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            seller_id,
            name: name.into(),
            price,
            stock,
            sold_out: stock == 0,
        }
    }

    /// Sets stock and keeps `sold_out` in step with it
    pub fn set_stock(&mut self, stock: u32) {
        self.stock = stock;
        self.sold_out = stock == 0;
    }
}

/// Sales counter bumped when an order is completed
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct ProductStats {
    pub product_id: Uuid,
    pub sales_count: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Address {
    pub id: Uuid,
    pub user_id: UserId,
    pub recipient: String,
    pub line1: String,
    pub line2: Option<String>,
    pub postal_code: String,
}

impl Address {
    pub fn new(user_id: UserId, recipient: impl Into<String>, line1: impl Into<String>, postal_code: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            recipient: recipient.into(),
            line1: line1.into(),
            line2: None,
            postal_code: postal_code.into(),
        }
    }
}

/// One line of a user's cart; unique per (user, product)
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CartItem {
    pub id: Uuid,
    pub user_id: UserId,
    pub product_id: Uuid,
    pub quantity: u32,
    pub added_at: DateTime<Utc>,
}

impl CartItem {
    pub fn new(user_id: UserId, product_id: Uuid, quantity: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            product_id,
            quantity,
            added_at: Utc::now(),
        }
    }
}
