use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;

use super::errors::OrderError;

// ============================================================================
// Order Value Objects
// ============================================================================

/// Default tax rate applied by `OrderItem::total_with_tax`
pub const DEFAULT_TAX_RATE: Decimal = Decimal::from_parts(1, 0, 0, false, 1);

/// Money columns keep two decimal places
pub const MONEY_DECIMAL_PLACES: u32 = 2;

/// Reject negative line prices and round to storage precision
pub fn normalize_price(price: Decimal) -> Result<Decimal, OrderError> {
    if price < Decimal::ZERO {
        return Err(OrderError::InvalidPrice(price));
    }
    Ok(price.round_dp(MONEY_DECIMAL_PLACES))
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub quantity: u32,
    /// Captured at creation; later catalog price changes never touch it
    pub price_at_purchase: Decimal,
    pub change_reason: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderItem {
    pub fn new(order_id: Uuid, product_id: Uuid, quantity: u32, price_at_purchase: Decimal) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            order_id,
            product_id,
            quantity,
            price_at_purchase,
            change_reason: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn subtotal(&self) -> Decimal {
        Decimal::from(self.quantity) * self.price_at_purchase
    }

    pub fn total_with_tax(&self, tax_rate: Decimal) -> Decimal {
        self.subtotal() * (Decimal::ONE + tax_rate)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    #[default]
    Pending,
    Completed,
    Cancelled,
    Shipping,
    Delivered,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [
        OrderStatus::Pending,
        OrderStatus::Completed,
        OrderStatus::Cancelled,
        OrderStatus::Shipping,
        OrderStatus::Delivered,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Shipping => "shipping",
            OrderStatus::Delivered => "delivered",
        }
    }
}

impl FromStr for OrderStatus {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| OrderError::InvalidOrderStatus(s.to_string()))
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
