use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

use crate::models::UserId;
use super::value_objects::{OrderItem, OrderStatus};
use super::errors::OrderError;

// ============================================================================
// Order Aggregate - Domain Logic
// ============================================================================
//
// Holds the order header. Line items live in their own rows and are passed in
// whenever the total has to be derived; `total_amount` is only ever written
// by `recompute_total`.
//
// ============================================================================

/// Pending orders older than this are eligible for automatic cancellation
pub const DEFAULT_PENDING_TIMEOUT_HOURS: i64 = 24;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    // Identity
    pub id: Uuid,
    pub user_id: UserId,

    pub status: OrderStatus,
    pub total_amount: Decimal,
    pub address_id: Uuid,
    pub payment_method: Option<String>,

    // Audit Trail
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What a status change did, so callers can run follow-up side effects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub from: OrderStatus,
    pub to: OrderStatus,
}

impl StatusChange {
    /// True when the order just entered `completed`
    pub fn completed_now(&self) -> bool {
        self.to == OrderStatus::Completed && self.from != OrderStatus::Completed
    }
}

impl Order {
    /// New pending order shell with a zero total
    pub fn new(user_id: UserId, address_id: Uuid, payment_method: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            status: OrderStatus::Pending,
            total_amount: Decimal::ZERO,
            address_id,
            payment_method,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn calculate_total(items: &[OrderItem]) -> Decimal {
        items.iter().map(OrderItem::subtotal).sum()
    }

    /// Re-derive `total_amount` from the given items. Idempotent.
    pub fn recompute_total(&mut self, items: &[OrderItem]) -> Decimal {
        let total = Self::calculate_total(items);
        if total != self.total_amount {
            self.total_amount = total;
            self.updated_at = Utc::now();
        }
        self.total_amount
    }

    /// Flat validity check: any recognised status may follow any other.
    pub fn transition(&mut self, new_status: &str) -> Result<StatusChange, OrderError> {
        let to: OrderStatus = new_status.parse()?;
        Ok(self.set_status(to))
    }

    fn set_status(&mut self, to: OrderStatus) -> StatusChange {
        let from = self.status;
        self.status = to;
        self.updated_at = Utc::now();
        StatusChange { from, to }
    }

    pub fn mark_shipping(&mut self) -> Option<StatusChange> {
        match self.status {
            OrderStatus::Completed => Some(self.set_status(OrderStatus::Shipping)),
            _ => None,
        }
    }

    pub fn mark_delivered(&mut self) -> Option<StatusChange> {
        match self.status {
            OrderStatus::Shipping => Some(self.set_status(OrderStatus::Delivered)),
            _ => None,
        }
    }

    pub fn cancel_if_pending_too_long(&mut self, max_age: Duration, now: DateTime<Utc>) -> bool {
        if self.status == OrderStatus::Pending && now - self.created_at > max_age {
            self.set_status(OrderStatus::Cancelled);
            return true;
        }
        false
    }

    pub fn item_count(items: &[OrderItem]) -> u64 {
        items.iter().map(|item| u64::from(item.quantity)).sum()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
