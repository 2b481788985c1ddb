// ============================================================================
// Services - Transactional workflows of the order core
// ============================================================================
//
// - order_item_service - the only path that creates, edits or removes items
// - checkout           - cart checkout, buy-now and cart purchase
// - order_service      - reads, status changes, cancellation, deletion
//
// Every public operation opens one store transaction and commits it at the
// end. On any error the transaction is dropped, which rolls back stock,
// items, order header and cart together.
//
// ============================================================================

mod checkout;
mod order_item_service;
mod order_service;

use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::order::{Order, OrderError, OrderItem, MONEY_DECIMAL_PLACES};
use crate::models::UserId;
use crate::store::StoreTx;

pub use checkout::CheckoutOrchestrator;
pub use order_item_service::OrderItemService;
pub use order_service::OrderService;

/// An order together with its current line items
#[derive(Debug, Clone, Serialize)]
pub struct OrderDetails {
    pub order: Order,
    pub items: Vec<OrderItem>,
}

impl OrderDetails {
    pub fn item_count(&self) -> u64 {
        Order::item_count(&self.items)
    }

    /// Gross total at `tax_rate`, rounded to cents
    pub fn total_with_tax(&self, tax_rate: Decimal) -> Decimal {
        self.items
            .iter()
            .map(|item| item.total_with_tax(tax_rate))
            .sum::<Decimal>()
            .round_dp(MONEY_DECIMAL_PLACES)
    }

    /// True when the stored total matches the items
    pub fn is_consistent(&self) -> bool {
        Order::calculate_total(&self.items) == self.order.total_amount
    }
}

/// Re-derive and persist the order total from its stored items
pub(crate) async fn recompute_total(
    tx: &mut dyn StoreTx,
    order: &mut Order,
) -> Result<Decimal, OrderError> {
    let items = tx.items_for_order(order.id).await?;
    let previous = order.total_amount;
    let total = order.recompute_total(&items);
    if total != previous {
        tx.update_order(order).await?;
    }
    Ok(total)
}

pub(crate) async fn load_details(
    tx: &mut dyn StoreTx,
    order: Order,
) -> Result<OrderDetails, OrderError> {
    let items = tx.items_for_order(order.id).await?;
    Ok(OrderDetails { order, items })
}

/// Locks the order, treating another user's order as absent
pub(crate) async fn owned_order_for_update(
    tx: &mut dyn StoreTx,
    user: UserId,
    order_id: Uuid,
) -> Result<Order, OrderError> {
    tx.order_for_update(order_id)
        .await?
        .filter(|order| order.user_id == user)
        .ok_or(OrderError::OrderNotFound(order_id))
}

/// Locks the owning order, then reads the item under that lock
pub(crate) async fn owned_item_for_update(
    tx: &mut dyn StoreTx,
    user: UserId,
    item_id: Uuid,
) -> Result<(OrderItem, Order), OrderError> {
    let located = tx
        .item(item_id)
        .await?
        .ok_or(OrderError::OrderItemNotFound(item_id))?;

    let order = tx
        .order_for_update(located.order_id)
        .await?
        .filter(|order| order.user_id == user)
        .ok_or(OrderError::OrderItemNotFound(item_id))?;

    // the first read only found the order; quantities must come from this one
    let item = tx
        .item(item_id)
        .await?
        .filter(|item| item.order_id == order.id)
        .ok_or(OrderError::OrderItemNotFound(item_id))?;

    Ok((item, order))
}

// ============================================================================
// Shared test fixtures
// ============================================================================
