use std::sync::Arc;
use std::time::Instant;

use chrono::Duration;
use uuid::Uuid;

use crate::metrics::Metrics;
use crate::models::UserId;
use crate::services::{CheckoutOrchestrator, OrderDetails, OrderItemService, OrderService};
use crate::store::Store;
use crate::utils::retry::RetryConfig;

use super::aggregate::{Order, DEFAULT_PENDING_TIMEOUT_HOURS};
use super::commands::OrderCommand;
use super::errors::OrderError;
use super::value_objects::OrderItem;

// ============================================================================
// Order Command Handler
// ============================================================================
//
// Orchestrates: Command → Service → Store, with metrics on the way out
//
// ============================================================================

/// What a successfully handled command produced
#[derive(Debug, Clone)]
pub enum OrderOutcome {
    Placed(OrderDetails),
    Item(OrderItem),
    ItemDeleted(Order),
    StatusChanged(Order),
    /// Guarded forward move; `moved` is false when the order was not eligible
    Advanced { order: Order, moved: bool },
    StaleChecked { order_id: Uuid, cancelled: bool },
    OrderDeleted(Uuid),
}

pub struct OrderCommandHandler {
    checkout: CheckoutOrchestrator,
    items: OrderItemService,
    orders: OrderService,
    metrics: Arc<Metrics>,
    stale_after: Duration,
}

impl OrderCommandHandler {
    pub fn new(store: Arc<dyn Store>, retry: RetryConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            checkout: CheckoutOrchestrator::new(store.clone(), retry.clone()),
            items: OrderItemService::new(store.clone(), retry.clone()),
            orders: OrderService::new(store, retry),
            metrics,
            stale_after: Duration::hours(DEFAULT_PENDING_TIMEOUT_HOURS),
        }
    }

    /// Age after which a pending order counts as stale
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Read access for order queries
    pub fn orders(&self) -> &OrderService {
        &self.orders
    }

    /// Handle a command on behalf of `user`
    pub async fn handle(&self, user: UserId, command: OrderCommand) -> Result<OrderOutcome, OrderError> {
        let name = command.name();
        let started = Instant::now();

        let result = self.dispatch(user, command).await;
        let elapsed = started.elapsed().as_secs_f64();

        match &result {
            Ok(outcome) => {
                self.metrics.record_command(name, elapsed, None);
                self.record_outcome(name, outcome);
                tracing::debug!(command = name, user_id = %user, elapsed_secs = elapsed, "Command handled");
            }
            Err(e) => {
                self.metrics.record_command(name, elapsed, Some(e.kind()));
                tracing::warn!(command = name, user_id = %user, reason = e.kind(), error = %e, "Command rejected");
            }
        }

        result
    }

    async fn dispatch(&self, user: UserId, command: OrderCommand) -> Result<OrderOutcome, OrderError> {
        match command {
            OrderCommand::CheckoutFromCart { address_id, payment_method } => self
                .checkout
                .checkout_from_cart(user, address_id, payment_method)
                .await
                .map(OrderOutcome::Placed),

            OrderCommand::BuyNow { product_id, quantity, address_id, payment_method } => self
                .checkout
                .buy_now(user, product_id, quantity, address_id, &payment_method)
                .await
                .map(OrderOutcome::Placed),

            OrderCommand::CartPurchase { address_id, payment_method } => self
                .checkout
                .cart_purchase(user, address_id, &payment_method)
                .await
                .map(OrderOutcome::Placed),

            OrderCommand::CreateItem { order_id, product_id, quantity, price_at_purchase } => self
                .items
                .create_item(user, order_id, product_id, quantity, price_at_purchase)
                .await
                .map(OrderOutcome::Item),

            OrderCommand::UpdateItemQuantity { item_id, quantity, change_reason } => self
                .items
                .update_quantity(user, item_id, quantity, change_reason)
                .await
                .map(OrderOutcome::Item),

            OrderCommand::DeleteItem { item_id } => self
                .items
                .delete_item(user, item_id)
                .await
                .map(OrderOutcome::ItemDeleted),

            OrderCommand::UpdateStatus { order_id, status } => self
                .orders
                .update_status(user, order_id, &status)
                .await
                .map(OrderOutcome::StatusChanged),

            OrderCommand::MarkShipping { order_id } => self
                .orders
                .mark_shipping(user, order_id)
                .await
                .map(|(order, moved)| OrderOutcome::Advanced { order, moved }),

            OrderCommand::MarkDelivered { order_id } => self
                .orders
                .mark_delivered(user, order_id)
                .await
                .map(|(order, moved)| OrderOutcome::Advanced { order, moved }),

            OrderCommand::CancelStale { order_id } => self
                .orders
                .cancel_stale(user, order_id, self.stale_after)
                .await
                .map(|cancelled| OrderOutcome::StaleChecked { order_id, cancelled }),

            OrderCommand::DeleteOrder { order_id } => self
                .orders
                .delete_order(user, order_id)
                .await
                .map(|()| OrderOutcome::OrderDeleted(order_id)),
        }
    }

    fn record_outcome(&self, name: &str, outcome: &OrderOutcome) {
        match outcome {
            OrderOutcome::Placed(details) => {
                self.metrics.record_order_placed(name, details.item_count());
            }
            OrderOutcome::StatusChanged(order) => {
                self.metrics.record_status_transition(order.status.as_str());
            }
            OrderOutcome::Advanced { order, moved: true } => {
                self.metrics.record_status_transition(order.status.as_str());
            }
            OrderOutcome::StaleChecked { cancelled: true, .. } => {
                self.metrics.record_status_transition("cancelled");
            }
            _ => {}
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
