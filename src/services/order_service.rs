use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::domain::order::{Order, OrderError, StatusChange};
use crate::inventory::InventoryLedger;
use crate::models::UserId;
use crate::store::Store;
use crate::utils::retry::{retry_on_transient, RetryConfig};
use super::{load_details, owned_order_for_update, OrderDetails};

// ============================================================================
// Order Service
// ============================================================================

#[derive(Clone)]
pub struct OrderService {
    store: Arc<dyn Store>,
    retry: RetryConfig,
}

impl OrderService {
    pub fn new(store: Arc<dyn Store>, retry: RetryConfig) -> Self {
        Self { store, retry }
    }

    pub async fn get_order(&self, user: UserId, order_id: Uuid) -> Result<OrderDetails, OrderError> {
        let mut tx = self.store.begin().await?;
        let order = tx
            .order(order_id)
            .await?
            .filter(|order| order.user_id == user)
            .ok_or(OrderError::OrderNotFound(order_id))?;
        load_details(tx.as_mut(), order).await
    }

    /// The user's orders, newest first
    pub async fn list_orders(&self, user: UserId) -> Result<Vec<Order>, OrderError> {
        let mut tx = self.store.begin().await?;
        Ok(tx.orders_for_user(user).await?)
    }

    /// Set the order status. Entering `completed` credits each product's
    /// sales counter with the item quantity in the same transaction.
    pub async fn update_status(
        &self,
        user: UserId,
        order_id: Uuid,
        new_status: &str,
    ) -> Result<Order, OrderError> {
        let (order, change) = retry_on_transient(self.retry.clone(), |_attempt| {
            self.update_status_once(user, order_id, new_status)
        })
        .await
        .into_result()?;

        tracing::info!(
            order_id = %order.id,
            from = %change.from,
            to = %change.to,
            "Order status changed"
        );

        Ok(order)
    }

    async fn update_status_once(
        &self,
        user: UserId,
        order_id: Uuid,
        new_status: &str,
    ) -> Result<(Order, StatusChange), OrderError> {
        let mut tx = self.store.begin().await?;
        let mut order = owned_order_for_update(tx.as_mut(), user, order_id).await?;

        let change = order.transition(new_status)?;
        tx.update_order(&order).await?;

        if change.completed_now() {
            let items = tx.items_for_order(order.id).await?;
            for item in &items {
                tx.add_sales(item.product_id, item.quantity).await?;
            }
        }

        tx.commit().await?;
        Ok((order, change))
    }

    /// Completed → shipping. Returns the order and whether it moved.
    pub async fn mark_shipping(&self, user: UserId, order_id: Uuid) -> Result<(Order, bool), OrderError> {
        self.advance(user, order_id, Order::mark_shipping).await
    }

    /// Shipping → delivered. Returns the order and whether it moved.
    pub async fn mark_delivered(&self, user: UserId, order_id: Uuid) -> Result<(Order, bool), OrderError> {
        self.advance(user, order_id, Order::mark_delivered).await
    }

    async fn advance(
        &self,
        user: UserId,
        order_id: Uuid,
        step: fn(&mut Order) -> Option<StatusChange>,
    ) -> Result<(Order, bool), OrderError> {
        let (order, change) = retry_on_transient(self.retry.clone(), |_attempt| {
            self.advance_once(user, order_id, step)
        })
        .await
        .into_result()?;

        match change {
            Some(change) => tracing::info!(
                order_id = %order.id,
                from = %change.from,
                to = %change.to,
                "Order status advanced"
            ),
            None => tracing::debug!(
                order_id = %order.id,
                status = %order.status,
                "Order status not advanced"
            ),
        }

        Ok((order, change.is_some()))
    }

    async fn advance_once(
        &self,
        user: UserId,
        order_id: Uuid,
        step: fn(&mut Order) -> Option<StatusChange>,
    ) -> Result<(Order, Option<StatusChange>), OrderError> {
        let mut tx = self.store.begin().await?;
        let mut order = owned_order_for_update(tx.as_mut(), user, order_id).await?;

        let change = step(&mut order);
        if change.is_some() {
            tx.update_order(&order).await?;
            tx.commit().await?;
        }
        Ok((order, change))
    }

    /// Cancel the order if it has been pending longer than `max_age`
    pub async fn cancel_stale(
        &self,
        user: UserId,
        order_id: Uuid,
        max_age: Duration,
    ) -> Result<bool, OrderError> {
        retry_on_transient(self.retry.clone(), |_attempt| {
            self.cancel_stale_once(user, order_id, max_age)
        })
        .await
        .into_result()
    }

    async fn cancel_stale_once(
        &self,
        user: UserId,
        order_id: Uuid,
        max_age: Duration,
    ) -> Result<bool, OrderError> {
        let mut tx = self.store.begin().await?;
        let mut order = owned_order_for_update(tx.as_mut(), user, order_id).await?;

        if !order.cancel_if_pending_too_long(max_age, Utc::now()) {
            return Ok(false);
        }
        tx.update_order(&order).await?;
        tx.commit().await?;

        tracing::info!(
            order_id = %order.id,
            created_at = %order.created_at,
            "Stale pending order cancelled"
        );
        Ok(true)
    }

    /// Return every item's quantity to stock, then remove the order and its items
    pub async fn delete_order(&self, user: UserId, order_id: Uuid) -> Result<(), OrderError> {
        retry_on_transient(self.retry.clone(), |_attempt| self.delete_order_once(user, order_id))
            .await
            .into_result()
    }

    async fn delete_order_once(&self, user: UserId, order_id: Uuid) -> Result<(), OrderError> {
        let mut tx = self.store.begin().await?;
        let order = owned_order_for_update(tx.as_mut(), user, order_id).await?;

        let mut items = tx.items_for_order(order.id).await?;
        items.sort_by_key(|item| item.product_id);

        let mut released = 0u64;
        for item in &items {
            InventoryLedger::release(tx.as_mut(), item.product_id, item.quantity).await?;
            released += u64::from(item.quantity);
        }

        tx.delete_order(order.id).await?;
        tx.commit().await?;

        tracing::info!(
            order_id = %order.id,
            items = items.len(),
            released = released,
            "Order deleted"
        );
        Ok(())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::OrderStatus;
    use crate::services::fixtures::Shop;
    use crate::services::{CheckoutOrchestrator, OrderItemService};
    use rust_decimal::Decimal;

    fn service(shop: &Shop) -> OrderService {
        OrderService::new(shop.store.clone(), shop.retry.clone())
    }

    async fn placed_order(shop: &Shop, quantity: u32) -> (OrderDetails, Uuid) {
        let product = shop.product(12000, 10).await;
        let details = CheckoutOrchestrator::new(shop.store.clone(), shop.retry.clone())
            .buy_now(shop.user, product.id, quantity, shop.address.id, "card")
            .await
            .unwrap();
        (details, product.id)
    }

    #[tokio::test]
    async fn test_get_order_is_scoped_to_owner() {
        let shop = Shop::new().await;
        let (placed, _) = placed_order(&shop, 2).await;
        let orders = service(&shop);

        let details = orders.get_order(shop.user, placed.order.id).await.unwrap();
        assert_eq!(details.items.len(), 1);
        assert_eq!(details.order.total_amount, Decimal::new(24000, 0));

        let err = orders.get_order(UserId::new(), placed.order.id).await.unwrap_err();
        assert!(matches!(err, OrderError::OrderNotFound(_)));
    }

    #[tokio::test]
    async fn test_list_orders_only_returns_own_orders() {
        let shop = Shop::new().await;
        placed_order(&shop, 1).await;
        placed_order(&shop, 1).await;
        let orders = service(&shop);

        assert_eq!(orders.list_orders(shop.user).await.unwrap().len(), 2);
        assert!(orders.list_orders(UserId::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_completion_bumps_sales_once() {
        let shop = Shop::new().await;
        let (placed, product_id) = placed_order(&shop, 3).await;
        let orders = service(&shop);

        let order = orders.update_status(shop.user, placed.order.id, "completed").await.unwrap();
        assert_eq!(order.status, OrderStatus::Completed);
        assert_eq!(shop.sales(product_id).await, 3);

        // re-entering completed does not count again
        orders.update_status(shop.user, placed.order.id, "completed").await.unwrap();
        assert_eq!(shop.sales(product_id).await, 3);

        orders.update_status(shop.user, placed.order.id, "shipping").await.unwrap();
        orders.update_status(shop.user, placed.order.id, "completed").await.unwrap();
        assert_eq!(shop.sales(product_id).await, 6);
    }

    #[tokio::test]
    async fn test_shipping_and_delivery_only_move_forward() {
        let shop = Shop::new().await;
        let (placed, _) = placed_order(&shop, 1).await;
        let orders = service(&shop);
        let id = placed.order.id;

        let (order, moved) = orders.mark_shipping(shop.user, id).await.unwrap();
        assert!(!moved);
        assert_eq!(order.status, OrderStatus::Pending);
        let (_, moved) = orders.mark_delivered(shop.user, id).await.unwrap();
        assert!(!moved);
        assert_eq!(shop.order(id).await.unwrap().status, OrderStatus::Pending);

        orders.update_status(shop.user, id, "completed").await.unwrap();
        let (order, moved) = orders.mark_shipping(shop.user, id).await.unwrap();
        assert!(moved);
        assert_eq!(order.status, OrderStatus::Shipping);
        assert_eq!(shop.order(id).await.unwrap().status, OrderStatus::Shipping);

        let (_, moved) = orders.mark_delivered(shop.user, id).await.unwrap();
        assert!(moved);
        assert_eq!(shop.order(id).await.unwrap().status, OrderStatus::Delivered);

        let err = orders.mark_shipping(UserId::new(), id).await.unwrap_err();
        assert!(matches!(err, OrderError::OrderNotFound(_)));
    }

    #[tokio::test]
    async fn test_order_details_total_with_tax() {
        let shop = Shop::new().await;
        let (placed, _) = placed_order(&shop, 2).await;

        let details = service(&shop).get_order(shop.user, placed.order.id).await.unwrap();
        assert_eq!(
            details.total_with_tax(crate::domain::order::DEFAULT_TAX_RATE),
            Decimal::new(26400, 0)
        );
        assert_eq!(details.total_with_tax(Decimal::ZERO), details.order.total_amount);
    }

    #[tokio::test]
    async fn test_invalid_status_leaves_order_unchanged() {
        let shop = Shop::new().await;
        let (placed, product_id) = placed_order(&shop, 1).await;

        let err = service(&shop)
            .update_status(shop.user, placed.order.id, "refunded")
            .await
            .unwrap_err();

        assert!(matches!(err, OrderError::InvalidOrderStatus(s) if s == "refunded"));
        assert_eq!(shop.order(placed.order.id).await.unwrap().status, OrderStatus::Pending);
        assert_eq!(shop.sales(product_id).await, 0);
    }

    #[tokio::test]
    async fn test_cancel_stale_only_after_max_age() {
        let shop = Shop::new().await;
        let (placed, _) = placed_order(&shop, 1).await;
        let orders = service(&shop);
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let cancelled = orders
            .cancel_stale(shop.user, placed.order.id, Duration::hours(24))
            .await
            .unwrap();
        assert!(!cancelled);
        assert_eq!(shop.order(placed.order.id).await.unwrap().status, OrderStatus::Pending);

        let cancelled = orders
            .cancel_stale(shop.user, placed.order.id, Duration::zero())
            .await
            .unwrap();
        assert!(cancelled);
        assert_eq!(shop.order(placed.order.id).await.unwrap().status, OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_delete_order_releases_stock() {
        let shop = Shop::new().await;
        let (placed, product_id) = placed_order(&shop, 4).await;
        let extra = shop.product(5000, 2).await;
        OrderItemService::new(shop.store.clone(), shop.retry.clone())
            .create_item(shop.user, placed.order.id, extra.id, 2, None)
            .await
            .unwrap();
        assert_eq!(shop.stock(product_id).await, 6);
        assert_eq!(shop.stock(extra.id).await, 0);

        service(&shop).delete_order(shop.user, placed.order.id).await.unwrap();

        assert_eq!(shop.stock(product_id).await, 10);
        assert_eq!(shop.stock(extra.id).await, 2);
        assert!(shop.order(placed.order.id).await.is_none());
        assert!(shop.items(placed.order.id).await.is_empty());
    }

    #[tokio::test]
    async fn test_delete_foreign_order_is_not_found() {
        let shop = Shop::new().await;
        let (placed, product_id) = placed_order(&shop, 2).await;

        let err = service(&shop).delete_order(UserId::new(), placed.order.id).await.unwrap_err();

        assert!(matches!(err, OrderError::OrderNotFound(_)));
        assert_eq!(shop.stock(product_id).await, 8);
        assert!(shop.order(placed.order.id).await.is_some());
    }
}
