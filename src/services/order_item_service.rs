use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::order::{normalize_price, Order, OrderError, OrderItem};
use crate::inventory::InventoryLedger;
use crate::models::UserId;
use crate::store::{Store, StoreTx};
use crate::utils::retry::{retry_on_transient, RetryConfig};
use super::{owned_item_for_update, owned_order_for_update, recompute_total};

// ============================================================================
// Order Item Service
// ============================================================================
//
// Line-item lifecycle: reserve stock, write the item, recompute the order
// total. All three happen in one transaction or not at all.
//
// ============================================================================

#[derive(Clone)]
pub struct OrderItemService {
    store: Arc<dyn Store>,
    retry: RetryConfig,
}

impl OrderItemService {
    pub fn new(store: Arc<dyn Store>, retry: RetryConfig) -> Self {
        Self { store, retry }
    }

    /// Add a line item to one of the user's orders.
    /// `price_at_purchase` defaults to the product's current price.
    pub async fn create_item(
        &self,
        user: UserId,
        order_id: Uuid,
        product_id: Uuid,
        quantity: u32,
        price_at_purchase: Option<Decimal>,
    ) -> Result<OrderItem, OrderError> {
        retry_on_transient(self.retry.clone(), |_attempt| {
            self.create_item_once(user, order_id, product_id, quantity, price_at_purchase)
        })
        .await
        .into_result()
    }

    async fn create_item_once(
        &self,
        user: UserId,
        order_id: Uuid,
        product_id: Uuid,
        quantity: u32,
        price_at_purchase: Option<Decimal>,
    ) -> Result<OrderItem, OrderError> {
        let mut tx = self.store.begin().await?;
        let mut order = owned_order_for_update(tx.as_mut(), user, order_id).await?;

        let item = Self::create_item_in_tx(tx.as_mut(), &mut order, product_id, quantity, price_at_purchase).await?;
        tx.commit().await?;

        tracing::info!(
            order_id = %order.id,
            item_id = %item.id,
            product_id = %product_id,
            quantity = quantity,
            total_amount = %order.total_amount,
            "Order item created"
        );

        Ok(item)
    }

    /// Reserve, insert and recompute inside the caller's transaction
    pub(crate) async fn create_item_in_tx(
        tx: &mut dyn StoreTx,
        order: &mut Order,
        product_id: Uuid,
        quantity: u32,
        price_at_purchase: Option<Decimal>,
    ) -> Result<OrderItem, OrderError> {
        if quantity == 0 {
            return Err(OrderError::InvalidQuantity(0));
        }
        let price_at_purchase = price_at_purchase.map(normalize_price).transpose()?;

        let product = InventoryLedger::reserve(tx, product_id, quantity).await?;
        let price = match price_at_purchase {
            Some(price) => price,
            None => normalize_price(product.price)?,
        };

        let item = OrderItem::new(order.id, product_id, quantity, price);
        tx.insert_item(&item).await?;

        recompute_total(tx, order).await?;
        Ok(item)
    }

    /// Change an item's quantity, moving the difference in or out of stock
    pub async fn update_quantity(
        &self,
        user: UserId,
        item_id: Uuid,
        new_quantity: i64,
        change_reason: Option<String>,
    ) -> Result<OrderItem, OrderError> {
        if new_quantity <= 0 {
            return Err(OrderError::InvalidQuantity(new_quantity));
        }
        let new_quantity = u32::try_from(new_quantity).map_err(|_| OrderError::InvalidQuantity(new_quantity))?;

        retry_on_transient(self.retry.clone(), |_attempt| {
            self.update_quantity_once(user, item_id, new_quantity, change_reason.clone())
        })
        .await
        .into_result()
    }

    async fn update_quantity_once(
        &self,
        user: UserId,
        item_id: Uuid,
        new_quantity: u32,
        change_reason: Option<String>,
    ) -> Result<OrderItem, OrderError> {
        let mut tx = self.store.begin().await?;
        let (mut item, mut order) = owned_item_for_update(tx.as_mut(), user, item_id).await?;

        let diff = i64::from(new_quantity) - i64::from(item.quantity);
        InventoryLedger::adjust(tx.as_mut(), item.product_id, -diff).await?;

        let previous = item.quantity;
        item.quantity = new_quantity;
        if let Some(reason) = change_reason {
            item.change_reason = reason;
        }
        item.updated_at = Utc::now();
        tx.update_item(&item).await?;

        recompute_total(tx.as_mut(), &mut order).await?;
        tx.commit().await?;

        tracing::info!(
            order_id = %order.id,
            item_id = %item.id,
            from = previous,
            to = new_quantity,
            total_amount = %order.total_amount,
            "Order item quantity changed"
        );

        Ok(item)
    }

    /// Remove an item and return its quantity to stock.
    /// The order stays, even when this was its last item.
    pub async fn delete_item(&self, user: UserId, item_id: Uuid) -> Result<Order, OrderError> {
        retry_on_transient(self.retry.clone(), |_attempt| self.delete_item_once(user, item_id))
            .await
            .into_result()
    }

    async fn delete_item_once(&self, user: UserId, item_id: Uuid) -> Result<Order, OrderError> {
        let mut tx = self.store.begin().await?;
        let (item, mut order) = owned_item_for_update(tx.as_mut(), user, item_id).await?;

        InventoryLedger::release(tx.as_mut(), item.product_id, item.quantity).await?;
        tx.delete_item(item.id).await?;

        recompute_total(tx.as_mut(), &mut order).await?;
        tx.commit().await?;

        tracing::info!(
            order_id = %order.id,
            item_id = %item.id,
            released = item.quantity,
            total_amount = %order.total_amount,
            "Order item deleted"
        );

        Ok(order)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
