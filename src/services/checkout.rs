use std::sync::Arc;

use uuid::Uuid;

use crate::domain::order::{Order, OrderError};
use crate::models::UserId;
use crate::store::{Store, StoreTx};
use crate::utils::retry::{retry_on_transient, RetryConfig};
use super::{load_details, recompute_total, OrderDetails, OrderItemService};

// ============================================================================
// Checkout Orchestrator
// ============================================================================
//
// Turns a cart, or a single product, into a pending order. The order header,
// its items, the stock reservations and the cart clearing commit together.
// A transaction aborted by a serialization failure or deadlock is re-run
// from the start; business rule failures surface immediately.
//
// ============================================================================

#[derive(Clone)]
pub struct CheckoutOrchestrator {
    store: Arc<dyn Store>,
    retry: RetryConfig,
}

impl CheckoutOrchestrator {
    pub fn new(store: Arc<dyn Store>, retry: RetryConfig) -> Self {
        Self { store, retry }
    }

    /// Create an order from everything in the user's cart, then empty the cart
    pub async fn checkout_from_cart(
        &self,
        user: UserId,
        address_id: Uuid,
        payment_method: Option<String>,
    ) -> Result<OrderDetails, OrderError> {
        let details = retry_on_transient(self.retry.clone(), |_attempt| {
            self.cart_checkout_once(user, address_id, payment_method.clone())
        })
        .await
        .into_result()?;

        tracing::info!(
            order_id = %details.order.id,
            user_id = %user,
            items = details.items.len(),
            total_amount = %details.order.total_amount,
            "Cart checked out"
        );

        Ok(details)
    }

    /// Order a single product directly, bypassing the cart
    pub async fn buy_now(
        &self,
        user: UserId,
        product_id: Uuid,
        quantity: u32,
        address_id: Uuid,
        payment_method: &str,
    ) -> Result<OrderDetails, OrderError> {
        let payment_method = require_payment_method(payment_method)?;
        if quantity == 0 {
            return Err(OrderError::InvalidQuantity(0));
        }

        let details = retry_on_transient(self.retry.clone(), |_attempt| {
            self.buy_now_once(user, product_id, quantity, address_id, payment_method.clone())
        })
        .await
        .into_result()?;

        tracing::info!(
            order_id = %details.order.id,
            user_id = %user,
            product_id = %product_id,
            quantity = quantity,
            total_amount = %details.order.total_amount,
            "Buy-now order placed"
        );

        Ok(details)
    }

    /// Cart checkout that insists on a payment method
    pub async fn cart_purchase(
        &self,
        user: UserId,
        address_id: Uuid,
        payment_method: &str,
    ) -> Result<OrderDetails, OrderError> {
        let payment_method = require_payment_method(payment_method)?;
        self.checkout_from_cart(user, address_id, Some(payment_method)).await
    }

    async fn cart_checkout_once(
        &self,
        user: UserId,
        address_id: Uuid,
        payment_method: Option<String>,
    ) -> Result<OrderDetails, OrderError> {
        let mut tx = self.store.begin().await?;
        let details = Self::checkout_cart_in_tx(tx.as_mut(), user, address_id, payment_method).await?;
        tx.commit().await?;
        Ok(details)
    }

    pub(crate) async fn checkout_cart_in_tx(
        tx: &mut dyn StoreTx,
        user: UserId,
        address_id: Uuid,
        payment_method: Option<String>,
    ) -> Result<OrderDetails, OrderError> {
        ensure_address(tx, user, address_id).await?;

        let mut cart = tx.cart_items_for_user(user).await?;
        if cart.is_empty() {
            return Err(OrderError::EmptyCart);
        }
        // lock products in a stable order so overlapping carts cannot deadlock
        cart.sort_by_key(|item| item.product_id);

        let mut order = Order::new(user, address_id, payment_method);
        tx.insert_order(&order).await?;

        for cart_item in &cart {
            OrderItemService::create_item_in_tx(tx, &mut order, cart_item.product_id, cart_item.quantity, None)
                .await?;
        }

        let cleared = tx.clear_cart(user).await?;
        recompute_total(tx, &mut order).await?;

        tracing::debug!(
            order_id = %order.id,
            cleared = cleared,
            "Cart cleared into order"
        );

        load_details(tx, order).await
    }

    async fn buy_now_once(
        &self,
        user: UserId,
        product_id: Uuid,
        quantity: u32,
        address_id: Uuid,
        payment_method: String,
    ) -> Result<OrderDetails, OrderError> {
        let mut tx = self.store.begin().await?;
        ensure_address(tx.as_mut(), user, address_id).await?;

        let product = tx
            .product_for_update(product_id)
            .await?
            .ok_or(OrderError::ProductNotFound(product_id))?;
        if product.stock < quantity {
            return Err(OrderError::InsufficientStock {
                product_id,
                requested: u64::from(quantity),
                available: product.stock,
            });
        }

        let mut order = Order::new(user, address_id, Some(payment_method));
        tx.insert_order(&order).await?;

        OrderItemService::create_item_in_tx(tx.as_mut(), &mut order, product_id, quantity, Some(product.price))
            .await?;
        recompute_total(tx.as_mut(), &mut order).await?;

        let details = load_details(tx.as_mut(), order).await?;
        tx.commit().await?;
        Ok(details)
    }
}

fn require_payment_method(payment_method: &str) -> Result<String, OrderError> {
    let trimmed = payment_method.trim();
    if trimmed.is_empty() {
        return Err(OrderError::MissingPaymentMethod);
    }
    Ok(trimmed.to_string())
}

async fn ensure_address(tx: &mut dyn StoreTx, user: UserId, address_id: Uuid) -> Result<(), OrderError> {
    tx.address_for_user(address_id, user)
        .await?
        .map(|_| ())
        .ok_or(OrderError::AddressNotFound(address_id))
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::fixtures::Shop;
    use futures_util::future::join_all;
    use rust_decimal::Decimal;

    fn orchestrator(shop: &Shop) -> CheckoutOrchestrator {
        CheckoutOrchestrator::new(shop.store.clone(), shop.retry.clone())
    }

    #[tokio::test]
    async fn test_checkout_from_cart_builds_order_and_clears_cart() {
        let shop = Shop::new().await;
        let a = shop.product(12000, 10).await;
        let b = shop.product(5000, 4).await;
        shop.add_to_cart(shop.user, a.id, 2).await;
        shop.add_to_cart(shop.user, b.id, 1).await;

        let details = orchestrator(&shop)
            .checkout_from_cart(shop.user, shop.address.id, Some("card".into()))
            .await
            .unwrap();

        assert_eq!(details.order.total_amount, Decimal::new(29000, 0));
        assert_eq!(details.items.len(), 2);
        assert_eq!(details.item_count(), 3);
        assert!(details.is_consistent());
        assert_eq!(shop.stock(a.id).await, 8);
        assert_eq!(shop.stock(b.id).await, 3);
        assert_eq!(shop.cart_len(shop.user).await, 0);

        let stored = shop.order(details.order.id).await.unwrap();
        assert_eq!(stored.total_amount, Decimal::new(29000, 0));
        assert_eq!(stored.payment_method.as_deref(), Some("card"));
    }

    #[tokio::test]
    async fn test_checkout_without_payment_method() {
        let shop = Shop::new().await;
        let a = shop.product(700, 3).await;
        shop.add_to_cart(shop.user, a.id, 1).await;

        let details = orchestrator(&shop)
            .checkout_from_cart(shop.user, shop.address.id, None)
            .await
            .unwrap();

        assert!(details.order.payment_method.is_none());
        assert_eq!(details.order.total_amount, Decimal::new(700, 0));
    }

    #[tokio::test]
    async fn test_checkout_empty_cart_creates_nothing() {
        let shop = Shop::new().await;

        let err = orchestrator(&shop)
            .checkout_from_cart(shop.user, shop.address.id, None)
            .await
            .unwrap_err();

        assert!(matches!(err, OrderError::EmptyCart));
        assert_eq!(shop.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_checkout_mid_cart_failure_rolls_everything_back() {
        let shop = Shop::new().await;
        let plenty = shop.product(12000, 10).await;
        let scarce = shop.product(5000, 1).await;
        shop.add_to_cart(shop.user, plenty.id, 2).await;
        shop.add_to_cart(shop.user, scarce.id, 3).await;

        let err = orchestrator(&shop)
            .checkout_from_cart(shop.user, shop.address.id, None)
            .await
            .unwrap_err();

        assert!(matches!(err, OrderError::InsufficientStock { product_id, .. } if product_id == scarce.id));
        assert_eq!(shop.stock(plenty.id).await, 10);
        assert_eq!(shop.stock(scarce.id).await, 1);
        assert_eq!(shop.cart_len(shop.user).await, 2);
        assert_eq!(shop.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_checkout_with_someone_elses_address() {
        let shop = Shop::new().await;
        let other = UserId::new();
        let foreign = shop.address_for(other).await;
        let a = shop.product(1000, 5).await;
        shop.add_to_cart(shop.user, a.id, 1).await;

        let err = orchestrator(&shop)
            .checkout_from_cart(shop.user, foreign.id, None)
            .await
            .unwrap_err();

        assert!(matches!(err, OrderError::AddressNotFound(_)));
        assert_eq!(shop.stock(a.id).await, 5);
        assert_eq!(shop.cart_len(shop.user).await, 1);
    }

    #[tokio::test]
    async fn test_buy_now_places_single_item_order() {
        let shop = Shop::new().await;
        let product = shop.product(12000, 10).await;

        let details = orchestrator(&shop)
            .buy_now(shop.user, product.id, 2, shop.address.id, "card")
            .await
            .unwrap();

        assert_eq!(details.items.len(), 1);
        assert_eq!(details.items[0].price_at_purchase, Decimal::new(12000, 0));
        assert_eq!(details.order.total_amount, Decimal::new(24000, 0));
        assert_eq!(shop.stock(product.id).await, 8);
    }

    #[tokio::test]
    async fn test_buy_now_out_of_stock_creates_no_order() {
        let shop = Shop::new().await;
        let product = shop.product(12000, 0).await;

        let err = orchestrator(&shop)
            .buy_now(shop.user, product.id, 1, shop.address.id, "card")
            .await
            .unwrap_err();

        assert!(matches!(err, OrderError::InsufficientStock { available: 0, .. }));
        assert_eq!(shop.order_count().await, 0);
        assert_eq!(shop.stock(product.id).await, 0);
    }

    #[tokio::test]
    async fn test_buy_now_validation() {
        let shop = Shop::new().await;
        let product = shop.product(12000, 10).await;
        let checkout = orchestrator(&shop);

        assert!(matches!(
            checkout.buy_now(shop.user, product.id, 1, shop.address.id, "  ").await.unwrap_err(),
            OrderError::MissingPaymentMethod
        ));
        assert!(matches!(
            checkout.buy_now(shop.user, product.id, 0, shop.address.id, "card").await.unwrap_err(),
            OrderError::InvalidQuantity(0)
        ));
        assert!(matches!(
            checkout.buy_now(shop.user, product.id, 1, Uuid::new_v4(), "card").await.unwrap_err(),
            OrderError::AddressNotFound(_)
        ));
        assert!(matches!(
            checkout.buy_now(shop.user, Uuid::new_v4(), 1, shop.address.id, "card").await.unwrap_err(),
            OrderError::ProductNotFound(_)
        ));
        assert_eq!(shop.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_cart_purchase_requires_payment_method() {
        let shop = Shop::new().await;
        let a = shop.product(12000, 10).await;
        shop.add_to_cart(shop.user, a.id, 1).await;
        let checkout = orchestrator(&shop);

        let err = checkout.cart_purchase(shop.user, shop.address.id, "").await.unwrap_err();
        assert!(matches!(err, OrderError::MissingPaymentMethod));
        assert_eq!(shop.cart_len(shop.user).await, 1);

        let details = checkout.cart_purchase(shop.user, shop.address.id, "bank_transfer").await.unwrap();
        assert_eq!(details.order.payment_method.as_deref(), Some("bank_transfer"));
        assert_eq!(details.order.total_amount, Decimal::new(12000, 0));
        assert_eq!(shop.cart_len(shop.user).await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_buy_now_never_oversells() {
        let shop = Shop::new().await;
        let product = shop.product(1000, 5).await;
        let checkout = orchestrator(&shop);

        let mut handles = Vec::new();
        for _ in 0..12 {
            let checkout = checkout.clone();
            let user = shop.user;
            let address_id = shop.address.id;
            let product_id = product.id;
            handles.push(tokio::spawn(async move {
                checkout.buy_now(user, product_id, 1, address_id, "card").await
            }));
        }

        let mut placed = 0;
        let mut rejected = 0;
        for result in join_all(handles).await {
            match result.unwrap() {
                Ok(_) => placed += 1,
                Err(OrderError::InsufficientStock { .. }) => rejected += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(placed, 5);
        assert_eq!(rejected, 7);
        assert_eq!(shop.stock(product.id).await, 0);
        assert_eq!(shop.order_count().await, 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_carts_over_shared_products() {
        let shop = Shop::new().await;
        let a = shop.product(1000, 3).await;
        let b = shop.product(2000, 3).await;

        let checkout = orchestrator(&shop);
        let mut handles = Vec::new();
        for _ in 0..6 {
            let buyer = UserId::new();
            let address = shop.address_for(buyer).await;
            // opposite insertion orders
            shop.add_to_cart(buyer, b.id, 1).await;
            shop.add_to_cart(buyer, a.id, 1).await;
            let checkout = checkout.clone();
            handles.push(tokio::spawn(async move {
                checkout.checkout_from_cart(buyer, address.id, None).await
            }));
        }

        let placed = join_all(handles)
            .await
            .into_iter()
            .filter(|result| matches!(result, Ok(Ok(_))))
            .count();

        assert_eq!(placed, 3);
        assert_eq!(shop.stock(a.id).await, 0);
        assert_eq!(shop.stock(b.id).await, 0);
    }
}
