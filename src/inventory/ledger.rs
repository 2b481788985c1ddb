use uuid::Uuid;

use crate::domain::order::OrderError;
use crate::models::Product;
use crate::store::{StoreError, StoreTx};

/// Stock reservations against the caller's open transaction.
///
/// Each call locks the product row first, so two transactions touching the
/// same product are serialized: the second one sees the first one's stock
/// only after it commits or rolls back. The write happens immediately, so
/// later reads in the same transaction see the new stock.
pub struct InventoryLedger;

impl InventoryLedger {
    /// Take `quantity` units out of stock
    pub async fn reserve(
        tx: &mut dyn StoreTx,
        product_id: Uuid,
        quantity: u32,
    ) -> Result<Product, OrderError> {
        Self::adjust(tx, product_id, -i64::from(quantity)).await
    }

    /// Put `quantity` units back into stock
    pub async fn release(
        tx: &mut dyn StoreTx,
        product_id: Uuid,
        quantity: u32,
    ) -> Result<Product, OrderError> {
        Self::adjust(tx, product_id, i64::from(quantity)).await
    }

    /// Apply a signed stock change; negative deltas consume stock
    pub async fn adjust(
        tx: &mut dyn StoreTx,
        product_id: Uuid,
        delta: i64,
    ) -> Result<Product, OrderError> {
        let mut product = tx
            .product_for_update(product_id)
            .await?
            .ok_or(OrderError::ProductNotFound(product_id))?;

        let next = i64::from(product.stock) + delta;
        if next < 0 {
            tracing::warn!(
                product_id = %product_id,
                available = product.stock,
                requested = -delta,
                "Stock reservation rejected"
            );
            return Err(OrderError::InsufficientStock {
                product_id,
                requested: delta.unsigned_abs(),
                available: product.stock,
            });
        }
        let next = u32::try_from(next).map_err(|_| {
            StoreError::OutOfRange(format!(
                "stock for product {product_id} would reach {next}, max is {}",
                u32::MAX
            ))
        })?;

        if delta != 0 {
            tx.set_product_stock(product_id, next).await?;
            product.set_stock(next);
        }

        tracing::debug!(
            product_id = %product_id,
            delta = delta,
            stock = next,
            "Stock adjusted"
        );

        Ok(product)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, Store};
    use crate::utils::retry::IsTransient;
    use rust_decimal::Decimal;

    async fn seeded(stock: u32) -> (MemoryStore, Uuid) {
        let store = MemoryStore::new();
        let product = Product::new(Uuid::new_v4(), "Rice 10kg", Decimal::new(32000, 0), stock);
        let mut tx = store.begin().await.unwrap();
        tx.insert_product(&product).await.unwrap();
        tx.commit().await.unwrap();
        (store, product.id)
    }

    async fn stock_of(store: &MemoryStore, id: Uuid) -> u32 {
        let mut tx = store.begin().await.unwrap();
        tx.product(id).await.unwrap().unwrap().stock
    }

    #[tokio::test]
    async fn test_reserve_decrements_stock() {
        let (store, id) = seeded(10).await;

        let mut tx = store.begin().await.unwrap();
        let product = InventoryLedger::reserve(tx.as_mut(), id, 2).await.unwrap();
        assert_eq!(product.stock, 8);
        // visible to later reads in the same transaction
        assert_eq!(tx.product(id).await.unwrap().unwrap().stock, 8);
        tx.commit().await.unwrap();

        assert_eq!(stock_of(&store, id).await, 8);
    }

    #[tokio::test]
    async fn test_reserve_more_than_stock_fails_unchanged() {
        let (store, id) = seeded(1).await;

        let mut tx = store.begin().await.unwrap();
        let err = InventoryLedger::reserve(tx.as_mut(), id, 2).await.unwrap_err();
        assert!(matches!(
            err,
            OrderError::InsufficientStock { requested: 2, available: 1, .. }
        ));
        assert_eq!(tx.product(id).await.unwrap().unwrap().stock, 1);
    }

    #[tokio::test]
    async fn test_reserve_exact_stock_sells_out() {
        let (store, id) = seeded(3).await;

        let mut tx = store.begin().await.unwrap();
        let product = InventoryLedger::reserve(tx.as_mut(), id, 3).await.unwrap();
        assert_eq!(product.stock, 0);
        assert!(product.sold_out);
    }

    #[tokio::test]
    async fn test_reserve_then_release_restores_stock() {
        let (store, id) = seeded(10).await;

        let mut tx = store.begin().await.unwrap();
        InventoryLedger::reserve(tx.as_mut(), id, 4).await.unwrap();
        InventoryLedger::release(tx.as_mut(), id, 4).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(stock_of(&store, id).await, 10);
    }

    #[tokio::test]
    async fn test_adjust_both_directions() {
        let (store, id) = seeded(5).await;

        let mut tx = store.begin().await.unwrap();
        assert_eq!(InventoryLedger::adjust(tx.as_mut(), id, -5).await.unwrap().stock, 0);
        assert_eq!(InventoryLedger::adjust(tx.as_mut(), id, 2).await.unwrap().stock, 2);
        assert!(InventoryLedger::adjust(tx.as_mut(), id, -3).await.is_err());
    }

    #[tokio::test]
    async fn test_release_past_stock_column_fails_unchanged() {
        let (store, id) = seeded(u32::MAX - 1).await;

        let mut tx = store.begin().await.unwrap();
        let err = InventoryLedger::release(tx.as_mut(), id, 5).await.unwrap_err();
        assert!(matches!(err, OrderError::Store(StoreError::OutOfRange(_))));
        assert_eq!(err.kind(), "store");
        assert!(!err.is_transient());
        assert_eq!(tx.product(id).await.unwrap().unwrap().stock, u32::MAX - 1);

        InventoryLedger::release(tx.as_mut(), id, 1).await.unwrap();
        assert_eq!(tx.product(id).await.unwrap().unwrap().stock, u32::MAX);
    }

    #[tokio::test]
    async fn test_unknown_product() {
        let store = MemoryStore::new();
        let missing = Uuid::new_v4();

        let mut tx = store.begin().await.unwrap();
        let err = InventoryLedger::reserve(tx.as_mut(), missing, 1).await.unwrap_err();
        assert!(matches!(err, OrderError::ProductNotFound(id) if id == missing));
    }

    #[tokio::test]
    async fn test_rolled_back_reservation_leaves_stock() {
        let (store, id) = seeded(2).await;

        {
            let mut tx = store.begin().await.unwrap();
            InventoryLedger::reserve(tx.as_mut(), id, 2).await.unwrap();
        }

        assert_eq!(stock_of(&store, id).await, 2);
    }
}
