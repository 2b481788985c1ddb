use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::domain::order::{Order, OrderItem};
use crate::models::{Address, CartItem, Product, ProductStats, UserId};
use super::{sort_newest_first, Store, StoreError, StoreTx};

// ============================================================================
// In-Memory Store
// ============================================================================
//
// A transaction takes the store-wide lock and works on a private copy of the
// tables. Commit publishes the copy; dropping the transaction discards it.
// Holding the lock for the whole transaction is stricter than row locking,
// so two checkouts can never both observe the same last unit.
//
// ============================================================================

#[derive(Debug, Clone, Default)]
struct Tables {
    products: HashMap<Uuid, Product>,
    product_stats: HashMap<Uuid, u64>,
    addresses: HashMap<Uuid, Address>,
    cart_items: HashMap<Uuid, CartItem>,
    orders: HashMap<Uuid, Order>,
    order_items: HashMap<Uuid, OrderItem>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let guard = self.tables.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTx { guard, working }))
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
}

fn missing(what: &str, id: Uuid) -> StoreError {
    StoreError::Missing(format!("{what} {id}"))
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn insert_product(&mut self, product: &Product) -> Result<(), StoreError> {
        if self.working.products.contains_key(&product.id) {
            return Err(StoreError::Duplicate(format!("product {}", product.id)));
        }
        self.working.products.insert(product.id, product.clone());
        Ok(())
    }

    async fn product(&mut self, id: Uuid) -> Result<Option<Product>, StoreError> {
        Ok(self.working.products.get(&id).cloned())
    }

    async fn product_for_update(&mut self, id: Uuid) -> Result<Option<Product>, StoreError> {
        // the whole store is already locked by this transaction
        Ok(self.working.products.get(&id).cloned())
    }

    async fn set_product_stock(&mut self, id: Uuid, stock: u32) -> Result<(), StoreError> {
        let product = self
            .working
            .products
            .get_mut(&id)
            .ok_or_else(|| missing("product", id))?;
        product.set_stock(stock);
        Ok(())
    }

    async fn delete_product(&mut self, id: Uuid) -> Result<(), StoreError> {
        if self.working.order_items.values().any(|item| item.product_id == id) {
            return Err(StoreError::Referenced(format!("product {id} has order items")));
        }
        self.working
            .products
            .remove(&id)
            .ok_or_else(|| missing("product", id))?;
        self.working.product_stats.remove(&id);
        self.working.cart_items.retain(|_, item| item.product_id != id);
        Ok(())
    }

    async fn product_stats(&mut self, id: Uuid) -> Result<ProductStats, StoreError> {
        Ok(ProductStats {
            product_id: id,
            sales_count: self.working.product_stats.get(&id).copied().unwrap_or(0),
        })
    }

    async fn add_sales(&mut self, product_id: Uuid, quantity: u32) -> Result<(), StoreError> {
        *self.working.product_stats.entry(product_id).or_insert(0) += u64::from(quantity);
        Ok(())
    }

    async fn insert_address(&mut self, address: &Address) -> Result<(), StoreError> {
        self.working.addresses.insert(address.id, address.clone());
        Ok(())
    }

    async fn address_for_user(&mut self, id: Uuid, user: UserId) -> Result<Option<Address>, StoreError> {
        Ok(self
            .working
            .addresses
            .get(&id)
            .filter(|address| address.user_id == user)
            .cloned())
    }

    async fn add_cart_item(&mut self, item: &CartItem) -> Result<(), StoreError> {
        let exists = self
            .working
            .cart_items
            .values()
            .any(|existing| existing.user_id == item.user_id && existing.product_id == item.product_id);
        if exists {
            return Err(StoreError::Duplicate(format!(
                "cart item for user {} and product {}",
                item.user_id, item.product_id
            )));
        }
        self.working.cart_items.insert(item.id, item.clone());
        Ok(())
    }

    async fn cart_items_for_user(&mut self, user: UserId) -> Result<Vec<CartItem>, StoreError> {
        let mut items: Vec<CartItem> = self
            .working
            .cart_items
            .values()
            .filter(|item| item.user_id == user)
            .cloned()
            .collect();
        items.sort_by_key(|item| item.added_at);
        Ok(items)
    }

    async fn clear_cart(&mut self, user: UserId) -> Result<u64, StoreError> {
        let before = self.working.cart_items.len();
        self.working.cart_items.retain(|_, item| item.user_id != user);
        Ok((before - self.working.cart_items.len()) as u64)
    }

    async fn insert_order(&mut self, order: &Order) -> Result<(), StoreError> {
        if self.working.orders.contains_key(&order.id) {
            return Err(StoreError::Duplicate(format!("order {}", order.id)));
        }
        self.working.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn order(&mut self, id: Uuid) -> Result<Option<Order>, StoreError> {
        Ok(self.working.orders.get(&id).cloned())
    }

    async fn order_for_update(&mut self, id: Uuid) -> Result<Option<Order>, StoreError> {
        Ok(self.working.orders.get(&id).cloned())
    }

    async fn orders_for_user(&mut self, user: UserId) -> Result<Vec<Order>, StoreError> {
        let mut orders: Vec<Order> = self
            .working
            .orders
            .values()
            .filter(|order| order.user_id == user)
            .cloned()
            .collect();
        sort_newest_first(&mut orders);
        Ok(orders)
    }

    async fn update_order(&mut self, order: &Order) -> Result<(), StoreError> {
        let stored = self
            .working
            .orders
            .get_mut(&order.id)
            .ok_or_else(|| missing("order", order.id))?;
        *stored = order.clone();
        Ok(())
    }

    async fn delete_order(&mut self, id: Uuid) -> Result<(), StoreError> {
        self.working
            .orders
            .remove(&id)
            .ok_or_else(|| missing("order", id))?;
        self.working.order_items.retain(|_, item| item.order_id != id);
        Ok(())
    }

    async fn count_orders(&mut self) -> Result<u64, StoreError> {
        Ok(self.working.orders.len() as u64)
    }

    async fn insert_item(&mut self, item: &OrderItem) -> Result<(), StoreError> {
        if !self.working.orders.contains_key(&item.order_id) {
            return Err(missing("order", item.order_id));
        }
        if !self.working.products.contains_key(&item.product_id) {
            return Err(missing("product", item.product_id));
        }
        self.working.order_items.insert(item.id, item.clone());
        Ok(())
    }

    async fn item(&mut self, id: Uuid) -> Result<Option<OrderItem>, StoreError> {
        Ok(self.working.order_items.get(&id).cloned())
    }

    async fn update_item(&mut self, item: &OrderItem) -> Result<(), StoreError> {
        let stored = self
            .working
            .order_items
            .get_mut(&item.id)
            .ok_or_else(|| missing("order item", item.id))?;
        *stored = item.clone();
        Ok(())
    }

    async fn delete_item(&mut self, id: Uuid) -> Result<(), StoreError> {
        self.working
            .order_items
            .remove(&id)
            .ok_or_else(|| missing("order item", id))?;
        Ok(())
    }

    async fn items_for_order(&mut self, order_id: Uuid) -> Result<Vec<OrderItem>, StoreError> {
        let mut items: Vec<OrderItem> = self
            .working
            .order_items
            .values()
            .filter(|item| item.order_id == order_id)
            .cloned()
            .collect();
        items.sort_by_key(|item| item.created_at);
        Ok(items)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn product(stock: u32) -> Product {
        Product::new(Uuid::new_v4(), "Tomatoes", Decimal::new(3000, 0), stock)
    }

    #[tokio::test]
    async fn test_commit_publishes_writes() {
        let store = MemoryStore::new();
        let p = product(5);

        let mut tx = store.begin().await.unwrap();
        tx.insert_product(&p).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.product(p.id).await.unwrap(), Some(p));
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let store = MemoryStore::new();
        let p = product(5);

        let mut tx = store.begin().await.unwrap();
        tx.insert_product(&p).await.unwrap();
        tx.commit().await.unwrap();

        {
            let mut tx = store.begin().await.unwrap();
            tx.set_product_stock(p.id, 1).await.unwrap();
            // own writes are visible inside the transaction
            assert_eq!(tx.product(p.id).await.unwrap().unwrap().stock, 1);
        }

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.product(p.id).await.unwrap().unwrap().stock, 5);
    }

    #[tokio::test]
    async fn test_duplicate_cart_item_rejected() {
        let store = MemoryStore::new();
        let user = UserId::new();
        let p = product(5);

        let mut tx = store.begin().await.unwrap();
        tx.insert_product(&p).await.unwrap();
        tx.add_cart_item(&CartItem::new(user, p.id, 1)).await.unwrap();
        let err = tx.add_cart_item(&CartItem::new(user, p.id, 2)).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));

        // another user may hold the same product
        tx.add_cart_item(&CartItem::new(UserId::new(), p.id, 1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_product_referenced_by_order_item_cannot_be_deleted() {
        let store = MemoryStore::new();
        let p = product(5);
        let order = Order::new(UserId::new(), Uuid::new_v4(), None);

        let mut tx = store.begin().await.unwrap();
        tx.insert_product(&p).await.unwrap();
        tx.insert_order(&order).await.unwrap();
        tx.insert_item(&OrderItem::new(order.id, p.id, 1, p.price)).await.unwrap();

        let err = tx.delete_product(p.id).await.unwrap_err();
        assert!(matches!(err, StoreError::Referenced(_)));
        assert!(tx.product(p.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_order_cascades_to_items() {
        let store = MemoryStore::new();
        let p = product(5);
        let order = Order::new(UserId::new(), Uuid::new_v4(), None);

        let mut tx = store.begin().await.unwrap();
        tx.insert_product(&p).await.unwrap();
        tx.insert_order(&order).await.unwrap();
        tx.insert_item(&OrderItem::new(order.id, p.id, 1, p.price)).await.unwrap();

        tx.delete_order(order.id).await.unwrap();
        assert!(tx.items_for_order(order.id).await.unwrap().is_empty());
        // the product is free to go once no item references it
        tx.delete_product(p.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_address_lookup_is_scoped_to_owner() {
        let store = MemoryStore::new();
        let owner = UserId::new();
        let address = Address::new(owner, "Kim", "1 Market St", "04524");

        let mut tx = store.begin().await.unwrap();
        tx.insert_address(&address).await.unwrap();

        assert!(tx.address_for_user(address.id, owner).await.unwrap().is_some());
        assert!(tx.address_for_user(address.id, UserId::new()).await.unwrap().is_none());
    }
}
