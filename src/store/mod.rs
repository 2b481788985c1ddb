// ============================================================================
// Store - Transactional Persistence
// ============================================================================
//
// The order core never talks to a database directly. Every operation opens a
// `StoreTx`, does all of its reads and writes through it, and commits once.
// Dropping a transaction without committing rolls it back.
//
// Implementations:
// - memory   - store-wide lock per transaction, used by tests and the demo
// - postgres - sqlx transactions with `SELECT ... FOR UPDATE` row locks
//
// ============================================================================

mod memory;
mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::order::{Order, OrderItem, OrderStatus};
use crate::models::{Address, CartItem, Product, ProductStats, UserId};
use crate::utils::retry::IsTransient;

pub use memory::MemoryStore;
pub use postgres::{PostgresConfig, PostgresStore};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Transaction conflict, safe to retry: {0}")]
    Transient(String),

    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error("Record is still referenced: {0}")]
    Referenced(String),

    #[error("Record not found: {0}")]
    Missing(String),

    #[error("Stored data is invalid: {0}")]
    Corrupt(String),

    #[error("Value exceeds column range: {0}")]
    OutOfRange(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Failed to connect to database")]
    ConnectionFailed(#[source] sqlx::Error),
}

impl IsTransient for StoreError {
    fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError>;

    /// Backend label reported by /health
    fn kind(&self) -> &'static str;
}

/// One open transaction. Reads see this transaction's own earlier writes.
#[async_trait]
pub trait StoreTx: Send {
    // --- catalog ---
    async fn insert_product(&mut self, product: &Product) -> Result<(), StoreError>;
    async fn product(&mut self, id: Uuid) -> Result<Option<Product>, StoreError>;
    /// Reads the product and holds an exclusive lock on it until the transaction ends
    async fn product_for_update(&mut self, id: Uuid) -> Result<Option<Product>, StoreError>;
    /// Only the inventory ledger calls this
    async fn set_product_stock(&mut self, id: Uuid, stock: u32) -> Result<(), StoreError>;
    /// Fails with `Referenced` while any order item points at the product
    async fn delete_product(&mut self, id: Uuid) -> Result<(), StoreError>;
    async fn product_stats(&mut self, id: Uuid) -> Result<ProductStats, StoreError>;
    async fn add_sales(&mut self, product_id: Uuid, quantity: u32) -> Result<(), StoreError>;

    // --- addresses ---
    async fn insert_address(&mut self, address: &Address) -> Result<(), StoreError>;
    async fn address_for_user(&mut self, id: Uuid, user: UserId) -> Result<Option<Address>, StoreError>;

    // --- carts ---
    async fn add_cart_item(&mut self, item: &CartItem) -> Result<(), StoreError>;
    async fn cart_items_for_user(&mut self, user: UserId) -> Result<Vec<CartItem>, StoreError>;
    async fn clear_cart(&mut self, user: UserId) -> Result<u64, StoreError>;

    // --- orders ---
    async fn insert_order(&mut self, order: &Order) -> Result<(), StoreError>;
    async fn order(&mut self, id: Uuid) -> Result<Option<Order>, StoreError>;
    async fn order_for_update(&mut self, id: Uuid) -> Result<Option<Order>, StoreError>;
    /// Newest first
    async fn orders_for_user(&mut self, user: UserId) -> Result<Vec<Order>, StoreError>;
    async fn update_order(&mut self, order: &Order) -> Result<(), StoreError>;
    /// Deletes the order and, by cascade, its items
    async fn delete_order(&mut self, id: Uuid) -> Result<(), StoreError>;
    async fn count_orders(&mut self) -> Result<u64, StoreError>;

    // --- order items ---
    async fn insert_item(&mut self, item: &OrderItem) -> Result<(), StoreError>;
    async fn item(&mut self, id: Uuid) -> Result<Option<OrderItem>, StoreError>;
    async fn update_item(&mut self, item: &OrderItem) -> Result<(), StoreError>;
    async fn delete_item(&mut self, id: Uuid) -> Result<(), StoreError>;
    async fn items_for_order(&mut self, order_id: Uuid) -> Result<Vec<OrderItem>, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

pub(crate) fn parse_status(raw: &str) -> Result<OrderStatus, StoreError> {
    raw.parse()
        .map_err(|_| StoreError::Corrupt(format!("unknown order status '{raw}'")))
}

pub(crate) fn sort_newest_first(orders: &mut [Order]) {
    orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}
