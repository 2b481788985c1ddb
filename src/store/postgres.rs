use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{query, PgPool, Postgres, Row, Transaction};
use tracing::{error, warn};
use uuid::Uuid;

use crate::domain::order::{Order, OrderItem};
use crate::models::{Address, CartItem, Product, ProductStats, UserId};
use super::{parse_status, Store, StoreError, StoreTx};

// ============================================================================
// PostgreSQL Store
// ============================================================================
//
// Each `StoreTx` wraps one sqlx transaction. `product_for_update` and
// `order_for_update` take row locks (`FOR UPDATE`) that are held until
// commit or rollback, which is what serializes concurrent stock writes.
//
// ============================================================================

const SCHEMA: &str = include_str!("../../migrations/0001_storefront.sql");

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Timeout for acquiring a connection from the pool
    pub acquire_timeout: Duration,
    /// Idle timeout for pooled connections
    pub idle_timeout: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(url: &str, config: &PostgresConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .connect(url)
            .await
            .map_err(StoreError::ConnectionFailed)?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates any missing tables and indexes
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(e, "migrate"))?;
        tracing::info!("Storefront schema is up to date");
        Ok(())
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(e, "begin"))?;
        Ok(Box::new(PgTx { tx }))
    }

    fn kind(&self) -> &'static str {
        "postgres"
    }
}

struct PgTx {
    tx: Transaction<'static, Postgres>,
}

fn map_sqlx_error(error: sqlx::Error, operation: &str) -> StoreError {
    if let sqlx::Error::Database(db_error) = &error {
        match db_error.code().as_deref() {
            // serialization_failure, deadlock_detected
            Some("40001") | Some("40P01") => {
                warn!(error = %db_error, operation, "Transaction conflict");
                return StoreError::Transient(db_error.to_string());
            }
            Some("23505") => return StoreError::Duplicate(db_error.to_string()),
            Some("23503") => return StoreError::Referenced(db_error.to_string()),
            _ => {}
        }
    }

    error!(error = %error, operation, "Database operation failed");
    StoreError::Database(error.to_string())
}

fn to_db_int(value: u32, field: &str) -> Result<i32, StoreError> {
    i32::try_from(value).map_err(|_| StoreError::OutOfRange(format!("{field} {value} exceeds column range")))
}

fn from_db_int(value: i32, field: &str) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("{field} is negative: {value}")))
}

fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name)
        .map_err(|e| StoreError::Corrupt(format!("column {name}: {e}")))
}

fn product_from_row(row: &PgRow) -> Result<Product, StoreError> {
    Ok(Product {
        id: column(row, "id")?,
        seller_id: column(row, "seller_id")?,
        name: column(row, "name")?,
        price: column(row, "price")?,
        stock: from_db_int(column(row, "stock")?, "stock")?,
        sold_out: column(row, "sold_out")?,
    })
}

fn address_from_row(row: &PgRow) -> Result<Address, StoreError> {
    Ok(Address {
        id: column(row, "id")?,
        user_id: UserId(column(row, "user_id")?),
        recipient: column(row, "recipient")?,
        line1: column(row, "line1")?,
        line2: column(row, "line2")?,
        postal_code: column(row, "postal_code")?,
    })
}

fn cart_item_from_row(row: &PgRow) -> Result<CartItem, StoreError> {
    Ok(CartItem {
        id: column(row, "id")?,
        user_id: UserId(column(row, "user_id")?),
        product_id: column(row, "product_id")?,
        quantity: from_db_int(column(row, "quantity")?, "quantity")?,
        added_at: column(row, "added_at")?,
    })
}

fn order_from_row(row: &PgRow) -> Result<Order, StoreError> {
    let status: String = column(row, "status")?;
    Ok(Order {
        id: column(row, "id")?,
        user_id: UserId(column(row, "user_id")?),
        status: parse_status(&status)?,
        total_amount: column(row, "total_amount")?,
        address_id: column(row, "address_id")?,
        payment_method: column(row, "payment_method")?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
    })
}

fn item_from_row(row: &PgRow) -> Result<OrderItem, StoreError> {
    Ok(OrderItem {
        id: column(row, "id")?,
        order_id: column(row, "order_id")?,
        product_id: column(row, "product_id")?,
        quantity: from_db_int(column(row, "quantity")?, "quantity")?,
        price_at_purchase: column(row, "price_at_purchase")?,
        change_reason: column(row, "change_reason")?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
    })
}

const PRODUCT_COLUMNS: &str = "id, seller_id, name, price, stock, sold_out";
const ORDER_COLUMNS: &str =
    "id, user_id, status, total_amount, address_id, payment_method, created_at, updated_at";
const ITEM_COLUMNS: &str =
    "id, order_id, product_id, quantity, price_at_purchase, change_reason, created_at, updated_at";

#[async_trait]
impl StoreTx for PgTx {
    async fn insert_product(&mut self, product: &Product) -> Result<(), StoreError> {
        query("INSERT INTO products (id, seller_id, name, price, stock, sold_out) VALUES ($1, $2, $3, $4, $5, $6)")
            .bind(product.id)
            .bind(product.seller_id)
            .bind(&product.name)
            .bind(product.price)
            .bind(to_db_int(product.stock, "stock")?)
            .bind(product.sold_out)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error(e, "insert_product"))?;
        Ok(())
    }

    async fn product(&mut self, id: Uuid) -> Result<Option<Product>, StoreError> {
        let row = query(&format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error(e, "product"))?;
        row.as_ref().map(product_from_row).transpose()
    }

    async fn product_for_update(&mut self, id: Uuid) -> Result<Option<Product>, StoreError> {
        let row = query(&format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1 FOR UPDATE"))
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error(e, "product_for_update"))?;
        row.as_ref().map(product_from_row).transpose()
    }

    async fn set_product_stock(&mut self, id: Uuid, stock: u32) -> Result<(), StoreError> {
        let result = query("UPDATE products SET stock = $2, sold_out = ($2 = 0) WHERE id = $1")
            .bind(id)
            .bind(to_db_int(stock, "stock")?)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error(e, "set_product_stock"))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Missing(format!("product {id}")));
        }
        Ok(())
    }

    async fn delete_product(&mut self, id: Uuid) -> Result<(), StoreError> {
        let result = query("DELETE FROM products WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error(e, "delete_product"))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Missing(format!("product {id}")));
        }
        Ok(())
    }

    async fn product_stats(&mut self, id: Uuid) -> Result<ProductStats, StoreError> {
        let row = query("SELECT sales_count FROM product_stats WHERE product_id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error(e, "product_stats"))?;
        let sales_count = match row {
            Some(row) => {
                let count: i64 = column(&row, "sales_count")?;
                u64::try_from(count).map_err(|_| StoreError::Corrupt(format!("sales_count is negative: {count}")))?
            }
            None => 0,
        };
        Ok(ProductStats { product_id: id, sales_count })
    }

    async fn add_sales(&mut self, product_id: Uuid, quantity: u32) -> Result<(), StoreError> {
        query(
            "INSERT INTO product_stats (product_id, sales_count) VALUES ($1, $2) \
             ON CONFLICT (product_id) DO UPDATE SET sales_count = product_stats.sales_count + EXCLUDED.sales_count",
        )
        .bind(product_id)
        .bind(i64::from(quantity))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error(e, "add_sales"))?;
        Ok(())
    }

    async fn insert_address(&mut self, address: &Address) -> Result<(), StoreError> {
        query("INSERT INTO addresses (id, user_id, recipient, line1, line2, postal_code) VALUES ($1, $2, $3, $4, $5, $6)")
            .bind(address.id)
            .bind(address.user_id.as_uuid())
            .bind(&address.recipient)
            .bind(&address.line1)
            .bind(&address.line2)
            .bind(&address.postal_code)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error(e, "insert_address"))?;
        Ok(())
    }

    async fn address_for_user(&mut self, id: Uuid, user: UserId) -> Result<Option<Address>, StoreError> {
        let row = query("SELECT id, user_id, recipient, line1, line2, postal_code FROM addresses WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error(e, "address_for_user"))?;
        row.as_ref().map(address_from_row).transpose()
    }

    async fn add_cart_item(&mut self, item: &CartItem) -> Result<(), StoreError> {
        query("INSERT INTO cart_items (id, user_id, product_id, quantity, added_at) VALUES ($1, $2, $3, $4, $5)")
            .bind(item.id)
            .bind(item.user_id.as_uuid())
            .bind(item.product_id)
            .bind(to_db_int(item.quantity, "quantity")?)
            .bind(item.added_at)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error(e, "add_cart_item"))?;
        Ok(())
    }

    async fn cart_items_for_user(&mut self, user: UserId) -> Result<Vec<CartItem>, StoreError> {
        let rows = query("SELECT id, user_id, product_id, quantity, added_at FROM cart_items WHERE user_id = $1 ORDER BY added_at")
            .bind(user.as_uuid())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error(e, "cart_items_for_user"))?;
        rows.iter().map(cart_item_from_row).collect()
    }

    async fn clear_cart(&mut self, user: UserId) -> Result<u64, StoreError> {
        let result = query("DELETE FROM cart_items WHERE user_id = $1")
            .bind(user.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error(e, "clear_cart"))?;
        Ok(result.rows_affected())
    }

    async fn insert_order(&mut self, order: &Order) -> Result<(), StoreError> {
        query(&format!("INSERT INTO orders ({ORDER_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"))
            .bind(order.id)
            .bind(order.user_id.as_uuid())
            .bind(order.status.as_str())
            .bind(order.total_amount)
            .bind(order.address_id)
            .bind(&order.payment_method)
            .bind(order.created_at)
            .bind(order.updated_at)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error(e, "insert_order"))?;
        Ok(())
    }

    async fn order(&mut self, id: Uuid) -> Result<Option<Order>, StoreError> {
        let row = query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error(e, "order"))?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn order_for_update(&mut self, id: Uuid) -> Result<Option<Order>, StoreError> {
        let row = query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE"))
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error(e, "order_for_update"))?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn orders_for_user(&mut self, user: UserId) -> Result<Vec<Order>, StoreError> {
        let rows = query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 ORDER BY created_at DESC"))
            .bind(user.as_uuid())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error(e, "orders_for_user"))?;
        rows.iter().map(order_from_row).collect()
    }

    async fn update_order(&mut self, order: &Order) -> Result<(), StoreError> {
        let result = query(
            "UPDATE orders SET status = $2, total_amount = $3, address_id = $4, payment_method = $5, updated_at = $6 WHERE id = $1",
        )
        .bind(order.id)
        .bind(order.status.as_str())
        .bind(order.total_amount)
        .bind(order.address_id)
        .bind(&order.payment_method)
        .bind(order.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error(e, "update_order"))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Missing(format!("order {}", order.id)));
        }
        Ok(())
    }

    async fn delete_order(&mut self, id: Uuid) -> Result<(), StoreError> {
        let result = query("DELETE FROM orders WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error(e, "delete_order"))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Missing(format!("order {id}")));
        }
        Ok(())
    }

    async fn count_orders(&mut self) -> Result<u64, StoreError> {
        let row = query("SELECT COUNT(*) AS n FROM orders")
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error(e, "count_orders"))?;
        let n: i64 = column(&row, "n")?;
        Ok(n.max(0) as u64)
    }

    async fn insert_item(&mut self, item: &OrderItem) -> Result<(), StoreError> {
        query(&format!("INSERT INTO order_items ({ITEM_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"))
            .bind(item.id)
            .bind(item.order_id)
            .bind(item.product_id)
            .bind(to_db_int(item.quantity, "quantity")?)
            .bind(item.price_at_purchase)
            .bind(&item.change_reason)
            .bind(item.created_at)
            .bind(item.updated_at)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error(e, "insert_item"))?;
        Ok(())
    }

    async fn item(&mut self, id: Uuid) -> Result<Option<OrderItem>, StoreError> {
        let row = query(&format!("SELECT {ITEM_COLUMNS} FROM order_items WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error(e, "item"))?;
        row.as_ref().map(item_from_row).transpose()
    }

    async fn update_item(&mut self, item: &OrderItem) -> Result<(), StoreError> {
        // price_at_purchase is immutable once written
        let result = query("UPDATE order_items SET quantity = $2, change_reason = $3, updated_at = $4 WHERE id = $1")
            .bind(item.id)
            .bind(to_db_int(item.quantity, "quantity")?)
            .bind(&item.change_reason)
            .bind(item.updated_at)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error(e, "update_item"))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Missing(format!("order item {}", item.id)));
        }
        Ok(())
    }

    async fn delete_item(&mut self, id: Uuid) -> Result<(), StoreError> {
        let result = query("DELETE FROM order_items WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error(e, "delete_item"))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Missing(format!("order item {id}")));
        }
        Ok(())
    }

    async fn items_for_order(&mut self, order_id: Uuid) -> Result<Vec<OrderItem>, StoreError> {
        let rows = query(&format!("SELECT {ITEM_COLUMNS} FROM order_items WHERE order_id = $1 ORDER BY created_at"))
            .bind(order_id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error(e, "items_for_order"))?;
        rows.iter().map(item_from_row).collect()
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error(e, "commit"))
    }
}
