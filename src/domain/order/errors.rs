use rust_decimal::Decimal;
use uuid::Uuid;

use crate::store::StoreError;
use crate::utils::retry::IsTransient;

// ============================================================================
// Order Business Rule Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("Product not found: {0}")]
    ProductNotFound(Uuid),

    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: Uuid,
        requested: u64,
        available: u32,
    },

    #[error("Invalid item quantity: {0}")]
    InvalidQuantity(i64),

    #[error("Invalid item price: {0}")]
    InvalidPrice(Decimal),

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Invalid order status: {0}")]
    InvalidOrderStatus(String),

    #[error("Order not found: {0}")]
    OrderNotFound(Uuid),

    #[error("Order item not found: {0}")]
    OrderItemNotFound(Uuid),

    #[error("Address not found: {0}")]
    AddressNotFound(Uuid),

    #[error("Payment method is required")]
    MissingPaymentMethod,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl OrderError {
    /// Stable label used for metrics and by boundary layers
    pub fn kind(&self) -> &'static str {
        match self {
            OrderError::ProductNotFound(_) => "product_not_found",
            OrderError::InsufficientStock { .. } => "insufficient_stock",
            OrderError::InvalidQuantity(_) => "invalid_quantity",
            OrderError::InvalidPrice(_) => "invalid_price",
            OrderError::EmptyCart => "empty_cart",
            OrderError::InvalidOrderStatus(_) => "invalid_order_status",
            OrderError::OrderNotFound(_) => "order_not_found",
            OrderError::OrderItemNotFound(_) => "order_item_not_found",
            OrderError::AddressNotFound(_) => "address_not_found",
            OrderError::MissingPaymentMethod => "missing_payment_method",
            OrderError::Store(_) => "store",
        }
    }
}

impl IsTransient for OrderError {
    fn is_transient(&self) -> bool {
        matches!(self, OrderError::Store(e) if e.is_transient())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_store_errors_are_retryable() {
        assert!(OrderError::Store(StoreError::Transient("40001".into())).is_transient());
        assert!(!OrderError::Store(StoreError::Database("boom".into())).is_transient());
        assert!(!OrderError::EmptyCart.is_transient());
        assert!(!OrderError::InsufficientStock {
            product_id: Uuid::nil(),
            requested: 2,
            available: 1,
        }
        .is_transient());
    }

    #[test]
    fn test_error_kind_labels() {
        assert_eq!(OrderError::EmptyCart.kind(), "empty_cart");
        assert_eq!(OrderError::InvalidQuantity(0).kind(), "invalid_quantity");
        assert_eq!(OrderError::InvalidPrice(Decimal::NEGATIVE_ONE).kind(), "invalid_price");
        assert_eq!(OrderError::OrderNotFound(Uuid::nil()).kind(), "order_not_found");
    }
}
