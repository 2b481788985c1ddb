use rust_decimal::Decimal;
use uuid::Uuid;

// ============================================================================
// Order Commands - Represent user intent
// ============================================================================

#[derive(Debug, Clone)]
pub enum OrderCommand {
    CheckoutFromCart {
        address_id: Uuid,
        payment_method: Option<String>,
    },
    BuyNow {
        product_id: Uuid,
        quantity: u32,
        address_id: Uuid,
        payment_method: String,
    },
    CartPurchase {
        address_id: Uuid,
        payment_method: String,
    },
    CreateItem {
        order_id: Uuid,
        product_id: Uuid,
        quantity: u32,
        price_at_purchase: Option<Decimal>,
    },
    UpdateItemQuantity {
        item_id: Uuid,
        quantity: i64,
        change_reason: Option<String>,
    },
    DeleteItem {
        item_id: Uuid,
    },
    UpdateStatus {
        order_id: Uuid,
        status: String,
    },
    MarkShipping {
        order_id: Uuid,
    },
    MarkDelivered {
        order_id: Uuid,
    },
    CancelStale {
        order_id: Uuid,
    },
    DeleteOrder {
        order_id: Uuid,
    },
}

impl OrderCommand {
    /// Label used in logs and metrics
    pub fn name(&self) -> &'static str {
        match self {
            OrderCommand::CheckoutFromCart { .. } => "checkout_from_cart",
            OrderCommand::BuyNow { .. } => "buy_now",
            OrderCommand::CartPurchase { .. } => "cart_purchase",
            OrderCommand::CreateItem { .. } => "create_item",
            OrderCommand::UpdateItemQuantity { .. } => "update_item_quantity",
            OrderCommand::DeleteItem { .. } => "delete_item",
            OrderCommand::UpdateStatus { .. } => "update_status",
            OrderCommand::MarkShipping { .. } => "mark_shipping",
            OrderCommand::MarkDelivered { .. } => "mark_delivered",
            OrderCommand::CancelStale { .. } => "cancel_stale",
            OrderCommand::DeleteOrder { .. } => "delete_order",
        }
    }
}
