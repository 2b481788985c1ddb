use std::sync::Arc;

use rust_decimal::Decimal;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use storefront::config::AppConfig;
use storefront::domain::order::{OrderCommand, OrderCommandHandler, OrderOutcome, DEFAULT_TAX_RATE};
use storefront::metrics::{self, Metrics};
use storefront::models::{Address, CartItem, Product, UserId};
use storefront::store::{MemoryStore, PostgresStore, Store};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    // Default to INFO level, can be overridden with RUST_LOG env var
    // Example: RUST_LOG=storefront=trace cargo run
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,storefront=debug"))
        )
        .init();

    let config = AppConfig::from_env();
    tracing::info!(
        metrics_port = config.metrics_port,
        checkout_max_attempts = config.checkout_max_attempts,
        stale_order_hours = config.stale_order_hours,
        "Starting storefront order core"
    );

    // === 1. Store ===
    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => {
            tracing::info!("Connecting to PostgreSQL...");
            let store = PostgresStore::connect(url, &config.postgres()).await?;
            store.migrate().await?;
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    // === 2. Prometheus metrics ===
    let metrics = Arc::new(Metrics::new()?);
    let metrics_registry = Arc::new(metrics.registry().clone());
    let metrics_port = config.metrics_port;
    let store_kind = store.kind();
    actix_web::rt::spawn(async move {
        if let Err(e) = metrics::start_metrics_server(metrics_registry, metrics_port, store_kind).await {
            tracing::error!(error = %e, "Metrics server error");
        }
    });

    let handler = OrderCommandHandler::new(store.clone(), config.retry(), metrics.clone())
        .with_stale_after(config.stale_after());

    // === 3. Demonstrate an order lifecycle ===
    run_demo(store.as_ref(), &handler).await?;

    tracing::info!("Demo complete, serving /metrics until Ctrl-C");
    tokio::signal::ctrl_c().await?;
    Ok(())
}

async fn run_demo(store: &dyn Store, handler: &OrderCommandHandler) -> anyhow::Result<()> {
    let user = UserId::new();
    let seller = Uuid::new_v4();
    let rice = Product::new(seller, "Rice 10kg", Decimal::new(12000, 0), 10);
    let kimchi = Product::new(seller, "Kimchi 1kg", Decimal::new(5000, 0), 4);
    let address = Address::new(user, "Demo Buyer", "12 Harbor Rd", "48058");

    let mut tx = store.begin().await?;
    tx.insert_product(&rice).await?;
    tx.insert_product(&kimchi).await?;
    tx.insert_address(&address).await?;
    tx.add_cart_item(&CartItem::new(user, rice.id, 2)).await?;
    tx.add_cart_item(&CartItem::new(user, kimchi.id, 1)).await?;
    tx.commit().await?;

    let outcome = handler
        .handle(
            user,
            OrderCommand::CartPurchase {
                address_id: address.id,
                payment_method: "card".to_string(),
            },
        )
        .await?;
    let OrderOutcome::Placed(details) = outcome else {
        anyhow::bail!("cart purchase did not place an order");
    };
    tracing::info!(
        order_id = %details.order.id,
        total_amount = %details.order.total_amount,
        "Order placed from cart"
    );

    if let Some(item) = details.items.iter().find(|item| item.product_id == rice.id) {
        handler
            .handle(
                user,
                OrderCommand::UpdateItemQuantity {
                    item_id: item.id,
                    quantity: 3,
                    change_reason: Some("buyer added one more".to_string()),
                },
            )
            .await?;
    }

    // out of stock on purpose
    if let Err(e) = handler
        .handle(
            user,
            OrderCommand::BuyNow {
                product_id: kimchi.id,
                quantity: 10,
                address_id: address.id,
                payment_method: "card".to_string(),
            },
        )
        .await
    {
        tracing::info!(reason = e.kind(), "Buy-now rejected as expected");
    }

    handler
        .handle(
            user,
            OrderCommand::UpdateStatus {
                order_id: details.order.id,
                status: "completed".to_string(),
            },
        )
        .await?;

    for command in [
        OrderCommand::MarkShipping { order_id: details.order.id },
        OrderCommand::MarkDelivered { order_id: details.order.id },
    ] {
        handler.handle(user, command).await?;
    }

    let final_state = handler.orders().get_order(user, details.order.id).await?;
    tracing::info!(
        order_id = %final_state.order.id,
        status = %final_state.order.status,
        items = final_state.item_count(),
        total_amount = %final_state.order.total_amount,
        total_with_tax = %final_state.total_with_tax(DEFAULT_TAX_RATE),
        "Final order state"
    );

    Ok(())
}
