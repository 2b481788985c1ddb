use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use prometheus::{Encoder, Registry, TextEncoder};
use serde::Serialize;
use std::sync::Arc;

/// Shared by both routes
struct ServerState {
    registry: Arc<Registry>,
    store_kind: &'static str,
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    service: &'static str,
    store: &'static str,
}

/// Serve /metrics and /health until the server stops.
/// `store_kind` is the backend label from `Store::kind`.
pub async fn start_metrics_server(
    registry: Arc<Registry>,
    port: u16,
    store_kind: &'static str,
) -> std::io::Result<()> {
    tracing::info!(
        port = port,
        store = store_kind,
        "Starting metrics server on http://0.0.0.0:{}/metrics",
        port
    );

    let state = web::Data::new(ServerState { registry, store_kind });
    HttpServer::new(move || routes(App::new().app_data(state.clone())))
        .bind(("0.0.0.0", port))?
        .run()
        .await
}

fn routes<T>(app: App<T>) -> App<T>
where
    T: actix_web::dev::ServiceFactory<
        actix_web::dev::ServiceRequest,
        Config = (),
        Error = actix_web::Error,
        InitError = (),
    >,
{
    app.route("/metrics", web::get().to(metrics_handler))
        .route("/health", web::get().to(health_handler))
}

async fn metrics_handler(state: web::Data<ServerState>) -> impl Responder {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&state.registry.gather(), &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return HttpResponse::InternalServerError().finish();
    }

    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(buffer)
}

async fn health_handler(state: web::Data<ServerState>) -> impl Responder {
    HttpResponse::Ok().json(Health {
        status: "healthy",
        service: "storefront",
        store: state.store_kind,
    })
}
