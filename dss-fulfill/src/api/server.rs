//! HTTP server setup and routing

use crate::client::FulfillClient;
use crate::credentials::Credentials;
use crate::error::{Error, Result};
use crate::session::SessionHandle;
use axum::{
    routing::{get, post},
    Router,
};
use dss_common::events::EventBus;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared application context passed to all handlers
#[derive(Clone)]
pub struct AppContext {
    pub session: SessionHandle,
    pub client: Arc<FulfillClient<Credentials>>,
    pub event_bus: EventBus,
}

/// Build the router with all routes attached
pub fn build_router(ctx: AppContext) -> Router {
    Router::new()
        .route("/health", get(super::handlers::health))
        .route("/status", get(super::handlers::get_status))
        .route("/reload", post(super::handlers::reload))
        // Bucket views
        .route("/buckets", get(super::handlers::get_buckets))
        .route("/buckets/:name", get(super::handlers::get_bucket))
        // Records
        .route("/records/:doc_type/:id", get(super::handlers::get_record))
        .route("/records/:doc_type/:id/queue", post(super::handlers::queue_record))
        .route("/records/:doc_type/:id/dequeue", post(super::handlers::dequeue_record))
        // Reference data
        .route("/manufacturers", get(super::handlers::get_manufacturers))
        .route("/manufacturers/search", get(super::handlers::search_manufacturers))
        .route("/clients", get(super::handlers::get_clients))
        .route("/datasheets/search", get(super::handlers::search_datasheets))
        .route("/active-records", get(super::handlers::get_active_records))
        // SSE event stream
        .route("/events", get(super::sse::event_stream))
        .with_state(ctx)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Serve the API on `port` until `shutdown` resolves
pub async fn run<F>(port: u16, ctx: AppContext, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(ctx);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::Internal(format!("Server error: {}", e)))?;

    Ok(())
}
