//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: builds the auth pipeline and cache refresh tasks from config
//! - `routes/`: HTTP routes + handlers
//! - `backend.rs`: the downstream issuance service requests are forwarded to
//! - `dto.rs`: request/response DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use crate::middleware;

pub mod backend;
pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(services: Arc<services::AppServices>) -> Router {
    // Signed routes: body integrity is checked before any handler runs.
    let signed = routes::router()
        .layer(Extension(Arc::clone(&services)))
        .layer(axum::middleware::from_fn_with_state(
            services,
            middleware::integrity_middleware,
        ));

    Router::new()
        .route("/health", get(routes::system::health))
        .nest("/api/v1", signed)
        .layer(ServiceBuilder::new().layer(axum::middleware::from_fn(middleware::request_span_middleware)))
}
