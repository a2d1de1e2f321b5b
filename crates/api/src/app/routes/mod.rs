use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};

use crate::app::backend::BackendResponse;

pub mod certificates;
pub mod revocation;
pub mod system;

/// Router for all signed endpoints; mounted under `/api/v1`.
pub fn router() -> Router {
    Router::new()
        .route("/caller", post(system::caller))
        .route("/certificates/:kind", post(certificates::create))
        .route("/revocation", post(revocation::revoke))
}

/// Relay a backend answer to the caller.
pub(crate) fn forward_response(response: BackendResponse) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
    (status, Json(response.body)).into_response()
}
