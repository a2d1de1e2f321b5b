use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::app::dto::{CallerResponse, SignedPayload};
use crate::app::errors::gateway_error_to_response;
use crate::app::services::AppServices;
use crate::authz::authenticate_payload;
use crate::context::CallerCertificate;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// Echo the caller context the pipeline resolves for this payload.
pub async fn caller(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerCertificate>,
    body: Bytes,
) -> Result<Response, Response> {
    let payload = SignedPayload::parse(&body).map_err(gateway_error_to_response)?;
    let context = authenticate_payload(&services.orchestrator, &caller, &payload)
        .await
        .map_err(gateway_error_to_response)?;

    Ok(Json(CallerResponse {
        caller: context,
        trusted: services.orchestrator.is_trusted(caller.identity()),
    })
    .into_response())
}
