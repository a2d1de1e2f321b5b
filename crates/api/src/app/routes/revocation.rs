use std::sync::Arc;

use axum::{body::Bytes, extract::Extension, response::Response};
use tracing::info;

use certgate_auth::CapabilityId;

use crate::app::dto::SignedPayload;
use crate::app::errors::gateway_error_to_response;
use crate::app::routes::forward_response;
use crate::app::services::AppServices;
use crate::authz::authorize_payload;
use crate::context::CallerCertificate;

pub const REVOKE_CAPABILITY: &str = "revoke-certificate";

pub async fn revoke(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerCertificate>,
    body: Bytes,
) -> Result<Response, Response> {
    let payload = SignedPayload::parse(&body).map_err(gateway_error_to_response)?;

    let capability = CapabilityId::new(REVOKE_CAPABILITY);
    let context = authorize_payload(&services.orchestrator, &caller, &payload, &capability)
        .await
        .map_err(gateway_error_to_response)?;

    info!(user = %context.external_user_id, "revocation request authorized");
    let response = services
        .backend
        .forward("revocation", &context, payload.data)
        .await
        .map_err(|e| gateway_error_to_response(e.into()))?;

    Ok(forward_response(response))
}
