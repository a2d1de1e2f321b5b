use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Extension, Path},
    response::Response,
};
use tracing::info;

use certgate_auth::CapabilityId;
use certgate_core::GatewayError;

use crate::app::dto::{CertificateKind, SignedPayload};
use crate::app::errors::gateway_error_to_response;
use crate::app::routes::forward_response;
use crate::app::services::AppServices;
use crate::authz::authorize_payload;
use crate::context::CallerCertificate;

pub async fn create(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerCertificate>,
    Path(kind): Path<String>,
    body: Bytes,
) -> Result<Response, Response> {
    let kind = CertificateKind::parse(&kind)
        .ok_or_else(|| GatewayError::malformed_payload(format!("unknown certificate kind '{kind}'")))
        .map_err(gateway_error_to_response)?;
    let payload = SignedPayload::parse(&body).map_err(gateway_error_to_response)?;

    let capability = CapabilityId::new(kind.capability());
    let context = authorize_payload(&services.orchestrator, &caller, &payload, &capability)
        .await
        .map_err(gateway_error_to_response)?;

    info!(user = %context.external_user_id, kind = kind.as_str(), "certificate request authorized");
    let response = services
        .backend
        .forward(&format!("certificates/{}", kind.as_str()), &context, payload.data)
        .await
        .map_err(|e| gateway_error_to_response(e.into()))?;

    Ok(forward_response(response))
}
