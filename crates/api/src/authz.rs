//! Request-side authentication and authorization guard.
//!
//! Handlers call [`authorize_payload`] before doing any work; it runs the
//! whole caller pipeline over an already integrity-checked payload.

use certgate_auth::{AuthorizationOrchestrator, CallerContext, CapabilityId};
use certgate_core::GatewayResult;

use crate::app::dto::SignedPayload;
use crate::context::CallerCertificate;

/// Resolve the caller of `payload` and require `capability`.
pub async fn authorize_payload(
    orchestrator: &AuthorizationOrchestrator,
    caller: &CallerCertificate,
    payload: &SignedPayload,
    capability: &CapabilityId,
) -> GatewayResult<CallerContext> {
    let context = authenticate_payload(orchestrator, caller, payload).await?;
    orchestrator.require(&context, capability).await?;
    Ok(context)
}

/// Resolve the caller of `payload` without any capability check.
pub async fn authenticate_payload(
    orchestrator: &AuthorizationOrchestrator,
    caller: &CallerCertificate,
    payload: &SignedPayload,
) -> GatewayResult<CallerContext> {
    orchestrator
        .authenticate(
            caller.identity(),
            payload.auth.identity.as_ref(),
            payload.auth.token.as_deref(),
        )
        .await
}
