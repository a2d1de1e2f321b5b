use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;
use tracing::warn;

use certgate_core::{ErrorCode, ErrorKind, GatewayError};

/// Transport status for a rejection class.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Integrity | ErrorKind::Credential | ErrorKind::Identity | ErrorKind::Authorization => {
            StatusCode::FORBIDDEN
        }
        ErrorKind::Payload => StatusCode::BAD_REQUEST,
        ErrorKind::Upstream => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Configuration => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Map a pipeline rejection to its caller-facing response.
///
/// The detail is logged here and never leaves the process.
pub fn gateway_error_to_response(err: GatewayError) -> axum::response::Response {
    let code = err.code();
    warn!(error_code = code.code(), kind = ?err.kind(), detail = err.detail(), "request rejected");
    json_error(status_for(err.kind()), code)
}

pub fn json_error(status: StatusCode, code: ErrorCode) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "errorCode": code.code(),
            "errorMessage": code.message(),
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_error_class() {
        let status = |code| gateway_error_to_response(GatewayError::new(code, "detail")).status();
        assert_eq!(status(ErrorCode::InvalidSignature), StatusCode::FORBIDDEN);
        assert_eq!(status(ErrorCode::InvalidBearerLength), StatusCode::FORBIDDEN);
        assert_eq!(status(ErrorCode::InvalidUser), StatusCode::FORBIDDEN);
        assert_eq!(status(ErrorCode::Forbidden), StatusCode::FORBIDDEN);
        assert_eq!(status(ErrorCode::MalformedPayload), StatusCode::BAD_REQUEST);
        assert_eq!(status(ErrorCode::DirectoryUnavailable), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status(ErrorCode::AuthorizationConfig), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
