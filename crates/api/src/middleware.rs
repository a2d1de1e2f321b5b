use std::sync::Arc;

use axum::{
    BoxError,
    body::{Body, Bytes},
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use tracing::{Instrument, debug, info_span};

use certgate_auth::{CLIENT_CERT_HEADER, SIGNATURE_HEADER, verify_detached};
use certgate_core::{ErrorCode, GatewayError};

use crate::app::errors::{gateway_error_to_response, json_error};
use crate::app::services::AppServices;
use crate::context::{CallerCertificate, RequestId};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Give every request an id and run it inside a span carrying that id.
pub async fn request_span_middleware(mut req: Request, next: Next) -> Response {
    let request_id = RequestId::new();
    req.extensions_mut().insert(request_id);

    let span = info_span!(
        "request",
        request_id = %request_id,
        method = %req.method(),
        path = %req.uri().path(),
    );

    let mut response = next.run(req).instrument(span).await;
    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Verify the detached body signature before anything reads the body.
///
/// The body is buffered (up to the configured limit), checked against the
/// `X-Client-Cert`/`X-Signature` headers and handed on unchanged together
/// with the caller's certificate CN.
pub async fn integrity_middleware(
    State(services): State<Arc<AppServices>>,
    req: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = req.into_parts();

    let bytes = match read_body(body, services.body_limit).await {
        Ok(bytes) => bytes,
        Err(err) => return err.into_response(),
    };

    if let Err(err) = verify_detached(
        &bytes,
        header(&parts.headers, CLIENT_CERT_HEADER),
        header(&parts.headers, SIGNATURE_HEADER),
    ) {
        return gateway_error_to_response(GatewayError::from(err));
    }

    let common_name = services
        .client_cn_header
        .as_deref()
        .and_then(|name| header(&parts.headers, name));
    let caller = CallerCertificate::new(common_name);
    parts.extensions.insert(caller);

    next.run(Request::from_parts(parts, Body::from(bytes))).await
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Why a request body could not be buffered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyReadError {
    TooLarge { limit: usize },
    Unreadable(String),
}

impl BodyReadError {
    fn classify(err: BoxError, limit: usize) -> Self {
        if err.is::<LengthLimitError>() {
            Self::TooLarge { limit }
        } else {
            Self::Unreadable(err.to_string())
        }
    }

    pub fn into_response(self) -> Response {
        match self {
            Self::TooLarge { limit } => {
                debug!(limit, "request body over limit");
                json_error(StatusCode::PAYLOAD_TOO_LARGE, ErrorCode::MalformedPayload)
            }
            Self::Unreadable(message) => {
                gateway_error_to_response(GatewayError::malformed_payload(format!("body could not be read: {message}")))
            }
        }
    }
}

/// Buffer `body`, failing once it exceeds `limit` bytes.
pub async fn read_body(body: Body, limit: usize) -> Result<Bytes, BodyReadError> {
    Limited::new(body, limit)
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .map_err(|err| BodyReadError::classify(err, limit))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn body_within_limit_is_buffered() {
        let bytes = read_body(Body::from("{\"a\":1}"), 64).await.unwrap();
        assert_eq!(&bytes[..], b"{\"a\":1}");
    }

    #[tokio::test]
    async fn only_oversized_bodies_are_too_large() {
        let err = read_body(Body::from(vec![b'x'; 32]), 16).await.unwrap_err();
        assert_eq!(err, BodyReadError::TooLarge { limit: 16 });
        assert_eq!(err.into_response().status(), StatusCode::PAYLOAD_TOO_LARGE);

        let err = BodyReadError::classify(BoxError::from("connection reset"), 16);
        assert_eq!(err, BodyReadError::Unreadable("connection reset".to_string()));
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
