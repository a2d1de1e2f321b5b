//! Downstream issuance services requests are forwarded to once authorized.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use certgate_auth::CallerContext;
use certgate_core::{ErrorCode, GatewayError};

/// Header carrying the authenticated caller's external id downstream.
pub const CALLER_ID_HEADER: &str = "X-Caller-Ext-Id";

/// Header carrying the authenticated caller's identity provider downstream.
pub const CALLER_IDP_HEADER: &str = "X-Caller-Idp-Source";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("no issuance backend configured")]
    NotConfigured,

    #[error("issuance backend request failed: {0}")]
    Transport(String),
}

impl From<BackendError> for GatewayError {
    fn from(err: BackendError) -> Self {
        GatewayError::new(ErrorCode::BackendUnavailable, err.to_string())
    }
}

/// Backend answer, passed through to the caller unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendResponse {
    pub status: u16,
    pub body: Value,
}

#[async_trait]
pub trait IssuanceBackend: Send + Sync {
    /// POST `data` to `path` on behalf of `caller`.
    async fn forward(
        &self,
        path: &str,
        caller: &CallerContext,
        data: Map<String, Value>,
    ) -> Result<BackendResponse, BackendError>;
}

/// Forwards JSON requests over HTTP.
#[derive(Debug, Clone)]
pub struct HttpIssuanceBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpIssuanceBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl IssuanceBackend for HttpIssuanceBackend {
    #[instrument(skip(self, caller, data), fields(user = %caller.external_user_id))]
    async fn forward(
        &self,
        path: &str,
        caller: &CallerContext,
        data: Map<String, Value>,
    ) -> Result<BackendResponse, BackendError> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let response = self
            .client
            .post(&url)
            .header(CALLER_ID_HEADER, caller.external_user_id.as_str())
            .header(CALLER_IDP_HEADER, caller.idp_source.as_str())
            .json(&data)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, %url, "issuance backend unreachable");
                BackendError::Transport(e.to_string())
            })?;

        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        debug!(status, "issuance backend answered");
        Ok(BackendResponse { status, body })
    }
}

/// Used when no backend URL is configured; every forward fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredBackend;

#[async_trait]
impl IssuanceBackend for UnconfiguredBackend {
    async fn forward(
        &self,
        _path: &str,
        _caller: &CallerContext,
        _data: Map<String, Value>,
    ) -> Result<BackendResponse, BackendError> {
        Err(BackendError::NotConfigured)
    }
}
