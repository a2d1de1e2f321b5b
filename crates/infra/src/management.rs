//! HTTP client for the management service that owns authorization data.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use certgate_auth::{AuthorizationDataSource, CapabilityDefinition, ManagementError, RoleMappingRow};

/// Fetches capability definitions for one service and the role mapping table.
#[derive(Debug, Clone)]
pub struct HttpCapabilitySource {
    client: reqwest::Client,
    base_url: String,
    service: String,
}

impl HttpCapabilitySource {
    pub fn new(base_url: &str, service: &str, timeout: Duration) -> Result<Self, ManagementError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ManagementError::Transport {
                url: base_url.to_string(),
                message: e.to_string(),
            })?;
        Ok(Self::with_client(client, base_url, service))
    }

    pub fn with_client(client: reqwest::Client, base_url: &str, service: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            service: service.to_string(),
        }
    }

    #[instrument(skip(self))]
    async fn get_json<T: DeserializeOwned>(&self, url: String) -> Result<T, ManagementError> {
        let response = self.client.get(&url).send().await.map_err(|e| {
            warn!(error = %e, "management service request failed");
            ManagementError::Transport {
                url: url.clone(),
                message: e.to_string(),
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(%status, "management service returned an error status");
            return Err(ManagementError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let body = response.json::<T>().await.map_err(|e| ManagementError::Decode {
            url: url.clone(),
            message: e.to_string(),
        })?;
        debug!("management service response decoded");
        Ok(body)
    }
}

#[async_trait]
impl AuthorizationDataSource for HttpCapabilitySource {
    async fn capability_definitions(&self) -> Result<Vec<CapabilityDefinition>, ManagementError> {
        self.get_json(format!("{}/functions/{}", self.base_url, self.service))
            .await
    }

    async fn role_mappings(&self) -> Result<Vec<RoleMappingRow>, ManagementError> {
        self.get_json(format!("{}/roles", self.base_url)).await
    }
}
