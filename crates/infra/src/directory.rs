//! Identity directory adapters: the HTTP facade client and the fixture loader.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use certgate_auth::{
    DirectoryClient, DirectoryError, DirectoryQuery, DirectoryUser, FixtureIdentityResolver, LookupModes,
};

/// Request body of `POST {base}/users/search`.
#[derive(Debug, Clone, Serialize)]
struct SearchRequest<'a> {
    query: &'a DirectoryQuery,
}

/// Response body of `POST {base}/users/search`.
#[derive(Debug, Clone, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    users: Vec<DirectoryUser>,
}

/// [`DirectoryClient`] speaking JSON to the directory facade.
#[derive(Debug, Clone)]
pub struct HttpDirectoryClient {
    client: reqwest::Client,
    search_url: String,
}

impl HttpDirectoryClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, DirectoryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            search_url: format!("{}/users/search", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl DirectoryClient for HttpDirectoryClient {
    #[instrument(skip(self))]
    async fn find_users(&self, query: &DirectoryQuery) -> Result<Vec<DirectoryUser>, DirectoryError> {
        let response = self
            .client
            .post(&self.search_url)
            .json(&SearchRequest { query })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    warn!("directory request timed out");
                }
                DirectoryError::Unavailable(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DirectoryError::Unavailable(format!(
                "{} answered {status}",
                self.search_url
            )));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| DirectoryError::Unavailable(format!("undecodable directory response: {e}")))?;
        debug!(count = body.users.len(), "directory search completed");
        Ok(body.users)
    }
}

#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("cannot read directory fixture {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse directory fixture {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Load a [`FixtureIdentityResolver`] from a JSON file of directory users.
pub fn load_fixture_resolver(path: &Path, modes: LookupModes) -> Result<FixtureIdentityResolver, FixtureError> {
    let path_str = path.display().to_string();
    let json = std::fs::read_to_string(path).map_err(|source| FixtureError::Read {
        path: path_str.clone(),
        source,
    })?;
    let resolver = FixtureIdentityResolver::from_json(&json, modes)
        .map_err(|source| FixtureError::Parse { path: path_str.clone(), source })?;
    info!(path = %path_str, users = resolver.len(), "loaded directory fixture");
    Ok(resolver)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};
    use certgate_auth::{DirectoryIdentityResolver, IdentityResolver, Role};
    use certgate_core::{ExternalUserId, IdpSource};
    use std::sync::Arc;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn search(Json(body): Json<serde_json::Value>) -> Json<serde_json::Value> {
        let users = if body["query"] == serde_json::json!({"by": "external_id", "value": "doc-1"}) {
            serde_json::json!([{
                "extId": "doc-1",
                "profiles": [
                    {"state": "ACTIVE", "defaultProfile": true, "roles": ["E.Creator"]},
                    {"state": "ACTIVE", "defaultProfile": false, "roles": ["E.Admin"]}
                ]
            }])
        } else {
            serde_json::json!([])
        };
        Json(serde_json::json!({ "users": users }))
    }

    #[tokio::test]
    async fn resolves_roles_through_the_facade() {
        let base = serve(Router::new().route("/users/search", post(search))).await;
        let client = HttpDirectoryClient::new(&base, Duration::from_secs(2)).unwrap();
        let resolver = DirectoryIdentityResolver::new(Arc::new(client), LookupModes::default());

        let roles = resolver
            .resolve(&ExternalUserId::new("doc-1"), &IdpSource::new("hin"))
            .await
            .unwrap();
        assert_eq!(roles, vec![Role::new("E.Creator")]);

        let err = resolver
            .resolve(&ExternalUserId::new("ghost"), &IdpSource::new("hin"))
            .await
            .unwrap_err();
        assert!(matches!(err, DirectoryError::InvalidUser(_)));
    }

    #[tokio::test]
    async fn unreachable_directory_is_unavailable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = HttpDirectoryClient::new(&format!("http://{addr}"), Duration::from_millis(500)).unwrap();
        let err = client
            .find_users(&DirectoryQuery::ExternalId("doc-1".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, DirectoryError::Unavailable(_)));
    }

    #[test]
    fn fixture_file_is_loaded() {
        let path = std::env::temp_dir().join(format!("certgate-directory-{}.json", std::process::id()));
        std::fs::write(
            &path,
            r#"[{"extId":"doc-1","profiles":[{"state":"ACTIVE","defaultProfile":true,"roles":["E.Creator"]}]}]"#,
        )
        .unwrap();

        let resolver = load_fixture_resolver(&path, LookupModes::default()).unwrap();
        assert_eq!(resolver.len(), 1);
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(
            load_fixture_resolver(&path, LookupModes::default()),
            Err(FixtureError::Read { .. })
        ));
    }
}
