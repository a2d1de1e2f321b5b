//! Revoked bearer tokens.
//!
//! The registry answers from an in-process snapshot of every revocation
//! entry. The snapshot is dropped on a schedule and reloaded in full by the
//! next lookup, so a revocation written to the store becomes visible after at
//! most one refresh interval.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

use certgate_core::{ErrorCode, ExternalUserId, GatewayError, IdpSource, TokenId};

use crate::cache::{Invalidate, SnapshotCache};

/// A revoked token, as recorded in the backing store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationEntry {
    pub token_id: TokenId,
    pub external_user_id: ExternalUserId,
    pub idp_source: IdpSource,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RevocationStoreError {
    #[error("revocation store unavailable: {0}")]
    Unavailable(String),
}

impl From<RevocationStoreError> for GatewayError {
    fn from(err: RevocationStoreError) -> Self {
        GatewayError::new(ErrorCode::RevocationDataUnavailable, err.to_string())
    }
}

/// System of record for revoked tokens.
#[async_trait]
pub trait RevocationStore: Send + Sync {
    async fn load_all(&self) -> Result<Vec<RevocationEntry>, RevocationStoreError>;

    async fn insert(&self, entry: RevocationEntry) -> Result<(), RevocationStoreError>;
}

#[derive(Debug, Default)]
struct RevokedTokens {
    entries: HashMap<TokenId, RevocationEntry>,
}

/// Cached view over a [`RevocationStore`].
pub struct RevocationRegistry {
    store: Arc<dyn RevocationStore>,
    cache: SnapshotCache<RevokedTokens>,
}

impl RevocationRegistry {
    pub fn new(store: Arc<dyn RevocationStore>) -> Self {
        Self {
            store,
            cache: SnapshotCache::new("revoked-tokens"),
        }
    }

    #[instrument(skip_all, fields(token_id = %token_id))]
    pub async fn is_revoked(&self, token_id: &TokenId) -> Result<bool, RevocationStoreError> {
        let store = Arc::clone(&self.store);
        let snapshot = self
            .cache
            .get_or_load(|| async move {
                let entries = store.load_all().await?;
                debug!(count = entries.len(), "loaded revocation entries");
                Ok::<_, RevocationStoreError>(RevokedTokens {
                    entries: entries.into_iter().map(|e| (e.token_id.clone(), e)).collect(),
                })
            })
            .await?;

        Ok(snapshot.entries.contains_key(token_id))
    }
}

impl Invalidate for RevocationRegistry {
    fn invalidate(&self) {
        self.cache.invalidate();
    }
}

/// In-memory revocation store.
///
/// Intended for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryRevocationStore {
    entries: RwLock<Vec<RevocationEntry>>,
}

impl InMemoryRevocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(entries: impl IntoIterator<Item = RevocationEntry>) -> Self {
        Self {
            entries: RwLock::new(entries.into_iter().collect()),
        }
    }
}

#[async_trait]
impl RevocationStore for InMemoryRevocationStore {
    async fn load_all(&self) -> Result<Vec<RevocationEntry>, RevocationStoreError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| RevocationStoreError::Unavailable("lock poisoned".to_string()))?;
        Ok(entries.clone())
    }

    async fn insert(&self, entry: RevocationEntry) -> Result<(), RevocationStoreError> {
        self.entries
            .write()
            .map_err(|_| RevocationStoreError::Unavailable("lock poisoned".to_string()))?
            .push(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(token_id: &str) -> RevocationEntry {
        RevocationEntry {
            token_id: TokenId::new(token_id),
            external_user_id: ExternalUserId::new("user-1"),
            idp_source: IdpSource::new("hin"),
            created_at: Utc::now(),
        }
    }

    struct FailingStore;

    #[async_trait]
    impl RevocationStore for FailingStore {
        async fn load_all(&self) -> Result<Vec<RevocationEntry>, RevocationStoreError> {
            Err(RevocationStoreError::Unavailable("connection refused".to_string()))
        }

        async fn insert(&self, _entry: RevocationEntry) -> Result<(), RevocationStoreError> {
            Err(RevocationStoreError::Unavailable("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn reports_revoked_tokens() {
        let store = Arc::new(InMemoryRevocationStore::with_entries([entry("t-1")]));
        let registry = RevocationRegistry::new(store);

        assert!(registry.is_revoked(&TokenId::new("t-1")).await.unwrap());
        assert!(!registry.is_revoked(&TokenId::new("t-2")).await.unwrap());
    }

    #[tokio::test]
    async fn new_revocations_are_visible_only_after_invalidation() {
        let store = Arc::new(InMemoryRevocationStore::new());
        let registry = RevocationRegistry::new(store.clone());
        let token = TokenId::new("late");

        assert!(!registry.is_revoked(&token).await.unwrap());

        store.insert(entry("late")).await.unwrap();
        assert!(
            !registry.is_revoked(&token).await.unwrap(),
            "snapshot must stay stale until the next refresh"
        );

        registry.invalidate();
        assert!(registry.is_revoked(&token).await.unwrap());
    }

    #[tokio::test]
    async fn store_failure_propagates() {
        let registry = RevocationRegistry::new(Arc::new(FailingStore));
        let err = registry.is_revoked(&TokenId::new("x")).await.unwrap_err();
        assert!(matches!(err, RevocationStoreError::Unavailable(_)));
        assert_eq!(
            GatewayError::from(err).code(),
            ErrorCode::RevocationDataUnavailable
        );
    }
}
