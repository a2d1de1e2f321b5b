//! Postgres-backed revocation store.
//!
//! ## Error Mapping
//!
//! Every SQLx error becomes `RevocationStoreError::Unavailable`; callers fail
//! closed on any store failure, so finer distinctions only matter for logs.
//!
//! | SQLx Error | RevocationStoreError | Scenario |
//! |------------|----------------------|----------|
//! | Database | `Unavailable` | Schema or constraint problems |
//! | PoolClosed | `Unavailable` | Connection pool was closed |
//! | Other | `Unavailable` | Network errors, connection failures, etc. |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{Span, instrument};

use certgate_auth::{RevocationEntry, RevocationStore, RevocationStoreError};
use certgate_core::{ExternalUserId, IdpSource, TokenId};

/// Table layout expected by [`PostgresRevocationStore`].
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS revoked_token (
    token_id         TEXT PRIMARY KEY,
    external_user_id TEXT NOT NULL,
    idp_source       TEXT NOT NULL,
    created_at       TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

#[derive(Debug, Clone)]
pub struct PostgresRevocationStore {
    pool: Arc<PgPool>,
}

impl PostgresRevocationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    pub async fn connect(database_url: &str) -> Result<Self, RevocationStoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create the `revoked_token` table if it does not exist.
    pub async fn ensure_schema(&self) -> Result<(), RevocationStoreError> {
        sqlx::query(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }
}

#[async_trait]
impl RevocationStore for PostgresRevocationStore {
    #[instrument(skip(self), fields(entry_count = tracing::field::Empty), err)]
    async fn load_all(&self) -> Result<Vec<RevocationEntry>, RevocationStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT token_id, external_user_id, idp_source, created_at
            FROM revoked_token
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_all", e))?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let token_id: String = row.try_get("token_id").map_err(|e| map_sqlx_error("load_all", e))?;
            let external_user_id: String = row
                .try_get("external_user_id")
                .map_err(|e| map_sqlx_error("load_all", e))?;
            let idp_source: String = row.try_get("idp_source").map_err(|e| map_sqlx_error("load_all", e))?;
            let created_at: DateTime<Utc> = row.try_get("created_at").map_err(|e| map_sqlx_error("load_all", e))?;

            entries.push(RevocationEntry {
                token_id: TokenId::new(token_id),
                external_user_id: ExternalUserId::new(external_user_id),
                idp_source: IdpSource::new(idp_source),
                created_at,
            });
        }

        Span::current().record("entry_count", entries.len());
        Ok(entries)
    }

    #[instrument(skip(self, entry), fields(token_id = %entry.token_id), err)]
    async fn insert(&self, entry: RevocationEntry) -> Result<(), RevocationStoreError> {
        sqlx::query(
            r#"
            INSERT INTO revoked_token (token_id, external_user_id, idp_source, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (token_id) DO NOTHING
            "#,
        )
        .bind(entry.token_id.as_str())
        .bind(entry.external_user_id.as_str())
        .bind(entry.idp_source.as_str())
        .bind(entry.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert", e))?;
        Ok(())
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> RevocationStoreError {
    match err {
        sqlx::Error::Database(db_err) => RevocationStoreError::Unavailable(format!(
            "database error in {operation} ({}): {}",
            db_err.code().as_deref().unwrap_or("unknown"),
            db_err.message()
        )),
        sqlx::Error::PoolClosed => {
            RevocationStoreError::Unavailable(format!("connection pool closed in {operation}"))
        }
        _ => RevocationStoreError::Unavailable(format!("sqlx error in {operation}: {err}")),
    }
}
