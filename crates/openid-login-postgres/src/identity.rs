//! Local user lookup against the `v_users` table.

use async_trait::async_trait;
use openid_login::identity::is_valid_identifier;
use openid_login::{IdentityStore, LocalUser, StorageError};
use sqlx_core::query_as::query_as;
use tracing::debug;

use crate::{PgPool, PostgresError, PostgresResult};

/// Table holding local accounts.
pub const USERS_TABLE: &str = "v_users";

/// Builds the lookup query for `column`.
///
/// The column name is interpolated, so it is re-checked here even though the
/// mapping was validated at startup. The value is always bound.
fn users_query(column: &str) -> PostgresResult<String> {
    if !is_valid_identifier(column) {
        return Err(PostgresError::InvalidColumn(column.to_string()));
    }
    Ok(format!(
        r#"
        SELECT u.user_uuid::text, COALESCE(u.username, ''), u.domain_uuid::text,
               COALESCE(d.domain_name, '')
        FROM {USERS_TABLE} AS u
        LEFT OUTER JOIN v_domains AS d ON d.domain_uuid = u.domain_uuid
        WHERE u.{column}::text = $1
          AND u.user_enabled = 'true'
        LIMIT 2
        "#
    ))
}

/// [`IdentityStore`] backed by PostgreSQL.
#[derive(Debug, Clone)]
pub struct PostgresIdentityStore {
    pool: PgPool,
}

impl PostgresIdentityStore {
    /// Creates a store over an existing pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn column_exists_inner(&self, column: &str) -> PostgresResult<bool> {
        let (exists,): (bool,) = query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.columns
                WHERE table_name = $1 AND column_name = $2
            )
            "#,
        )
        .bind(USERS_TABLE)
        .bind(column)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn find_enabled_users_inner(
        &self,
        column: &str,
        value: &str,
    ) -> PostgresResult<Vec<LocalUser>> {
        let sql = users_query(column)?;
        let rows: Vec<(String, String, String, String)> = query_as(&sql)
            .bind(value)
            .fetch_all(&self.pool)
            .await?;

        debug!(column, matches = rows.len(), "Looked up local users");
        Ok(rows
            .into_iter()
            .map(|(user_uuid, username, domain_uuid, domain_name)| LocalUser {
                user_uuid,
                username,
                domain_uuid,
                domain_name,
            })
            .collect())
    }
}

#[async_trait]
impl IdentityStore for PostgresIdentityStore {
    async fn column_exists(&self, column: &str) -> Result<bool, StorageError> {
        Ok(self.column_exists_inner(column).await?)
    }

    async fn find_enabled_users(
        &self,
        column: &str,
        value: &str,
    ) -> Result<Vec<LocalUser>, StorageError> {
        Ok(self.find_enabled_users_inner(column, value).await?)
    }
}
