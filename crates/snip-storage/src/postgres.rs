use async_trait::async_trait;
use snip_core::store::ensure_complete;
use snip_core::{
    OwnerId, PartitionIndex, RecordStore, Result, SaveOutcome, Statistics, StoreError,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool, Row};
use std::collections::HashMap;
use tracing::{debug, trace};

/// Schema for the `urls` table, applied by [`PgStore::bootstrap`].
pub const SCHEMA: &str = include_str!("../ddl/postgres/urls.sql");

/// Postgres implementation of the store contract.
///
/// Soft delete is implemented with `deleted_at`. A partial unique index on
/// `original_url` over rows with `deleted_at IS NULL` enforces active-target
/// uniqueness; saves are upserts against that index, and a non-null
/// `updated_at` on the returned row means the target already existed.
/// Concurrency control is left to the database.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Creates a store from an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates a store by opening a new connection pool.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(map_sqlx_error)?;
        Ok(Self::new(pool))
    }

    /// Creates the table and indexes if they are missing.
    pub async fn bootstrap(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        debug!("postgres schema is ready");
        Ok(())
    }

    async fn save_one(&self, target: &str, owner: Option<OwnerId>) -> Result<SaveOutcome> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx_error)?;
        upsert(&mut *conn, target, owner).await
    }

    async fn save_many(&self, targets: &[String], owner: Option<OwnerId>) -> Result<Vec<String>> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let mut ids = Vec::with_capacity(targets.len());
        for target in targets {
            let outcome = upsert(&mut *tx, target, owner).await?;
            ids.push(outcome.id);
        }
        let ids = ensure_complete(targets.len(), ids)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(ids)
    }
}

async fn upsert(
    conn: &mut PgConnection,
    target: &str,
    owner: Option<OwnerId>,
) -> Result<SaveOutcome> {
    let row = sqlx::query(
        r#"
        INSERT INTO urls (original_url, user_id)
        VALUES ($1, $2)
        ON CONFLICT (original_url) WHERE deleted_at IS NULL
        DO UPDATE SET updated_at = NOW()
        RETURNING id, updated_at IS NOT NULL AS conflict
        "#,
    )
    .bind(target)
    .bind(owner)
    .fetch_one(conn)
    .await
    .map_err(map_sqlx_error)?;

    let id: i64 = row.try_get("id").map_err(map_sqlx_error)?;
    let conflict: bool = row.try_get("conflict").map_err(map_sqlx_error)?;
    trace!(id, conflict, "upserted url");

    Ok(SaveOutcome {
        id: id.to_string(),
        conflict,
    })
}

/// Parses a decimal row id. Only the canonical spelling is accepted.
fn parse_id(raw: &str) -> Option<i64> {
    raw.parse::<i64>()
        .ok()
        .filter(|id| *id >= 0 && id.to_string() == raw)
}

fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    let message = err.to_string();

    match err {
        sqlx::Error::PoolTimedOut => StoreError::Timeout(message),
        sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => StoreError::Unavailable(message),
        sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::RowNotFound => StoreError::InvalidData(message),
        _ => StoreError::Query(message),
    }
}

fn into_target(row: Option<sqlx::postgres::PgRow>) -> Result<String> {
    let Some(row) = row else {
        return Err(StoreError::NotFound);
    };

    let deleted: bool = row.try_get("deleted").map_err(map_sqlx_error)?;
    if deleted {
        return Err(StoreError::Deleted);
    }
    row.try_get("original_url").map_err(map_sqlx_error)
}

#[async_trait]
impl RecordStore for PgStore {
    async fn save(&self, target: &str) -> Result<SaveOutcome> {
        self.save_one(target, None).await
    }

    async fn save_batch(&self, targets: &[String]) -> Result<Vec<String>> {
        self.save_many(targets, None).await
    }

    async fn load(&self, id: &str) -> Result<String> {
        let Some(id) = parse_id(id) else {
            return Err(StoreError::NotFound);
        };

        let row = sqlx::query(
            r#"
            SELECT original_url, deleted_at IS NOT NULL AS deleted
            FROM urls
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        into_target(row)
    }

    async fn ping(&self) -> Result<()> {
        if self.pool.is_closed() {
            return Err(StoreError::Unavailable("connection pool is closed".to_string()));
        }
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        debug!("closed postgres pool");
        Ok(())
    }
}

#[async_trait]
impl PartitionIndex for PgStore {
    async fn save_for_user(&self, owner: OwnerId, target: &str) -> Result<SaveOutcome> {
        self.save_one(target, Some(owner)).await
    }

    async fn save_batch_for_user(
        &self,
        owner: OwnerId,
        targets: &[String],
    ) -> Result<Vec<String>> {
        self.save_many(targets, Some(owner)).await
    }

    async fn load_for_user(&self, owner: OwnerId, id: &str) -> Result<String> {
        let Some(id) = parse_id(id) else {
            return Err(StoreError::NotFound);
        };

        let row = sqlx::query(
            r#"
            SELECT original_url, deleted_at IS NOT NULL AS deleted
            FROM urls
            WHERE id = $1
              AND user_id = $2
            "#,
        )
        .bind(id)
        .bind(owner)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        into_target(row)
    }

    async fn list_for_user(&self, owner: OwnerId) -> Result<HashMap<String, String>> {
        let rows = sqlx::query(
            r#"
            SELECT id, original_url, deleted_at IS NOT NULL AS deleted
            FROM urls
            WHERE user_id = $1
            "#,
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if rows.is_empty() {
            return Err(StoreError::NotFound);
        }

        let mut urls = HashMap::with_capacity(rows.len());
        for row in rows {
            let deleted: bool = row.try_get("deleted").map_err(map_sqlx_error)?;
            if deleted {
                continue;
            }
            let id: i64 = row.try_get("id").map_err(map_sqlx_error)?;
            let original_url: String = row.try_get("original_url").map_err(map_sqlx_error)?;
            urls.insert(id.to_string(), original_url);
        }
        Ok(urls)
    }

    async fn delete_for_user(&self, owner: OwnerId, ids: &[String]) -> Result<()> {
        let ids: Vec<i64> = ids.iter().filter_map(|raw| parse_id(raw)).collect();
        if ids.is_empty() {
            return Ok(());
        }

        let result = sqlx::query(
            r#"
            UPDATE urls
            SET deleted_at = NOW()
            WHERE user_id = $1
              AND id = ANY($2)
              AND deleted_at IS NULL
            "#,
        )
        .bind(owner)
        .bind(&ids)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        debug!(%owner, requested = ids.len(), deleted = result.rows_affected(), "tombstoned user urls");
        Ok(())
    }
}

#[async_trait]
impl Statistics for PgStore {
    async fn count_users(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(DISTINCT user_id) FROM urls")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(count.max(0) as u64)
    }

    async fn count_urls(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM urls")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(count.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_id_accepts_canonical_decimal() {
        assert_eq!(parse_id("0"), Some(0));
        assert_eq!(parse_id("42"), Some(42));
    }

    #[test]
    fn parse_id_rejects_other_spellings() {
        assert_eq!(parse_id(""), None);
        assert_eq!(parse_id("042"), None);
        assert_eq!(parse_id("+42"), None);
        assert_eq!(parse_id("-1"), None);
        assert_eq!(parse_id("ff"), None);
    }

    #[test]
    fn pool_errors_map_to_availability() {
        assert!(matches!(
            map_sqlx_error(sqlx::Error::PoolTimedOut),
            StoreError::Timeout(_)
        ));
        assert!(matches!(
            map_sqlx_error(sqlx::Error::PoolClosed),
            StoreError::Unavailable(_)
        ));
        assert!(matches!(
            map_sqlx_error(sqlx::Error::RowNotFound),
            StoreError::InvalidData(_)
        ));
    }

    #[test]
    fn schema_declares_partial_unique_index() {
        assert!(SCHEMA.contains("WHERE deleted_at IS NULL"));
        assert!(SCHEMA.contains("user_id"));
    }
}
