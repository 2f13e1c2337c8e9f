/// Postgres Refresh Token Store
///
/// Rotation runs in one transaction: the predecessor row is locked with
/// `SELECT ... FOR UPDATE`, revoked only while still unrevoked, and the
/// successor is inserted before commit. Dropping the future before commit
/// rolls the transaction back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{RefreshTokenStore, RotationOutcome};
use crate::auth::{RefreshTokenId, RefreshTokenRecord};
use crate::error::StoreError;

#[derive(sqlx::FromRow)]
struct RefreshTokenRow {
    id: Uuid,
    user_id: Uuid,
    secret_hash: String,
    salt: String,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    created_by_ip: Option<String>,
    user_agent: Option<String>,
    is_revoked: bool,
    revoked_at: Option<DateTime<Utc>>,
    revoked_by_ip: Option<String>,
    replaced_by: Option<Uuid>,
}

impl From<RefreshTokenRow> for RefreshTokenRecord {
    fn from(row: RefreshTokenRow) -> Self {
        Self {
            id: row.id.into(),
            user_id: row.user_id,
            secret_hash: row.secret_hash,
            salt: row.salt,
            expires_at: row.expires_at,
            created_at: row.created_at,
            created_by_ip: row.created_by_ip,
            user_agent: row.user_agent,
            is_revoked: row.is_revoked,
            revoked_at: row.revoked_at,
            revoked_by_ip: row.revoked_by_ip,
            replaced_by: row.replaced_by.map(RefreshTokenId::from),
        }
    }
}

const INSERT_SQL: &str = r#"
    INSERT INTO refresh_tokens (
        id, user_id, secret_hash, salt, expires_at, created_at,
        created_by_ip, user_agent, is_revoked, revoked_at, revoked_by_ip, replaced_by
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
"#;

pub struct PgRefreshTokenStore {
    pool: PgPool,
}

impl PgRefreshTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn insert_query(record: &RefreshTokenRecord) -> sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments> {
    sqlx::query(INSERT_SQL)
        .bind(record.id.as_uuid())
        .bind(record.user_id)
        .bind(&record.secret_hash)
        .bind(&record.salt)
        .bind(record.expires_at)
        .bind(record.created_at)
        .bind(&record.created_by_ip)
        .bind(&record.user_agent)
        .bind(record.is_revoked)
        .bind(record.revoked_at)
        .bind(&record.revoked_by_ip)
        .bind(record.replaced_by.map(|id| id.as_uuid()))
}

fn map_insert_error(err: sqlx::Error, id: RefreshTokenId) -> StoreError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505") => {
            StoreError::Duplicate(id)
        }
        _ => StoreError::from(err),
    }
}

#[async_trait]
impl RefreshTokenStore for PgRefreshTokenStore {
    async fn find_by_id(&self, id: RefreshTokenId) -> Result<Option<RefreshTokenRecord>, StoreError> {
        let row = sqlx::query_as::<_, RefreshTokenRow>("SELECT * FROM refresh_tokens WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(RefreshTokenRecord::from))
    }

    async fn insert(&self, record: &RefreshTokenRecord) -> Result<(), StoreError> {
        insert_query(record)
            .execute(&self.pool)
            .await
            .map_err(|e| map_insert_error(e, record.id))?;

        Ok(())
    }

    async fn rotate(
        &self,
        revoked: &RefreshTokenRecord,
        successor: &RefreshTokenRecord,
    ) -> Result<RotationOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        let is_revoked = sqlx::query_scalar::<_, bool>(
            "SELECT is_revoked FROM refresh_tokens WHERE id = $1 FOR UPDATE",
        )
        .bind(revoked.id.as_uuid())
        .fetch_optional(&mut tx)
        .await?
        .ok_or(StoreError::NotFound(revoked.id))?;

        if is_revoked {
            tx.rollback().await?;
            return Ok(RotationOutcome::AlreadyRevoked);
        }

        // Insert first so the replaced_by foreign key resolves.
        insert_query(successor)
            .execute(&mut tx)
            .await
            .map_err(|e| map_insert_error(e, successor.id))?;

        let updated = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET is_revoked = true, revoked_at = $2, revoked_by_ip = $3, replaced_by = $4
            WHERE id = $1 AND is_revoked = false
            "#,
        )
        .bind(revoked.id.as_uuid())
        .bind(revoked.revoked_at)
        .bind(&revoked.revoked_by_ip)
        .bind(revoked.replaced_by.map(|id| id.as_uuid()))
        .execute(&mut tx)
        .await?
        .rows_affected();

        if updated != 1 {
            tx.rollback().await?;
            return Err(StoreError::Conflict(format!(
                "refresh token {} changed during rotation",
                revoked.id
            )));
        }

        tx.commit().await?;
        Ok(RotationOutcome::Rotated)
    }
}
