/// Postgres Identity Provider
///
/// Reads the `users`, `user_roles`, `user_claims`, and `role_claims`
/// tables described in `migrations/`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{verify_password, Account, IdentityProvider, LockoutPolicy};
use crate::auth::{Claim, Clock};
use crate::error::IdentityError;

pub struct PgIdentityProvider {
    pool: PgPool,
    policy: LockoutPolicy,
    clock: Arc<dyn Clock>,
}

impl PgIdentityProvider {
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool,
            policy: LockoutPolicy::default(),
            clock,
        }
    }

    pub fn with_policy(mut self, policy: LockoutPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl IdentityProvider for PgIdentityProvider {
    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<Account>, IdentityError> {
        let row = sqlx::query_as::<_, (Uuid, String)>(
            "SELECT id, email FROM users WHERE lower(email) = lower($1)",
        )
        .bind(identifier.trim())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, email)| Account { id, email }))
    }

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<Account>, IdentityError> {
        let row = sqlx::query_as::<_, (Uuid, String)>("SELECT id, email FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(id, email)| Account { id, email }))
    }

    async fn check_secret(&self, account: &Account, secret: &str) -> Result<bool, IdentityError> {
        let password_hash =
            sqlx::query_scalar::<_, String>("SELECT password_hash FROM users WHERE id = $1")
                .bind(account.id)
                .fetch_optional(&self.pool)
                .await?;

        match password_hash {
            Some(password_hash) => verify_password(secret, &password_hash).await,
            None => Ok(false),
        }
    }

    async fn is_confirmed(&self, account: &Account) -> Result<bool, IdentityError> {
        let confirmed =
            sqlx::query_scalar::<_, bool>("SELECT email_confirmed FROM users WHERE id = $1")
                .bind(account.id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(confirmed.unwrap_or(false))
    }

    async fn is_locked_out(&self, account: &Account) -> Result<bool, IdentityError> {
        let lockout_end = sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
            "SELECT lockout_end FROM users WHERE id = $1",
        )
        .bind(account.id)
        .fetch_optional(&self.pool)
        .await?
        .flatten();

        Ok(lockout_end.map(|end| end > self.clock.now()).unwrap_or(false))
    }

    async fn record_failed_attempt(&self, account: &Account) -> Result<(), IdentityError> {
        let now = self.clock.now();
        // Reaching the threshold locks the account and restarts the count.
        sqlx::query(
            r#"
            UPDATE users
            SET failed_login_attempts = CASE
                    WHEN failed_login_attempts + 1 >= $2 THEN 0
                    ELSE failed_login_attempts + 1
                END,
                lockout_end = CASE
                    WHEN failed_login_attempts + 1 >= $2 THEN $3
                    ELSE lockout_end
                END
            WHERE id = $1
            "#,
        )
        .bind(account.id)
        .bind(self.policy.max_failed_attempts as i32)
        .bind(self.policy.lockout_end(now))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn reset_failed_attempts(&self, account: &Account) -> Result<(), IdentityError> {
        sqlx::query("UPDATE users SET failed_login_attempts = 0 WHERE id = $1")
            .bind(account.id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn roles(&self, account: &Account) -> Result<Vec<String>, IdentityError> {
        let roles = sqlx::query_scalar::<_, String>(
            "SELECT role_name FROM user_roles WHERE user_id = $1 ORDER BY role_name",
        )
        .bind(account.id)
        .fetch_all(&self.pool)
        .await?;

        Ok(roles)
    }

    async fn claims(&self, account: &Account) -> Result<Vec<Claim>, IdentityError> {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT claim_type, claim_value FROM user_claims WHERE user_id = $1 ORDER BY id",
        )
        .bind(account.id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(kind, value)| Claim { kind, value }).collect())
    }

    async fn role_claims(&self, role: &str) -> Result<Vec<Claim>, IdentityError> {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT claim_type, claim_value FROM role_claims WHERE role_name = $1 ORDER BY id",
        )
        .bind(role)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(kind, value)| Claim { kind, value }).collect())
    }
}
