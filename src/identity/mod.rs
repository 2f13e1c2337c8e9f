/// Identity Provider
///
/// The session service does not own accounts, passwords, or lockout
/// policy. It reaches them through [`IdentityProvider`]; this module also
/// ships an in-memory and a Postgres implementation.

mod memory;
mod password;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::auth::Claim;
use crate::configuration::LockoutSettings;
use crate::error::IdentityError;

pub use memory::{AccountSeed, InMemoryIdentityProvider};
pub use password::{hash_password, verify_password};
pub use postgres::PgIdentityProvider;

/// The account a login identifier resolves to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
}

/// Lockout after repeated failed password checks
#[derive(Debug, Clone, Copy)]
pub struct LockoutPolicy {
    pub max_failed_attempts: u32,
    pub lockout_duration: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self::from(&LockoutSettings::default())
    }
}

impl LockoutPolicy {
    /// End of a lockout starting at `now`
    pub fn lockout_end(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.lockout_duration)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl From<&LockoutSettings> for LockoutPolicy {
    fn from(settings: &LockoutSettings) -> Self {
        Self {
            max_failed_attempts: settings.max_failed_attempts,
            lockout_duration: Duration::try_minutes(settings.lockout_minutes).unwrap_or(Duration::MAX),
        }
    }
}

/// Account lookup, password verification, and role/claim data
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve a login identifier (an email address), case-insensitively
    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<Account>, IdentityError>;

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<Account>, IdentityError>;

    async fn check_secret(&self, account: &Account, secret: &str) -> Result<bool, IdentityError>;

    async fn is_confirmed(&self, account: &Account) -> Result<bool, IdentityError>;

    async fn is_locked_out(&self, account: &Account) -> Result<bool, IdentityError>;

    /// Count a failed password check, locking the account once the policy
    /// threshold is reached
    async fn record_failed_attempt(&self, account: &Account) -> Result<(), IdentityError>;

    async fn reset_failed_attempts(&self, account: &Account) -> Result<(), IdentityError>;

    async fn roles(&self, account: &Account) -> Result<Vec<String>, IdentityError>;

    async fn claims(&self, account: &Account) -> Result<Vec<Claim>, IdentityError>;

    async fn role_claims(&self, role: &str) -> Result<Vec<Claim>, IdentityError>;
}
