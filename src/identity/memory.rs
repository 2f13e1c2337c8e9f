/// In-Memory Identity Provider
///
/// Accounts live in a process-local map. Used by tests and by the binary
/// when no database is configured.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{hash_password, verify_password, Account, IdentityProvider, LockoutPolicy};
use crate::auth::{Claim, Clock};
use crate::error::IdentityError;

/// Data needed to register an account
#[derive(Debug, Clone)]
pub struct AccountSeed {
    pub email: String,
    pub password: String,
    pub email_confirmed: bool,
    pub roles: Vec<String>,
    pub claims: Vec<Claim>,
}

impl AccountSeed {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            email_confirmed: true,
            roles: Vec::new(),
            claims: Vec::new(),
        }
    }

    pub fn unconfirmed(mut self) -> Self {
        self.email_confirmed = false;
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    pub fn with_claim(mut self, kind: impl Into<String>, value: impl Into<String>) -> Self {
        self.claims.push(Claim::new(kind, value));
        self
    }
}

#[derive(Debug, Clone)]
struct StoredAccount {
    account: Account,
    password_hash: String,
    email_confirmed: bool,
    failed_attempts: u32,
    lockout_end: Option<DateTime<Utc>>,
    roles: Vec<String>,
    claims: Vec<Claim>,
}

pub struct InMemoryIdentityProvider {
    accounts: RwLock<HashMap<Uuid, StoredAccount>>,
    role_claims: RwLock<HashMap<String, Vec<Claim>>>,
    policy: LockoutPolicy,
    clock: Arc<dyn Clock>,
    bcrypt_cost: u32,
}

impl InMemoryIdentityProvider {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            role_claims: RwLock::new(HashMap::new()),
            policy: LockoutPolicy::default(),
            clock,
            bcrypt_cost: bcrypt::DEFAULT_COST,
        }
    }

    pub fn with_policy(mut self, policy: LockoutPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Lower the bcrypt cost, e.g. to `bcrypt::MIN_COST` in tests
    pub fn with_bcrypt_cost(mut self, cost: u32) -> Self {
        self.bcrypt_cost = cost;
        self
    }

    /// Register an account, hashing its password
    ///
    /// # Errors
    /// Returns error if the email is taken or hashing fails
    pub async fn add_account(&self, seed: AccountSeed) -> Result<Account, IdentityError> {
        let email = seed.email.trim().to_string();
        let password_hash = hash_password(&seed.password, self.bcrypt_cost).await?;

        let mut accounts = self.write_accounts()?;
        if accounts
            .values()
            .any(|stored| stored.account.email.eq_ignore_ascii_case(&email))
        {
            return Err(IdentityError::Backend(format!("account {} already exists", email)));
        }

        let account = Account {
            id: Uuid::new_v4(),
            email,
        };
        accounts.insert(
            account.id,
            StoredAccount {
                account: account.clone(),
                password_hash,
                email_confirmed: seed.email_confirmed,
                failed_attempts: 0,
                lockout_end: None,
                roles: seed.roles,
                claims: seed.claims,
            },
        );
        Ok(account)
    }

    pub fn set_role_claims(&self, role: impl Into<String>, claims: Vec<Claim>) -> Result<(), IdentityError> {
        self.role_claims
            .write()
            .map_err(|_| poisoned())?
            .insert(role.into(), claims);
        Ok(())
    }

    pub fn set_email_confirmed(&self, user_id: Uuid, confirmed: bool) -> Result<(), IdentityError> {
        self.update(user_id, |stored| stored.email_confirmed = confirmed)
    }

    pub fn remove_account(&self, user_id: Uuid) -> Result<(), IdentityError> {
        self.write_accounts()?.remove(&user_id);
        Ok(())
    }

    pub fn failed_attempts(&self, user_id: Uuid) -> Result<u32, IdentityError> {
        Ok(self
            .read_accounts()?
            .get(&user_id)
            .map(|stored| stored.failed_attempts)
            .unwrap_or(0))
    }

    fn read_accounts(&self) -> Result<RwLockReadGuard<'_, HashMap<Uuid, StoredAccount>>, IdentityError> {
        self.accounts.read().map_err(|_| poisoned())
    }

    fn write_accounts(&self) -> Result<RwLockWriteGuard<'_, HashMap<Uuid, StoredAccount>>, IdentityError> {
        self.accounts.write().map_err(|_| poisoned())
    }

    fn stored(&self, user_id: Uuid) -> Result<Option<StoredAccount>, IdentityError> {
        Ok(self.read_accounts()?.get(&user_id).cloned())
    }

    fn update(&self, user_id: Uuid, f: impl FnOnce(&mut StoredAccount)) -> Result<(), IdentityError> {
        if let Some(stored) = self.write_accounts()?.get_mut(&user_id) {
            f(stored);
        }
        Ok(())
    }
}

fn poisoned() -> IdentityError {
    IdentityError::Backend("identity store lock poisoned".to_string())
}

#[async_trait]
impl IdentityProvider for InMemoryIdentityProvider {
    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<Account>, IdentityError> {
        let identifier = identifier.trim();
        Ok(self
            .read_accounts()?
            .values()
            .find(|stored| stored.account.email.eq_ignore_ascii_case(identifier))
            .map(|stored| stored.account.clone()))
    }

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<Account>, IdentityError> {
        Ok(self.stored(user_id)?.map(|stored| stored.account))
    }

    async fn check_secret(&self, account: &Account, secret: &str) -> Result<bool, IdentityError> {
        let password_hash = match self.stored(account.id)? {
            Some(stored) => stored.password_hash,
            None => return Ok(false),
        };
        verify_password(secret, &password_hash).await
    }

    async fn is_confirmed(&self, account: &Account) -> Result<bool, IdentityError> {
        Ok(self
            .stored(account.id)?
            .map(|stored| stored.email_confirmed)
            .unwrap_or(false))
    }

    async fn is_locked_out(&self, account: &Account) -> Result<bool, IdentityError> {
        let now = self.clock.now();
        Ok(self
            .stored(account.id)?
            .and_then(|stored| stored.lockout_end)
            .map(|end| end > now)
            .unwrap_or(false))
    }

    async fn record_failed_attempt(&self, account: &Account) -> Result<(), IdentityError> {
        let now = self.clock.now();
        let policy = self.policy;
        self.update(account.id, |stored| {
            stored.failed_attempts += 1;
            if stored.failed_attempts >= policy.max_failed_attempts {
                stored.lockout_end = Some(policy.lockout_end(now));
                stored.failed_attempts = 0;
            }
        })
    }

    async fn reset_failed_attempts(&self, account: &Account) -> Result<(), IdentityError> {
        self.update(account.id, |stored| stored.failed_attempts = 0)
    }

    async fn roles(&self, account: &Account) -> Result<Vec<String>, IdentityError> {
        Ok(self
            .stored(account.id)?
            .map(|stored| stored.roles)
            .unwrap_or_default())
    }

    async fn claims(&self, account: &Account) -> Result<Vec<Claim>, IdentityError> {
        Ok(self
            .stored(account.id)?
            .map(|stored| stored.claims)
            .unwrap_or_default())
    }

    async fn role_claims(&self, role: &str) -> Result<Vec<Claim>, IdentityError> {
        Ok(self
            .role_claims
            .read()
            .map_err(|_| poisoned())?
            .get(role)
            .cloned()
            .unwrap_or_default())
    }
}
