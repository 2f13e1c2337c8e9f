/// Session Service
///
/// Login and refresh. Login verifies credentials through the identity
/// provider and issues an access token plus a fresh refresh token.
/// Refresh rotates a refresh token: the presented token is revoked, linked
/// to exactly one successor, and can never be used again.
///
/// All persistence for one call happens in a single store operation, so
/// dropping the future (timeout, client disconnect) leaves either no write
/// or a complete one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::auth::claims::{assemble_claims, IdentityClaims};
use crate::auth::jwt::TokenCodec;
use crate::auth::providers::{Clock, RandomSource};
use crate::auth::refresh_token::{generate_refresh_secret, RawRefreshToken, RefreshTokenId, RefreshTokenRecord};
use crate::auth::secret_hasher::SecretHasher;
use crate::configuration::AuthSettings;
use crate::error::AuthError;
use crate::identity::{Account, IdentityProvider};
use crate::store::{RefreshTokenStore, RotationOutcome};

const UNKNOWN_ACCOUNT_DELAY_MS: (u64, u64) = (150, 350);

/// Where a request came from, recorded as token provenance
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientOrigin {
    ip: Option<String>,
    user_agent: Option<String>,
}

impl ClientOrigin {
    pub fn new(ip: Option<String>, user_agent: Option<String>) -> Self {
        Self {
            ip: ip.filter(|v| !v.trim().is_empty()),
            user_agent: user_agent.filter(|v| !v.trim().is_empty()),
        }
    }

    pub fn ip(&self) -> Option<&str> {
        self.ip.as_deref().map(str::trim)
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref().map(str::trim)
    }
}

/// Tokens and account summary returned by login and refresh
#[derive(Clone, Serialize)]
pub struct SessionResult {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_at: DateTime<Utc>,
    /// Seconds from issue to `access_expires_at`, on the service clock
    pub expires_in: i64,
    pub user_id: Uuid,
    pub email: String,
    pub roles: Vec<String>,
}

impl std::fmt::Debug for SessionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionResult")
            .field("access_expires_at", &self.access_expires_at)
            .field("expires_in", &self.expires_in)
            .field("user_id", &self.user_id)
            .field("email", &self.email)
            .field("roles", &self.roles)
            .finish_non_exhaustive()
    }
}

/// Session lifetimes
#[derive(Debug, Clone, Copy)]
pub struct SessionLifetimes {
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

impl From<&AuthSettings> for SessionLifetimes {
    fn from(settings: &AuthSettings) -> Self {
        Self {
            access_ttl: settings.access_ttl(),
            refresh_ttl: settings.refresh_ttl(),
        }
    }
}

pub struct AuthSessionService {
    identity: Arc<dyn IdentityProvider>,
    store: Arc<dyn RefreshTokenStore>,
    codec: TokenCodec,
    hasher: SecretHasher,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
    lifetimes: SessionLifetimes,
}

impl AuthSessionService {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        store: Arc<dyn RefreshTokenStore>,
        codec: TokenCodec,
        clock: Arc<dyn Clock>,
        random: Arc<dyn RandomSource>,
        lifetimes: SessionLifetimes,
    ) -> Self {
        Self {
            identity,
            store,
            codec,
            hasher: SecretHasher::new(random.clone()),
            clock,
            random,
            lifetimes,
        }
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    /// Authenticate with an identifier and password
    ///
    /// # Errors
    /// - `InvalidCredentials`: unknown identifier or wrong password
    /// - `AccountNotConfirmed`, `AccountLocked`: account state
    /// - `Identity`, `Store`, `TokenIssue`: collaborator failures
    #[tracing::instrument(name = "login", skip_all)]
    pub async fn login(
        &self,
        identifier: &str,
        secret: &str,
        origin: &ClientOrigin,
    ) -> Result<SessionResult, AuthError> {
        let identifier = identifier.trim();

        let account = match self.identity.find_by_identifier(identifier).await? {
            Some(account) => account,
            None => {
                // Unknown accounts take about as long as a password check.
                let (low, high) = UNKNOWN_ACCOUNT_DELAY_MS;
                let delay = self.random.jitter_millis(low, high);
                tokio::time::sleep(StdDuration::from_millis(delay)).await;
                tracing::info!("Login rejected: unknown identifier");
                return Err(AuthError::InvalidCredentials);
            }
        };

        if !self.identity.is_confirmed(&account).await? {
            tracing::info!(user_id = %account.id, "Login rejected: email not confirmed");
            return Err(AuthError::AccountNotConfirmed);
        }

        if self.identity.is_locked_out(&account).await? {
            tracing::warn!(user_id = %account.id, "Login rejected: account locked");
            return Err(AuthError::AccountLocked);
        }

        if !self.identity.check_secret(&account, secret).await? {
            self.identity.record_failed_attempt(&account).await?;
            tracing::warn!(user_id = %account.id, "Login rejected: wrong password");
            return Err(AuthError::InvalidCredentials);
        }
        self.identity.reset_failed_attempts(&account).await?;

        let (identity, roles) = self.build_claims(&account, origin).await?;
        let now = self.clock.now();
        let (access_token, access_expires_at) = self.mint_access_token(&identity, now)?;

        let (raw_refresh, record) = self.new_refresh_record(account.id, now, origin)?;
        self.store.insert(&record).await?;

        tracing::info!(
            user_id = %account.id,
            refresh_token_id = %record.id,
            "User logged in successfully"
        );

        Ok(SessionResult {
            access_token,
            refresh_token: raw_refresh.to_string(),
            access_expires_at,
            expires_in: (access_expires_at - now).num_seconds(),
            user_id: account.id,
            email: account.email,
            roles,
        })
    }

    /// Exchange a refresh token for a new session, revoking it
    ///
    /// # Errors
    /// - `InvalidRefreshToken`: malformed, unknown, or wrong secret
    /// - `RefreshTokenRevoked`: already rotated (possible token theft)
    /// - `RefreshTokenExpired`: past expiry
    /// - `AccountUnavailable`: owner missing or unconfirmed
    /// - `Identity`, `Store`, `TokenIssue`: collaborator failures
    #[tracing::instrument(name = "refresh", skip_all)]
    pub async fn refresh(&self, raw: &str, origin: &ClientOrigin) -> Result<SessionResult, AuthError> {
        let presented = RawRefreshToken::parse(raw).ok_or_else(|| {
            tracing::info!("Refresh rejected: malformed token");
            AuthError::InvalidRefreshToken
        })?;

        let mut current = self
            .store
            .find_by_id(presented.id)
            .await?
            .ok_or_else(|| {
                tracing::info!(refresh_token_id = %presented.id, "Refresh rejected: unknown token");
                AuthError::InvalidRefreshToken
            })?;

        if current.is_revoked {
            self.report_reuse(&current);
            return Err(AuthError::RefreshTokenRevoked);
        }

        let now = self.clock.now();
        if current.is_expired(now) {
            tracing::info!(
                user_id = %current.user_id,
                refresh_token_id = %current.id,
                "Refresh rejected: token expired"
            );
            return Err(AuthError::RefreshTokenExpired);
        }

        let matches = self
            .hasher
            .verify(&presented.secret, &current.fingerprint())
            .unwrap_or(false);
        if !matches {
            tracing::warn!(
                user_id = %current.user_id,
                refresh_token_id = %current.id,
                "Refresh rejected: secret mismatch"
            );
            return Err(AuthError::InvalidRefreshToken);
        }

        let account = self.active_owner(current.user_id).await?;

        let (raw_refresh, successor) = self.new_refresh_record(account.id, now, origin)?;
        current.revoke(now, origin.ip(), Some(successor.id));

        let (identity, roles) = self.build_claims(&account, origin).await?;
        let (access_token, access_expires_at) = self.mint_access_token(&identity, now)?;

        match self.store.rotate(&current, &successor).await? {
            RotationOutcome::Rotated => {}
            RotationOutcome::AlreadyRevoked => {
                self.report_reuse(&current);
                return Err(AuthError::RefreshTokenRevoked);
            }
        }

        tracing::info!(
            user_id = %account.id,
            refresh_token_id = %successor.id,
            replaces = %current.id,
            "Token refreshed successfully"
        );

        Ok(SessionResult {
            access_token,
            refresh_token: raw_refresh.to_string(),
            access_expires_at,
            expires_in: (access_expires_at - now).num_seconds(),
            user_id: account.id,
            email: account.email,
            roles,
        })
    }

    /// Follow the rotation chain forward from `start`, oldest first
    ///
    /// # Errors
    /// Returns store errors unchanged
    pub async fn session_history(&self, start: RefreshTokenId) -> Result<Vec<RefreshTokenRecord>, AuthError> {
        let mut chain = Vec::new();
        let mut next = Some(start);

        while let Some(id) = next {
            let Some(record) = self.store.find_by_id(id).await? else {
                break;
            };
            // Pointers are write-once, but stop on a corrupted cycle.
            if chain.iter().any(|seen: &RefreshTokenRecord| seen.id == record.id) {
                break;
            }
            next = record.replaced_by;
            chain.push(record);
        }

        Ok(chain)
    }

    fn report_reuse(&self, record: &RefreshTokenRecord) {
        tracing::warn!(
            user_id = %record.user_id,
            refresh_token_id = %record.id,
            replaced_by = ?record.replaced_by.map(|id| id.to_string()),
            "Revoked refresh token presented, possible token theft"
        );
    }

    async fn active_owner(&self, user_id: Uuid) -> Result<Account, AuthError> {
        let account = match self.identity.find_by_id(user_id).await? {
            Some(account) => account,
            None => {
                tracing::warn!(user_id = %user_id, "Refresh rejected: account missing");
                return Err(AuthError::AccountUnavailable);
            }
        };

        if !self.identity.is_confirmed(&account).await? {
            tracing::warn!(user_id = %user_id, "Refresh rejected: account not confirmed");
            return Err(AuthError::AccountUnavailable);
        }

        Ok(account)
    }

    async fn build_claims(
        &self,
        account: &Account,
        origin: &ClientOrigin,
    ) -> Result<(IdentityClaims, Vec<String>), AuthError> {
        let user_claims = self.identity.claims(account).await?;
        let roles = self.identity.roles(account).await?;

        let mut role_claims = HashMap::with_capacity(roles.len());
        for role in &roles {
            if !role_claims.contains_key(role) {
                role_claims.insert(role.clone(), self.identity.role_claims(role).await?);
            }
        }

        let identity = assemble_claims(account, &user_claims, &roles, &role_claims, origin);
        Ok((identity, roles))
    }

    fn mint_access_token(
        &self,
        identity: &IdentityClaims,
        now: DateTime<Utc>,
    ) -> Result<(String, DateTime<Utc>), AuthError> {
        let expires_at = now
            .checked_add_signed(self.lifetimes.access_ttl)
            .ok_or_else(|| AuthError::TokenIssue("access token lifetime out of range".to_string()))?;
        let token = self
            .codec
            .generate(identity, now, expires_at)
            .map_err(|e| AuthError::TokenIssue(e.to_string()))?;
        Ok((token, expires_at))
    }

    fn new_refresh_record(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
        origin: &ClientOrigin,
    ) -> Result<(RawRefreshToken, RefreshTokenRecord), AuthError> {
        let expires_at = now
            .checked_add_signed(self.lifetimes.refresh_ttl)
            .ok_or_else(|| AuthError::TokenIssue("refresh token lifetime out of range".to_string()))?;
        let secret = generate_refresh_secret(self.random.as_ref());
        let fingerprint = self
            .hasher
            .hash_with_new_salt(&secret)
            .map_err(|e| AuthError::TokenIssue(e.to_string()))?;
        let record = RefreshTokenRecord::new(user_id, fingerprint, now, expires_at, origin);

        Ok((RawRefreshToken::new(record.id, secret), record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{FixedClock, SeededRandom};
    use crate::configuration::{JwtSettings, SigningAlgorithm};
    use crate::error::StoreError;
    use crate::identity::{AccountSeed, InMemoryIdentityProvider};
    use crate::store::InMemoryRefreshTokenStore;
    use async_trait::async_trait;
    use chrono::TimeZone;

    const PASSWORD: &str = "CorrectPass1!";

    struct Harness {
        service: AuthSessionService,
        identity: Arc<InMemoryIdentityProvider>,
        store: Arc<InMemoryRefreshTokenStore>,
        clock: Arc<FixedClock>,
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn jwt_settings() -> JwtSettings {
        JwtSettings {
            secret: "test-secret-key-at-least-32-characters-long".to_string(),
            issuer: Some("session-auth".to_string()),
            audience: None,
            algorithm: SigningAlgorithm::HS256,
        }
    }

    fn lifetimes() -> SessionLifetimes {
        SessionLifetimes {
            access_ttl: Duration::minutes(120),
            refresh_ttl: Duration::days(7),
        }
    }

    fn service_with_store(
        identity: Arc<InMemoryIdentityProvider>,
        store: Arc<dyn RefreshTokenStore>,
        clock: Arc<FixedClock>,
    ) -> AuthSessionService {
        let codec = TokenCodec::new(&jwt_settings(), clock.clone());
        AuthSessionService::new(
            identity,
            store,
            codec,
            clock,
            Arc::new(SeededRandom::new(42)),
            lifetimes(),
        )
    }

    fn harness() -> Harness {
        let clock = Arc::new(FixedClock::new(start()));
        let identity = Arc::new(InMemoryIdentityProvider::new(clock.clone()).with_bcrypt_cost(4));
        let store = Arc::new(InMemoryRefreshTokenStore::new());
        let service = service_with_store(identity.clone(), store.clone(), clock.clone());
        Harness {
            service,
            identity,
            store,
            clock,
        }
    }

    fn origin() -> ClientOrigin {
        ClientOrigin::new(Some("203.0.113.7".to_string()), Some("test-agent/1.0".to_string()))
    }

    async fn add_user(h: &Harness) -> Account {
        h.identity
            .add_account(AccountSeed::new("user@example.com", PASSWORD).with_role("user"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_login_issues_tokens_with_configured_lifetimes() {
        let h = harness();
        let account = add_user(&h).await;

        let session = h.service.login("user@example.com", PASSWORD, &origin()).await.unwrap();

        assert_eq!(session.user_id, account.id);
        assert_eq!(session.email, "user@example.com");
        assert_eq!(session.roles, vec!["user".to_string()]);
        assert_eq!(session.access_expires_at, start() + Duration::minutes(120));
        assert_eq!(session.expires_in, 120 * 60);

        let claims = h.service.codec().validate(&session.access_token).unwrap();
        assert_eq!(claims.user_id(), account.id);
        assert_eq!(claims.exp - claims.iat, 120 * 60);
        assert!(claims.identity.roles.contains("user"));
        assert_eq!(claims.identity.ip.as_deref(), Some("203.0.113.7"));

        let raw = RawRefreshToken::parse(&session.refresh_token).unwrap();
        let record = h.store.find_by_id(raw.id).await.unwrap().unwrap();
        assert_eq!(record.user_id, account.id);
        assert_eq!(record.expires_at, record.created_at + Duration::days(7));
        assert_eq!(record.created_by_ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(record.user_agent.as_deref(), Some("test-agent/1.0"));
        assert!(!record.is_revoked);
        assert_ne!(record.secret_hash, raw.secret);
    }

    #[tokio::test]
    async fn test_login_with_out_of_range_lifetime_fails_cleanly() {
        let h = harness();
        add_user(&h).await;
        let codec = TokenCodec::new(&jwt_settings(), h.clock.clone());
        let service = AuthSessionService::new(
            h.identity.clone(),
            h.store.clone(),
            codec,
            h.clock.clone(),
            Arc::new(SeededRandom::new(42)),
            SessionLifetimes {
                access_ttl: Duration::minutes(120),
                refresh_ttl: Duration::MAX,
            },
        );

        let result = service.login("user@example.com", PASSWORD, &origin()).await;

        assert!(matches!(result, Err(AuthError::TokenIssue(_))));
        assert!(h.store.is_empty().await);
    }

    #[tokio::test]
    async fn test_login_trims_identifier() {
        let h = harness();
        add_user(&h).await;

        assert!(h.service.login("  user@example.com ", PASSWORD, &origin()).await.is_ok());
    }

    #[tokio::test]
    async fn test_login_unknown_account_is_invalid_credentials() {
        let h = harness();
        add_user(&h).await;

        let started = std::time::Instant::now();
        let result = h.service.login("nobody@example.com", PASSWORD, &origin()).await;

        assert!(matches!(result, Err(AuthError::InvalidCredentials)));
        assert!(started.elapsed() >= StdDuration::from_millis(150));
        assert!(h.store.is_empty().await);
    }

    #[tokio::test]
    async fn test_login_wrong_password_counts_failure() {
        let h = harness();
        let account = add_user(&h).await;

        let result = h.service.login("user@example.com", "WrongPass1!", &origin()).await;

        assert!(matches!(result, Err(AuthError::InvalidCredentials)));
        assert_eq!(h.identity.failed_attempts(account.id).unwrap(), 1);
        assert!(h.store.is_empty().await);

        h.service.login("user@example.com", PASSWORD, &origin()).await.unwrap();
        assert_eq!(h.identity.failed_attempts(account.id).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_login_unconfirmed_account() {
        let h = harness();
        h.identity
            .add_account(AccountSeed::new("new@example.com", PASSWORD).unconfirmed())
            .await
            .unwrap();

        let result = h.service.login("new@example.com", PASSWORD, &origin()).await;

        assert!(matches!(result, Err(AuthError::AccountNotConfirmed)));
    }

    #[tokio::test]
    async fn test_login_locked_after_repeated_failures() {
        let h = harness();
        add_user(&h).await;

        for _ in 0..5 {
            let result = h.service.login("user@example.com", "WrongPass1!", &origin()).await;
            assert!(matches!(result, Err(AuthError::InvalidCredentials)));
        }

        let result = h.service.login("user@example.com", PASSWORD, &origin()).await;
        assert!(matches!(result, Err(AuthError::AccountLocked)));

        h.clock.advance(Duration::minutes(5) + Duration::seconds(1));
        assert!(h.service.login("user@example.com", PASSWORD, &origin()).await.is_ok());
    }

    #[tokio::test]
    async fn test_refresh_rotates_token() {
        let h = harness();
        let account = add_user(&h).await;
        let first = h.service.login("user@example.com", PASSWORD, &origin()).await.unwrap();

        h.clock.advance(Duration::minutes(30));
        let second = h.service.refresh(&first.refresh_token, &origin()).await.unwrap();

        assert_eq!(second.user_id, account.id);
        assert_ne!(second.refresh_token, first.refresh_token);
        assert_eq!(second.access_expires_at, start() + Duration::minutes(150));

        let old_id = RawRefreshToken::parse(&first.refresh_token).unwrap().id;
        let new_id = RawRefreshToken::parse(&second.refresh_token).unwrap().id;
        let old = h.store.find_by_id(old_id).await.unwrap().unwrap();
        assert!(old.is_revoked);
        assert_eq!(old.revoked_at, Some(start() + Duration::minutes(30)));
        assert_eq!(old.revoked_by_ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(old.replaced_by, Some(new_id));

        let new = h.store.find_by_id(new_id).await.unwrap().unwrap();
        assert!(new.is_active(h.clock.now()));
        assert_eq!(new.expires_at, h.clock.now() + Duration::days(7));
    }

    #[tokio::test]
    async fn test_refresh_twice_reports_revoked() {
        let h = harness();
        add_user(&h).await;
        let session = h.service.login("user@example.com", PASSWORD, &origin()).await.unwrap();

        h.service.refresh(&session.refresh_token, &origin()).await.unwrap();
        let replay = h.service.refresh(&session.refresh_token, &origin()).await;

        assert!(matches!(replay, Err(AuthError::RefreshTokenRevoked)));
        assert_eq!(h.store.len().await, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_refresh_single_winner() {
        let h = harness();
        let account = add_user(&h).await;
        let session = h.service.login("user@example.com", PASSWORD, &origin()).await.unwrap();

        let (origin_a, origin_b) = (origin(), origin());
        let (a, b) = tokio::join!(
            h.service.refresh(&session.refresh_token, &origin_a),
            h.service.refresh(&session.refresh_token, &origin_b),
        );

        let wins = [&a, &b].iter().filter(|r| r.is_ok()).count();
        assert_eq!(wins, 1);
        assert!([a, b]
            .into_iter()
            .any(|r| matches!(r, Err(AuthError::RefreshTokenRevoked))));

        let records = h.store.records_for_user(account.id).await;
        assert_eq!(records.len(), 2);
        assert_eq!(records.iter().filter(|r| r.is_revoked).count(), 1);
    }

    /// Serves every record as if it were still unrevoked, forcing the
    /// service down the lost-race branch of rotation.
    struct StaleReads(Arc<InMemoryRefreshTokenStore>);

    #[async_trait]
    impl RefreshTokenStore for StaleReads {
        async fn find_by_id(&self, id: RefreshTokenId) -> Result<Option<RefreshTokenRecord>, StoreError> {
            Ok(self.0.find_by_id(id).await?.map(|mut record| {
                record.is_revoked = false;
                record.revoked_at = None;
                record.revoked_by_ip = None;
                record.replaced_by = None;
                record
            }))
        }

        async fn insert(&self, record: &RefreshTokenRecord) -> Result<(), StoreError> {
            self.0.insert(record).await
        }

        async fn rotate(
            &self,
            revoked: &RefreshTokenRecord,
            successor: &RefreshTokenRecord,
        ) -> Result<RotationOutcome, StoreError> {
            self.0.rotate(revoked, successor).await
        }
    }

    #[tokio::test]
    async fn test_lost_rotation_race_writes_nothing() {
        let h = harness();
        add_user(&h).await;
        let stale = service_with_store(h.identity.clone(), Arc::new(StaleReads(h.store.clone())), h.clock.clone());
        let session = stale.login("user@example.com", PASSWORD, &origin()).await.unwrap();

        stale.refresh(&session.refresh_token, &origin()).await.unwrap();
        let second = stale.refresh(&session.refresh_token, &origin()).await;

        assert!(matches!(second, Err(AuthError::RefreshTokenRevoked)));
        assert_eq!(h.store.len().await, 2);
    }

    #[tokio::test]
    async fn test_refresh_wrong_secret_is_invalid() {
        let h = harness();
        add_user(&h).await;
        let session = h.service.login("user@example.com", PASSWORD, &origin()).await.unwrap();
        let id = RawRefreshToken::parse(&session.refresh_token).unwrap().id;

        let result = h.service.refresh(&format!("{}.garbage", id), &origin()).await;

        assert!(matches!(result, Err(AuthError::InvalidRefreshToken)));
        assert!(!h.store.find_by_id(id).await.unwrap().unwrap().is_revoked);
    }

    #[tokio::test]
    async fn test_refresh_malformed_or_unknown_is_invalid() {
        let h = harness();
        add_user(&h).await;
        let unknown = format!("{}.c2VjcmV0", RefreshTokenId::new());

        for raw in ["", "no-dot", "not-a-uuid.secret", "a.b.c", unknown.as_str()] {
            let result = h.service.refresh(raw, &origin()).await;
            assert!(matches!(result, Err(AuthError::InvalidRefreshToken)), "{:?}", raw);
        }
    }

    #[tokio::test]
    async fn test_refresh_valid_at_exact_expiry() {
        let h = harness();
        add_user(&h).await;
        let session = h.service.login("user@example.com", PASSWORD, &origin()).await.unwrap();

        h.clock.advance(Duration::days(7));

        assert!(h.service.refresh(&session.refresh_token, &origin()).await.is_ok());
    }

    #[tokio::test]
    async fn test_refresh_expired_token() {
        let h = harness();
        add_user(&h).await;
        let session = h.service.login("user@example.com", PASSWORD, &origin()).await.unwrap();
        let id = RawRefreshToken::parse(&session.refresh_token).unwrap().id;

        h.clock.advance(Duration::days(7) + Duration::seconds(1));
        let result = h.service.refresh(&session.refresh_token, &origin()).await;

        assert!(matches!(result, Err(AuthError::RefreshTokenExpired)));
        assert!(!h.store.find_by_id(id).await.unwrap().unwrap().is_revoked);
        assert_eq!(h.store.len().await, 1);
    }

    #[tokio::test]
    async fn test_refresh_owner_unavailable() {
        let h = harness();
        let account = add_user(&h).await;
        let session = h.service.login("user@example.com", PASSWORD, &origin()).await.unwrap();

        h.identity.set_email_confirmed(account.id, false).unwrap();
        let result = h.service.refresh(&session.refresh_token, &origin()).await;
        assert!(matches!(result, Err(AuthError::AccountUnavailable)));

        h.identity.remove_account(account.id).unwrap();
        let result = h.service.refresh(&session.refresh_token, &origin()).await;
        assert!(matches!(result, Err(AuthError::AccountUnavailable)));
        assert_eq!(h.store.len().await, 1);
    }

    #[tokio::test]
    async fn test_session_history_follows_rotation() {
        let h = harness();
        add_user(&h).await;
        let first = h.service.login("user@example.com", PASSWORD, &origin()).await.unwrap();
        let second = h.service.refresh(&first.refresh_token, &origin()).await.unwrap();
        let third = h.service.refresh(&second.refresh_token, &origin()).await.unwrap();

        let start_id = RawRefreshToken::parse(&first.refresh_token).unwrap().id;
        let chain = h.service.session_history(start_id).await.unwrap();

        let ids: Vec<_> = chain.iter().map(|r| r.id).collect();
        let expected: Vec<_> = [&first, &second, &third]
            .iter()
            .map(|s| RawRefreshToken::parse(&s.refresh_token).unwrap().id)
            .collect();
        assert_eq!(ids, expected);
        assert!(chain[..2].iter().all(|r| r.is_revoked));
        assert!(!chain[2].is_revoked);
    }

    /// Never completes an insert
    struct StalledStore;

    #[async_trait]
    impl RefreshTokenStore for StalledStore {
        async fn find_by_id(&self, _id: RefreshTokenId) -> Result<Option<RefreshTokenRecord>, StoreError> {
            Ok(None)
        }

        async fn insert(&self, _record: &RefreshTokenRecord) -> Result<(), StoreError> {
            std::future::pending().await
        }

        async fn rotate(
            &self,
            _revoked: &RefreshTokenRecord,
            _successor: &RefreshTokenRecord,
        ) -> Result<RotationOutcome, StoreError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_cancelled_login_keeps_account_state() {
        let h = harness();
        let account = add_user(&h).await;
        let stalled = service_with_store(h.identity.clone(), Arc::new(StalledStore), h.clock.clone());

        let result = tokio::time::timeout(
            StdDuration::from_millis(500),
            stalled.login("user@example.com", PASSWORD, &origin()),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(h.identity.failed_attempts(account.id).unwrap(), 0);
        assert!(h.service.login("user@example.com", PASSWORD, &origin()).await.is_ok());
        assert_eq!(h.store.len().await, 1);
    }
}
