/// Refresh Token Records
///
/// Refresh tokens are presented by clients as `"{id}.{secret}"`:
/// - `id` is the UUID of the persisted record
/// - `secret` is 64 random bytes, URL-safe base64 without padding
/// - Only an HMAC fingerprint of the secret is stored (never plaintext)
/// - Each token is single-use: refreshing revokes it and links the
///   record to its successor, forming an append-only chain

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::providers::RandomSource;
use crate::auth::secret_hasher::SecretHash;
use crate::auth::session::ClientOrigin;

pub const SECRET_LENGTH: usize = 64;

/// Identifier of a refresh token record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RefreshTokenId(Uuid);

impl RefreshTokenId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RefreshTokenId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for RefreshTokenId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for RefreshTokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for RefreshTokenId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Persisted refresh token state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenRecord {
    pub id: RefreshTokenId,
    pub user_id: Uuid,
    pub secret_hash: String,
    pub salt: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub created_by_ip: Option<String>,
    pub user_agent: Option<String>,
    pub is_revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_by_ip: Option<String>,
    /// Successor issued when this token was rotated
    pub replaced_by: Option<RefreshTokenId>,
}

const MAX_IP_LENGTH: usize = 64;
const MAX_USER_AGENT_LENGTH: usize = 256;

impl RefreshTokenRecord {
    /// New, unrevoked record created at `now`
    pub fn new(
        user_id: Uuid,
        fingerprint: SecretHash,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        origin: &ClientOrigin,
    ) -> Self {
        Self {
            id: RefreshTokenId::new(),
            user_id,
            secret_hash: fingerprint.hash,
            salt: fingerprint.salt,
            expires_at,
            created_at: now,
            created_by_ip: bounded(origin.ip(), MAX_IP_LENGTH),
            user_agent: bounded(origin.user_agent(), MAX_USER_AGENT_LENGTH),
            is_revoked: false,
            revoked_at: None,
            revoked_by_ip: None,
            replaced_by: None,
        }
    }

    pub fn fingerprint(&self) -> SecretHash {
        SecretHash {
            hash: self.secret_hash.clone(),
            salt: self.salt.clone(),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.is_revoked && !self.is_expired(now)
    }

    /// Mark revoked. The revocation fields are write-once: revoking an
    /// already revoked record changes nothing and returns false.
    pub fn revoke(
        &mut self,
        now: DateTime<Utc>,
        revoked_by_ip: Option<&str>,
        replaced_by: Option<RefreshTokenId>,
    ) -> bool {
        if self.is_revoked {
            return false;
        }
        self.is_revoked = true;
        self.revoked_at = Some(now);
        self.revoked_by_ip = bounded(revoked_by_ip, MAX_IP_LENGTH);
        self.replaced_by = replaced_by;
        true
    }
}

fn bounded(value: Option<&str>, max: usize) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| v.chars().take(max).collect())
}

/// Generate a new cryptographically secure refresh secret
pub fn generate_refresh_secret(random: &dyn RandomSource) -> String {
    let mut bytes = [0u8; SECRET_LENGTH];
    random.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// The token string handed to clients
#[derive(Clone, PartialEq, Eq)]
pub struct RawRefreshToken {
    pub id: RefreshTokenId,
    pub secret: String,
}

impl RawRefreshToken {
    pub fn new(id: RefreshTokenId, secret: String) -> Self {
        Self { id, secret }
    }

    /// Split `"{id}.{secret}"`. Returns `None` unless there are exactly two
    /// segments, the id is a UUID, and the secret is not blank.
    pub fn parse(raw: &str) -> Option<Self> {
        let (id, secret) = raw.trim().split_once('.')?;
        if secret.contains('.') || secret.trim().is_empty() {
            return None;
        }
        let id = id.parse::<RefreshTokenId>().ok()?;
        Some(Self::new(id, secret.to_string()))
    }
}

impl fmt::Display for RawRefreshToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.id, self.secret)
    }
}

// Keep the secret out of logs.
impl fmt::Debug for RawRefreshToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawRefreshToken")
            .field("id", &self.id)
            .field("secret", &"<redacted>")
            .finish()
    }
}
