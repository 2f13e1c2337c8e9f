/// JWT Token Generation and Validation
///
/// `TokenCodec` signs identity claims into compact HMAC JWTs and verifies
/// them. Expiry is checked against the injected clock with no leeway, and
/// tokens whose header algorithm differs from the configured one are
/// rejected.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};

use crate::auth::claims::{Claims, IdentityClaims};
use crate::auth::providers::Clock;
use crate::configuration::JwtSettings;

/// Why a token was rejected. Only used for logging; callers get a single
/// `InvalidToken` outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Malformed,
    Algorithm,
    Signature,
    Issuer,
    Audience,
    Expired,
    NotYetValid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid or expired token")]
pub struct InvalidToken {
    pub reason: RejectReason,
}

impl From<RejectReason> for InvalidToken {
    fn from(reason: RejectReason) -> Self {
        Self { reason }
    }
}

#[derive(Clone)]
pub struct TokenCodec {
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: Option<String>,
    audience: Option<String>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("algorithm", &self.algorithm)
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    pub fn new(config: &JwtSettings, clock: Arc<dyn Clock>) -> Self {
        let secret = config.secret.as_bytes();
        Self {
            algorithm: config.algorithm.into(),
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            issuer: non_blank(config.issuer.as_deref()),
            audience: non_blank(config.audience.as_deref()),
            clock,
        }
    }

    /// Sign `identity` for the window `[issued_at, expires_at]`
    ///
    /// # Errors
    /// Returns the underlying encoder error, which only happens for keys
    /// the algorithm cannot use
    pub fn generate(
        &self,
        identity: &IdentityClaims,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let claims = Claims::new(
            identity.clone(),
            issued_at,
            expires_at,
            self.issuer.clone(),
            self.audience.clone(),
        );

        encode(&Header::new(self.algorithm), &claims, &self.encoding_key)
    }

    /// Verify a token and return its claims
    ///
    /// # Errors
    /// Returns `InvalidToken` for any malformed, tampered, foreign, or
    /// out-of-window token
    pub fn validate(&self, token: &str) -> Result<Claims, InvalidToken> {
        let header = decode_header(token).map_err(|_| RejectReason::Malformed)?;
        if header.alg != self.algorithm {
            tracing::warn!(alg = ?header.alg, "Rejected token signed with unexpected algorithm");
            return Err(RejectReason::Algorithm.into());
        }

        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation())
            .map(|data| data.claims)
            .map_err(|e| {
                let reason = reject_reason(&e);
                tracing::debug!(?reason, "JWT validation error: {}", e);
                InvalidToken::from(reason)
            })?;

        let now = self.clock.now();
        if now.timestamp() > claims.exp {
            return Err(RejectReason::Expired.into());
        }
        if now.timestamp() < claims.nbf {
            return Err(RejectReason::NotYetValid.into());
        }

        Ok(claims)
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(self.algorithm);
        // The window is checked against the injected clock instead.
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "nbf", "sub"]);

        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
        }
        match &self.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }
        validation
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn reject_reason(err: &jsonwebtoken::errors::Error) -> RejectReason {
    use jsonwebtoken::errors::ErrorKind;

    match err.kind() {
        ErrorKind::InvalidSignature => RejectReason::Signature,
        ErrorKind::InvalidAlgorithm => RejectReason::Algorithm,
        ErrorKind::InvalidIssuer => RejectReason::Issuer,
        ErrorKind::InvalidAudience => RejectReason::Audience,
        ErrorKind::ExpiredSignature => RejectReason::Expired,
        ErrorKind::ImmatureSignature => RejectReason::NotYetValid,
        _ => RejectReason::Malformed,
    }
}
