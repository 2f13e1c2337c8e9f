/// Error Handling Module
///
/// Unified error handling for the session authentication service:
/// 1. Collaborator errors (refresh token store, identity provider)
/// 2. The authentication failure taxonomy returned by login/refresh
/// 3. HTTP response mapping with structured logging
/// 4. Configuration errors

use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};

use crate::auth::RefreshTokenId;

/// ============================================================================
/// 1. COLLABORATOR ERRORS
/// ============================================================================

/// Failures reported by a refresh token store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The commit lost against a concurrent writer
    #[error("concurrency conflict while saving refresh tokens: {0}")]
    Conflict(String),
    #[error("refresh token {0} already exists")]
    Duplicate(RefreshTokenId),
    #[error("refresh token {0} not found")]
    NotFound(RefreshTokenId),
    #[error("refresh token store unavailable: {0}")]
    Unavailable(String),
    #[error("refresh token store error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(err.to_string())
            }
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                // serialization_failure, deadlock_detected
                Some("40001") | Some("40P01") => StoreError::Conflict(db_err.message().to_string()),
                _ => StoreError::Backend(db_err.message().to_string()),
            },
            _ => StoreError::Backend(err.to_string()),
        }
    }
}

/// Failures reported by an identity provider
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
    #[error("identity provider error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for IdentityError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                IdentityError::Unavailable(err.to_string())
            }
            _ => IdentityError::Backend(err.to_string()),
        }
    }
}

/// ============================================================================
/// 2. AUTHENTICATION FAILURES
/// ============================================================================

/// Outcome of a failed login or refresh.
///
/// The first seven variants are expected, caller-recoverable results. The
/// remaining ones carry collaborator failures through unchanged so the
/// caller can decide how to map them. None of the messages include
/// credential or token material.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("account email is not confirmed")]
    AccountNotConfirmed,
    #[error("account is locked")]
    AccountLocked,
    #[error("invalid refresh token")]
    InvalidRefreshToken,
    #[error("refresh token has expired")]
    RefreshTokenExpired,
    /// The token was already rotated. Reuse of a rotated token may mean it
    /// was stolen, so this stays distinct from `InvalidRefreshToken`.
    #[error("refresh token has been revoked")]
    RefreshTokenRevoked,
    #[error("account is unavailable")]
    AccountUnavailable,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error("session tokens could not be issued: {0}")]
    TokenIssue(String),
}

impl AuthError {
    /// Stable machine-readable code for clients
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::AccountNotConfirmed => "account_not_confirmed",
            AuthError::AccountLocked => "account_locked",
            AuthError::InvalidRefreshToken => "invalid_refresh_token",
            AuthError::RefreshTokenExpired => "refresh_token_expired",
            AuthError::RefreshTokenRevoked => "refresh_token_revoked",
            AuthError::AccountUnavailable => "account_unavailable",
            AuthError::Store(StoreError::Conflict(_)) => "concurrency_conflict",
            AuthError::Store(StoreError::Unavailable(_))
            | AuthError::Identity(IdentityError::Unavailable(_)) => "service_unavailable",
            AuthError::Store(_) | AuthError::Identity(_) | AuthError::TokenIssue(_) => {
                "internal_error"
            }
        }
    }

    /// Whether this is one of the expected authentication outcomes rather
    /// than a collaborator failure
    pub fn is_expected(&self) -> bool {
        !matches!(
            self,
            AuthError::Store(_) | AuthError::Identity(_) | AuthError::TokenIssue(_)
        )
    }
}

/// ============================================================================
/// 3. HTTP RESPONSE MAPPING
/// ============================================================================

/// Error response structure for HTTP responses
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct ErrorResponse {
    /// Unique error ID for correlating with logs
    pub error_id: String,
    pub message: String,
    /// Error code for client-side handling
    pub code: String,
    pub status: u16,
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(error_id: String, message: String, code: String, status: u16) -> Self {
        Self {
            error_id,
            message,
            code,
            status,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Trait for converting errors to HTTP responses with proper logging
pub trait ErrorHandler {
    fn error_response(&self, request_id: &str) -> (StatusCode, ErrorResponse);
    fn log_error(&self, request_id: &str);
}

impl ErrorHandler for AuthError {
    fn error_response(&self, request_id: &str) -> (StatusCode, ErrorResponse) {
        let status = ResponseError::status_code(self);
        let message = if self.is_expected() {
            self.to_string()
        } else if status == StatusCode::SERVICE_UNAVAILABLE {
            "Service temporarily unavailable".to_string()
        } else if status == StatusCode::CONFLICT {
            "Concurrent update detected, retry the request".to_string()
        } else {
            "Internal server error".to_string()
        };

        let response = ErrorResponse::new(
            request_id.to_string(),
            message,
            self.code().to_string(),
            status.as_u16(),
        );
        (status, response)
    }

    fn log_error(&self, request_id: &str) {
        match self {
            AuthError::RefreshTokenRevoked => {
                tracing::warn!(request_id = request_id, code = self.code(), "Revoked refresh token presented");
            }
            AuthError::Store(StoreError::Conflict(_)) => {
                tracing::warn!(request_id = request_id, error = %self, "Refresh token store conflict");
            }
            AuthError::Store(e) => {
                tracing::error!(request_id = request_id, error = %e, "Refresh token store error");
            }
            AuthError::Identity(e) => {
                tracing::error!(request_id = request_id, error = %e, "Identity provider error");
            }
            AuthError::TokenIssue(msg) => {
                tracing::error!(request_id = request_id, error = %msg, "Access token issue failed");
            }
            _ => {
                tracing::info!(request_id = request_id, code = self.code(), "Authentication rejected");
            }
        }
    }
}

/// Implement ResponseError for Actix-web integration
impl ResponseError for AuthError {
    fn error_response(&self) -> HttpResponse {
        let request_id = uuid::Uuid::new_v4().to_string();
        self.log_error(&request_id);

        let (status, error_response) = <Self as ErrorHandler>::error_response(self, &request_id);

        HttpResponse::build(status).json(error_response)
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AuthError::InvalidCredentials
            | AuthError::InvalidRefreshToken
            | AuthError::RefreshTokenExpired
            | AuthError::RefreshTokenRevoked => StatusCode::UNAUTHORIZED,
            AuthError::AccountNotConfirmed | AuthError::AccountUnavailable => StatusCode::FORBIDDEN,
            AuthError::AccountLocked => StatusCode::LOCKED,
            AuthError::Store(StoreError::Conflict(_)) => StatusCode::CONFLICT,
            AuthError::Store(StoreError::Unavailable(_))
            | AuthError::Identity(IdentityError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            AuthError::Store(_) | AuthError::Identity(_) | AuthError::TokenIssue(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// ============================================================================
/// 4. CONFIGURATION ERRORS
/// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),
    #[error("invalid config value: {0}")]
    InvalidValue(String),
}
