/// Authentication Routes
///
/// Thin HTTP surface over `AuthSessionService`: login, token refresh, and
/// the current token's identity.

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::{AuthSessionService, Claims, ClientOrigin, SessionResult};
use crate::error::AuthError;

/// User login request
#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Token refresh request
#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Authentication response with access and refresh tokens
#[derive(Serialize, Deserialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Seconds until the access token expires
    pub expires_in: i64,
    pub expires_at: DateTime<Utc>,
    pub user_id: String,
    pub email: String,
    pub roles: Vec<String>,
}

impl From<SessionResult> for AuthResponse {
    fn from(session: SessionResult) -> Self {
        Self {
            access_token: session.access_token,
            refresh_token: session.refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: session.expires_in,
            expires_at: session.access_expires_at,
            user_id: session.user_id.to_string(),
            email: session.email,
            roles: session.roles,
        }
    }
}

/// Identity carried by the presented access token
#[derive(Serialize, Deserialize)]
pub struct MeResponse {
    pub user_id: String,
    pub email: String,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

fn client_origin(req: &HttpRequest) -> ClientOrigin {
    let ip = req.connection_info().realip_remote_addr().map(str::to_string);
    let user_agent = req
        .headers()
        .get("User-Agent")
        .and_then(|h| h.to_str().ok())
        .map(str::to_string);
    ClientOrigin::new(ip, user_agent)
}

/// POST /auth/login
///
/// # Errors
/// - 401: Invalid credentials (unknown email or wrong password)
/// - 403: Email not confirmed
/// - 423: Account locked
/// - 500/503: Collaborator failure
pub async fn login(
    req: HttpRequest,
    form: web::Json<LoginRequest>,
    sessions: web::Data<AuthSessionService>,
) -> Result<HttpResponse, AuthError> {
    let origin = client_origin(&req);
    let session = sessions.login(&form.email, &form.password, &origin).await?;

    Ok(HttpResponse::Ok().json(AuthResponse::from(session)))
}

/// POST /auth/refresh
///
/// Rotates the refresh token: the presented token is revoked and a new
/// one is returned with a fresh access token.
///
/// # Errors
/// - 401: Invalid, expired, or revoked refresh token (distinct codes)
/// - 403: Owning account unavailable
/// - 409: Concurrent update of the same token
pub async fn refresh(
    req: HttpRequest,
    form: web::Json<RefreshRequest>,
    sessions: web::Data<AuthSessionService>,
) -> Result<HttpResponse, AuthError> {
    let origin = client_origin(&req);
    let session = sessions.refresh(&form.refresh_token, &origin).await?;

    Ok(HttpResponse::Ok().json(AuthResponse::from(session)))
}

/// GET /api/me
///
/// **Requires valid access token**; claims are injected by `JwtMiddleware`.
pub async fn get_current_user(claims: web::ReqData<Claims>) -> HttpResponse {
    let identity = &claims.identity;
    HttpResponse::Ok().json(MeResponse {
        user_id: identity.subject.to_string(),
        email: identity.email.clone(),
        roles: identity.roles.iter().cloned().collect(),
        permissions: identity.permissions.iter().cloned().collect(),
    })
}
