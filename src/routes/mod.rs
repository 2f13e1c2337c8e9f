mod auth;
mod health_check;

pub use auth::{get_current_user, login, refresh, AuthResponse, LoginRequest, MeResponse, RefreshRequest};
pub use health_check::health_check;
