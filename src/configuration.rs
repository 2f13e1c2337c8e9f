use chrono::Duration;
use jsonwebtoken::Algorithm;

use crate::error::ConfigError;

const MIN_SECRET_LENGTH: usize = 32;
const MAX_ACCESS_TOKEN_MINUTES: i64 = 24 * 60;
const MAX_REFRESH_TOKEN_DAYS: i64 = 365;
const MAX_LOCKOUT_MINUTES: i64 = 24 * 60;

#[derive(serde::Deserialize, Clone, Debug)]
pub struct Settings {
    pub application: ApplicationSettings,
    /// When absent the service runs on in-memory collaborators
    #[serde(default)]
    pub database: Option<DatabaseSettings>,
    pub auth: AuthSettings,
    /// Account registered at startup when running on in-memory collaborators
    #[serde(default)]
    pub seed_account: Option<SeedAccountSettings>,
}

#[derive(serde::Deserialize, Clone)]
pub struct SeedAccountSettings {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl std::fmt::Debug for SeedAccountSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeedAccountSettings")
            .field("email", &self.email)
            .field("roles", &self.roles)
            .finish_non_exhaustive()
    }
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct ApplicationSettings {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

#[derive(serde::Deserialize, Clone)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: String,
    pub port: u16,
    pub host: String,
    pub database_name: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

impl std::fmt::Debug for DatabaseSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseSettings")
            .field("username", &self.username)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database_name", &self.database_name)
            .finish_non_exhaustive()
    }
}

impl DatabaseSettings {
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database_name
        )
    }

    pub fn connection_string_without_db(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}",
            self.username, self.password, self.host, self.port
        )
    }
}

/// Session lifetimes and token signing settings
#[derive(serde::Deserialize, Clone, Debug)]
pub struct AuthSettings {
    #[serde(default = "default_access_token_minutes")]
    pub access_token_minutes: i64,
    #[serde(default = "default_refresh_token_days")]
    pub refresh_token_days: i64,
    pub jwt: JwtSettings,
    #[serde(default)]
    pub lockout: LockoutSettings,
}

/// Failed-login lockout applied by the identity provider
#[derive(serde::Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct LockoutSettings {
    #[serde(default = "default_max_failed_attempts")]
    pub max_failed_attempts: u32,
    #[serde(default = "default_lockout_minutes")]
    pub lockout_minutes: i64,
}

impl Default for LockoutSettings {
    fn default() -> Self {
        Self {
            max_failed_attempts: default_max_failed_attempts(),
            lockout_minutes: default_lockout_minutes(),
        }
    }
}

fn default_max_failed_attempts() -> u32 {
    5
}

fn default_lockout_minutes() -> i64 {
    5
}

fn default_access_token_minutes() -> i64 {
    120
}

fn default_refresh_token_days() -> i64 {
    7
}

impl AuthSettings {
    /// Saturates for values `validate` rejects
    pub fn access_ttl(&self) -> Duration {
        Duration::try_minutes(self.access_token_minutes).unwrap_or(Duration::MAX)
    }

    /// Saturates for values `validate` rejects
    pub fn refresh_ttl(&self) -> Duration {
        Duration::try_days(self.refresh_token_days).unwrap_or(Duration::MAX)
    }

    /// Reject settings the service must never start with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt.secret.len() < MIN_SECRET_LENGTH {
            return Err(ConfigError::InvalidValue(format!(
                "auth.jwt.secret must be at least {} bytes",
                MIN_SECRET_LENGTH
            )));
        }
        check_range("auth.access_token_minutes", self.access_token_minutes, MAX_ACCESS_TOKEN_MINUTES)?;
        check_range("auth.refresh_token_days", self.refresh_token_days, MAX_REFRESH_TOKEN_DAYS)?;
        check_range("auth.lockout.lockout_minutes", self.lockout.lockout_minutes, MAX_LOCKOUT_MINUTES)?;
        if self.lockout.max_failed_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "auth.lockout.max_failed_attempts must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn check_range(name: &str, value: i64, max: i64) -> Result<(), ConfigError> {
    if value <= 0 || value > max {
        return Err(ConfigError::InvalidValue(format!(
            "{} must be between 1 and {}",
            name, max
        )));
    }
    Ok(())
}

/// JWT signing settings
#[derive(serde::Deserialize, Clone)]
pub struct JwtSettings {
    pub secret: String,
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default)]
    pub audience: Option<String>,
    #[serde(default)]
    pub algorithm: SigningAlgorithm,
}

impl std::fmt::Debug for JwtSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtSettings")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// HMAC algorithms accepted for access tokens
#[derive(serde::Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SigningAlgorithm {
    #[default]
    HS256,
    HS384,
    HS512,
}

impl From<SigningAlgorithm> for Algorithm {
    fn from(alg: SigningAlgorithm) -> Self {
        match alg {
            SigningAlgorithm::HS256 => Algorithm::HS256,
            SigningAlgorithm::HS384 => Algorithm::HS384,
            SigningAlgorithm::HS512 => Algorithm::HS512,
        }
    }
}

/// Load settings from `configuration.{yaml,toml,json}` and `APP__*`
/// environment variables, e.g. `APP__AUTH__JWT__SECRET`.
pub fn get_configuration() -> Result<Settings, ConfigError> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("configuration").required(false))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("__")
                .separator("__"),
        )
        .build()?;
    let settings = settings.try_deserialize::<Settings>()?;
    settings.auth.validate()?;
    Ok(settings)
}
