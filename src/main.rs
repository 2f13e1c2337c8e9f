use std::net::TcpListener;
use std::sync::Arc;

use session_auth::auth::SystemClock;
use session_auth::configuration::{get_configuration, Settings};
use session_auth::identity::{
    AccountSeed, IdentityProvider, InMemoryIdentityProvider, LockoutPolicy, PgIdentityProvider,
};
use session_auth::startup::{build_session_service, run};
use session_auth::store::{InMemoryRefreshTokenStore, PgRefreshTokenStore, RefreshTokenStore};
use session_auth::telemetry::init_telemetry;
use sqlx::postgres::PgPoolOptions;

type Collaborators = (Arc<dyn IdentityProvider>, Arc<dyn RefreshTokenStore>);

async fn postgres_collaborators(settings: &Settings) -> std::io::Result<Option<Collaborators>> {
    let Some(database) = &settings.database else {
        return Ok(None);
    };

    tracing::info!(host = %database.host, database = %database.database_name, "Connecting to database");
    let pool = PgPoolOptions::new()
        .max_connections(database.max_connections)
        .connect(&database.connection_string())
        .await
        .map_err(|e| {
            tracing::error!("Failed to create connection pool: {}", e);
            std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "Database connection error")
        })?;

    let identity = PgIdentityProvider::new(pool.clone(), Arc::new(SystemClock))
        .with_policy(LockoutPolicy::from(&settings.auth.lockout));
    let store = PgRefreshTokenStore::new(pool);
    Ok(Some((Arc::new(identity), Arc::new(store))))
}

async fn in_memory_collaborators(settings: &Settings) -> std::io::Result<Collaborators> {
    tracing::warn!("No database configured, sessions are kept in memory");
    let identity = InMemoryIdentityProvider::new(Arc::new(SystemClock))
        .with_policy(LockoutPolicy::from(&settings.auth.lockout));

    if let Some(seed) = &settings.seed_account {
        let mut account_seed = AccountSeed::new(seed.email.clone(), seed.password.clone());
        for role in &seed.roles {
            account_seed = account_seed.with_role(role.clone());
        }
        let account = identity.add_account(account_seed).await.map_err(|e| {
            tracing::error!("Failed to seed account: {}", e);
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "Seed account error")
        })?;
        tracing::info!(user_id = %account.id, "Seed account registered");
    }

    Ok((Arc::new(identity), Arc::new(InMemoryRefreshTokenStore::new())))
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    init_telemetry();

    let configuration = match get_configuration() {
        Ok(config) => {
            tracing::info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            tracing::error!("Failed to read configuration: {}", e);
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "Configuration error",
            ));
        }
    };

    let (identity, store) = match postgres_collaborators(&configuration).await? {
        Some(collaborators) => collaborators,
        None => in_memory_collaborators(&configuration).await?,
    };
    let sessions = build_session_service(&configuration.auth, identity, store);

    let address = format!(
        "{}:{}",
        configuration.application.host, configuration.application.port
    );
    let listener = TcpListener::bind(&address)?;
    tracing::info!("Server listening on: {}", address);

    run(listener, sessions)?.await
}
