use actix_web::dev::Server;
use actix_web::{middleware::Logger, web, App, HttpServer};
use std::net::TcpListener;
use std::sync::Arc;

use crate::auth::{AuthSessionService, Clock, OsRandom, RandomSource, SessionLifetimes, SystemClock, TokenCodec};
use crate::configuration::AuthSettings;
use crate::identity::IdentityProvider;
use crate::middleware::JwtMiddleware;
use crate::routes::{get_current_user, health_check, login, refresh};
use crate::store::RefreshTokenStore;

/// Wire the session service to real time and OS randomness
pub fn build_session_service(
    settings: &AuthSettings,
    identity: Arc<dyn IdentityProvider>,
    store: Arc<dyn RefreshTokenStore>,
) -> AuthSessionService {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let random: Arc<dyn RandomSource> = Arc::new(OsRandom);
    let codec = TokenCodec::new(&settings.jwt, clock.clone());

    AuthSessionService::new(identity, store, codec, clock, random, SessionLifetimes::from(settings))
}

pub fn run(listener: TcpListener, sessions: AuthSessionService) -> Result<Server, std::io::Error> {
    let codec = sessions.codec().clone();
    let sessions = web::Data::new(sessions);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(sessions.clone())
            .route("/health_check", web::get().to(health_check))
            .route("/auth/login", web::post().to(login))
            .route("/auth/refresh", web::post().to(refresh))
            .service(
                web::scope("/api")
                    .wrap(JwtMiddleware::new(codec.clone()))
                    .route("/me", web::get().to(get_current_user)),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}
