/// Authentication module
///
/// Access token signing/validation, refresh secret hashing, refresh token
/// records, and the login/refresh session service.

mod claims;
mod jwt;
mod providers;
mod refresh_token;
mod secret_hasher;
mod session;

pub use claims::{assemble_claims, Claim, Claims, IdentityClaims};
pub use jwt::{InvalidToken, RejectReason, TokenCodec};
pub use providers::{Clock, FixedClock, OsRandom, RandomSource, SeededRandom, SystemClock};
pub use refresh_token::{generate_refresh_secret, RawRefreshToken, RefreshTokenId, RefreshTokenRecord};
pub use secret_hasher::{constant_time_equals, HashError, SecretHash, SecretHasher};
pub use session::{AuthSessionService, ClientOrigin, SessionLifetimes, SessionResult};
