/// Refresh Token Store
///
/// Stores must always read authoritative state (no caching) and must make
/// rotation atomic: the predecessor is revoked only if it is still
/// unrevoked, and the successor is written in the same commit.

mod memory;
mod postgres;

use async_trait::async_trait;

use crate::auth::{RefreshTokenId, RefreshTokenRecord};
use crate::error::StoreError;

pub use memory::InMemoryRefreshTokenStore;
pub use postgres::PgRefreshTokenStore;

/// Result of an atomic rotation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationOutcome {
    /// Predecessor revoked and successor stored
    Rotated,
    /// Another rotation revoked the predecessor first; nothing was written
    AlreadyRevoked,
}

#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    /// Current persisted state of a record
    async fn find_by_id(&self, id: RefreshTokenId) -> Result<Option<RefreshTokenRecord>, StoreError>;

    async fn insert(&self, record: &RefreshTokenRecord) -> Result<(), StoreError>;

    /// Persist `revoked` (already marked revoked and linked to `successor`)
    /// and insert `successor` as one unit.
    ///
    /// # Errors
    /// `StoreError::NotFound` if the predecessor row is gone,
    /// `StoreError::Conflict` if the commit itself conflicts
    async fn rotate(
        &self,
        revoked: &RefreshTokenRecord,
        successor: &RefreshTokenRecord,
    ) -> Result<RotationOutcome, StoreError>;
}
