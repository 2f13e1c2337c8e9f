/// In-Memory Refresh Token Store

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{RefreshTokenStore, RotationOutcome};
use crate::auth::{RefreshTokenId, RefreshTokenRecord};
use crate::error::StoreError;

/// Process-local store. Rotation runs inside one critical section, which
/// gives the same check-and-write atomicity as a row lock.
#[derive(Debug, Default)]
pub struct InMemoryRefreshTokenStore {
    records: Mutex<HashMap<RefreshTokenId, RefreshTokenRecord>>,
}

impl InMemoryRefreshTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    pub async fn records_for_user(&self, user_id: Uuid) -> Vec<RefreshTokenRecord> {
        let mut records: Vec<_> = self
            .records
            .lock()
            .await
            .values()
            .filter(|record| record.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by_key(|record| record.created_at);
        records
    }
}

#[async_trait]
impl RefreshTokenStore for InMemoryRefreshTokenStore {
    async fn find_by_id(&self, id: RefreshTokenId) -> Result<Option<RefreshTokenRecord>, StoreError> {
        Ok(self.records.lock().await.get(&id).cloned())
    }

    async fn insert(&self, record: &RefreshTokenRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        if records.contains_key(&record.id) {
            return Err(StoreError::Duplicate(record.id));
        }
        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn rotate(
        &self,
        revoked: &RefreshTokenRecord,
        successor: &RefreshTokenRecord,
    ) -> Result<RotationOutcome, StoreError> {
        let mut records = self.records.lock().await;

        if records.contains_key(&successor.id) {
            return Err(StoreError::Duplicate(successor.id));
        }
        let current = records
            .get_mut(&revoked.id)
            .ok_or(StoreError::NotFound(revoked.id))?;
        if current.is_revoked {
            return Ok(RotationOutcome::AlreadyRevoked);
        }

        current.is_revoked = true;
        current.revoked_at = revoked.revoked_at;
        current.revoked_by_ip = revoked.revoked_by_ip.clone();
        current.replaced_by = revoked.replaced_by;
        records.insert(successor.id, successor.clone());

        Ok(RotationOutcome::Rotated)
    }
}
