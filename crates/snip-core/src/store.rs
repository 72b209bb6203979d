use crate::error::{Result, StoreError};
use crate::record::{OwnerId, SaveOutcome};
use async_trait::async_trait;
use std::collections::HashMap;

/// The shared `id -> target` mapping.
///
/// Ids are allocated by the store and never reused. Among records that are
/// not deleted, targets are unique: saving a target that is already active
/// returns the existing id with `conflict = true`.
#[async_trait]
pub trait RecordStore: Send + Sync + 'static {
    /// Saves an anonymous target.
    ///
    /// The check for an active duplicate and the insert are one atomic step.
    async fn save(&self, target: &str) -> Result<SaveOutcome>;

    /// Saves every target with [`save`](RecordStore::save) semantics.
    ///
    /// Returns exactly one id per input, in input order, or fails without
    /// making any of the batch visible.
    async fn save_batch(&self, targets: &[String]) -> Result<Vec<String>>;

    /// Resolves an id.
    ///
    /// Returns [`StoreError::NotFound`] for an unknown id and
    /// [`StoreError::Deleted`] for a tombstoned one.
    async fn load(&self, id: &str) -> Result<String>;

    /// Cheap liveness check. Never mutates state.
    async fn ping(&self) -> Result<()>;

    /// Releases files or connections held by the store.
    async fn close(&self) -> Result<()>;
}

/// Per-owner view on top of a [`RecordStore`].
#[async_trait]
pub trait PartitionIndex: RecordStore {
    /// Saves a target and registers the new id under `owner`.
    ///
    /// A conflicting save returns the existing id and leaves the owner's
    /// partition untouched; a record keeps the owner it was created with.
    async fn save_for_user(&self, owner: OwnerId, target: &str) -> Result<SaveOutcome>;

    /// Batch variant of [`save_for_user`](PartitionIndex::save_for_user).
    async fn save_batch_for_user(&self, owner: OwnerId, targets: &[String])
        -> Result<Vec<String>>;

    /// Resolves an id only if it belongs to `owner`.
    async fn load_for_user(&self, owner: OwnerId, id: &str) -> Result<String>;

    /// Lists the owner's active records.
    ///
    /// Returns [`StoreError::NotFound`] if the owner never created a record,
    /// and an empty map if all of its records are deleted.
    async fn list_for_user(&self, owner: OwnerId) -> Result<HashMap<String, String>>;

    /// Tombstones the given ids in the store and in the owner's partition.
    ///
    /// Ids the owner does not own, unknown ids and already deleted ids are
    /// skipped silently.
    async fn delete_for_user(&self, owner: OwnerId, ids: &[String]) -> Result<()>;
}

/// Point-in-time aggregate counts. Not transactional against writers.
#[async_trait]
pub trait Statistics: Send + Sync + 'static {
    /// Number of distinct owners that ever created a record.
    async fn count_users(&self) -> Result<u64>;

    /// Number of records ever allocated, tombstones included.
    async fn count_urls(&self) -> Result<u64>;
}

/// The full store contract every backend implements.
pub trait Store: PartitionIndex + Statistics {}

impl<T: PartitionIndex + Statistics> Store for T {}

/// Checks that a batch produced one id per input.
pub fn ensure_complete(expected: usize, ids: Vec<String>) -> Result<Vec<String>> {
    if ids.len() != expected {
        return Err(StoreError::PartialBatch {
            expected,
            actual: ids.len(),
        });
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_batch_passes_through() {
        let ids = vec!["0".to_string(), "1".to_string()];
        assert_eq!(ensure_complete(2, ids.clone()).unwrap(), ids);
    }

    #[test]
    fn short_batch_is_rejected() {
        let err = ensure_complete(3, vec!["0".to_string()]).unwrap_err();
        assert_eq!(
            err,
            StoreError::PartialBatch {
                expected: 3,
                actual: 1
            }
        );
    }
}
