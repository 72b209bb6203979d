use async_trait::async_trait;
use snip_core::{
    OwnerId, PartitionIndex, RecordStore, Result, SaveOutcome, Statistics, Store, StoreError,
};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// A store decorator that bounds every operation with a deadline.
///
/// An expired call is dropped and reported as [`StoreError::Timeout`]. The
/// wrapped backends keep each operation all-or-nothing under drop, so an
/// expired save is either fully visible or not visible at all.
#[derive(Debug, Clone)]
pub struct TimeoutStore<S> {
    inner: S,
    timeout: Duration,
}

impl<S: Store> TimeoutStore<S> {
    pub fn new(inner: S, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    /// Returns a reference to the wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn bounded<T: Send>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T>> + Send,
    ) -> Result<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(operation, timeout = ?self.timeout, "store operation timed out");
                Err(StoreError::Timeout(format!(
                    "{operation} exceeded {:?}",
                    self.timeout
                )))
            }
        }
    }
}

#[async_trait]
impl<S: Store> RecordStore for TimeoutStore<S> {
    async fn save(&self, target: &str) -> Result<SaveOutcome> {
        self.bounded("save", self.inner.save(target)).await
    }

    async fn save_batch(&self, targets: &[String]) -> Result<Vec<String>> {
        self.bounded("save_batch", self.inner.save_batch(targets))
            .await
    }

    async fn load(&self, id: &str) -> Result<String> {
        self.bounded("load", self.inner.load(id)).await
    }

    async fn ping(&self) -> Result<()> {
        self.bounded("ping", self.inner.ping()).await
    }

    async fn close(&self) -> Result<()> {
        self.bounded("close", self.inner.close()).await
    }
}

#[async_trait]
impl<S: Store> PartitionIndex for TimeoutStore<S> {
    async fn save_for_user(&self, owner: OwnerId, target: &str) -> Result<SaveOutcome> {
        self.bounded("save_for_user", self.inner.save_for_user(owner, target))
            .await
    }

    async fn save_batch_for_user(
        &self,
        owner: OwnerId,
        targets: &[String],
    ) -> Result<Vec<String>> {
        self.bounded(
            "save_batch_for_user",
            self.inner.save_batch_for_user(owner, targets),
        )
        .await
    }

    async fn load_for_user(&self, owner: OwnerId, id: &str) -> Result<String> {
        self.bounded("load_for_user", self.inner.load_for_user(owner, id))
            .await
    }

    async fn list_for_user(&self, owner: OwnerId) -> Result<HashMap<String, String>> {
        self.bounded("list_for_user", self.inner.list_for_user(owner))
            .await
    }

    async fn delete_for_user(&self, owner: OwnerId, ids: &[String]) -> Result<()> {
        self.bounded("delete_for_user", self.inner.delete_for_user(owner, ids))
            .await
    }
}

#[async_trait]
impl<S: Store> Statistics for TimeoutStore<S> {
    async fn count_users(&self) -> Result<u64> {
        self.bounded("count_users", self.inner.count_users()).await
    }

    async fn count_urls(&self) -> Result<u64> {
        self.bounded("count_urls", self.inner.count_urls()).await
    }
}
