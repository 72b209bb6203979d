use async_trait::async_trait;
use parking_lot::RwLock;
use snip_core::store::ensure_complete;
use snip_core::{
    id, OwnerId, PartitionIndex, RecordStore, Result, SaveOutcome, Statistics, StoreError,
};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, trace};

/// One allocated id. Slots are never removed, only tombstoned.
#[derive(Debug, Clone)]
struct Slot {
    target: String,
    deleted: bool,
}

#[derive(Debug, Default)]
struct Table {
    /// Indexed by sequence number; the id is the hex rendering of the index.
    slots: Vec<Slot>,
    /// Active target -> slot index.
    active: HashMap<String, usize>,
    partitions: HashMap<OwnerId, BTreeSet<usize>>,
}

impl Table {
    fn insert(&mut self, target: &str, owner: Option<OwnerId>) -> SaveOutcome {
        if let Some(&seq) = self.active.get(target) {
            return SaveOutcome::existing(id::encode(seq as u64));
        }

        let seq = self.slots.len();
        self.slots.push(Slot {
            target: target.to_owned(),
            deleted: false,
        });
        self.active.insert(target.to_owned(), seq);
        if let Some(owner) = owner {
            self.partitions.entry(owner).or_default().insert(seq);
        }

        SaveOutcome::created(id::encode(seq as u64))
    }

    fn insert_batch(&mut self, targets: &[String], owner: Option<OwnerId>) -> Vec<String> {
        targets
            .iter()
            .map(|target| self.insert(target, owner).id)
            .collect()
    }

    fn resolve(&self, seq: usize) -> Result<String> {
        let slot = self.slots.get(seq).ok_or(StoreError::NotFound)?;
        if slot.deleted {
            return Err(StoreError::Deleted);
        }
        Ok(slot.target.clone())
    }
}

fn decode_seq(raw: &str) -> Option<usize> {
    id::decode(raw).and_then(|seq| usize::try_from(seq).ok())
}

/// In-process store backed by a slot table behind a single reader/writer lock.
///
/// Every operation completes inside one lock acquisition with no suspension
/// point, so check-and-insert is atomic and a dropped call never leaves a
/// half-applied save behind.
#[derive(Debug, Default)]
pub struct MemoryStore {
    table: RwLock<Table>,
}

impl MemoryStore {
    /// Creates an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn save(&self, target: &str) -> Result<SaveOutcome> {
        let outcome = self.table.write().insert(target, None);
        trace!(id = %outcome.id, conflict = outcome.conflict, "saved url");
        Ok(outcome)
    }

    async fn save_batch(&self, targets: &[String]) -> Result<Vec<String>> {
        let ids = self.table.write().insert_batch(targets, None);
        ensure_complete(targets.len(), ids)
    }

    async fn load(&self, id: &str) -> Result<String> {
        let seq = decode_seq(id).ok_or(StoreError::NotFound)?;
        self.table.read().resolve(seq)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl PartitionIndex for MemoryStore {
    async fn save_for_user(&self, owner: OwnerId, target: &str) -> Result<SaveOutcome> {
        let outcome = self.table.write().insert(target, Some(owner));
        trace!(%owner, id = %outcome.id, conflict = outcome.conflict, "saved url for user");
        Ok(outcome)
    }

    async fn save_batch_for_user(
        &self,
        owner: OwnerId,
        targets: &[String],
    ) -> Result<Vec<String>> {
        let ids = self.table.write().insert_batch(targets, Some(owner));
        ensure_complete(targets.len(), ids)
    }

    async fn load_for_user(&self, owner: OwnerId, id: &str) -> Result<String> {
        let table = self.table.read();
        let members = table.partitions.get(&owner).ok_or(StoreError::NotFound)?;
        let seq = decode_seq(id)
            .filter(|seq| members.contains(seq))
            .ok_or(StoreError::NotFound)?;
        table.resolve(seq)
    }

    async fn list_for_user(&self, owner: OwnerId) -> Result<HashMap<String, String>> {
        let table = self.table.read();
        let members = table.partitions.get(&owner).ok_or(StoreError::NotFound)?;

        Ok(members
            .iter()
            .filter_map(|&seq| {
                let slot = &table.slots[seq];
                (!slot.deleted).then(|| (id::encode(seq as u64), slot.target.clone()))
            })
            .collect())
    }

    async fn delete_for_user(&self, owner: OwnerId, ids: &[String]) -> Result<()> {
        let mut table = self.table.write();
        let Table {
            slots,
            active,
            partitions,
        } = &mut *table;

        let Some(members) = partitions.get(&owner) else {
            trace!(%owner, "delete for unknown owner ignored");
            return Ok(());
        };

        let mut deleted = 0usize;
        for seq in ids.iter().filter_map(|raw| decode_seq(raw)) {
            if !members.contains(&seq) {
                continue;
            }
            let slot = &mut slots[seq];
            if slot.deleted {
                continue;
            }
            slot.deleted = true;
            active.remove(&slot.target);
            deleted += 1;
        }

        debug!(%owner, requested = ids.len(), deleted, "tombstoned user urls");
        Ok(())
    }
}

#[async_trait]
impl Statistics for MemoryStore {
    async fn count_users(&self) -> Result<u64> {
        Ok(self.table.read().partitions.len() as u64)
    }

    async fn count_urls(&self) -> Result<u64> {
        Ok(self.table.read().slots.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use uuid::Uuid;

    fn urls(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn save_and_load() {
        let store = MemoryStore::new();

        let outcome = store.save("https://example.com/").await.unwrap();
        assert_eq!(outcome, SaveOutcome::created("0"));

        let target = store.load("0").await.unwrap();
        assert_eq!(target, "https://example.com/");
    }

    #[tokio::test]
    async fn duplicate_target_reports_conflict() {
        let store = MemoryStore::new();

        store.save("https://example.com/").await.unwrap();
        let again = store.save("https://example.com/").await.unwrap();

        assert_eq!(again, SaveOutcome::existing("0"));
        assert_eq!(store.count_urls().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn ids_are_hex_counters() {
        let store = MemoryStore::new();
        let targets: Vec<String> = (0..11).map(|i| format!("https://{i}.example")).collect();

        let ids = store.save_batch(&targets).await.unwrap();

        assert_eq!(ids.first().map(String::as_str), Some("0"));
        assert_eq!(ids.last().map(String::as_str), Some("a"));
    }

    #[tokio::test]
    async fn load_unknown_and_malformed_ids() {
        let store = MemoryStore::new();
        store.save("https://example.com/").await.unwrap();

        assert_eq!(store.load("1").await.unwrap_err(), StoreError::NotFound);
        assert_eq!(store.load("00").await.unwrap_err(), StoreError::NotFound);
        assert_eq!(store.load("nope").await.unwrap_err(), StoreError::NotFound);
    }

    #[tokio::test]
    async fn batch_with_repeated_target_reuses_id() {
        let store = MemoryStore::new();

        let ids = store
            .save_batch(&urls(&["https://a", "https://b", "https://a"]))
            .await
            .unwrap();

        assert_eq!(ids, vec!["0", "1", "0"]);
        assert_eq!(store.count_urls().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn delete_tombstones_and_frees_target() {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();

        let first = store.save_for_user(owner, "https://a").await.unwrap();
        store
            .delete_for_user(owner, &[first.id.clone()])
            .await
            .unwrap();

        assert_eq!(store.load(&first.id).await.unwrap_err(), StoreError::Deleted);

        let second = store.save_for_user(owner, "https://a").await.unwrap();
        assert!(!second.conflict);
        assert_ne!(second.id, first.id);
        assert_eq!(store.load(&first.id).await.unwrap_err(), StoreError::Deleted);
    }

    #[tokio::test]
    async fn delete_skips_records_of_other_owners() {
        let store = MemoryStore::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let saved = store.save_for_user(alice, "https://a").await.unwrap();
        store.save_for_user(bob, "https://b").await.unwrap();

        store
            .delete_for_user(bob, &[saved.id.clone()])
            .await
            .unwrap();

        assert_eq!(store.load(&saved.id).await.unwrap(), "https://a");
    }

    #[tokio::test]
    async fn list_distinguishes_unknown_owner_from_empty_partition() {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();

        assert_eq!(
            store.list_for_user(owner).await.unwrap_err(),
            StoreError::NotFound
        );

        let saved = store.save_for_user(owner, "https://a").await.unwrap();
        store.delete_for_user(owner, &[saved.id]).await.unwrap();

        assert!(store.list_for_user(owner).await.unwrap().is_empty());
        assert_eq!(store.count_users().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn conflicting_save_does_not_join_partition() {
        let store = MemoryStore::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let first = store.save_for_user(alice, "https://shared").await.unwrap();
        let second = store.save_for_user(bob, "https://shared").await.unwrap();

        assert_eq!(second, SaveOutcome::existing(first.id.clone()));
        assert_eq!(
            store.list_for_user(bob).await.unwrap_err(),
            StoreError::NotFound
        );
        assert_eq!(
            store.load_for_user(bob, &first.id).await.unwrap_err(),
            StoreError::NotFound
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_saves_of_same_target_allocate_once() {
        let store = Arc::new(MemoryStore::new());
        let mut handles = vec![];

        for _ in 0..32 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.save("https://race.example").await.unwrap()
            }));
        }

        let mut created = 0;
        for handle in handles {
            let outcome = handle.await.unwrap();
            assert_eq!(outcome.id, "0");
            if !outcome.conflict {
                created += 1;
            }
        }

        assert_eq!(created, 1);
        assert_eq!(store.count_urls().await.unwrap(), 1);
    }
}
