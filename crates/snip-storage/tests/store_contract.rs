//! Behaviour every in-process backend must share.

use std::collections::HashMap;
use std::sync::Arc;

use snip_storage::{FileStore, MemoryStore, SaveOutcome, Store, StoreError};
use tempfile::TempDir;
use uuid::Uuid;

fn urls(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

async fn anonymous_dedup(store: impl Store) {
    let first = store.save("https://example.com/").await.unwrap();
    assert_eq!(first, SaveOutcome::created("0"));

    let second = store.save("https://example.com/").await.unwrap();
    assert_eq!(second, SaveOutcome::existing("0"));

    // anonymous records are not in any partition, so no owner can delete them
    store
        .delete_for_user(Uuid::new_v4(), &urls(&["0"]))
        .await
        .unwrap();
    assert_eq!(store.load("0").await.unwrap(), "https://example.com/");
}

async fn user_delete_flow(store: impl Store) {
    let owner = Uuid::new_v4();
    let a = store.save_for_user(owner, "https://a").await.unwrap();
    let b = store.save_for_user(owner, "https://b").await.unwrap();

    let listed = store.list_for_user(owner).await.unwrap();
    assert_eq!(
        listed,
        HashMap::from([
            (a.id.clone(), "https://a".to_string()),
            (b.id.clone(), "https://b".to_string()),
        ])
    );

    store
        .delete_for_user(owner, &[a.id.clone()])
        .await
        .unwrap();

    let listed = store.list_for_user(owner).await.unwrap();
    assert_eq!(
        listed,
        HashMap::from([(b.id.clone(), "https://b".to_string())])
    );
    assert_eq!(
        store.load_for_user(owner, &a.id).await.unwrap_err(),
        StoreError::Deleted
    );
    assert_eq!(store.load_for_user(owner, &b.id).await.unwrap(), "https://b");
}

async fn tombstones_are_permanent(store: impl Store) {
    let owner = Uuid::new_v4();
    let saved = store.save_for_user(owner, "https://gone").await.unwrap();
    store
        .delete_for_user(owner, &[saved.id.clone()])
        .await
        .unwrap();

    // deleting twice is a no-op
    store
        .delete_for_user(owner, &[saved.id.clone()])
        .await
        .unwrap();

    // re-shortening allocates a fresh id; the old one stays deleted
    let again = store.save_for_user(owner, "https://gone").await.unwrap();
    assert!(!again.conflict);
    assert_ne!(again.id, saved.id);

    for _ in 0..3 {
        assert_eq!(store.load(&saved.id).await.unwrap_err(), StoreError::Deleted);
    }
    assert_eq!(store.count_urls().await.unwrap(), 2);
}

async fn batch_semantics(store: impl Store) {
    let owner = Uuid::new_v4();
    store.save("https://existing").await.unwrap();

    let ids = store
        .save_batch_for_user(
            owner,
            &urls(&["https://x", "https://existing", "https://y", "https://x"]),
        )
        .await
        .unwrap();

    assert_eq!(ids.len(), 4);
    assert_eq!(ids[1], "0");
    assert_eq!(ids[0], ids[3]);
    assert_ne!(ids[0], ids[2]);

    // the pre-existing anonymous record did not join the owner's partition
    let listed = store.list_for_user(owner).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert!(!listed.contains_key("0"));

    let empty = store.save_batch(&[]).await.unwrap();
    assert!(empty.is_empty());
}

async fn partition_isolation(store: impl Store) {
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();

    let first = store.save_for_user(alice, "https://shared").await.unwrap();
    let second = store.save_for_user(bob, "https://shared").await.unwrap();

    assert!(!first.conflict);
    assert_eq!(second, SaveOutcome::existing(first.id.clone()));
    assert_eq!(
        store.list_for_user(bob).await.unwrap_err(),
        StoreError::NotFound
    );

    // bob cannot delete alice's record
    store
        .delete_for_user(bob, &[first.id.clone()])
        .await
        .unwrap();
    assert_eq!(store.load(&first.id).await.unwrap(), "https://shared");
}

async fn statistics(store: impl Store) {
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();

    store.save("https://anonymous").await.unwrap();
    let a = store.save_for_user(alice, "https://a").await.unwrap();
    store.save_for_user(bob, "https://b").await.unwrap();
    store.delete_for_user(alice, &[a.id]).await.unwrap();

    assert_eq!(store.count_users().await.unwrap(), 2);
    assert_eq!(store.count_urls().await.unwrap(), 3);
}

async fn concurrent_save_race(store: impl Store) {
    let store = Arc::new(store);
    let mut handles = vec![];

    for _ in 0..16 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store.save("https://race.example").await.unwrap()
        }));
    }

    let mut outcomes = vec![];
    for handle in handles {
        outcomes.push(handle.await.unwrap());
    }

    let first_id = &outcomes[0].id;
    assert!(outcomes.iter().all(|o| &o.id == first_id));
    assert_eq!(outcomes.iter().filter(|o| !o.conflict).count(), 1);
    assert_eq!(store.count_urls().await.unwrap(), 1);
}

async fn unknown_lookups(store: impl Store) {
    let owner = Uuid::new_v4();
    assert_eq!(store.load("7").await.unwrap_err(), StoreError::NotFound);
    assert_eq!(
        store.load_for_user(owner, "0").await.unwrap_err(),
        StoreError::NotFound
    );

    store.save_for_user(owner, "https://mine").await.unwrap();
    assert_eq!(
        store.load_for_user(owner, "7").await.unwrap_err(),
        StoreError::NotFound
    );
    store.ping().await.unwrap();
}

mod memory {
    use super::*;

    #[tokio::test]
    async fn anonymous_dedup() {
        super::anonymous_dedup(MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn user_delete_flow() {
        super::user_delete_flow(MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn tombstones_are_permanent() {
        super::tombstones_are_permanent(MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn batch_semantics() {
        super::batch_semantics(MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn partition_isolation() {
        super::partition_isolation(MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn statistics() {
        super::statistics(MemoryStore::new()).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_save_race() {
        super::concurrent_save_race(MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn unknown_lookups() {
        super::unknown_lookups(MemoryStore::new()).await;
    }
}

mod file {
    use super::*;

    struct Scratch {
        _dir: TempDir,
        store: FileStore,
    }

    fn scratch() -> Scratch {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("urls.json")).unwrap();
        Scratch { _dir: dir, store }
    }

    #[tokio::test]
    async fn anonymous_dedup() {
        let s = scratch();
        super::anonymous_dedup(s.store).await;
    }

    #[tokio::test]
    async fn user_delete_flow() {
        let s = scratch();
        super::user_delete_flow(s.store).await;
    }

    #[tokio::test]
    async fn tombstones_are_permanent() {
        let s = scratch();
        super::tombstones_are_permanent(s.store).await;
    }

    #[tokio::test]
    async fn batch_semantics() {
        let s = scratch();
        super::batch_semantics(s.store).await;
    }

    #[tokio::test]
    async fn partition_isolation() {
        let s = scratch();
        super::partition_isolation(s.store).await;
    }

    #[tokio::test]
    async fn statistics() {
        let s = scratch();
        super::statistics(s.store).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_save_race() {
        let s = scratch();
        super::concurrent_save_race(s.store).await;
    }

    #[tokio::test]
    async fn unknown_lookups() {
        let s = scratch();
        super::unknown_lookups(s.store).await;
    }
}
