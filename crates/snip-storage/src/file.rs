use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use snip_core::store::ensure_complete;
use snip_core::{
    id, OwnerId, PartitionIndex, RecordStore, Result, SaveOutcome, Statistics, StoreError,
};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// The persisted blob. `None` marks a tombstone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Snapshot {
    urls: BTreeMap<String, Option<String>>,
    users: BTreeMap<OwnerId, BTreeMap<String, Option<String>>>,
}

#[derive(Debug, Clone, Default)]
struct State {
    snapshot: Snapshot,
    /// Active target -> id, rebuilt from the snapshot on open.
    active: HashMap<String, String>,
    next_seq: u64,
}

impl State {
    fn from_snapshot(snapshot: Snapshot) -> Self {
        let active = snapshot
            .urls
            .iter()
            .filter_map(|(id, target)| target.as_ref().map(|t| (t.clone(), id.clone())))
            .collect();
        let next_seq = snapshot
            .urls
            .keys()
            .filter_map(|raw| id::decode(raw))
            .max()
            .map_or(0, |max| max + 1);

        Self {
            snapshot,
            active,
            next_seq,
        }
    }

    fn insert(&mut self, target: &str, owner: Option<OwnerId>) -> SaveOutcome {
        if let Some(existing) = self.active.get(target) {
            return SaveOutcome::existing(existing.clone());
        }

        let id = id::encode(self.next_seq);
        self.next_seq += 1;
        self.snapshot
            .urls
            .insert(id.clone(), Some(target.to_owned()));
        self.active.insert(target.to_owned(), id.clone());
        if let Some(owner) = owner {
            self.snapshot
                .users
                .entry(owner)
                .or_default()
                .insert(id.clone(), Some(target.to_owned()));
        }

        SaveOutcome::created(id)
    }

    fn insert_batch(&mut self, targets: &[String], owner: Option<OwnerId>) -> Vec<String> {
        targets
            .iter()
            .map(|target| self.insert(target, owner).id)
            .collect()
    }

    /// Tombstones the owner's active ids and returns how many changed.
    fn tombstone(&mut self, owner: OwnerId, ids: &[String]) -> usize {
        let Some(members) = self.snapshot.users.get_mut(&owner) else {
            return 0;
        };

        let mut deleted = 0;
        for id in ids {
            let Some(slot) = members.get_mut(id) else {
                continue;
            };
            let Some(target) = slot.take() else {
                continue;
            };
            self.active.remove(&target);
            self.snapshot.urls.insert(id.clone(), None);
            deleted += 1;
        }
        deleted
    }
}

fn resolve(slot: Option<&Option<String>>) -> Result<String> {
    match slot {
        None => Err(StoreError::NotFound),
        Some(None) => Err(StoreError::Deleted),
        Some(Some(target)) => Ok(target.clone()),
    }
}

fn io_error(context: &str, err: std::io::Error) -> StoreError {
    StoreError::Unavailable(format!("{context}: {err}"))
}

/// State shared between the store handle and its blocking flush tasks.
#[derive(Debug)]
struct Shared {
    path: PathBuf,
    state: RwLock<State>,
    /// Serializes mutations across the whole copy, flush and commit step.
    writer: Mutex<()>,
    closed: AtomicBool,
}

impl Shared {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Unavailable("file store is closed".to_string()));
        }
        Ok(())
    }

    /// Applies `f` to a copy of the state, persists it if `f` reports a
    /// change, then commits the copy.
    fn mutate<T>(&self, f: impl FnOnce(&mut State) -> (T, bool)) -> Result<T> {
        let _writer = self.writer.lock();
        self.ensure_open()?;

        let mut next = self.state.read().clone();
        let (value, changed) = f(&mut next);
        if changed {
            write_snapshot(&self.path, &next.snapshot)?;
            *self.state.write() = next;
        }
        Ok(value)
    }

    fn close(&self) -> Result<()> {
        let _writer = self.writer.lock();
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        write_snapshot(&self.path, &self.state.read().snapshot)?;
        debug!(path = %self.path.display(), "closed file store");
        Ok(())
    }
}

/// Store persisted as a single JSON snapshot file.
///
/// Every mutation rewrites the whole snapshot: the next state is built on a
/// copy, written to a sibling temp file, synced and renamed over the
/// snapshot, and only then swapped in. Write cost is O(store size) per call
/// and the file is never left holding a partial record.
///
/// Flushes run on the blocking pool. Once started, a mutation runs to the
/// end even if its caller is dropped, so an expired deadline leaves the
/// store either fully updated or untouched. Reads only wait for the final
/// swap, not for the flush.
#[derive(Debug)]
pub struct FileStore {
    shared: Arc<Shared>,
}

impl FileStore {
    /// Opens or creates the snapshot at `path`.
    ///
    /// An unreadable snapshot is truncated and the store starts empty. This
    /// does blocking file I/O.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let snapshot = load_snapshot(&path)?;
        let state = State::from_snapshot(snapshot);

        info!(
            path = %path.display(),
            urls = state.snapshot.urls.len(),
            users = state.snapshot.users.len(),
            "opened file store"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                path,
                state: RwLock::new(state),
                writer: Mutex::new(()),
                closed: AtomicBool::new(false),
            }),
        })
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Shared) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        tokio::task::spawn_blocking(move || f(&shared))
            .await
            .map_err(|e| StoreError::Unavailable(format!("snapshot task failed: {e}")))?
    }

    async fn mutate<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut State) -> (T, bool) + Send + 'static,
        T: Send + 'static,
    {
        self.blocking(move |shared| shared.mutate(f)).await
    }
}

fn load_snapshot(path: &Path) -> Result<Snapshot> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            File::create(path).map_err(|e| io_error("cannot create snapshot", e))?;
            return Ok(Snapshot::default());
        }
        Err(err) => return Err(io_error("cannot read snapshot", err)),
    };

    if bytes.is_empty() {
        return Ok(Snapshot::default());
    }

    match serde_json::from_slice(&bytes) {
        Ok(snapshot) => Ok(snapshot),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "snapshot is unreadable, starting empty");
            OpenOptions::new()
                .write(true)
                .truncate(true)
                .open(path)
                .map_err(|e| io_error("cannot truncate broken snapshot", e))?;
            Ok(Snapshot::default())
        }
    }
}

fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<()> {
    let bytes = serde_json::to_vec(snapshot)
        .map_err(|e| StoreError::InvalidData(format!("cannot encode snapshot: {e}")))?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut file = File::create(&tmp).map_err(|e| io_error("cannot create temp snapshot", e))?;
    file.write_all(&bytes)
        .map_err(|e| io_error("cannot write snapshot", e))?;
    file.sync_all()
        .map_err(|e| io_error("cannot sync snapshot", e))?;
    drop(file);
    fs::rename(&tmp, path).map_err(|e| io_error("cannot replace snapshot", e))?;

    trace!(path = %path.display(), bytes = bytes.len(), "flushed snapshot");
    Ok(())
}

#[async_trait]
impl RecordStore for FileStore {
    async fn save(&self, target: &str) -> Result<SaveOutcome> {
        let target = target.to_owned();
        self.mutate(move |state| {
            let outcome = state.insert(&target, None);
            let changed = !outcome.conflict;
            (outcome, changed)
        })
        .await
    }

    async fn save_batch(&self, targets: &[String]) -> Result<Vec<String>> {
        let expected = targets.len();
        let targets = targets.to_vec();
        let ids = self
            .mutate(move |state| {
                let before = state.next_seq;
                let ids = state.insert_batch(&targets, None);
                let changed = state.next_seq != before;
                (ids, changed)
            })
            .await?;
        ensure_complete(expected, ids)
    }

    async fn load(&self, id: &str) -> Result<String> {
        self.shared.ensure_open()?;
        resolve(self.shared.state.read().snapshot.urls.get(id))
    }

    async fn ping(&self) -> Result<()> {
        self.shared.ensure_open()?;
        tokio::fs::metadata(&self.shared.path)
            .await
            .map(|_| ())
            .map_err(|e| io_error("snapshot is not accessible", e))
    }

    async fn close(&self) -> Result<()> {
        self.blocking(Shared::close).await
    }
}

#[async_trait]
impl PartitionIndex for FileStore {
    async fn save_for_user(&self, owner: OwnerId, target: &str) -> Result<SaveOutcome> {
        let target = target.to_owned();
        self.mutate(move |state| {
            let outcome = state.insert(&target, Some(owner));
            let changed = !outcome.conflict;
            (outcome, changed)
        })
        .await
    }

    async fn save_batch_for_user(
        &self,
        owner: OwnerId,
        targets: &[String],
    ) -> Result<Vec<String>> {
        let expected = targets.len();
        let targets = targets.to_vec();
        let ids = self
            .mutate(move |state| {
                let before = state.next_seq;
                let ids = state.insert_batch(&targets, Some(owner));
                let changed = state.next_seq != before;
                (ids, changed)
            })
            .await?;
        ensure_complete(expected, ids)
    }

    async fn load_for_user(&self, owner: OwnerId, id: &str) -> Result<String> {
        self.shared.ensure_open()?;
        let state = self.shared.state.read();
        let members = state
            .snapshot
            .users
            .get(&owner)
            .ok_or(StoreError::NotFound)?;
        resolve(members.get(id))
    }

    async fn list_for_user(&self, owner: OwnerId) -> Result<HashMap<String, String>> {
        self.shared.ensure_open()?;
        let state = self.shared.state.read();
        let members = state
            .snapshot
            .users
            .get(&owner)
            .ok_or(StoreError::NotFound)?;

        Ok(members
            .iter()
            .filter_map(|(id, target)| target.as_ref().map(|t| (id.clone(), t.clone())))
            .collect())
    }

    async fn delete_for_user(&self, owner: OwnerId, ids: &[String]) -> Result<()> {
        let requested = ids.len();
        let ids = ids.to_vec();
        let deleted = self
            .mutate(move |state| {
                let deleted = state.tombstone(owner, &ids);
                (deleted, deleted > 0)
            })
            .await?;
        debug!(%owner, requested, deleted, "tombstoned user urls");
        Ok(())
    }
}

#[async_trait]
impl Statistics for FileStore {
    async fn count_users(&self) -> Result<u64> {
        self.shared.ensure_open()?;
        Ok(self.shared.state.read().snapshot.users.len() as u64)
    }

    async fn count_urls(&self) -> Result<u64> {
        self.shared.ensure_open()?;
        Ok(self.shared.state.read().snapshot.urls.len() as u64)
    }
}
