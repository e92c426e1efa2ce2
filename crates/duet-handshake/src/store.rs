//! Persisted invitations
//!
//! Durable client-side records, keyed by `(session_id, participant)`, so that
//! a restarted client can resume every invitation it created or received.
//! Writes are update-by-key: the file backend re-reads the map before each
//! write and replaces it atomically, so records owned by other keys are
//! carried over untouched. The re-read/replace cycle is exclusive across
//! store instances and processes sharing one file.

use crate::lifecycle::Role;
use async_trait::async_trait;
use duet_core::{Address, HandshakeError, Result, SessionId, Wager};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Pause between attempts to take a held lock file
const LOCK_RETRY: Duration = Duration::from_millis(10);

/// A lock file older than this was left by a crashed writer
const STALE_LOCK_AGE: Duration = Duration::from_secs(10);

/// Give up waiting for the lock file after this long
const LOCK_TIMEOUT: Duration = Duration::from_secs(15);

/// One durable invitation record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedInvitation {
    /// Session the invitation creates
    pub session_id: SessionId,
    /// Local participant owning the record
    pub participant: Address,
    /// Side the participant plays
    pub role: Role,
    /// Invitation token
    pub auth_token: String,
    /// Joiner's chosen wager, once entered
    #[serde(default)]
    pub joiner_wager: Option<Wager>,
    /// Explicitly abandoned by the joiner
    #[serde(default)]
    pub cancelled: bool,
    /// Last write, milliseconds since the Unix epoch
    pub saved_at_ms: u64,
}

impl PersistedInvitation {
    /// Fresh record stamped with the current time
    pub fn new(
        session_id: SessionId,
        participant: Address,
        role: Role,
        auth_token: String,
    ) -> Self {
        Self {
            session_id,
            participant,
            role,
            auth_token,
            joiner_wager: None,
            cancelled: false,
            saved_at_ms: now_ms(),
        }
    }

    /// Storage key
    pub fn key(&self) -> String {
        store_key(self.session_id, &self.participant)
    }
}

fn store_key(session_id: SessionId, participant: &Address) -> String {
    format!("{session_id}:{participant}")
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Durable invitation storage
#[async_trait]
pub trait InvitationStore: Send + Sync {
    /// Record for `(session_id, participant)`, if any
    async fn load(
        &self,
        session_id: SessionId,
        participant: &Address,
    ) -> Result<Option<PersistedInvitation>>;

    /// Insert or replace the record under its key
    async fn upsert(&self, record: PersistedInvitation) -> Result<()>;

    /// Remove the record; returns whether one existed
    async fn remove(&self, session_id: SessionId, participant: &Address) -> Result<bool>;

    /// Every record owned by `participant`, ordered by session id
    async fn list(&self, participant: &Address) -> Result<Vec<PersistedInvitation>>;
}

/// In-memory store for tests and ephemeral clients
#[derive(Debug, Clone, Default)]
pub struct MemoryInvitationStore {
    records: Arc<Mutex<BTreeMap<String, PersistedInvitation>>>,
}

impl MemoryInvitationStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InvitationStore for MemoryInvitationStore {
    async fn load(
        &self,
        session_id: SessionId,
        participant: &Address,
    ) -> Result<Option<PersistedInvitation>> {
        Ok(self
            .records
            .lock()
            .get(&store_key(session_id, participant))
            .cloned())
    }

    async fn upsert(&self, mut record: PersistedInvitation) -> Result<()> {
        record.saved_at_ms = now_ms();
        self.records.lock().insert(record.key(), record);
        Ok(())
    }

    async fn remove(&self, session_id: SessionId, participant: &Address) -> Result<bool> {
        Ok(self
            .records
            .lock()
            .remove(&store_key(session_id, participant))
            .is_some())
    }

    async fn list(&self, participant: &Address) -> Result<Vec<PersistedInvitation>> {
        Ok(sorted(
            self.records
                .lock()
                .values()
                .filter(|record| &record.participant == participant)
                .cloned()
                .collect(),
        ))
    }
}

fn sorted(mut records: Vec<PersistedInvitation>) -> Vec<PersistedInvitation> {
    records.sort_by_key(|record| record.session_id);
    records
}

/// JSON-file store
///
/// The whole map lives in one file. Each write re-reads the file, applies a
/// single keyed change and renames a uniquely named temp file over the
/// original. Writers in one process queue on a lock shared per path; writers
/// in different processes exclude each other through a `<file>.lock` sidecar.
#[derive(Debug, Clone)]
pub struct FileInvitationStore {
    path: PathBuf,
}

type RecordMap = BTreeMap<String, PersistedInvitation>;

type PathLocks = Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>;

/// Process-wide writer lock for one store file
fn path_lock(path: &Path) -> Arc<tokio::sync::Mutex<()>> {
    static LOCKS: OnceLock<PathLocks> = OnceLock::new();
    let key = match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => std::fs::canonicalize(parent)
            .map(|dir| dir.join(name))
            .unwrap_or_else(|_| path.to_path_buf()),
        _ => path.to_path_buf(),
    };
    LOCKS
        .get_or_init(Default::default)
        .lock()
        .entry(key)
        .or_default()
        .clone()
}

/// Held sidecar lock file, removed on drop
struct LockFile {
    path: PathBuf,
}

impl LockFile {
    async fn acquire(path: PathBuf) -> Result<Self> {
        let deadline = tokio::time::Instant::now() + LOCK_TIMEOUT;
        loop {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(_) => return Ok(Self { path }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if lock_is_stale(&path).await {
                        tracing::warn!(path = %path.display(), "removing stale store lock");
                        let _ = fs::remove_file(&path).await;
                        continue;
                    }
                    if tokio::time::Instant::now() >= deadline {
                        return Err(HandshakeError::storage(format!(
                            "timed out waiting for {}",
                            path.display()
                        )));
                    }
                    tokio::time::sleep(LOCK_RETRY).await;
                }
                Err(e) => {
                    return Err(HandshakeError::storage(format!(
                        "failed to lock {}: {e}",
                        path.display()
                    )))
                }
            }
        }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

async fn lock_is_stale(path: &Path) -> bool {
    match fs::metadata(path).await.and_then(|meta| meta.modified()) {
        Ok(modified) => modified
            .elapsed()
            .map(|age| age > STALE_LOCK_AGE)
            .unwrap_or(false),
        Err(_) => false,
    }
}

impl FileInvitationStore {
    /// Store backed by `path`; the file is created on first write
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(suffix);
        self.path.with_file_name(name)
    }

    async fn read_map(&self) -> Result<RecordMap> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(RecordMap::new()),
            Err(e) => {
                return Err(HandshakeError::storage(format!(
                    "failed to read {}: {e}",
                    self.path.display()
                )))
            }
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(RecordMap::new());
        }
        serde_json::from_slice(&bytes).map_err(|e| {
            HandshakeError::storage(format!(
                "corrupt invitation store {}: {e}",
                self.path.display()
            ))
        })
    }

    async fn write_map(&self, map: &RecordMap) -> Result<()> {
        let data = serde_json::to_vec_pretty(map)?;
        let temp_path = self.sibling(&format!(
            ".tmp.{}.{:016x}",
            std::process::id(),
            rand::random::<u64>()
        ));

        let written = async {
            let mut file = fs::File::create(&temp_path).await.map_err(|e| {
                HandshakeError::storage(format!("failed to create temp file: {e}"))
            })?;
            file.write_all(&data)
                .await
                .map_err(|e| HandshakeError::storage(format!("failed to write store: {e}")))?;
            file.sync_all()
                .await
                .map_err(|e| HandshakeError::storage(format!("failed to sync store: {e}")))?;
            fs::rename(&temp_path, &self.path)
                .await
                .map_err(|e| HandshakeError::storage(format!("failed to replace store: {e}")))
        }
        .await;
        if written.is_err() {
            let _ = fs::remove_file(&temp_path).await;
        }
        written
    }

    /// Re-read, apply `change` to one key, write back, all under both locks
    async fn update<R>(&self, change: impl FnOnce(&mut RecordMap) -> R) -> Result<R> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let in_process = path_lock(&self.path);
        let _guard = in_process.lock().await;
        let _lock_file = LockFile::acquire(self.sibling(".lock")).await?;

        let mut map = self.read_map().await?;
        let result = change(&mut map);
        self.write_map(&map).await?;
        Ok(result)
    }
}

#[async_trait]
impl InvitationStore for FileInvitationStore {
    async fn load(
        &self,
        session_id: SessionId,
        participant: &Address,
    ) -> Result<Option<PersistedInvitation>> {
        Ok(self
            .read_map()
            .await?
            .remove(&store_key(session_id, participant)))
    }

    async fn upsert(&self, mut record: PersistedInvitation) -> Result<()> {
        record.saved_at_ms = now_ms();
        let key = record.key();
        tracing::debug!(key = %key, path = %self.path.display(), "persisting invitation");
        self.update(move |map| {
            map.insert(key, record);
        })
        .await
    }

    async fn remove(&self, session_id: SessionId, participant: &Address) -> Result<bool> {
        let key = store_key(session_id, participant);
        self.update(move |map| map.remove(&key).is_some()).await
    }

    async fn list(&self, participant: &Address) -> Result<Vec<PersistedInvitation>> {
        Ok(sorted(
            self.read_map()
                .await?
                .into_values()
                .filter(|record| &record.participant == participant)
                .collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duet_testkit::{initiator, joiner};

    fn record(session_id: SessionId, participant: Address, role: Role) -> PersistedInvitation {
        PersistedInvitation::new(session_id, participant, role, format!("token-{session_id}"))
    }

    #[tokio::test]
    async fn test_memory_store_keys_by_session_and_participant() {
        let store = MemoryInvitationStore::new();
        store.upsert(record(1, initiator(), Role::Initiator)).await.unwrap();
        store.upsert(record(1, joiner(), Role::Joiner)).await.unwrap();

        assert_eq!(store.list(&initiator()).await.unwrap().len(), 1);
        assert_eq!(
            store.load(1, &joiner()).await.unwrap().unwrap().role,
            Role::Joiner
        );
        assert!(store.remove(1, &joiner()).await.unwrap());
        assert!(!store.remove(1, &joiner()).await.unwrap());
        assert!(store.load(1, &initiator()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_file_store_round_trip_and_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileInvitationStore::new(dir.path().join("nested").join("store.json"));
        assert!(store.list(&initiator()).await.unwrap().is_empty());

        store.upsert(record(9, initiator(), Role::Initiator)).await.unwrap();
        store.upsert(record(3, initiator(), Role::Initiator)).await.unwrap();
        let ids: Vec<_> = store
            .list(&initiator())
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.session_id)
            .collect();
        assert_eq!(ids, vec![3, 9]);
    }

    #[tokio::test]
    async fn test_file_store_preserves_foreign_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let first = FileInvitationStore::new(&path);
        let second = FileInvitationStore::new(&path);

        first.upsert(record(1, initiator(), Role::Initiator)).await.unwrap();
        second.upsert(record(2, joiner(), Role::Joiner)).await.unwrap();
        let mut cancelled = record(1, initiator(), Role::Initiator);
        cancelled.cancelled = true;
        first.upsert(cancelled).await.unwrap();

        assert!(first.load(2, &joiner()).await.unwrap().is_some());
        assert!(second.load(1, &initiator()).await.unwrap().unwrap().cancelled);
    }

    #[tokio::test]
    async fn test_file_store_concurrent_writers_keep_every_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let writers: Vec<_> = (0..16u32)
            .map(|session_id| {
                let store = FileInvitationStore::new(&path);
                let participant = if session_id % 2 == 0 { initiator() } else { joiner() };
                tokio::spawn(async move {
                    store
                        .upsert(record(session_id, participant, Role::Initiator))
                        .await
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap().unwrap();
        }

        let store = FileInvitationStore::new(&path);
        for session_id in 0..16u32 {
            let participant = if session_id % 2 == 0 { initiator() } else { joiner() };
            assert!(
                store.load(session_id, &participant).await.unwrap().is_some(),
                "record {session_id} lost"
            );
        }
        assert!(!store.sibling(".lock").exists());
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[tokio::test]
    async fn test_stale_lock_file_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileInvitationStore::new(dir.path().join("store.json"));
        let lock = store.sibling(".lock");
        std::fs::write(&lock, b"").unwrap();
        let old = SystemTime::now() - STALE_LOCK_AGE * 2;
        std::fs::File::options()
            .write(true)
            .open(&lock)
            .unwrap()
            .set_modified(old)
            .unwrap();

        store.upsert(record(1, initiator(), Role::Initiator)).await.unwrap();
        assert!(store.load(1, &initiator()).await.unwrap().is_some());
        assert!(!lock.exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, b"{not json").unwrap();
        let store = FileInvitationStore::new(&path);
        assert!(matches!(
            store.list(&initiator()).await,
            Err(HandshakeError::Storage { .. })
        ));
    }
}
