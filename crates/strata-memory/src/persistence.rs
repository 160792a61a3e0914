//! Durable backends and the write-behind queue that mirrors store mutations.

use crate::error::MemoryError;
use crate::model::{ContextEntry, EntryKey};
use crate::scope::resolve;
use crate::store::ChangeSink;
use async_trait::async_trait;
use chrono::Utc;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

const SCHEMA_VERSION: u32 = 1;

/// Durable collaborator the coordinator mirrors writes into.
#[async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Short name reported in health output.
    fn name(&self) -> &str;

    /// Every entry that should be live after a restart.
    async fn load(&self) -> Result<Vec<ContextEntry>, MemoryError>;

    async fn upsert(&self, entry: &ContextEntry) -> Result<(), MemoryError>;

    async fn remove(&self, key: &EntryKey) -> Result<(), MemoryError>;

    /// Make previously accepted writes durable.
    async fn flush(&self) -> Result<(), MemoryError> {
        Ok(())
    }
}

/// One line of the JSONL log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum LogEvent {
    SchemaVersion { version: u32 },
    Upsert { entry: Box<ContextEntry> },
    Remove { key: EntryKey },
}

/// Append-only JSONL log of upserts and removals, compacted on load.
///
/// File work runs on the blocking pool so a stuck filesystem never stalls the
/// runtime, and an init timeout around [`PersistenceBackend::load`] can fire.
pub struct JsonlPersistence {
    log: Arc<JsonlLog>,
}

impl JsonlPersistence {
    /// Open (or create) the log at `path`.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, MemoryError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        info!("initialized JSONL persistence (path={})", path.display());
        Ok(Self {
            log: Arc::new(JsonlLog {
                path,
                write_lock: Mutex::new(()),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.log.path
    }

    async fn run_blocking<F, R>(&self, f: F) -> Result<R, MemoryError>
    where
        F: FnOnce(&JsonlLog) -> Result<R, MemoryError> + Send + 'static,
        R: Send + 'static,
    {
        let log = Arc::clone(&self.log);
        tokio::task::spawn_blocking(move || f(&log))
            .await
            .map_err(|err| {
                MemoryError::BackendUnavailable(format!("jsonl worker failed: {err}"))
            })?
    }
}

struct JsonlLog {
    path: PathBuf,
    /// Serialize access to the log file.
    write_lock: Mutex<()>,
}

impl JsonlLog {
    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    fn append(&self, event: &LogEvent) -> Result<(), MemoryError> {
        let _guard = self.write_lock.lock();
        let fresh = !self.path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        if fresh {
            let header = serde_json::to_string(&LogEvent::SchemaVersion {
                version: SCHEMA_VERSION,
            })?;
            writeln!(file, "{header}")?;
        }
        let line = serde_json::to_string(event)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// Replay the log, drop expired entries, and compact what is left.
    fn load(&self) -> Result<Vec<ContextEntry>, MemoryError> {
        let now = Utc::now();
        let entries: Vec<ContextEntry> = self
            .replay()?
            .into_values()
            .filter(|entry| !entry.is_expired(now))
            .collect();
        self.compact(&entries)?;
        Ok(entries)
    }

    /// Replay the log into the set of entries it describes.
    fn replay(&self) -> Result<HashMap<EntryKey, ContextEntry>, MemoryError> {
        let mut live = HashMap::new();
        if !self.path.exists() {
            return Ok(live);
        }
        let file = OpenOptions::new().read(true).open(&self.path)?;
        for (number, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let event: LogEvent = match serde_json::from_str(&line) {
                Ok(event) => event,
                Err(err) => {
                    warn!(
                        "skipping malformed persistence line (path={}, line={}, error={})",
                        self.path.display(),
                        number + 1,
                        err
                    );
                    continue;
                }
            };
            match event {
                LogEvent::SchemaVersion { version } if version > SCHEMA_VERSION => {
                    return Err(MemoryError::Validation(format!(
                        "unsupported persistence schema version {version}"
                    )));
                }
                LogEvent::SchemaVersion { .. } => {}
                LogEvent::Upsert { entry } => match resolve(entry.scope, &entry.ids) {
                    Ok(namespace) => {
                        let key = EntryKey::new(entry.layer, namespace, entry.key.clone());
                        live.insert(key, *entry);
                    }
                    Err(err) => warn!(
                        "skipping persisted entry without namespace (key={}, layer={}, error={})",
                        entry.key, entry.layer, err
                    ),
                },
                LogEvent::Remove { key } => {
                    live.remove(&key);
                }
            }
        }
        Ok(live)
    }

    /// Rewrite the log so it holds exactly `entries`.
    fn compact(&self, entries: &[ContextEntry]) -> Result<(), MemoryError> {
        let _guard = self.write_lock.lock();
        let temp_path = self.temp_path();
        {
            let mut file = OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(&temp_path)?;
            let header = serde_json::to_string(&LogEvent::SchemaVersion {
                version: SCHEMA_VERSION,
            })?;
            writeln!(file, "{header}")?;
            for entry in entries {
                let line = serde_json::to_string(&LogEvent::Upsert {
                    entry: Box::new(entry.clone()),
                })?;
                writeln!(file, "{line}")?;
            }
            file.sync_all()?;
        }
        fs::rename(temp_path, &self.path)?;
        Ok(())
    }
}

#[async_trait]
impl PersistenceBackend for JsonlPersistence {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn load(&self) -> Result<Vec<ContextEntry>, MemoryError> {
        let entries = self.run_blocking(JsonlLog::load).await?;
        info!(
            "loaded persisted context entries (path={}, entries={})",
            self.log.path.display(),
            entries.len()
        );
        Ok(entries)
    }

    async fn upsert(&self, entry: &ContextEntry) -> Result<(), MemoryError> {
        let event = LogEvent::Upsert {
            entry: Box::new(entry.clone()),
        };
        self.run_blocking(move |log| log.append(&event)).await
    }

    async fn remove(&self, key: &EntryKey) -> Result<(), MemoryError> {
        let event = LogEvent::Remove { key: key.clone() };
        self.run_blocking(move |log| log.append(&event)).await
    }
}

/// Sticky degraded marker shared by a coordinator and its background tasks.
#[derive(Debug, Default)]
pub(crate) struct HealthFlag {
    reason: Mutex<Option<String>>,
}

impl HealthFlag {
    pub(crate) fn degraded(reason: impl Into<String>) -> Self {
        Self {
            reason: Mutex::new(Some(reason.into())),
        }
    }

    /// Record the first failure; later failures only log.
    pub(crate) fn degrade(&self, reason: impl Into<String>) {
        let mut current = self.reason.lock();
        if current.is_none() {
            let reason = reason.into();
            warn!("coordinator degraded (reason={})", reason);
            *current = Some(reason);
        }
    }

    pub(crate) fn reason(&self) -> Option<String> {
        self.reason.lock().clone()
    }
}

enum PersistOp {
    Upsert(Box<ContextEntry>),
    Remove(EntryKey),
    Flush(oneshot::Sender<()>),
}

/// Bounded queue between the store and a persistence backend.
///
/// Enqueueing never blocks: a full or closed queue drops the write and marks
/// the coordinator degraded.
pub(crate) struct WriteBehind {
    tx: mpsc::Sender<PersistOp>,
    health: Arc<HealthFlag>,
}

impl WriteBehind {
    /// Spawn the drain task on the current runtime.
    pub(crate) fn spawn(
        backend: Arc<dyn PersistenceBackend>,
        capacity: usize,
        health: Arc<HealthFlag>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = tokio::spawn(drain(backend, rx, Arc::clone(&health)));
        (Self { tx, health }, worker)
    }

    /// Wait until every write queued before this call has been applied.
    pub(crate) async fn flush(&self) -> Result<(), MemoryError> {
        let (done, wait) = oneshot::channel();
        self.tx
            .send(PersistOp::Flush(done))
            .await
            .map_err(|_| MemoryError::BackendUnavailable("write-behind queue closed".into()))?;
        wait.await
            .map_err(|_| MemoryError::BackendUnavailable("write-behind worker stopped".into()))
    }

    fn enqueue(&self, op: PersistOp, key: &EntryKey) {
        if let Err(err) = self.tx.try_send(op) {
            let cause = match err {
                mpsc::error::TrySendError::Full(_) => "queue full",
                mpsc::error::TrySendError::Closed(_) => "queue closed",
            };
            error!(
                "dropped persistence write (namespace={}, key={}, layer={}, cause={})",
                key.namespace, key.key, key.layer, cause
            );
            self.health
                .degrade(format!("write-behind {cause} (key={})", key));
        }
    }
}

impl ChangeSink for WriteBehind {
    fn upserted(&self, entry: &ContextEntry) {
        match resolve(entry.scope, &entry.ids) {
            Ok(namespace) => {
                let key = EntryKey::new(entry.layer, namespace, entry.key.clone());
                self.enqueue(PersistOp::Upsert(Box::new(entry.clone())), &key);
            }
            Err(err) => error!(
                "cannot persist entry without namespace (key={}, layer={}, error={})",
                entry.key, entry.layer, err
            ),
        }
    }

    fn removed(&self, key: &EntryKey) {
        self.enqueue(PersistOp::Remove(key.clone()), key);
    }
}

async fn drain(
    backend: Arc<dyn PersistenceBackend>,
    mut rx: mpsc::Receiver<PersistOp>,
    health: Arc<HealthFlag>,
) {
    while let Some(op) = rx.recv().await {
        match op {
            PersistOp::Upsert(entry) => {
                if let Err(err) = backend.upsert(&entry).await {
                    error!(
                        "persistence upsert failed (backend={}, key={}, layer={}, scope={}, error={})",
                        backend.name(),
                        entry.key,
                        entry.layer,
                        entry.scope,
                        err
                    );
                    health.degrade(format!("{} upsert failed: {err}", backend.name()));
                }
            }
            PersistOp::Remove(key) => {
                if let Err(err) = backend.remove(&key).await {
                    error!(
                        "persistence remove failed (backend={}, namespace={}, key={}, layer={}, error={})",
                        backend.name(),
                        key.namespace,
                        key.key,
                        key.layer,
                        err
                    );
                    health.degrade(format!("{} remove failed: {err}", backend.name()));
                }
            }
            PersistOp::Flush(done) => {
                if let Err(err) = backend.flush().await {
                    error!(
                        "persistence flush failed (backend={}, error={})",
                        backend.name(),
                        err
                    );
                    health.degrade(format!("{} flush failed: {err}", backend.name()));
                }
                let _ = done.send(());
            }
        }
    }
    debug!("write-behind worker stopped (backend={})", backend.name());
}

#[cfg(test)]
mod tests {
    use super::{JsonlPersistence, PersistenceBackend};
    use crate::model::{ContextScope, EntryKey, MemoryLayer, ScopeIds, StoreRequest};
    use crate::scope::Namespace;
    use crate::store::EntryStore;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::fs;
    use tempfile::tempdir;

    fn seeded(keys: &[&str]) -> Vec<crate::model::ContextEntry> {
        let store = EntryStore::default();
        for key in keys {
            store
                .store(StoreRequest::new(
                    *key,
                    json!(key),
                    MemoryLayer::LongTerm,
                    ContextScope::Global,
                ))
                .expect("store");
        }
        store
            .list_namespace(ContextScope::Global, &ScopeIds::default(), &[])
            .expect("list")
    }

    #[tokio::test]
    async fn replays_upserts_and_removals() {
        let temp = tempdir().expect("tmp");
        let backend = JsonlPersistence::new(temp.path().join("state/entries.jsonl")).expect("open");
        for entry in seeded(&["a", "b"]) {
            backend.upsert(&entry).await.expect("upsert");
        }
        backend
            .remove(&EntryKey::new(MemoryLayer::LongTerm, Namespace::global(), "a"))
            .await
            .expect("remove");

        let loaded = backend.load().await.expect("load");
        let keys: Vec<&str> = loaded.iter().map(|entry| entry.key.as_str()).collect();
        assert_eq!(keys, vec!["b"]);

        let compacted = fs::read_to_string(backend.path()).expect("read");
        assert_eq!(compacted.lines().count(), 2);
        assert!(compacted.lines().next().unwrap_or_default().contains("schema_version"));
    }

    #[tokio::test]
    async fn skips_malformed_lines() {
        let temp = tempdir().expect("tmp");
        let path = temp.path().join("entries.jsonl");
        let backend = JsonlPersistence::new(&path).expect("open");
        for entry in seeded(&["a"]) {
            backend.upsert(&entry).await.expect("upsert");
        }
        let mut raw = fs::read_to_string(&path).expect("read");
        raw.push_str("{\"type\":\"upsert\",\"entry\":\n");
        fs::write(&path, raw).expect("write");

        let loaded = backend.load().await.expect("load");
        assert_eq!(loaded.len(), 1);
    }

    #[tokio::test]
    async fn rejects_newer_schema() {
        let temp = tempdir().expect("tmp");
        let path = temp.path().join("entries.jsonl");
        fs::write(&path, "{\"type\":\"schema_version\",\"version\":9}\n").expect("write");
        let backend = JsonlPersistence::new(&path).expect("open");
        let err = backend.load().await.expect_err("schema");
        assert!(err.is_validation());
    }
}
