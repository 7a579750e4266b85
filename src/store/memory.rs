use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{Store, StoreError, StoreOp};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct State {
    strings: HashMap<String, Entry>,
    sets: HashMap<String, BTreeSet<String>>,
    hashes: HashMap<String, BTreeMap<String, String>>,
}

impl State {
    fn apply(&mut self, op: StoreOp, now: DateTime<Utc>) {
        match op {
            StoreOp::Set { key, value, ttl } => {
                // A TTL past the representable range never expires.
                let expires_at = ttl.and_then(|ttl| now.checked_add_signed(ttl));
                self.strings.insert(key, Entry { value, expires_at });
            }
            StoreOp::Delete { key } => {
                self.strings.remove(&key);
                self.sets.remove(&key);
                self.hashes.remove(&key);
            }
            StoreOp::AddMembers { key, members } => {
                self.sets.entry(key).or_default().extend(members);
            }
            StoreOp::HashSet { key, field, value } => {
                self.hashes.entry(key).or_default().insert(field, value);
            }
            StoreOp::HashDelete { key, field } => {
                if let Some(hash) = self.hashes.get_mut(&key) {
                    hash.remove(&field);
                    if hash.is_empty() {
                        self.hashes.remove(&key);
                    }
                }
            }
        }
    }

    fn purge_expired(&mut self, now: DateTime<Utc>) {
        self.strings.retain(|_, entry| entry.is_live(now));
    }
}

/// In-process store. Batches run under a single write lock.
///
/// When opened with a path, the whole state is written to disk as JSON after
/// every batch and reloaded on open.
pub struct MemoryStore {
    state: RwLock<State>,
    path: Option<PathBuf>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            path: None,
        }
    }

    /// Opens a file-backed store, starting empty if the file does not exist.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let state = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str(&raw).map_err(|source| StoreError::Encoding {
                key: path.display().to_string(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "store file not found; starting empty");
                State::default()
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.display().to_string(),
                    source,
                })
            }
        };

        Ok(Self {
            state: RwLock::new(state),
            path: Some(path),
        })
    }

    async fn persist(&self, state: &State) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let io_err = |source| StoreError::Io {
            path: path.display().to_string(),
            source,
        };

        let json = serde_json::to_string(state).map_err(|source| StoreError::Encoding {
            key: path.display().to_string(),
            source,
        })?;
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, json).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, path).await.map_err(io_err)?;
        debug!(path = %path.display(), "store persisted");
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Utc::now();
        let state = self.state.read().await;
        Ok(state
            .strings
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn members(&self, key: &str) -> Result<BTreeSet<String>, StoreError> {
        let state = self.state.read().await;
        Ok(state.sets.get(key).cloned().unwrap_or_default())
    }

    async fn hash_entries(&self, key: &str) -> Result<BTreeMap<String, String>, StoreError> {
        let state = self.state.read().await;
        Ok(state.hashes.get(key).cloned().unwrap_or_default())
    }

    async fn apply(&self, ops: Vec<StoreOp>) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut state = self.state.write().await;
        let mut next = state.clone();
        for op in ops {
            next.apply(op, now);
        }
        next.purge_expired(now);
        // Readers only see the batch once it is on disk.
        self.persist(&next).await?;
        *state = next;
        Ok(())
    }
}
