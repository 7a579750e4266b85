//! Key-value persistence used for tracked state and enrichment caches.
//!
//! The pipeline only needs get/set/pipeline semantics, so the store is a
//! capability trait. [`MemoryStore`] is the bundled implementation.

mod memory;

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::Duration;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

pub use memory::MemoryStore;

/// Key names shared by every component that touches the store.
pub mod keys {
    pub const KNOWN_IDS: &str = "listings:known_ids";
    pub const SNAPSHOT: &str = "listings:snapshot";
    pub const SNAPSHOT_META: &str = "listings:meta";
    pub const LAST_SYNCED: &str = "listings:last_synced";
    pub const SETTINGS: &str = "settings:filter";
    pub const HISTORY: &str = "notifications:history";
    pub const SUBSCRIPTIONS: &str = "push:subscriptions";

    pub fn score(listing_id: i64) -> String {
        format!("score:{listing_id}")
    }

    pub fn commute(listing_id: i64) -> String {
        format!("commute:{listing_id}")
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("store encoding error for {key}: {source}")]
    Encoding {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// One write inside an atomic batch.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    Set {
        key: String,
        value: String,
        ttl: Option<Duration>,
    },
    Delete {
        key: String,
    },
    AddMembers {
        key: String,
        members: Vec<String>,
    },
    HashSet {
        key: String,
        field: String,
        value: String,
    },
    HashDelete {
        key: String,
        field: String,
    },
}

impl StoreOp {
    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Set {
            key: key.into(),
            value: value.into(),
            ttl: None,
        }
    }

    pub fn set_with_ttl(key: impl Into<String>, value: impl Into<String>, ttl: Duration) -> Self {
        Self::Set {
            key: key.into(),
            value: value.into(),
            ttl: Some(ttl),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self::Delete { key: key.into() }
    }

    /// Serializes `value` as JSON into a `Set` op.
    pub fn set_json<T: Serialize>(
        key: impl Into<String>,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<Self, StoreError> {
        let key = key.into();
        let value = serde_json::to_string(value).map_err(|source| StoreError::Encoding {
            key: key.clone(),
            source,
        })?;
        Ok(Self::Set { key, value, ttl })
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Reads a string value; expired entries read as absent.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn members(&self, key: &str) -> Result<BTreeSet<String>, StoreError>;

    async fn hash_entries(&self, key: &str) -> Result<BTreeMap<String, String>, StoreError>;

    /// Applies every op or none. Readers never observe a partial batch.
    async fn apply(&self, ops: Vec<StoreOp>) -> Result<(), StoreError>;
}

/// Reads and decodes a JSON value.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn Store,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(key).await? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StoreError::Encoding {
                key: key.to_string(),
                source,
            }),
        None => Ok(None),
    }
}

pub async fn put_json<T: Serialize + Sync>(
    store: &dyn Store,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> Result<(), StoreError> {
    store.apply(vec![StoreOp::set_json(key, value, ttl)?]).await
}
