//! Keyed blob storage for cached graphs.
//!
//! Entries carry an expiry (retention) and a context order (staleness
//! marker). The backend enforces the first; the second is only compared on
//! write, when the caller asks for [`WritePolicy::IfNotOlder`].

use crate::constants::cache_keys;
use crate::error::{GraphError, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Cache namespace, one per cached artifact type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheNamespace {
    /// [`crate::adjacency::CachedGraph`] values, rendered as trees on read
    Graph,
    /// [`crate::adjacency::AdjacencyListInternal`] values
    OrchestrationAdjacencyList,
}

impl CacheNamespace {
    pub const ALL: [CacheNamespace; 2] = [
        CacheNamespace::Graph,
        CacheNamespace::OrchestrationAdjacencyList,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheNamespace::Graph => cache_keys::GRAPH,
            CacheNamespace::OrchestrationAdjacencyList => cache_keys::ORCHESTRATION_ADJACENCY_LIST,
        }
    }
}

/// A stored blob with its retention and staleness metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Encoded value
    pub payload: Vec<u8>,
    /// Logical version of the value (max `last_updated_at` it reflects)
    pub context_order: i64,
    /// Epoch ms of the write
    pub stored_at: i64,
    /// Epoch ms after which the entry is gone
    pub expires_at: i64,
}

impl CacheEntry {
    /// Create an entry stored now and expiring after `ttl`.
    pub fn new(payload: Vec<u8>, context_order: i64, ttl: Duration) -> Self {
        let now = now_millis();
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        Self {
            payload,
            context_order,
            stored_at: now,
            expires_at: now.saturating_add(ttl_ms),
        }
    }

    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        self.expires_at <= now_ms
    }
}

/// How an upsert treats an existing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePolicy {
    /// Last write wins
    Always,
    /// Keep a live entry with a greater context order
    IfNotOlder,
}

/// Result of an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Written,
    /// The stored entry is newer and was kept
    Stale { stored_order: i64 },
}

/// Keyed blob store with expiry.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Most recent live entry for the key.
    async fn get(&self, namespace: CacheNamespace, key: &str) -> Result<Option<CacheEntry>>;

    /// Replace or insert the entry for the key, resetting its expiry.
    async fn upsert(
        &self,
        namespace: CacheNamespace,
        key: &str,
        entry: CacheEntry,
        policy: WritePolicy,
    ) -> Result<UpsertOutcome>;

    /// Remove the entry for the key. Returns whether one existed.
    async fn remove(&self, namespace: CacheNamespace, key: &str) -> Result<bool>;
}

/// Counters describing an [`InMemoryCacheBackend`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub expired: usize,
    pub payload_bytes: usize,
}

/// Metadata written next to each persisted payload.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedMeta {
    key: String,
    context_order: i64,
    stored_at: i64,
    expires_at: i64,
}

/// In-memory cache backend with optional file persistence.
///
/// Each persisted entry is a `<key>.json` metadata file plus a `<key>.zst`
/// payload file inside a directory per namespace. Keys are escaped so that
/// distinct keys never share a file.
#[derive(Debug, Default)]
pub struct InMemoryCacheBackend {
    entries: RwLock<HashMap<(CacheNamespace, String), CacheEntry>>,
    persist_path: Option<PathBuf>,
}

impl InMemoryCacheBackend {
    /// Create a backend without persistence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend that persists entries under `path`.
    ///
    /// The directory is created on first write.
    pub fn with_persistence(path: impl AsRef<Path>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            persist_path: Some(path.as_ref().to_path_buf()),
        }
    }

    /// Load live entries from the persistence directory.
    ///
    /// Returns the number of entries loaded.
    pub fn load_from_disk(&self) -> Result<usize> {
        let Some(ref root) = self.persist_path else {
            return Ok(0);
        };

        let now = now_millis();
        let mut loaded = 0;
        let mut entries = self.entries.write();
        for namespace in CacheNamespace::ALL {
            let dir = root.join(namespace.as_str());
            if !dir.exists() {
                continue;
            }
            for file in std::fs::read_dir(&dir)? {
                let meta_path = file?.path();
                if meta_path
                    .extension()
                    .map_or(true, |e| e != cache_keys::META_EXTENSION)
                {
                    continue;
                }
                let meta = match std::fs::read_to_string(&meta_path)
                    .map_err(GraphError::from)
                    .and_then(|s| serde_json::from_str::<PersistedMeta>(&s).map_err(Into::into))
                {
                    Ok(meta) => meta,
                    Err(e) => {
                        log::warn!("Failed to read cache metadata {:?}: {}", meta_path, e);
                        continue;
                    }
                };
                if meta.expires_at <= now {
                    continue;
                }
                let payload_path = meta_path.with_extension(cache_keys::PAYLOAD_EXTENSION);
                let payload = match std::fs::read(&payload_path) {
                    Ok(payload) => payload,
                    Err(e) => {
                        log::warn!("Missing cache payload {:?}: {}", payload_path, e);
                        continue;
                    }
                };
                entries.insert(
                    (namespace, meta.key),
                    CacheEntry {
                        payload,
                        context_order: meta.context_order,
                        stored_at: meta.stored_at,
                        expires_at: meta.expires_at,
                    },
                );
                loaded += 1;
            }
        }
        log::info!("Loaded {} cache entries from {:?}", loaded, root);
        Ok(loaded)
    }

    /// Drop every expired entry. Returns the number removed.
    pub fn purge_expired(&self) -> Result<usize> {
        let now = now_millis();
        let mut entries = self.entries.write();
        let expired: Vec<(CacheNamespace, String)> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(id, _)| id.clone())
            .collect();
        for (namespace, key) in &expired {
            self.delete_from_disk(*namespace, key)?;
            entries.remove(&(*namespace, key.clone()));
        }
        Ok(expired.len())
    }

    pub fn stats(&self) -> CacheStats {
        let now = now_millis();
        let entries = self.entries.read();
        CacheStats {
            entries: entries.len(),
            expired: entries.values().filter(|e| e.is_expired_at(now)).count(),
            payload_bytes: entries.values().map(|e| e.payload.len()).sum(),
        }
    }

    fn file_stem(&self, namespace: CacheNamespace, key: &str) -> Option<PathBuf> {
        let root = self.persist_path.as_ref()?;
        Some(root.join(namespace.as_str()).join(escape_key(key)))
    }

    fn save_to_disk(&self, namespace: CacheNamespace, key: &str, entry: &CacheEntry) -> Result<()> {
        let Some(stem) = self.file_stem(namespace, key) else {
            return Ok(());
        };
        if let Some(dir) = stem.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let meta = PersistedMeta {
            key: key.to_string(),
            context_order: entry.context_order,
            stored_at: entry.stored_at,
            expires_at: entry.expires_at,
        };
        std::fs::write(stem.with_extension(cache_keys::PAYLOAD_EXTENSION), &entry.payload)?;
        std::fs::write(
            stem.with_extension(cache_keys::META_EXTENSION),
            serde_json::to_string_pretty(&meta)?,
        )?;
        log::debug!("Saved cache entry {}/{} to {:?}", namespace.as_str(), key, stem);
        Ok(())
    }

    fn delete_from_disk(&self, namespace: CacheNamespace, key: &str) -> Result<()> {
        let Some(stem) = self.file_stem(namespace, key) else {
            return Ok(());
        };
        for extension in [cache_keys::META_EXTENSION, cache_keys::PAYLOAD_EXTENSION] {
            let path = stem.with_extension(extension);
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CacheBackend for InMemoryCacheBackend {
    async fn get(&self, namespace: CacheNamespace, key: &str) -> Result<Option<CacheEntry>> {
        let now = now_millis();
        Ok(self
            .entries
            .read()
            .get(&(namespace, key.to_string()))
            .filter(|entry| !entry.is_expired_at(now))
            .cloned())
    }

    async fn upsert(
        &self,
        namespace: CacheNamespace,
        key: &str,
        entry: CacheEntry,
        policy: WritePolicy,
    ) -> Result<UpsertOutcome> {
        let now = now_millis();
        let id = (namespace, key.to_string());
        let mut entries = self.entries.write();

        if policy == WritePolicy::IfNotOlder {
            if let Some(stored) = entries.get(&id) {
                if !stored.is_expired_at(now) && stored.context_order > entry.context_order {
                    return Ok(UpsertOutcome::Stale {
                        stored_order: stored.context_order,
                    });
                }
            }
        }

        self.save_to_disk(namespace, key, &entry)?;
        entries.insert(id, entry);
        Ok(UpsertOutcome::Written)
    }

    async fn remove(&self, namespace: CacheNamespace, key: &str) -> Result<bool> {
        let mut entries = self.entries.write();
        self.delete_from_disk(namespace, key)?;
        Ok(entries.remove(&(namespace, key.to_string())).is_some())
    }
}

/// File-name-safe form of a cache key.
///
/// ASCII letters, digits and `-` are kept; every other byte becomes `_XX`
/// (uppercase hex), `_` included, so the mapping is injective.
fn escape_key(key: &str) -> String {
    let mut escaped = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            escaped.push(char::from(byte));
        } else {
            escaped.push_str(&format!("_{:02X}", byte));
        }
    }
    escaped
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
