//! Typed, failure-tolerant view over a [`CacheBackend`].
//!
//! Values are stored as zstd-compressed JSON. Reads never fail: backend
//! errors and undecodable payloads are logged and reported as a miss, so a
//! broken cache degrades to a full rebuild instead of a failed request.

use super::backend::{CacheBackend, CacheEntry, CacheNamespace, UpsertOutcome, WritePolicy};
use crate::adjacency::{AdjacencyListInternal, CachedGraph};
use crate::constants::defaults;
use crate::error::{GraphError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

/// A value that can live in the graph cache.
pub trait Cacheable: Serialize + DeserializeOwned + Send + Sync + 'static {
    const NAMESPACE: CacheNamespace;

    /// Key under which the value is stored.
    fn cache_key(&self) -> &str;

    /// Staleness marker compared against the latest node update.
    fn cache_context_order(&self) -> i64;
}

impl Cacheable for CachedGraph {
    const NAMESPACE: CacheNamespace = CacheNamespace::Graph;

    fn cache_key(&self) -> &str {
        &self.plan_execution_id
    }

    fn cache_context_order(&self) -> i64 {
        self.cache_context_order
    }
}

impl Cacheable for AdjacencyListInternal {
    const NAMESPACE: CacheNamespace = CacheNamespace::OrchestrationAdjacencyList;

    fn cache_key(&self) -> &str {
        &self.plan_execution_id
    }

    fn cache_context_order(&self) -> i64 {
        self.cache_context_order
    }
}

/// Cache of one [`Cacheable`] type.
pub struct GraphCache<V> {
    backend: Arc<dyn CacheBackend>,
    policy: WritePolicy,
    _value: PhantomData<fn() -> V>,
}

impl<V> Clone for GraphCache<V> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            policy: self.policy,
            _value: PhantomData,
        }
    }
}

impl<V: Cacheable> GraphCache<V> {
    pub fn new(backend: Arc<dyn CacheBackend>, policy: WritePolicy) -> Self {
        Self {
            backend,
            policy,
            _value: PhantomData,
        }
    }

    /// Cached value for `key`, or `None` on miss, expiry, or any failure.
    pub async fn get(&self, key: &str) -> Option<V> {
        let entry = match self.backend.get(V::NAMESPACE, key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                log::warn!(
                    "Cache read failed for {}/{}, treating as miss: {}",
                    V::NAMESPACE.as_str(),
                    key,
                    e
                );
                return None;
            }
        };

        match decode::<V>(&entry.payload) {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!(
                    "Discarding undecodable cache entry {}/{}: {}",
                    V::NAMESPACE.as_str(),
                    key,
                    e
                );
                None
            }
        }
    }

    /// Store `value` under its own key, expiring after `ttl`.
    pub async fn upsert(&self, value: &V, ttl: Duration) -> Result<UpsertOutcome> {
        let entry = CacheEntry::new(encode(value)?, value.cache_context_order(), ttl);
        self.backend
            .upsert(V::NAMESPACE, value.cache_key(), entry, self.policy)
            .await
    }

    pub async fn invalidate(&self, key: &str) -> Result<bool> {
        self.backend.remove(V::NAMESPACE, key).await
    }
}

fn encode<V: Serialize>(value: &V) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(value)?;
    zstd::encode_all(json.as_slice(), defaults::COMPRESSION_LEVEL)
        .map_err(|e| GraphError::Compression(e.to_string()))
}

fn decode<V: DeserializeOwned>(payload: &[u8]) -> Result<V> {
    let json = zstd::decode_all(payload).map_err(|e| GraphError::Compression(e.to_string()))?;
    Ok(serde_json::from_slice(&json)?)
}
