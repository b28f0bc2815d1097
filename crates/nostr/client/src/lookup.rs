//! Cache in front of an external metadata source (book catalogue, ...).

use crate::cache::TtlCache;
use crate::config::{ClientConfig, LookupCacheConfig};
use crate::error::{ClientError, Result};
use crate::recovery::RetryPolicy;
use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared, join_all};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Where metadata comes from when it is not cached.
#[async_trait]
pub trait MetadataSource: Send + Sync + 'static {
    type Value: Clone + Send + Sync + 'static;

    /// Metadata for one key (e.g. an ISBN); `None` when the source has none.
    async fn lookup_by_key(&self, key: &str) -> Result<Option<Self::Value>>;

    /// Free-text search. Not cached.
    async fn search(&self, query: &str) -> Result<Vec<Self::Value>>;
}

type LookupFuture<V> = Shared<BoxFuture<'static, Result<Option<V>>>>;

struct LookupState<V> {
    entries: TtlCache<String, Option<V>>,
    in_flight: HashMap<String, LookupFuture<V>>,
}

struct LookupInner<S: MetadataSource> {
    source: S,
    retry: RetryPolicy,
    state: Mutex<LookupState<S::Value>>,
}

/// TTL cache with per-key request coalescing over a [`MetadataSource`].
pub struct LookupCache<S: MetadataSource> {
    inner: Arc<LookupInner<S>>,
}

impl<S: MetadataSource> Clone for LookupCache<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: MetadataSource> LookupCache<S> {
    pub fn new(source: S, config: &LookupCacheConfig, retry: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(LookupInner {
                source,
                retry,
                state: Mutex::new(LookupState {
                    entries: TtlCache::new(config.ttl(), config.max_entries),
                    in_flight: HashMap::new(),
                }),
            }),
        }
    }

    /// Cache configured from the client-wide settings.
    pub fn from_config(source: S, config: &ClientConfig) -> Self {
        Self::new(source, &config.lookups, RetryPolicy::new(config.retry.clone()))
    }

    pub fn source(&self) -> &S {
        &self.inner.source
    }

    /// Fresh cached answer, without touching the source.
    pub fn get_cached(&self, key: &str) -> Option<Option<S::Value>> {
        self.inner.state.lock().entries.get(&key.to_string())
    }

    pub fn in_flight(&self) -> usize {
        self.inner.state.lock().in_flight.len()
    }

    /// Cached value, or one source lookup shared by every concurrent caller.
    ///
    /// Successful answers (including "not found") are cached; errors are not.
    pub async fn get(&self, key: &str) -> Result<Option<S::Value>> {
        let lookup = {
            let mut state = self.inner.state.lock();
            if let Some(cached) = state.entries.get(&key.to_string()) {
                return Ok(cached);
            }
            match state.in_flight.get(key) {
                Some(lookup) => lookup.clone(),
                None => {
                    let lookup = self.spawn_lookup(key.to_string());
                    state.in_flight.insert(key.to_string(), lookup.clone());
                    lookup
                }
            }
        };
        lookup.await
    }

    /// Pass-through search.
    pub async fn search(&self, query: &str) -> Result<Vec<S::Value>> {
        self.inner.source.search(query).await
    }

    /// Warm the cache for `keys` without blocking the caller. Failures are
    /// logged.
    pub fn enrich_in_background(&self, keys: Vec<String>) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let results = join_all(keys.iter().map(|key| cache.get(key))).await;
            for (key, result) in keys.iter().zip(results) {
                if let Err(e) = result {
                    warn!(key = %key, error = %e, "background metadata lookup failed");
                }
            }
        })
    }

    fn spawn_lookup(&self, key: String) -> LookupFuture<S::Value> {
        let handle = tokio::spawn(run_lookup(self.inner.clone(), key));
        async move {
            handle
                .await
                .map_err(|e| ClientError::Internal(format!("metadata lookup task failed: {e}")))?
        }
        .boxed()
        .shared()
    }
}

async fn run_lookup<S: MetadataSource>(
    inner: Arc<LookupInner<S>>,
    key: String,
) -> Result<Option<S::Value>> {
    let result = inner
        .retry
        .retry("metadata lookup", || inner.source.lookup_by_key(&key))
        .await;

    let mut state = inner.state.lock();
    state.in_flight.remove(&key);
    match &result {
        Ok(value) => {
            debug!(key = %key, found = value.is_some(), "metadata lookup finished");
            state.entries.insert(key, value.clone());
        }
        Err(e) => debug!(key = %key, error = %e, "metadata lookup failed"),
    }
    result
}
