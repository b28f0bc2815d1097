//! Batched, coalescing cache of kind-0 profile metadata.
//!
//! Lookups that miss the cache are grouped into batches of `batch_size`
//! authors; each batch is one relay subscription
//! `{"kinds":[0],"authors":[...]}`. A key already being fetched joins the
//! running batch instead of starting another query.
//!
//! A batch ends when every key has answered, on `EOSE`, or at the batch
//! timeout. Keys the relay never answered are cached as `None` so they are
//! not asked for again until the entry expires. If the batch ends early
//! because the relay closed the subscription or the connection dropped,
//! missing keys are returned as `None` but not cached. A batch that cannot
//! reach the relay at all (subscribe failed after retries) caches nothing
//! and fails every caller waiting on it.

use crate::cache::TtlCache;
use crate::client::RelayClient;
use crate::config::ProfileCacheConfig;
use crate::error::{ClientError, Result};
use crate::message::Filter;
use crate::subscription::SubscriptionMessage;
use bookstr_core::{KIND_METADATA, ProfileMetadata};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared, join_all};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};

type BatchResult = Arc<HashMap<String, Option<ProfileMetadata>>>;
type BatchFuture = Shared<BoxFuture<'static, Result<BatchResult>>>;

struct ProfileState {
    entries: TtlCache<String, Option<ProfileMetadata>>,
    /// pubkey -> batch currently fetching it
    in_flight: HashMap<String, BatchFuture>,
}

struct ProfileCacheInner {
    client: RelayClient,
    config: ProfileCacheConfig,
    state: Mutex<ProfileState>,
}

/// What a finished relay query produced for one batch.
struct BatchOutcome {
    /// pubkey -> (created_at, profile); newest wins
    found: HashMap<String, (u64, ProfileMetadata)>,
    /// false when the query ended before the relay finished answering
    complete: bool,
}

/// Profile metadata cache keyed by hex pubkey.
#[derive(Clone)]
pub struct ProfileCache {
    inner: Arc<ProfileCacheInner>,
}

impl ProfileCache {
    /// Cache using the client's profile settings.
    pub fn new(client: RelayClient) -> Self {
        let config = client.config().profiles.clone();
        Self::with_config(client, config)
    }

    pub fn with_config(client: RelayClient, config: ProfileCacheConfig) -> Self {
        let entries = TtlCache::new(config.ttl(), config.max_entries);
        Self {
            inner: Arc::new(ProfileCacheInner {
                client,
                config,
                state: Mutex::new(ProfileState {
                    entries,
                    in_flight: HashMap::new(),
                }),
            }),
        }
    }

    /// Fresh cached answer for `pubkey`. `Some(None)` means the relay was
    /// asked and had no profile.
    pub fn get_cached(&self, pubkey: &str) -> Option<Option<ProfileMetadata>> {
        self.inner.state.lock().entries.get(&pubkey.to_string())
    }

    /// Number of keys currently being fetched.
    pub fn in_flight(&self) -> usize {
        self.inner.state.lock().in_flight.len()
    }

    /// Profile for one pubkey.
    pub async fn fetch_one(&self, pubkey: &str) -> Result<Option<ProfileMetadata>> {
        let mut profiles = self.fetch_many([pubkey]).await?;
        Ok(profiles.remove(pubkey).flatten())
    }

    /// Profiles for `pubkeys`; every requested key is present in the result.
    pub async fn fetch_many<I>(&self, pubkeys: I) -> Result<HashMap<String, Option<ProfileMetadata>>>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let wanted: BTreeSet<String> = pubkeys.into_iter().map(Into::into).collect();
        let mut profiles = HashMap::with_capacity(wanted.len());
        let mut waits: Vec<BatchFuture> = Vec::new();

        {
            let mut state = self.inner.state.lock();
            let mut to_fetch = Vec::new();

            for key in &wanted {
                if let Some(cached) = state.entries.get(key) {
                    profiles.insert(key.clone(), cached);
                } else if let Some(batch) = state.in_flight.get(key) {
                    waits.push(batch.clone());
                } else {
                    to_fetch.push(key.clone());
                }
            }

            for chunk in to_fetch.chunks(self.inner.config.batch_size.max(1)) {
                let batch = self.spawn_batch(chunk.to_vec());
                for key in chunk {
                    state.in_flight.insert(key.clone(), batch.clone());
                }
                waits.push(batch);
            }
        }

        if !waits.is_empty() {
            debug!(
                requested = wanted.len(),
                cached = profiles.len(),
                batches = waits.len(),
                "fetching profiles"
            );
        }

        for batch in join_all(waits).await {
            let batch = batch?;
            for (key, profile) in batch.iter() {
                if wanted.contains(key) {
                    profiles.entry(key.clone()).or_insert_with(|| profile.clone());
                }
            }
        }

        // keys whose batch came back without them
        for key in wanted {
            profiles.entry(key).or_insert(None);
        }
        Ok(profiles)
    }

    /// Start a batch in its own task so it finishes (and clears its in-flight
    /// markers) even if every caller goes away.
    fn spawn_batch(&self, keys: Vec<String>) -> BatchFuture {
        let handle = tokio::spawn(run_batch(self.inner.clone(), keys));
        async move {
            handle
                .await
                .map_err(|e| ClientError::Internal(format!("profile batch task failed: {e}")))?
        }
        .boxed()
        .shared()
    }
}

async fn run_batch(inner: Arc<ProfileCacheInner>, keys: Vec<String>) -> Result<BatchResult> {
    let outcome = query_batch(&inner, &keys).await;

    let mut state = inner.state.lock();
    for key in &keys {
        state.in_flight.remove(key);
    }
    let BatchOutcome { found, complete } = match outcome {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(keys = keys.len(), error = %e, "profile batch failed");
            return Err(e);
        }
    };

    let mut results = HashMap::with_capacity(keys.len());
    for key in keys {
        let profile = found.get(&key).map(|(_, profile)| profile.clone());
        if profile.is_some() || complete {
            state.entries.insert(key.clone(), profile.clone());
        }
        results.insert(key, profile);
    }
    Ok(Arc::new(results))
}

async fn query_batch(inner: &ProfileCacheInner, keys: &[String]) -> Result<BatchOutcome> {
    let client = &inner.client;
    let deadline = Instant::now() + inner.config.batch_timeout();
    let filter = Filter::new()
        .kinds(vec![KIND_METADATA])
        .authors(keys.to_vec());

    let subscribe = client.retry_policy().retry("profile batch", || {
        client.subscribe_with_prefix(Some("profiles"), vec![filter.clone()])
    });
    let mut subscription = timeout_at(deadline, subscribe)
        .await
        .map_err(|_| ClientError::Timeout("profile batch subscribe".to_string()))??;

    let wanted: HashSet<&str> = keys.iter().map(String::as_str).collect();
    let mut found: HashMap<String, (u64, ProfileMetadata)> = HashMap::new();

    let complete = loop {
        match timeout_at(deadline, subscription.next()).await {
            Ok(Some(SubscriptionMessage::Event(event))) => {
                if event.kind != KIND_METADATA || !wanted.contains(event.pubkey.as_str()) {
                    debug!(subscription_id = %subscription.id(), event_id = %event.id, "ignoring unrequested event");
                    continue;
                }
                let profile = match ProfileMetadata::from_event(&event) {
                    Ok(profile) => profile,
                    Err(e) => {
                        debug!(pubkey = %event.pubkey, error = %e, "unreadable profile");
                        continue;
                    }
                };
                let newer = found
                    .get(&event.pubkey)
                    .is_none_or(|(created_at, _)| event.created_at > *created_at);
                if newer {
                    found.insert(event.pubkey.clone(), (event.created_at, profile));
                }
                if found.len() == wanted.len() {
                    break true;
                }
            }
            Ok(Some(SubscriptionMessage::Eose)) => break true,
            Ok(Some(SubscriptionMessage::Closed(reason))) => {
                warn!(subscription_id = %subscription.id(), reason = %reason, "relay closed profile batch");
                break false;
            }
            Ok(None) => {
                warn!(subscription_id = %subscription.id(), "connection lost during profile batch");
                break false;
            }
            Err(_) => {
                debug!(subscription_id = %subscription.id(), "profile batch timed out");
                break true;
            }
        }
    };

    subscription.unsubscribe();
    Ok(BatchOutcome { found, complete })
}

impl std::fmt::Debug for ProfileCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ProfileCache")
            .field("cached", &state.entries.len())
            .field("in_flight", &state.in_flight.len())
            .finish()
    }
}
