//! Per-client limiter registries.
//!
//! A registry owns one [`TokenBucket`] per distinct [`ClientKey`], created
//! lazily on first sight. Entries live as long as the registry; nothing is
//! evicted, so memory grows with the number of distinct clients seen.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::bucket::{LimiterSettings, TokenBucket};
use super::client::ClientKey;

/// Trait for client registry implementations.
///
/// The registry guard covers only the lookup-or-insert step. Callers get a
/// shared handle back and call [`TokenBucket::allow`] outside the guard, so
/// admission checks for different clients never contend on the registry.
pub trait ClientRegistry: Send + Sync {
    /// Get the bucket for `key`, creating it with the registry's settings on a miss.
    fn get_or_create(&self, key: &ClientKey) -> Arc<TokenBucket>;

    /// Get the number of tracked clients.
    fn len(&self) -> usize;

    /// Settings used for newly created buckets.
    fn settings(&self) -> LimiterSettings;

    /// Drop all tracked clients.
    ///
    /// This is primarily useful for testing.
    fn clear(&self);

    /// Whether no client has been seen yet.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Which registry implementation to run with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RegistryKind {
    /// One mutex over a `HashMap`; fine for low client cardinality
    #[default]
    Local,
    /// Sharded concurrent map; lookups for different shards proceed in parallel
    Sharded,
}

impl RegistryKind {
    /// Build a registry of this kind.
    pub fn build(self, settings: LimiterSettings) -> Arc<dyn ClientRegistry> {
        match self {
            RegistryKind::Local => Arc::new(LocalRegistry::new(settings)),
            RegistryKind::Sharded => Arc::new(ShardedRegistry::new(settings)),
        }
    }
}

/// Registry guarded by a single mutex.
pub struct LocalRegistry {
    settings: LimiterSettings,
    buckets: Mutex<HashMap<ClientKey, Arc<TokenBucket>>>,
}

impl LocalRegistry {
    /// Create an empty registry.
    pub fn new(settings: LimiterSettings) -> Self {
        Self {
            settings,
            buckets: Mutex::new(HashMap::new()),
        }
    }
}

impl ClientRegistry for LocalRegistry {
    fn get_or_create(&self, key: &ClientKey) -> Arc<TokenBucket> {
        let mut buckets = self.buckets.lock();

        if let Some(bucket) = buckets.get(key) {
            return Arc::clone(bucket);
        }

        debug!(
            client = %key,
            rate = self.settings.rate,
            burst = self.settings.burst,
            "Creating new client limiter"
        );
        let bucket = Arc::new(TokenBucket::new(self.settings));
        buckets.insert(key.clone(), Arc::clone(&bucket));
        bucket
    }

    fn len(&self) -> usize {
        self.buckets.lock().len()
    }

    fn settings(&self) -> LimiterSettings {
        self.settings
    }

    fn clear(&self) {
        self.buckets.lock().clear();
    }
}

/// Registry backed by a sharded concurrent map.
///
/// Each shard has its own lock; the entry API makes lookup-or-insert atomic
/// within a shard, so a key is never given two buckets.
pub struct ShardedRegistry {
    settings: LimiterSettings,
    buckets: DashMap<ClientKey, Arc<TokenBucket>>,
}

impl ShardedRegistry {
    /// Create an empty registry.
    pub fn new(settings: LimiterSettings) -> Self {
        Self {
            settings,
            buckets: DashMap::new(),
        }
    }
}

impl ClientRegistry for ShardedRegistry {
    fn get_or_create(&self, key: &ClientKey) -> Arc<TokenBucket> {
        if let Some(bucket) = self.buckets.get(key) {
            return Arc::clone(bucket.value());
        }

        let entry = self.buckets.entry(key.clone()).or_insert_with(|| {
            debug!(
                client = %key,
                rate = self.settings.rate,
                burst = self.settings.burst,
                "Creating new client limiter"
            );
            Arc::new(TokenBucket::new(self.settings))
        });
        Arc::clone(entry.value())
    }

    fn len(&self) -> usize {
        self.buckets.len()
    }

    fn settings(&self) -> LimiterSettings {
        self.settings
    }

    fn clear(&self) {
        self.buckets.clear();
    }
}
