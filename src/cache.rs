//! Short-TTL node-snapshot cache.
//!
//! Maps `"<cluster>:nodes"` keys to node snapshots with a per-entry TTL.
//! The cache is advisory: every writer invalidates the cluster key
//! immediately after a successful node mutation, and readers fall through
//! to the cluster repository on a miss. A background sweep removes expired
//! entries at twice the default TTL.

use crate::types::Node;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::debug;

struct Entry {
    nodes: Vec<Node>,
    expires_at: Instant,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Thread-safe TTL cache for node snapshots.
pub struct NodeCache {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    default_ttl: Duration,
}

/// Cache key for a cluster's node snapshot.
pub fn nodes_key(cluster: &str) -> String {
    format!("{}:nodes", cluster)
}

impl NodeCache {
    /// Create a cache and spawn its background sweeper.
    ///
    /// The sweeper runs at twice the default TTL and exits once the cache
    /// is dropped.
    pub fn new(default_ttl: Duration) -> Self {
        let entries = Arc::new(RwLock::new(HashMap::new()));
        let cache = Self {
            entries: Arc::clone(&entries),
            default_ttl,
        };

        let weak: Weak<RwLock<HashMap<String, Entry>>> = Arc::downgrade(&entries);
        let sweep_interval = default_ttl.saturating_mul(2).max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(entries) = weak.upgrade() else {
                    break;
                };
                let now = Instant::now();
                let mut map = entries.write();
                let before = map.len();
                map.retain(|_, entry| !entry.is_expired(now));
                let removed = before - map.len();
                if removed > 0 {
                    debug!(removed, "swept expired cache entries");
                }
            }
        });

        cache
    }

    /// Default entry TTL.
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Get a snapshot if present and not expired.
    pub fn get(&self, key: &str) -> Option<Vec<Node>> {
        let map = self.entries.read();
        let entry = map.get(key)?;
        if entry.is_expired(Instant::now()) {
            return None;
        }
        Some(entry.nodes.clone())
    }

    /// Store a snapshot with the given TTL.
    pub fn put(&self, key: impl Into<String>, nodes: Vec<Node>, ttl: Duration) {
        let entry = Entry {
            nodes,
            expires_at: Instant::now() + ttl,
        };
        self.entries.write().insert(key.into(), entry);
    }

    /// Remove a single key.
    pub fn delete(&self, key: &str) {
        self.entries.write().remove(key);
    }

    /// Remove all entries.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Number of live (possibly expired, not yet swept) entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
