//! Common test utilities for integration tests.

pub mod mock_cluster;
pub mod store;

pub use mock_cluster::*;
pub use store::*;

use dcswitch::config::{CacheConfig, ClusterConfig, Config, ServerConfig};
use std::time::Duration;

/// Build a controller config pointing at the given mock clusters.
///
/// Names and regions are left empty so the repository exercises
/// auto-discovery against the mock agent endpoints.
pub fn config_for(clusters: &[&MockCluster]) -> Config {
    Config {
        server: ServerConfig {
            addr: "127.0.0.1:0".to_string(),
            base_path: String::new(),
        },
        cache: CacheConfig {
            ttl: Duration::from_secs(30),
        },
        clusters: clusters
            .iter()
            .map(|c| ClusterConfig {
                name: String::new(),
                region: String::new(),
                address: c.base_url(),
                tls: None,
            })
            .collect(),
        skip_unhealthy_clusters: false,
        cluster_retry_interval: Duration::from_secs(60),
        health_check: Default::default(),
        etcd: None,
        heartbeat: Default::default(),
        my_datacenter: String::new(),
        log: Default::default(),
    }
}
