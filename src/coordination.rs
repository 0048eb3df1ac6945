//! Coordination store client.
//!
//! Persists the active-datacenter record and per-datacenter heartbeats in a
//! strongly consistent key-value store (etcd semantics: linearizable reads,
//! atomic writes). Writes are unconditional puts — last writer wins. There
//! are no leases and no compare-and-swap; liveness is layered on the
//! separate heartbeat key and enforced by the reconciliation loop.

use crate::config::EtcdConfig;
use crate::error::{Result, SwitchError};
use crate::tls::TlsMaterial;
use crate::types::{ActiveDatacenter, HeartbeatInfo};
use async_trait::async_trait;
use chrono::Utc;
use etcd_client::{Certificate, Client, ConnectOptions, Identity, TlsOptions};
use tracing::{debug, info};

/// Well-known key holding the active-datacenter record.
pub const ACTIVE_DATACENTER_KEY: &str = "dc-switcher/active-datacenter";

/// Prefix for per-datacenter heartbeat keys.
pub const HEARTBEAT_KEY_PREFIX: &str = "dc-switcher/heartbeats/";

/// Read/write access to the coordination records.
///
/// The activation engine and the reconciliation loop depend only on this
/// trait; tests replace it with an in-memory double.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Overwrite the active-datacenter record.
    async fn write_active(&self, info: &ActiveDatacenter) -> Result<()>;

    /// Read the active-datacenter record.
    ///
    /// Returns `NotFound` when the key is absent and
    /// `CoordinationUnavailable` on transport failure.
    async fn read_active(&self) -> Result<ActiveDatacenter>;

    /// Write a fresh heartbeat for the given datacenter.
    async fn write_heartbeat(&self, datacenter: &str) -> Result<()>;

    /// Read the heartbeat for the given datacenter.
    async fn read_heartbeat(&self, datacenter: &str) -> Result<HeartbeatInfo>;

    /// Release the underlying connection.
    async fn close(&self) -> Result<()>;
}

/// etcd-backed coordination store.
pub struct EtcdStore {
    client: Client,
}

impl EtcdStore {
    /// Connect to the etcd cluster and probe it.
    ///
    /// Initialization fails when the status probe does not succeed within
    /// the dial timeout.
    pub async fn connect(config: &EtcdConfig) -> Result<Self> {
        let mut options = ConnectOptions::new()
            .with_connect_timeout(config.dial_timeout)
            .with_timeout(config.dial_timeout);

        if !config.username.is_empty() {
            options = options.with_user(&config.username, &config.password);
        }

        if let Some(tls) = &config.tls {
            let material = TlsMaterial::load(tls)?;
            let tls_options = TlsOptions::new()
                .ca_certificate(Certificate::from_pem(material.ca.clone()))
                .identity(Identity::from_pem(material.cert.clone(), material.key.clone()));
            options = options.with_tls(tls_options);
        }

        let client = Client::connect(&config.endpoints, Some(options))
            .await
            .map_err(|e| {
                SwitchError::CoordinationUnavailable(format!("failed to connect to etcd: {}", e))
            })?;

        // Startup probe: initialization must observe a reachable store.
        let mut probe = client.clone();
        probe.status().await.map_err(|e| {
            SwitchError::CoordinationUnavailable(format!("etcd status probe failed: {}", e))
        })?;

        info!(endpoints = ?config.endpoints, "connected to etcd cluster");
        Ok(Self { client })
    }
}

#[async_trait]
impl CoordinationStore for EtcdStore {
    async fn write_active(&self, info: &ActiveDatacenter) -> Result<()> {
        let data = serde_json::to_vec(info)?;
        let mut client = self.client.clone();
        client
            .put(ACTIVE_DATACENTER_KEY, data, None)
            .await
            .map_err(|e| {
                SwitchError::CoordinationUnavailable(format!(
                    "failed to write active datacenter: {}",
                    e
                ))
            })?;

        debug!(
            datacenter = %info.datacenter,
            last_heartbeat = %info.last_heartbeat,
            "wrote active datacenter record"
        );
        Ok(())
    }

    async fn read_active(&self) -> Result<ActiveDatacenter> {
        let mut client = self.client.clone();
        let response = client
            .get(ACTIVE_DATACENTER_KEY, None)
            .await
            .map_err(|e| {
                SwitchError::CoordinationUnavailable(format!(
                    "failed to read active datacenter: {}",
                    e
                ))
            })?;

        let kv = response
            .kvs()
            .first()
            .ok_or_else(|| SwitchError::NotFound("no active datacenter record".to_string()))?;

        serde_json::from_slice(kv.value())
            .map_err(|e| SwitchError::Serialization(format!("invalid active record: {}", e)))
    }

    async fn write_heartbeat(&self, datacenter: &str) -> Result<()> {
        let heartbeat = HeartbeatInfo {
            datacenter: datacenter.to_string(),
            last_seen: Utc::now(),
        };
        let data = serde_json::to_vec(&heartbeat)?;
        let key = format!("{}{}", HEARTBEAT_KEY_PREFIX, datacenter);

        let mut client = self.client.clone();
        client.put(key, data, None).await.map_err(|e| {
            SwitchError::CoordinationUnavailable(format!("failed to write heartbeat: {}", e))
        })?;

        debug!(datacenter, "wrote heartbeat");
        Ok(())
    }

    async fn read_heartbeat(&self, datacenter: &str) -> Result<HeartbeatInfo> {
        let key = format!("{}{}", HEARTBEAT_KEY_PREFIX, datacenter);
        let mut client = self.client.clone();
        let response = client.get(key, None).await.map_err(|e| {
            SwitchError::CoordinationUnavailable(format!("failed to read heartbeat: {}", e))
        })?;

        let kv = response.kvs().first().ok_or_else(|| {
            SwitchError::NotFound(format!("no heartbeat for datacenter {}", datacenter))
        })?;

        serde_json::from_slice(kv.value())
            .map_err(|e| SwitchError::Serialization(format!("invalid heartbeat record: {}", e)))
    }

    async fn close(&self) -> Result<()> {
        // The tonic channel closes when the last clone is dropped.
        Ok(())
    }
}
