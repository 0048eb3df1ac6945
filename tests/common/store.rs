//! In-memory coordination store for integration tests.

use async_trait::async_trait;
use chrono::Utc;
use dcswitch::coordination::CoordinationStore;
use dcswitch::types::{ActiveDatacenter, HeartbeatInfo};
use dcswitch::{Result, SwitchError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Coordination store double with a switchable availability flag.
#[derive(Default)]
pub struct MemStore {
    active: Mutex<Option<ActiveDatacenter>>,
    heartbeats: Mutex<HashMap<String, HeartbeatInfo>>,
    unavailable: Mutex<bool>,
}

impl MemStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_active(datacenter: &str, heartbeat_age_secs: i64) -> Arc<Self> {
        let store = Self::default();
        *store.active.lock() = Some(ActiveDatacenter {
            datacenter: datacenter.to_string(),
            activated_at: Utc::now(),
            activated_by: "api".to_string(),
            last_heartbeat: Utc::now() - chrono::Duration::seconds(heartbeat_age_secs),
        });
        Arc::new(store)
    }

    pub fn set_unavailable(&self, down: bool) {
        *self.unavailable.lock() = down;
    }

    pub fn active(&self) -> Option<ActiveDatacenter> {
        self.active.lock().clone()
    }

    fn check_available(&self) -> Result<()> {
        if *self.unavailable.lock() {
            return Err(SwitchError::CoordinationUnavailable(
                "store unreachable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl CoordinationStore for MemStore {
    async fn write_active(&self, info: &ActiveDatacenter) -> Result<()> {
        self.check_available()?;
        *self.active.lock() = Some(info.clone());
        Ok(())
    }

    async fn read_active(&self) -> Result<ActiveDatacenter> {
        self.check_available()?;
        self.active
            .lock()
            .clone()
            .ok_or_else(|| SwitchError::NotFound("no active datacenter record".to_string()))
    }

    async fn write_heartbeat(&self, datacenter: &str) -> Result<()> {
        self.check_available()?;
        self.heartbeats.lock().insert(
            datacenter.to_string(),
            HeartbeatInfo {
                datacenter: datacenter.to_string(),
                last_seen: Utc::now(),
            },
        );
        Ok(())
    }

    async fn read_heartbeat(&self, datacenter: &str) -> Result<HeartbeatInfo> {
        self.check_available()?;
        self.heartbeats
            .lock()
            .get(datacenter)
            .cloned()
            .ok_or_else(|| {
                SwitchError::NotFound(format!("no heartbeat for datacenter {}", datacenter))
            })
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
