//! Configuration for the dcswitch controller.
//!
//! Configuration is loaded from a YAML file. Cluster `name` and `region` are
//! optional and auto-discovered from the cluster's agent self-description
//! when omitted. The `etcd` section together with `my_datacenter` opts the
//! deployment into coordination-store reconciliation and heartbeats; without
//! them the controller falls back to a best-effort single-active sweep at
//! startup.

use crate::error::{Result, SwitchError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    pub clusters: Vec<ClusterConfig>,
    #[serde(default)]
    pub skip_unhealthy_clusters: bool,
    /// Retry interval for clusters skipped at startup.
    #[serde(default = "default_cluster_retry_interval", with = "duration_str")]
    pub cluster_retry_interval: Duration,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
    /// Coordination store settings; absent in uncoordinated deployments.
    pub etcd: Option<EtcdConfig>,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    /// Datacenter this instance manages; required when `etcd` is set.
    #[serde(default)]
    pub my_datacenter: String,
    #[serde(default)]
    pub log: LogConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address, e.g. `0.0.0.0:8080`.
    pub addr: String,
    /// Optional path prefix for reverse-proxy deployments, e.g. `/dc-switcher`.
    #[serde(default)]
    pub base_path: String,
}

/// Node-snapshot cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(with = "duration_str")]
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
        }
    }
}

/// A single upstream cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Display name; auto-discovered when empty.
    #[serde(default)]
    pub name: String,
    /// Region label; auto-discovered when empty.
    #[serde(default)]
    pub region: String,
    /// Control-plane base URL, e.g. `https://nomad.dc-a.example:4646`.
    pub address: String,
    pub tls: Option<TlsConfig>,
}

/// Mutual-TLS material, as file paths in PEM format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    pub ca: String,
    pub cert: String,
    pub key: String,
}

/// Active-region health watchdog configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    pub enabled: bool,
    #[serde(with = "duration_str")]
    pub interval: Duration,
    /// Consecutive leader-probe failures before the region is drained.
    pub failed_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: Duration::from_secs(30),
            failed_threshold: 3,
        }
    }
}

/// Coordination store (etcd) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtcdConfig {
    pub endpoints: Vec<String>,
    #[serde(default = "default_dial_timeout", with = "duration_str")]
    pub dial_timeout: Duration,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub tls: Option<TlsConfig>,
}

/// Heartbeat and split-brain fencing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(with = "duration_str")]
    pub update_interval: Duration,
    /// Consecutive coordination-store failures before self-drain.
    pub max_failures: u32,
    /// Heartbeats older than this are considered stale.
    #[serde(with = "duration_str")]
    pub stale_threshold: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_secs(30),
            max_failures: 3,
            stale_threshold: Duration::from_secs(120),
        }
    }
}

fn default_cluster_retry_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_dial_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SwitchError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Self = serde_yaml::from_str(&content)
            .map_err(|e| SwitchError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.server.addr.is_empty() {
            return Err(SwitchError::InvalidConfig {
                field: "server.addr".to_string(),
                reason: "listen address is required".to_string(),
            });
        }

        if self.clusters.is_empty() {
            return Err(SwitchError::InvalidConfig {
                field: "clusters".to_string(),
                reason: "at least one cluster must be configured".to_string(),
            });
        }

        for (i, cluster) in self.clusters.iter().enumerate() {
            if cluster.address.is_empty() {
                return Err(SwitchError::InvalidConfig {
                    field: format!("clusters[{}].address", i),
                    reason: "address is required".to_string(),
                });
            }
        }

        if self.health_check.enabled {
            if self.health_check.interval.is_zero() {
                return Err(SwitchError::InvalidConfig {
                    field: "health_check.interval".to_string(),
                    reason: "must be positive when health check is enabled".to_string(),
                });
            }
            if self.health_check.failed_threshold == 0 {
                return Err(SwitchError::InvalidConfig {
                    field: "health_check.failed_threshold".to_string(),
                    reason: "must be positive when health check is enabled".to_string(),
                });
            }
        }

        if let Some(etcd) = &self.etcd {
            if etcd.endpoints.is_empty() {
                return Err(SwitchError::InvalidConfig {
                    field: "etcd.endpoints".to_string(),
                    reason: "at least one endpoint is required".to_string(),
                });
            }
            if self.my_datacenter.is_empty() {
                return Err(SwitchError::InvalidConfig {
                    field: "my_datacenter".to_string(),
                    reason: "required when etcd is configured".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Whether this deployment uses coordination-store reconciliation.
    pub fn is_coordinated(&self) -> bool {
        self.etcd.is_some() && !self.my_datacenter.is_empty()
    }
}

/// Interval fields in the config file carry a unit suffix: `250ms`, `30s`,
/// `2m` or `1h`. A bare number is read as seconds, matching how the
/// defaults in this file are expressed.
mod duration_str {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let ms = duration.as_millis() as u64;
        let text = if ms >= 60_000 && ms % 60_000 == 0 {
            format!("{}m", ms / 60_000)
        } else if ms % 1_000 == 0 {
            format!("{}s", ms / 1_000)
        } else {
            format!("{}ms", ms)
        };
        serializer.serialize_str(&text)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(DurationVisitor)
    }

    struct DurationVisitor;

    impl<'de> Visitor<'de> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a duration such as \"250ms\", \"30s\" or \"2m\"")
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<Duration, E> {
            Ok(Duration::from_secs(value))
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<Duration, E> {
            u64::try_from(value)
                .map(Duration::from_secs)
                .map_err(|_| E::invalid_value(de::Unexpected::Signed(value), &self))
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Duration, E> {
            let trimmed = value.trim();
            let digits = trimmed
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(trimmed.len());
            let (number, unit) = trimmed.split_at(digits);
            let number: u64 = number
                .parse()
                .map_err(|_| E::invalid_value(de::Unexpected::Str(value), &self))?;
            match unit {
                "ms" => Ok(Duration::from_millis(number)),
                "" | "s" => Ok(Duration::from_secs(number)),
                "m" => Ok(Duration::from_secs(number * 60)),
                "h" => Ok(Duration::from_secs(number * 3600)),
                _ => Err(E::invalid_value(de::Unexpected::Str(value), &self)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
server:
  addr: "0.0.0.0:8080"
clusters:
  - address: "http://nomad-a.example:4646"
"#;

    const FULL: &str = r#"
server:
  addr: "0.0.0.0:8080"
  base_path: "/dc-switcher"
cache:
  ttl: 30s
clusters:
  - name: dc-a
    region: us
    address: "https://nomad-a.example:4646"
    tls:
      ca: /etc/dcswitch/ca.pem
      cert: /etc/dcswitch/cert.pem
      key: /etc/dcswitch/key.pem
  - address: "http://nomad-b.example:4646"
skip_unhealthy_clusters: true
cluster_retry_interval: 2m
health_check:
  enabled: true
  interval: 15s
  failed_threshold: 3
etcd:
  endpoints: ["http://etcd-1:2379", "http://etcd-2:2379"]
  dial_timeout: 5s
  username: switcher
  password: secret
heartbeat:
  update_interval: 30s
  max_failures: 3
  stale_threshold: 2m
my_datacenter: dc-a
"#;

    #[test]
    fn test_minimal_config() {
        let config: Config = serde_yaml::from_str(MINIMAL).unwrap();
        config.validate().unwrap();
        assert_eq!(config.cache.ttl, Duration::from_secs(30));
        assert!(!config.skip_unhealthy_clusters);
        assert!(!config.is_coordinated());
        assert_eq!(config.cluster_retry_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_full_config() {
        let config: Config = serde_yaml::from_str(FULL).unwrap();
        config.validate().unwrap();
        assert!(config.is_coordinated());
        assert_eq!(config.clusters.len(), 2);
        assert_eq!(config.clusters[0].name, "dc-a");
        assert!(config.clusters[0].tls.is_some());
        assert_eq!(config.cluster_retry_interval, Duration::from_secs(120));
        assert_eq!(
            config.heartbeat.stale_threshold,
            Duration::from_secs(120)
        );
        assert_eq!(config.etcd.as_ref().unwrap().endpoints.len(), 2);
    }

    #[test]
    fn test_missing_clusters_rejected() {
        let yaml = r#"
server:
  addr: "0.0.0.0:8080"
clusters: []
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_etcd_requires_my_datacenter() {
        let yaml = r#"
server:
  addr: "0.0.0.0:8080"
clusters:
  - address: "http://nomad-a.example:4646"
etcd:
  endpoints: ["http://etcd-1:2379"]
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("my_datacenter"));
    }

    #[test]
    fn test_duration_field_formats() {
        let yaml = r#"
server:
  addr: "0.0.0.0:8080"
clusters:
  - address: "http://nomad-a.example:4646"
cache:
  ttl: 1500ms
cluster_retry_interval: 90
heartbeat:
  update_interval: 1m
  max_failures: 3
  stale_threshold: 1h
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.cache.ttl, Duration::from_millis(1500));
        // A bare number is seconds.
        assert_eq!(config.cluster_retry_interval, Duration::from_secs(90));
        assert_eq!(config.heartbeat.update_interval, Duration::from_secs(60));
        assert_eq!(config.heartbeat.stale_threshold, Duration::from_secs(3600));
    }

    #[test]
    fn test_invalid_duration_rejected() {
        let yaml = r#"
server:
  addr: "0.0.0.0:8080"
clusters:
  - address: "http://nomad-a.example:4646"
cache:
  ttl: 30 parsecs
"#;
        assert!(serde_yaml::from_str::<Config>(yaml).is_err());
    }

    #[test]
    fn test_duration_serializes_to_largest_exact_unit() {
        let config: Config = serde_yaml::from_str(MINIMAL).unwrap();
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(yaml.contains("ttl: 30s"));
        assert!(yaml.contains("cluster_retry_interval: 1m"));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, FULL).unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.server.base_path, "/dc-switcher");
    }

    #[test]
    fn test_from_file_missing() {
        let err = Config::from_file(Path::new("/nonexistent/config.yaml")).unwrap_err();
        assert!(matches!(err, SwitchError::Config(_)));
    }
}
