//! Error types for the dcswitch controller.
//!
//! This module provides a unified error type [`SwitchError`] for all
//! operations, along with a convenient [`Result`] type alias.
//!
//! # Error Categories
//!
//! - **Activation**: target resolution and per-node write failures
//! - **Cluster**: upstream control-plane reachability and health
//! - **Coordination**: etcd connectivity and split-brain detection
//! - **Configuration**: invalid settings or missing configuration
//! - **Network/Serialization**: transport and JSON shaping errors

use std::io;
use thiserror::Error;

/// Main error type for dcswitch operations.
#[derive(Error, Debug)]
pub enum SwitchError {
    // Activation errors
    #[error("Target {0} not found")]
    TargetNotFound(String),

    #[error("Node write failed: cluster {cluster}, node {node}: {reason}")]
    NodeWriteFailed {
        cluster: String,
        node: String,
        reason: String,
    },

    // Cluster errors
    #[error("Cluster {cluster} unreachable: {reason}")]
    ClusterUnreachable { cluster: String, reason: String },

    #[error("Cluster {cluster} unhealthy: {reason}")]
    ClusterUnhealthy { cluster: String, reason: String },

    #[error("Not found: {0}")]
    NotFound(String),

    // Coordination errors
    #[error("Coordination store unavailable: {0}")]
    CoordinationUnavailable(String),

    #[error("Split-brain suspected: {0}")]
    SplitBrainSuspected(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // Transport errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SwitchError {
    /// Whether the operation that produced this error may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SwitchError::ClusterUnreachable { .. }
                | SwitchError::CoordinationUnavailable(_)
                | SwitchError::Network(_)
                | SwitchError::Timeout(_)
        )
    }

    /// Whether this error maps to a 404 at the API boundary.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SwitchError::NotFound(_) | SwitchError::TargetNotFound(_)
        )
    }
}

impl From<serde_json::Error> for SwitchError {
    fn from(err: serde_json::Error) -> Self {
        SwitchError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for SwitchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SwitchError::Timeout(err.to_string())
        } else {
            SwitchError::Network(err.to_string())
        }
    }
}

/// Result type alias for dcswitch operations.
pub type Result<T> = std::result::Result<T, SwitchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(SwitchError::Network("connection refused".into()).is_retryable());
        assert!(SwitchError::CoordinationUnavailable("no quorum".into()).is_retryable());
        assert!(!SwitchError::TargetNotFound("dc1".into()).is_retryable());
        assert!(!SwitchError::Config("bad".into()).is_retryable());
    }

    #[test]
    fn test_not_found_mapping() {
        assert!(SwitchError::TargetNotFound("dc1".into()).is_not_found());
        assert!(SwitchError::NotFound("region eu".into()).is_not_found());
        assert!(!SwitchError::Internal("oops".into()).is_not_found());
    }

    #[test]
    fn test_error_display() {
        let err = SwitchError::NodeWriteFailed {
            cluster: "dc-a".into(),
            node: "n1".into(),
            reason: "connection reset".into(),
        };
        assert_eq!(
            err.to_string(),
            "Node write failed: cluster dc-a, node n1: connection reset"
        );
    }
}
