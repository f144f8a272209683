//! Error types for host network provisioning.

use std::path::PathBuf;

use thiserror::Error;

/// Host network provisioning errors with standardized reason codes.
#[derive(Debug, Error)]
pub enum HostNetError {
    /// A record for this username already exists.
    #[error("user already exists: {username}")]
    UserExists { username: String },

    /// No record for this username.
    #[error("user not found: {username}")]
    UserNotFound { username: String },

    /// Username cannot be used as a registry key or device name.
    #[error("invalid username '{username}': {reason}")]
    InvalidUsername { username: String, reason: String },

    /// Every client offset in the block is assigned.
    #[error("address pool exhausted: no free address left in {block}")]
    PoolExhausted { block: String },

    /// Caller may not manage network devices.
    #[error("permission denied managing device {device}: {detail}")]
    Permission { device: String, detail: String },

    /// The operating system refused a device operation.
    #[error("failed to provision device {device}: {detail}")]
    DeviceProvision { device: String, detail: String },

    /// Registry could not be persisted.
    #[error("failed to write registry {}: {source}", path.display())]
    RegistryWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Registry on disk is malformed or inconsistent.
    #[error("registry {} is corrupt: {detail}", path.display())]
    RegistryCorrupt { path: PathBuf, detail: String },

    /// Registry lock could not be taken.
    #[error("failed to lock registry {}: {source}", path.display())]
    RegistryLock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl HostNetError {
    /// Get the standardized reason code for this error.
    pub fn reason_code(&self) -> &'static str {
        match self {
            HostNetError::UserExists { .. } => "user_exists",
            HostNetError::UserNotFound { .. } => "user_not_found",
            HostNetError::InvalidUsername { .. } => "invalid_username",
            HostNetError::PoolExhausted { .. } => "pool_exhausted",
            HostNetError::Permission { .. } => "permission_denied",
            HostNetError::DeviceProvision { .. } => "device_provision_failed",
            HostNetError::RegistryWrite { .. } => "registry_write_failed",
            HostNetError::RegistryCorrupt { .. } => "registry_corrupt",
            HostNetError::RegistryLock { .. } => "registry_lock_failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes() {
        let err = HostNetError::UserExists {
            username: "alice".to_string(),
        };
        assert_eq!(err.reason_code(), "user_exists");
        assert_eq!(err.to_string(), "user already exists: alice");

        let err = HostNetError::Permission {
            device: "tun-alice".to_string(),
            detail: "Operation not permitted".to_string(),
        };
        assert_eq!(err.reason_code(), "permission_denied");
    }

    #[test]
    fn test_registry_error_keeps_source() {
        let err = HostNetError::RegistryWrite {
            path: PathBuf::from("/var/lib/sshtuntap/hosts.json"),
            source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        };
        assert_eq!(
            err.to_string(),
            "failed to write registry /var/lib/sshtuntap/hosts.json: disk full"
        );
        assert!(std::error::Error::source(&err).is_some());
    }
}
