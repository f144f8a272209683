//! Allocation records and the in-memory registry.

use std::fmt;
use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::HostNetError;
use crate::network::{DeviceMode, DeviceSpec};

/// Maximum username length accepted as a registry key.
pub const MAX_USERNAME_LEN: usize = 32;

/// One user's link allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationRecord {
    /// Username (registry key).
    pub username: String,
    /// Client (peer) address.
    pub client_address: Ipv4Addr,
    /// Server (local) address.
    pub server_address: Ipv4Addr,
    /// Device name.
    pub device: String,
    /// Device mode.
    pub mode: DeviceMode,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl AllocationRecord {
    /// Device configuration this record declares.
    pub fn device_spec(&self) -> DeviceSpec {
        DeviceSpec {
            name: self.device.clone(),
            mode: self.mode,
            owner: self.username.clone(),
            local: self.server_address,
            peer: self.client_address,
        }
    }
}

/// Check that a username is usable as a registry key and device name suffix.
pub fn validate_username(username: &str) -> Result<(), HostNetError> {
    let invalid = |reason: &str| HostNetError::InvalidUsername {
        username: username.to_string(),
        reason: reason.to_string(),
    };

    if username.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if username.len() > MAX_USERNAME_LEN {
        return Err(invalid("must be at most 32 characters"));
    }
    if username.starts_with('-') {
        return Err(invalid("must not start with '-'"));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(invalid("may only contain letters, digits, '.', '_' and '-'"));
    }

    Ok(())
}

/// Insertion-ordered mapping from username to allocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registry {
    records: Vec<AllocationRecord>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record. Fails if the username is already present.
    pub fn add(&mut self, record: AllocationRecord) -> Result<(), HostNetError> {
        if self.contains(&record.username) {
            return Err(HostNetError::UserExists {
                username: record.username,
            });
        }
        self.records.push(record);
        Ok(())
    }

    /// Remove and return a record. Order of the remaining records is kept.
    pub fn remove(&mut self, username: &str) -> Result<AllocationRecord, HostNetError> {
        let idx = self
            .records
            .iter()
            .position(|r| r.username == username)
            .ok_or_else(|| HostNetError::UserNotFound {
                username: username.to_string(),
            })?;
        Ok(self.records.remove(idx))
    }

    /// Find a record by username.
    pub fn get(&self, username: &str) -> Option<&AllocationRecord> {
        self.records.iter().find(|r| r.username == username)
    }

    /// Check whether a username is present.
    pub fn contains(&self, username: &str) -> bool {
        self.get(username).is_some()
    }

    /// Find the record owning a device name.
    pub fn find_device(&self, device: &str) -> Option<&AllocationRecord> {
        self.records.iter().find(|r| r.device == device)
    }

    /// Records in insertion order.
    pub fn list(&self) -> &[AllocationRecord] {
        &self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &AllocationRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Verify that no client address or device name is used twice.
    pub fn check_consistency(&self) -> Result<(), String> {
        for (i, record) in self.records.iter().enumerate() {
            for other in &self.records[..i] {
                if other.client_address == record.client_address {
                    return Err(format!(
                        "client address {} assigned to both {} and {}",
                        record.client_address, other.username, record.username
                    ));
                }
                if other.device == record.device {
                    return Err(format!(
                        "device {} assigned to both {} and {}",
                        record.device, other.username, record.username
                    ));
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// On-disk representation
// ============================================================================

/// Registry entry as stored on disk (the username is the map key).
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HostEntry {
    client_address: Ipv4Addr,
    server_address: Ipv4Addr,
    device: String,
    mode: DeviceMode,
    created_at: DateTime<Utc>,
}

impl HostEntry {
    fn from_record(record: &AllocationRecord) -> Self {
        Self {
            client_address: record.client_address,
            server_address: record.server_address,
            device: record.device.clone(),
            mode: record.mode,
            created_at: record.created_at,
        }
    }

    fn into_record(self, username: String) -> AllocationRecord {
        AllocationRecord {
            username,
            client_address: self.client_address,
            server_address: self.server_address,
            device: self.device,
            mode: self.mode,
            created_at: self.created_at,
        }
    }
}

impl Serialize for Registry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.records.len()))?;
        for record in &self.records {
            map.serialize_entry(&record.username, &HostEntry::from_record(record))?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Registry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(RegistryVisitor)
    }
}

struct RegistryVisitor;

impl<'de> Visitor<'de> for RegistryVisitor {
    type Value = Registry;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of username to host entry")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Registry, A::Error> {
        let mut registry = Registry::new();
        while let Some((username, entry)) = access.next_entry::<String, HostEntry>()? {
            if registry.contains(&username) {
                return Err(serde::de::Error::custom(format!(
                    "duplicate host entry '{}'",
                    username
                )));
            }
            registry.records.push(entry.into_record(username));
        }
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(username: &str, client: u8) -> AllocationRecord {
        AllocationRecord {
            username: username.to_string(),
            client_address: Ipv4Addr::new(192, 168, 22, client),
            server_address: Ipv4Addr::new(192, 168, 22, 1),
            device: format!("tun-{}", username),
            mode: DeviceMode::Tun,
            created_at: "2026-10-16T09:00:00Z".parse().unwrap(),
        }
    }

    #[test]
    fn test_add_and_remove() {
        let mut registry = Registry::new();
        registry.add(record("alice", 2)).unwrap();
        registry.add(record("bob", 3)).unwrap();

        let err = registry.add(record("alice", 4)).unwrap_err();
        assert!(matches!(err, HostNetError::UserExists { .. }));
        assert_eq!(registry.len(), 2);

        let removed = registry.remove("alice").unwrap();
        assert_eq!(removed.client_address, Ipv4Addr::new(192, 168, 22, 2));
        assert!(matches!(
            registry.remove("alice"),
            Err(HostNetError::UserNotFound { .. })
        ));
        assert_eq!(registry.list()[0].username, "bob");
    }

    #[test]
    fn test_serialization_preserves_order() {
        let mut registry = Registry::new();
        registry.add(record("zed", 2)).unwrap();
        registry.add(record("alice", 3)).unwrap();

        let json = serde_json::to_string_pretty(&registry).unwrap();
        assert!(json.find("\"zed\"").unwrap() < json.find("\"alice\"").unwrap());
        assert!(json.contains("\"clientAddress\": \"192.168.22.2\""));
        assert!(json.contains("\"device\": \"tun-zed\""));
        assert!(json.contains("\"mode\": \"tun\""));
        assert!(json.contains("\"createdAt\""));

        let parsed: Registry = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, registry);
    }

    #[test]
    fn test_duplicate_keys_rejected() {
        let entry = r#"{"clientAddress":"192.168.22.2","serverAddress":"192.168.22.1",
            "device":"tun-alice","mode":"tun","createdAt":"2026-10-16T09:00:00Z"}"#;
        let json = format!(r#"{{"alice":{entry},"alice":{entry}}}"#);

        let err = serde_json::from_str::<Registry>(&json).unwrap_err();
        assert!(err.to_string().contains("duplicate host entry"));
    }

    #[test]
    fn test_consistency_check() {
        let mut registry = Registry::new();
        registry.add(record("alice", 2)).unwrap();
        registry.add(record("bob", 2)).unwrap();
        assert!(registry.check_consistency().is_err());

        let mut registry = Registry::new();
        registry.add(record("alice", 2)).unwrap();
        registry.add(record("bob", 3)).unwrap();
        assert!(registry.check_consistency().is_ok());
    }

    #[test]
    fn test_username_validation() {
        assert!(validate_username("alice").is_ok());
        assert!(validate_username("svc_backup.2").is_ok());

        let long = "x".repeat(33);
        for bad in ["", "-rf", "a b", "al/ice", "ünïcode", long.as_str()] {
            assert!(
                matches!(
                    validate_username(bad),
                    Err(HostNetError::InvalidUsername { .. })
                ),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_device_spec() {
        let spec = record("alice", 2).device_spec();
        assert_eq!(spec.name, "tun-alice");
        assert_eq!(spec.owner, "alice");
        assert_eq!(spec.local, Ipv4Addr::new(192, 168, 22, 1));
        assert_eq!(spec.peer, Ipv4Addr::new(192, 168, 22, 2));
    }
}
