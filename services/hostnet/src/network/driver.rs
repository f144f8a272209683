//! Network device driver capability.
//!
//! The provisioner never talks to the kernel directly. Everything it needs
//! from the OS goes through [`NetworkDeviceDriver`], so the same logic runs
//! against iproute2 in production and against [`super::FakeDriver`] in tests.

use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sshtuntap_reconcile::Diff;
use thiserror::Error;

use crate::error::HostNetError;

/// Virtual device mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceMode {
    /// Point-to-point IP-layer device.
    Tun,
    /// Ethernet-layer device.
    Tap,
}

impl DeviceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tun => "tun",
            Self::Tap => "tap",
        }
    }
}

impl std::fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tun" => Ok(Self::Tun),
            "tap" => Ok(Self::Tap),
            other => Err(format!("unknown device mode '{}' (expected tun or tap)", other)),
        }
    }
}

/// Desired configuration of a user device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSpec {
    /// Interface name.
    pub name: String,
    /// Device mode.
    pub mode: DeviceMode,
    /// User allowed to attach to the device.
    pub owner: String,
    /// Server-side address.
    pub local: Ipv4Addr,
    /// Client-side (peer) address.
    pub peer: Ipv4Addr,
}

impl DeviceSpec {
    /// State the device should be observed in once provisioned.
    pub fn desired_state(&self) -> DeviceState {
        DeviceState {
            name: self.name.clone(),
            mode: Some(self.mode),
            local: Some(self.local),
            peer: Some(self.peer),
            up: true,
            extra_addresses: Vec::new(),
        }
    }
}

/// Device as observed on the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceState {
    /// Interface name.
    pub name: String,
    /// Device mode, `None` if the interface is not a tun/tap device.
    pub mode: Option<DeviceMode>,
    /// Local IPv4 address, if any.
    pub local: Option<Ipv4Addr>,
    /// Peer IPv4 address, if any.
    pub peer: Option<Ipv4Addr>,
    /// Whether the link is administratively up.
    pub up: bool,
    /// IPv4 addresses beyond the local one, e.g. added by hand.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra_addresses: Vec<Ipv4Addr>,
}

impl DeviceState {
    /// Returns true if the interface is not a tun/tap device.
    pub fn is_foreign(&self) -> bool {
        self.mode.is_none()
    }
}

impl Diff for DeviceState {
    fn diverging_fields(&self, observed: &Self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.mode != observed.mode {
            fields.push("mode");
        }
        if self.local != observed.local {
            fields.push("local");
        }
        if self.peer != observed.peer {
            fields.push("peer");
        }
        if self.up != observed.up {
            fields.push("up");
        }
        if self.extra_addresses != observed.extra_addresses {
            fields.push("extra_addresses");
        }
        fields
    }
}

/// Errors reported by a device driver.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// The caller lacks the privilege to manage network devices.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Any other OS-level failure.
    #[error("{0}")]
    Failed(String),
}

impl DriverError {
    /// Attach the device name and map onto the provisioning taxonomy.
    pub fn for_device(self, device: &str) -> HostNetError {
        match self {
            DriverError::PermissionDenied(detail) => HostNetError::Permission {
                device: device.to_string(),
                detail,
            },
            DriverError::Failed(detail) => HostNetError::DeviceProvision {
                device: device.to_string(),
                detail,
            },
        }
    }
}

/// OS capability for managing virtual network devices.
pub trait NetworkDeviceDriver {
    /// Instantiate a device of `mode` named `name`, attachable by `owner`.
    fn create(&self, name: &str, mode: DeviceMode, owner: &str) -> Result<(), DriverError>;

    /// Assign the local/peer address pair to a device.
    fn assign_addresses(&self, name: &str, local: Ipv4Addr, peer: Ipv4Addr)
        -> Result<(), DriverError>;

    /// Bring a device administratively up.
    fn set_up(&self, name: &str) -> Result<(), DriverError>;

    /// Remove a device.
    fn remove(&self, name: &str) -> Result<(), DriverError>;

    /// Observe a device, `None` if it does not exist.
    fn inspect(&self, name: &str) -> Result<Option<DeviceState>, DriverError>;

    /// Observe every tun/tap device on the host.
    fn list(&self) -> Result<Vec<DeviceState>, DriverError>;
}

impl<D: NetworkDeviceDriver + ?Sized> NetworkDeviceDriver for Arc<D> {
    fn create(&self, name: &str, mode: DeviceMode, owner: &str) -> Result<(), DriverError> {
        (**self).create(name, mode, owner)
    }

    fn assign_addresses(
        &self,
        name: &str,
        local: Ipv4Addr,
        peer: Ipv4Addr,
    ) -> Result<(), DriverError> {
        (**self).assign_addresses(name, local, peer)
    }

    fn set_up(&self, name: &str) -> Result<(), DriverError> {
        (**self).set_up(name)
    }

    fn remove(&self, name: &str) -> Result<(), DriverError> {
        (**self).remove(name)
    }

    fn inspect(&self, name: &str) -> Result<Option<DeviceState>, DriverError> {
        (**self).inspect(name)
    }

    fn list(&self) -> Result<Vec<DeviceState>, DriverError> {
        (**self).list()
    }
}
