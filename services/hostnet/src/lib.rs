//! Per-user tun/tap link provisioning.
//!
//! Every user gets a point-to-point link: a tun or tap device owned by the
//! user, with a server address shared by all links and a client address
//! unique to the user. The registry file is the source of truth; devices on
//! the host are reconciled against it.
//!
//! ```text
//! NetworkService
//!   ├── RegistryStore          (state: load / save / lock)
//!   ├── AddressPool            (rebuilt from the registry on every call)
//!   └── InterfaceProvisioner
//!         └── NetworkDeviceDriver  (iproute2 or in-memory fake)
//! ```

pub mod atomic;
pub mod config;
pub mod error;
pub mod network;
pub mod service;
pub mod state;

pub use config::{Config, ConfigError, Paths, DEFAULT_CIDR};
pub use error::HostNetError;
pub use network::{
    DeviceMode, FakeDriver, InterfaceProvisioner, IpCommandDriver, NetworkDeviceDriver,
};
pub use service::{HostListing, HostStatus, NetworkService};
pub use state::{AllocationRecord, FileRegistryStore, Registry, RegistryStore};
