//! Durable host registry.
//!
//! The registry is the source of truth for which user owns which address
//! pair and device. Devices on the host are reconciled against it.

mod record;
mod store;

pub use record::{validate_username, AllocationRecord, Registry, MAX_USERNAME_LEN};
pub use store::{FileRegistryStore, RegistryLock, RegistryStore, REGISTRY_VERSION};
