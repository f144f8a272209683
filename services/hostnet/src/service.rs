//! Host network service.
//!
//! Orchestrates the address pool, the registry and the provisioner. Each
//! mutating operation runs as one transaction under the registry lock:
//!
//! ```text
//! requested -> pool reserved -> device provisioned -> persisted
//!                  |                   |
//!                  +---- released <----+  (on failure)
//! ```
//!
//! The pool is rebuilt from the registry on every call, so releasing a pair
//! only ever means not persisting it.

use chrono::Utc;
use serde::Serialize;
use sshtuntap_networking::{AddressPool, NetworkBlock};
use sshtuntap_reconcile::{ConvergenceStatus, ReconcileMode, ReconcileOutcome};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::HostNetError;
use crate::network::{
    device_name, DeviceMode, DeviceState, InterfaceProvisioner, IpCommandDriver,
    NetworkDeviceDriver,
};
use crate::state::{
    validate_username, AllocationRecord, FileRegistryStore, Registry, RegistryStore,
};

/// A record together with the state of its device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostStatus {
    #[serde(flatten)]
    pub record: AllocationRecord,

    #[serde(flatten)]
    pub outcome: ReconcileOutcome,
}

impl HostStatus {
    pub fn status(&self) -> ConvergenceStatus {
        self.outcome.status()
    }
}

/// Result of listing or reconciling hosts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HostListing {
    /// Records in insertion order.
    pub hosts: Vec<HostStatus>,

    /// Managed-looking devices without a record.
    pub orphans: Vec<DeviceState>,

    /// Why the orphan scan could not run, if it failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orphan_error: Option<String>,
}

/// Provisions per-user point-to-point links.
#[derive(Debug)]
pub struct NetworkService<S, D> {
    block: NetworkBlock,
    store: S,
    provisioner: InterfaceProvisioner<D>,
}

impl NetworkService<FileRegistryStore, IpCommandDriver> {
    /// Service backed by the registry file and iproute2.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.cidr,
            FileRegistryStore::new(&config.registry_path),
            IpCommandDriver::new(),
        )
    }
}

impl<S, D> NetworkService<S, D>
where
    S: RegistryStore,
    D: NetworkDeviceDriver,
{
    pub fn new(block: NetworkBlock, store: S, driver: D) -> Self {
        Self {
            block,
            store,
            provisioner: InterfaceProvisioner::new(driver),
        }
    }

    pub fn block(&self) -> &NetworkBlock {
        &self.block
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn provisioner(&self) -> &InterfaceProvisioner<D> {
        &self.provisioner
    }

    /// Allocate an address pair and a device for `username`.
    pub fn add_host(
        &self,
        username: &str,
        mode: DeviceMode,
    ) -> Result<AllocationRecord, HostNetError> {
        validate_username(username)?;

        let _lock = self.store.lock()?;
        let mut registry = self.store.load()?;

        if registry.contains(username) {
            return Err(HostNetError::UserExists {
                username: username.to_string(),
            });
        }

        let mut pool = self.pool_for(&registry);
        let pair = pool.allocate().map_err(|_| HostNetError::PoolExhausted {
            block: self.block.to_string(),
        })?;
        debug!(
            user = %username,
            client = %pair.client,
            server = %pair.server,
            remaining = pool.remaining(),
            "Reserved address pair"
        );

        let device = device_name(username, mode);
        if let Some(owner) = registry.find_device(&device) {
            pool.release(pair.client_offset);
            return Err(HostNetError::DeviceProvision {
                detail: format!("device name is already used by {}", owner.username),
                device,
            });
        }

        let record = AllocationRecord {
            username: username.to_string(),
            client_address: pair.client,
            server_address: pair.server,
            device,
            mode,
            created_at: Utc::now(),
        };
        registry.add(record.clone())?;

        if let Err(e) = self.provisioner.create(&record.device_spec()) {
            warn!(
                user = %username,
                device = %record.device,
                error = %e,
                "Device provisioning failed, releasing address pair"
            );
            pool.release(pair.client_offset);
            return Err(e);
        }
        debug!(user = %username, device = %record.device, "Device provisioned");

        if let Err(e) = self.store.save(&registry) {
            warn!(
                user = %username,
                device = %record.device,
                error = %e,
                "Registry write failed, rolling back device"
            );
            self.rollback_device(&record.device);
            pool.release(pair.client_offset);
            return Err(e);
        }

        info!(
            user = %username,
            device = %record.device,
            mode = %mode,
            client = %record.client_address,
            server = %record.server_address,
            "Host added"
        );
        Ok(record)
    }

    /// Remove `username`'s device and record.
    ///
    /// If the device name is now held by an interface that is not a tun/tap
    /// device, that interface is left alone and the record is still dropped.
    pub fn remove_host(&self, username: &str) -> Result<AllocationRecord, HostNetError> {
        let _lock = self.store.lock()?;
        let mut registry = self.store.load()?;

        let record = registry
            .get(username)
            .cloned()
            .ok_or_else(|| HostNetError::UserNotFound {
                username: username.to_string(),
            })?;

        self.provisioner.destroy(&record.device)?;
        debug!(user = %username, device = %record.device, "Device released");

        registry.remove(username)?;
        self.store.save(&registry)?;

        info!(
            user = %username,
            device = %record.device,
            client = %record.client_address,
            "Host removed"
        );
        Ok(record)
    }

    /// Look up one record without taking the lock.
    pub fn get_host(&self, username: &str) -> Result<AllocationRecord, HostNetError> {
        self.store
            .load()?
            .get(username)
            .cloned()
            .ok_or_else(|| HostNetError::UserNotFound {
                username: username.to_string(),
            })
    }

    /// Every record with its device drift, plus orphaned devices.
    ///
    /// Runs without the lock and never changes anything. A device that cannot
    /// be inspected is reported as failed; the other records are still listed.
    pub fn list_hosts(&self) -> Result<HostListing, HostNetError> {
        let registry = self.store.load()?;
        Ok(self.survey(&registry, ReconcileMode::Report))
    }

    /// Recreate missing or diverged devices under the lock.
    ///
    /// Orphans are reported, never removed. A record that cannot be repaired
    /// does not stop the pass.
    pub fn reconcile_hosts(&self) -> Result<HostListing, HostNetError> {
        let _lock = self.store.lock()?;
        let registry = self.store.load()?;
        let listing = self.survey(&registry, ReconcileMode::Repair);

        let repaired = listing
            .hosts
            .iter()
            .filter(|h| h.status().is_converging())
            .count();
        let failed = listing
            .hosts
            .iter()
            .filter(|h| h.status().is_failed())
            .count();
        info!(
            hosts = listing.hosts.len(),
            repaired,
            failed,
            orphans = listing.orphans.len(),
            "Hosts reconciled"
        );
        Ok(listing)
    }

    fn survey(&self, registry: &Registry, mode: ReconcileMode) -> HostListing {
        let mut hosts = Vec::with_capacity(registry.len());
        for record in registry.iter() {
            let outcome = self.provisioner.reconcile(record, mode);
            if !outcome.drift.is_in_sync() {
                debug!(
                    user = %record.username,
                    device = %record.device,
                    drift = %outcome.drift,
                    "Device drift"
                );
            }
            hosts.push(HostStatus {
                record: record.clone(),
                outcome,
            });
        }

        let (orphans, orphan_error) = match self.provisioner.orphans(registry) {
            Ok(orphans) => (orphans, None),
            Err(e) => {
                warn!(error = %e, "Cannot list devices, skipping orphan scan");
                (Vec::new(), Some(e.to_string()))
            }
        };
        for orphan in &orphans {
            warn!(device = %orphan.name, "Device has no registry record");
        }

        HostListing {
            hosts,
            orphans,
            orphan_error,
        }
    }

    /// Pool with every in-block client address of `registry` reserved.
    fn pool_for(&self, registry: &Registry) -> AddressPool {
        let mut pool = AddressPool::new(self.block);
        for record in registry.iter() {
            if let Err(e) = pool.reserve(record.client_address) {
                warn!(
                    user = %record.username,
                    address = %record.client_address,
                    error = %e,
                    "Skipping record outside the configured block"
                );
            }
        }
        pool
    }

    fn rollback_device(&self, device: &str) {
        if let Err(e) = self.provisioner.destroy(device) {
            warn!(device = %device, error = %e, "Failed to remove device during rollback");
        }
    }
}
