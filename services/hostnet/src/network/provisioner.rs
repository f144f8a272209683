//! Interface provisioner.
//!
//! Converges host devices onto allocation records. A device is either fully
//! configured (created, addressed, up) or absent: a failure partway through
//! creation removes whatever was already instantiated.

use sshtuntap_reconcile::{Drift, ReconcileMode, ReconcileOutcome};
use tracing::{debug, info, warn};

use super::driver::{DeviceSpec, DeviceState, NetworkDeviceDriver};
use super::naming::is_managed_name;
use crate::error::HostNetError;
use crate::state::{AllocationRecord, Registry};

/// Creates and destroys user devices through a driver.
#[derive(Debug)]
pub struct InterfaceProvisioner<D> {
    driver: D,
}

impl<D: NetworkDeviceDriver> InterfaceProvisioner<D> {
    pub fn new(driver: D) -> Self {
        Self { driver }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Make the device described by `spec` exist, addressed and up.
    ///
    /// A matching device is left alone. A managed device with the wrong
    /// configuration is recreated. An interface that is not a tun/tap
    /// device is never touched and fails the call.
    pub fn create(&self, spec: &DeviceSpec) -> Result<(), HostNetError> {
        let observed = self.observe(&spec.name)?;

        if observed.as_ref().is_some_and(DeviceState::is_foreign) {
            return Err(HostNetError::DeviceProvision {
                device: spec.name.clone(),
                detail: "an interface that is not a tun/tap device already uses this name"
                    .to_string(),
            });
        }

        match Drift::classify(&spec.desired_state(), observed.as_ref()) {
            Drift::InSync => {
                debug!(device = %spec.name, "Device already configured");
                return Ok(());
            }
            Drift::Diverged { fields } => {
                warn!(
                    device = %spec.name,
                    fields = ?fields,
                    "Device configuration diverged, recreating"
                );
                self.driver
                    .remove(&spec.name)
                    .map_err(|e| e.for_device(&spec.name))?;
            }
            Drift::Missing | Drift::Unknown => {}
        }

        self.instantiate(spec)
    }

    /// Remove a device. A device that is already gone is not an error.
    ///
    /// An interface that is not a tun/tap device is not ours: it is left in
    /// place and the call succeeds.
    pub fn destroy(&self, name: &str) -> Result<(), HostNetError> {
        match self.observe(name)? {
            None => {
                debug!(device = %name, "Device already absent");
                Ok(())
            }
            Some(state) if state.is_foreign() => {
                warn!(
                    device = %name,
                    "Interface with this name is not a tun/tap device, leaving it in place"
                );
                Ok(())
            }
            Some(_) => {
                info!(device = %name, "Removing device");
                self.driver.remove(name).map_err(|e| e.for_device(name))
            }
        }
    }

    /// Compare the device of `record` with the host and optionally repair it.
    ///
    /// Failures are captured in the outcome so one broken device does not
    /// hide the state of the others.
    pub fn reconcile(&self, record: &AllocationRecord, mode: ReconcileMode) -> ReconcileOutcome {
        let spec = record.device_spec();
        let observed = match self.observe(&spec.name) {
            Ok(observed) => observed,
            Err(e) => {
                warn!(
                    user = %record.username,
                    device = %spec.name,
                    error = %e,
                    "Cannot inspect device"
                );
                return ReconcileOutcome::failed(Drift::Unknown, e);
            }
        };
        let drift = Drift::classify(&spec.desired_state(), observed.as_ref());

        if drift.is_in_sync() || mode == ReconcileMode::Report {
            return ReconcileOutcome::reported(drift);
        }

        info!(user = %record.username, device = %spec.name, drift = %drift, "Repairing device");
        match self.create(&spec) {
            Ok(()) => ReconcileOutcome::repaired(drift),
            Err(e) => {
                warn!(
                    user = %record.username,
                    device = %spec.name,
                    error = %e,
                    "Device repair failed"
                );
                ReconcileOutcome::failed(drift, e)
            }
        }
    }

    /// Managed-looking devices on the host that no record owns.
    pub fn orphans(&self, registry: &Registry) -> Result<Vec<DeviceState>, HostNetError> {
        let devices = self.driver.list().map_err(|e| e.for_device("*"))?;

        Ok(devices
            .into_iter()
            .filter(|d| is_managed_name(&d.name) && registry.find_device(&d.name).is_none())
            .collect())
    }

    fn observe(&self, name: &str) -> Result<Option<DeviceState>, HostNetError> {
        self.driver.inspect(name).map_err(|e| e.for_device(name))
    }

    fn instantiate(&self, spec: &DeviceSpec) -> Result<(), HostNetError> {
        info!(
            device = %spec.name,
            mode = %spec.mode,
            owner = %spec.owner,
            local = %spec.local,
            peer = %spec.peer,
            "Creating device"
        );

        self.driver
            .create(&spec.name, spec.mode, &spec.owner)
            .map_err(|e| e.for_device(&spec.name))?;

        let configured = self
            .driver
            .assign_addresses(&spec.name, spec.local, spec.peer)
            .and_then(|_| self.driver.set_up(&spec.name));

        if let Err(e) = configured {
            warn!(device = %spec.name, error = %e, "Device configuration failed, removing");
            if let Err(cleanup) = self.driver.remove(&spec.name) {
                warn!(device = %spec.name, error = %cleanup, "Failed to remove partial device");
            }
            return Err(e.for_device(&spec.name));
        }

        debug!(device = %spec.name, "Device created and configured");
        Ok(())
    }
}
