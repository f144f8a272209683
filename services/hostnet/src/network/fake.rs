//! In-memory device driver for tests and development.
//!
//! Keeps a table of devices instead of touching the kernel. Failures can be
//! injected per operation (and optionally per device) to exercise rollback.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use super::driver::{DeviceMode, DeviceState, DriverError, NetworkDeviceDriver};

/// Driver operation, used to target injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeOp {
    Create,
    AssignAddresses,
    SetUp,
    Remove,
    Inspect,
    List,
}

#[derive(Debug)]
struct Failure {
    op: FakeOp,
    device: Option<String>,
    error: DriverError,
}

#[derive(Debug, Default)]
struct FakeState {
    devices: BTreeMap<String, DeviceState>,
    failures: Vec<Failure>,
    calls: Vec<String>,
}

/// Fake driver backed by an in-memory device table.
#[derive(Debug, Default)]
pub struct FakeDriver {
    state: Mutex<FakeState>,
}

impl FakeDriver {
    /// Create a driver with no devices.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call of `op` fail with `error`.
    pub fn fail(&self, op: FakeOp, error: DriverError) {
        self.lock().failures.push(Failure {
            op,
            device: None,
            error,
        });
    }

    /// Make calls of `op` on one device fail with `error`.
    pub fn fail_device(&self, op: FakeOp, device: &str, error: DriverError) {
        self.lock().failures.push(Failure {
            op,
            device: Some(device.to_string()),
            error,
        });
    }

    /// Remove all injected failures.
    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Put a device in the table as if something else had created it.
    pub fn insert_device(&self, device: DeviceState) {
        self.lock().devices.insert(device.name.clone(), device);
    }

    /// Take a device's link down.
    pub fn set_down(&self, name: &str) {
        if let Some(device) = self.lock().devices.get_mut(name) {
            device.up = false;
        }
    }

    /// Add an address to a device behind the driver's back.
    pub fn add_stray_address(&self, name: &str, address: Ipv4Addr) {
        if let Some(device) = self.lock().devices.get_mut(name) {
            device.extra_addresses.push(address);
        }
    }

    /// Remove a device without going through the driver interface.
    pub fn forget_device(&self, name: &str) {
        self.lock().devices.remove(name);
    }

    /// Current state of a device.
    pub fn device(&self, name: &str) -> Option<DeviceState> {
        self.lock().devices.get(name).cloned()
    }

    /// All devices, ordered by name.
    pub fn devices(&self) -> Vec<DeviceState> {
        self.lock().devices.values().cloned().collect()
    }

    /// Mutating calls made so far, e.g. `create tun-alice`.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl FakeState {
    fn check(&self, op: FakeOp, device: Option<&str>) -> Result<(), DriverError> {
        let failure = self.failures.iter().find(|f| {
            f.op == op && (f.device.is_none() || f.device.as_deref() == device)
        });
        match failure {
            Some(f) => Err(f.error.clone()),
            None => Ok(()),
        }
    }

    fn device_mut(&mut self, name: &str) -> Result<&mut DeviceState, DriverError> {
        self.devices
            .get_mut(name)
            .ok_or_else(|| DriverError::Failed(format!("Cannot find device \"{}\"", name)))
    }
}

impl NetworkDeviceDriver for FakeDriver {
    fn create(&self, name: &str, mode: DeviceMode, owner: &str) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.check(FakeOp::Create, Some(name))?;

        if state.devices.contains_key(name) {
            return Err(DriverError::Failed(
                "ioctl(TUNSETIFF): Device or resource busy".to_string(),
            ));
        }

        debug!(device = %name, mode = %mode, owner = %owner, "[FAKE] Creating device");
        state.calls.push(format!("create {}", name));
        state.devices.insert(
            name.to_string(),
            DeviceState {
                name: name.to_string(),
                mode: Some(mode),
                local: None,
                peer: None,
                up: false,
                extra_addresses: Vec::new(),
            },
        );
        Ok(())
    }

    fn assign_addresses(
        &self,
        name: &str,
        local: Ipv4Addr,
        peer: Ipv4Addr,
    ) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.check(FakeOp::AssignAddresses, Some(name))?;

        state.calls.push(format!("assign {} {} {}", name, local, peer));
        let device = state.device_mut(name)?;
        device.local = Some(local);
        device.peer = Some(peer);
        Ok(())
    }

    fn set_up(&self, name: &str) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.check(FakeOp::SetUp, Some(name))?;

        state.calls.push(format!("up {}", name));
        state.device_mut(name)?.up = true;
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.check(FakeOp::Remove, Some(name))?;

        debug!(device = %name, "[FAKE] Deleting device");
        state.calls.push(format!("remove {}", name));
        match state.devices.remove(name) {
            Some(_) => Ok(()),
            None => Err(DriverError::Failed(format!(
                "Cannot find device \"{}\"",
                name
            ))),
        }
    }

    fn inspect(&self, name: &str) -> Result<Option<DeviceState>, DriverError> {
        let state = self.lock();
        state.check(FakeOp::Inspect, Some(name))?;
        Ok(state.devices.get(name).cloned())
    }

    fn list(&self) -> Result<Vec<DeviceState>, DriverError> {
        let state = self.lock();
        state.check(FakeOp::List, None)?;
        Ok(state
            .devices
            .values()
            .filter(|d| d.mode.is_some())
            .cloned()
            .collect())
    }
}
