//! Host network devices.
//!
//! This module provides:
//! - The driver capability used to manage tun/tap devices
//! - An iproute2-backed driver and an in-memory fake
//! - Device naming
//! - The provisioner that converges devices onto allocation records

mod driver;
mod fake;
mod ip;
mod naming;
mod provisioner;

pub use driver::{DeviceMode, DeviceSpec, DeviceState, DriverError, NetworkDeviceDriver};
pub use fake::{FakeDriver, FakeOp};
pub use ip::IpCommandDriver;
pub use naming::{device_name, is_managed_name, MAX_DEVICE_NAME_LEN};
pub use provisioner::InterfaceProvisioner;
