//! Shared fixtures for host network integration tests.

#![allow(dead_code)]

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sshtuntap_hostnet::state::RegistryLock;
use sshtuntap_hostnet::{
    FakeDriver, FileRegistryStore, HostNetError, NetworkService, Registry, RegistryStore,
};
use sshtuntap_networking::NetworkBlock;
use tempfile::TempDir;

pub const CIDR: &str = "192.168.22.0/24";

/// Service over a scratch registry and a shared fake driver.
pub struct Harness {
    pub dir: TempDir,
    pub driver: Arc<FakeDriver>,
    pub service: NetworkService<FileRegistryStore, Arc<FakeDriver>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_cidr(CIDR)
    }

    pub fn with_cidr(cidr: &str) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let driver = Arc::new(FakeDriver::new());
        let service = service_for(cidr, registry_path(&dir), driver.clone());
        Self {
            dir,
            driver,
            service,
        }
    }

    pub fn registry_path(&self) -> PathBuf {
        registry_path(&self.dir)
    }

    /// Raw registry file contents, `None` if never written.
    pub fn registry_bytes(&self) -> Option<Vec<u8>> {
        std::fs::read(self.registry_path()).ok()
    }

    /// Registry as persisted on disk.
    pub fn persisted(&self) -> Registry {
        FileRegistryStore::new(self.registry_path())
            .load()
            .expect("load registry")
    }
}

pub fn registry_path(dir: &TempDir) -> PathBuf {
    dir.path().join("var/lib/sshtuntap/hosts.json")
}

pub fn service_for(
    cidr: &str,
    path: PathBuf,
    driver: Arc<FakeDriver>,
) -> NetworkService<FileRegistryStore, Arc<FakeDriver>> {
    NetworkService::new(
        NetworkBlock::from_cidr(cidr).expect("cidr"),
        FileRegistryStore::new(path),
        driver,
    )
}

/// File store whose saves can be made to fail.
pub struct FlakyStore {
    inner: FileRegistryStore,
    fail_saves: AtomicBool,
}

impl FlakyStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            inner: FileRegistryStore::new(path),
            fail_saves: AtomicBool::new(false),
        }
    }

    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

impl RegistryStore for FlakyStore {
    type Lock = RegistryLock;

    fn lock(&self) -> Result<RegistryLock, HostNetError> {
        self.inner.lock()
    }

    fn load(&self) -> Result<Registry, HostNetError> {
        self.inner.load()
    }

    fn save(&self, registry: &Registry) -> Result<(), HostNetError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(HostNetError::RegistryWrite {
                path: self.inner.path().to_path_buf(),
                source: io::Error::other("No space left on device"),
            });
        }
        self.inner.save(registry)
    }
}
