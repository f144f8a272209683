//! Registry persistence.
//!
//! The registry lives in a single JSON document:
//!
//! ```json
//! {
//!   "version": 1,
//!   "hosts": {
//!     "alice": {
//!       "clientAddress": "192.168.22.2",
//!       "serverAddress": "192.168.22.1",
//!       "device": "tun-alice",
//!       "mode": "tun",
//!       "createdAt": "2026-10-16T09:00:00Z"
//!     }
//!   }
//! }
//! ```
//!
//! Writes replace the file atomically. Mutating operations serialize on an
//! exclusive `flock` held on a sibling `<file>.lock`, so concurrent
//! invocations of the tool never interleave their load-modify-save cycles.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use nix::fcntl::{Flock, FlockArg};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::record::Registry;
use crate::atomic::write_atomic;
use crate::error::HostNetError;

/// Current on-disk format version.
pub const REGISTRY_VERSION: u32 = 1;

/// Durable storage for the registry.
pub trait RegistryStore {
    /// Guard that keeps other writers out while alive.
    type Lock;

    /// Block until this process holds the exclusive registry lock.
    fn lock(&self) -> Result<Self::Lock, HostNetError>;

    /// Read the registry. A store that was never written yields an empty one.
    fn load(&self) -> Result<Registry, HostNetError>;

    /// Persist the registry.
    fn save(&self, registry: &Registry) -> Result<(), HostNetError>;
}

#[derive(Deserialize)]
struct RegistryFile {
    version: u32,
    #[serde(default)]
    hosts: Registry,
}

#[derive(Serialize)]
struct RegistryFileRef<'a> {
    version: u32,
    hosts: &'a Registry,
}

/// Registry stored as a JSON file.
#[derive(Debug, Clone)]
pub struct FileRegistryStore {
    path: PathBuf,
}

impl FileRegistryStore {
    /// Create a store backed by `path`. Nothing is touched until first use.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the registry file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the lock file next to the registry.
    pub fn lock_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.path.with_file_name(format!("{}.lock", name))
    }

    fn corrupt(&self, detail: impl Into<String>) -> HostNetError {
        HostNetError::RegistryCorrupt {
            path: self.path.clone(),
            detail: detail.into(),
        }
    }
}

/// Exclusive hold on the registry, released on drop.
pub struct RegistryLock {
    path: PathBuf,
    _flock: Flock<File>,
}

impl Drop for RegistryLock {
    fn drop(&mut self) {
        debug!(path = %self.path.display(), "Releasing registry lock");
    }
}

impl RegistryStore for FileRegistryStore {
    type Lock = RegistryLock;

    fn lock(&self) -> Result<RegistryLock, HostNetError> {
        let lock_path = self.lock_path();
        let lock_err = |source: io::Error| HostNetError::RegistryLock {
            path: lock_path.clone(),
            source,
        };

        if let Some(parent) = lock_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(lock_err)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(lock_err)?;

        debug!(path = %lock_path.display(), "Waiting for registry lock");
        let flock = Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_, errno)| lock_err(io::Error::from(errno)))?;
        debug!(path = %lock_path.display(), "Registry lock acquired");

        Ok(RegistryLock {
            path: lock_path,
            _flock: flock,
        })
    }

    fn load(&self) -> Result<Registry, HostNetError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Registry file not found, starting empty");
                return Ok(Registry::new());
            }
            Err(e) => return Err(self.corrupt(format!("unreadable: {}", e))),
        };

        let file: RegistryFile =
            serde_json::from_str(&contents).map_err(|e| self.corrupt(e.to_string()))?;

        if file.version != REGISTRY_VERSION {
            return Err(self.corrupt(format!(
                "unsupported version {} (expected {})",
                file.version, REGISTRY_VERSION
            )));
        }

        file.hosts
            .check_consistency()
            .map_err(|detail| self.corrupt(detail))?;

        debug!(path = %self.path.display(), hosts = file.hosts.len(), "Loaded registry");
        Ok(file.hosts)
    }

    fn save(&self, registry: &Registry) -> Result<(), HostNetError> {
        let write_err = |source: io::Error| HostNetError::RegistryWrite {
            path: self.path.clone(),
            source,
        };

        let mut contents = serde_json::to_vec_pretty(&RegistryFileRef {
            version: REGISTRY_VERSION,
            hosts: registry,
        })
        .map_err(|e| write_err(io::Error::new(io::ErrorKind::InvalidData, e)))?;
        contents.push(b'\n');

        write_atomic(&self.path, &contents).map_err(write_err)?;

        debug!(path = %self.path.display(), hosts = registry.len(), "Saved registry");
        Ok(())
    }
}
