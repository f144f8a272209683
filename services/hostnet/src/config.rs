//! Configuration for the host network service.
//!
//! Default locations are derived from an installation root so the whole tool
//! can run against a scratch directory.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sshtuntap_networking::{NetworkBlock, NetworkError};
use thiserror::Error;
use tracing::debug;

use crate::atomic::write_atomic;

/// Block used by `setup` when none is given.
pub const DEFAULT_CIDR: &str = "192.168.22.0/24";

/// Environment variable holding the installation root.
pub const ROOT_ENV: &str = "SSHTUNTAPSERVER_ROOT";

/// Environment variable overriding the configuration file location.
pub const CONFIG_FILE_ENV: &str = "SSHTUNTAPSERVER_CONFIGURATIONFILE";

/// Environment variable overriding the sshd configuration location.
pub const SSHD_CONFIG_ENV: &str = "SSHTUNTAPSERVER_SSHSERVERCONFIGURATIONFILE";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file {} does not exist (run `sshtuntap-server setup` first)", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to read configuration file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse configuration file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid cidr in {}: {source}", path.display())]
    InvalidCidr {
        path: PathBuf,
        #[source]
        source: NetworkError,
    },

    #[error("failed to write configuration file {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// File locations used by the tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    /// Installation root every default is relative to.
    pub root: PathBuf,

    /// Configuration file.
    pub config_file: PathBuf,

    /// SSH daemon configuration.
    pub sshd_config: PathBuf,

    /// Registry location used when the configuration names none.
    pub default_registry: PathBuf,
}

impl Paths {
    /// Default locations under `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            config_file: root.join("etc/sshtuntap.toml"),
            sshd_config: root.join("etc/ssh/sshd_config"),
            default_registry: root.join("var/lib/sshtuntap/hosts.json"),
            root,
        }
    }

    /// Locations from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let root = env::var_os(ROOT_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/"));

        let mut paths = Self::with_root(root);
        if let Some(file) = env::var_os(CONFIG_FILE_ENV).filter(|v| !v.is_empty()) {
            paths.config_file = PathBuf::from(file);
        }
        if let Some(file) = env::var_os(SSHD_CONFIG_ENV).filter(|v| !v.is_empty()) {
            paths.sshd_config = PathBuf::from(file);
        }
        paths
    }
}

/// On-disk configuration document.
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    cidr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    registry: Option<PathBuf>,
}

/// Host network service configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Block client and server addresses are taken from.
    pub cidr: NetworkBlock,

    /// Registry file.
    pub registry_path: PathBuf,
}

impl Config {
    pub fn new(cidr: NetworkBlock, registry_path: impl Into<PathBuf>) -> Self {
        Self {
            cidr,
            registry_path: registry_path.into(),
        }
    }

    /// Read the configuration file at `path`.
    pub fn load(path: &Path, paths: &Paths) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                ConfigError::NotFound {
                    path: path.to_path_buf(),
                }
            } else {
                ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;

        let file: ConfigFile = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let cidr = NetworkBlock::from_cidr(&file.cidr).map_err(|source| {
            ConfigError::InvalidCidr {
                path: path.to_path_buf(),
                source,
            }
        })?;

        let registry_path = file
            .registry
            .unwrap_or_else(|| paths.default_registry.clone());

        debug!(
            path = %path.display(),
            cidr = %cidr,
            registry = %registry_path.display(),
            "Loaded configuration"
        );

        Ok(Self {
            cidr,
            registry_path,
        })
    }

    /// Render as TOML. The registry is only written when it is not the default.
    pub fn to_toml(&self, paths: &Paths) -> String {
        let file = ConfigFile {
            cidr: self.cidr.to_string(),
            registry: (self.registry_path != paths.default_registry)
                .then(|| self.registry_path.clone()),
        };
        // A struct of a string and an optional path always serializes.
        toml::to_string(&file).unwrap_or_else(|_| format!("cidr = \"{}\"\n", self.cidr))
    }

    /// Write the configuration file atomically.
    pub fn save(&self, path: &Path, paths: &Paths) -> Result<(), ConfigError> {
        write_atomic(path, self.to_toml(paths).as_bytes()).map_err(|source| {
            ConfigError::Write {
                path: path.to_path_buf(),
                source,
            }
        })?;
        debug!(path = %path.display(), cidr = %self.cidr, "Saved configuration");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_under_root() {
        let paths = Paths::with_root("/srv/test");
        assert_eq!(paths.config_file, Path::new("/srv/test/etc/sshtuntap.toml"));
        assert_eq!(paths.sshd_config, Path::new("/srv/test/etc/ssh/sshd_config"));
        assert_eq!(
            paths.default_registry,
            Path::new("/srv/test/var/lib/sshtuntap/hosts.json")
        );
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::with_root(dir.path());

        let config = Config::new(
            NetworkBlock::from_cidr("10.20.0.0/16").unwrap(),
            paths.default_registry.clone(),
        );
        config.save(&paths.config_file, &paths).unwrap();

        let raw = fs::read_to_string(&paths.config_file).unwrap();
        assert_eq!(raw.trim(), "cidr = \"10.20.0.0/16\"");

        let loaded = Config::load(&paths.config_file, &paths).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_custom_registry_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::with_root(dir.path());
        let config = Config::new(
            NetworkBlock::from_cidr(DEFAULT_CIDR).unwrap(),
            dir.path().join("elsewhere/hosts.json"),
        );

        config.save(&paths.config_file, &paths).unwrap();
        assert!(fs::read_to_string(&paths.config_file)
            .unwrap()
            .contains("registry"));
        assert_eq!(Config::load(&paths.config_file, &paths).unwrap(), config);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::with_root(dir.path());
        assert!(matches!(
            Config::load(&paths.config_file, &paths),
            Err(ConfigError::NotFound { .. })
        ));
    }

    #[test]
    fn test_invalid_contents() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::with_root(dir.path());
        let path = dir.path().join("sshtuntap.toml");

        fs::write(&path, "cidr = \"10.0.0.0/31\"\n").unwrap();
        assert!(matches!(
            Config::load(&path, &paths),
            Err(ConfigError::InvalidCidr { .. })
        ));

        fs::write(&path, "cidr = [\n").unwrap();
        assert!(matches!(
            Config::load(&path, &paths),
            Err(ConfigError::Parse { .. })
        ));

        fs::write(&path, "cidr = \"10.0.0.0/24\"\nmtu = 1400\n").unwrap();
        assert!(matches!(
            Config::load(&path, &paths),
            Err(ConfigError::Parse { .. })
        ));
    }
}
