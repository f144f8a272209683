//! Error handling and display for the CLI.

use colored::Colorize;
use sshtuntap_hostnet::{ConfigError, HostNetError};
use thiserror::Error;

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("User {0} does not exist, please create it first.")]
    UnknownUser(String),

    #[error("Failed to look up user {name}: {source}")]
    UserLookup {
        name: String,
        #[source]
        source: nix::Error,
    },
}

/// Print an error in a user-friendly format.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {}", "Error:".red().bold(), err);
    for cause in err.chain().skip(1) {
        eprintln!("  {} {}", "caused by:".dimmed(), cause);
    }

    if let Some(hint) = hint_for(err) {
        eprintln!("\n{}", format!("Hint: {}", hint).yellow());
    }
}

fn hint_for(err: &anyhow::Error) -> Option<&'static str> {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return match cli_err {
            CliError::UnknownUser(_) => Some("Create the account with `useradd` first."),
            CliError::UserLookup { .. } => None,
        };
    }

    if let Some(config_err) = err.downcast_ref::<ConfigError>() {
        return match config_err {
            ConfigError::NotFound { .. } => {
                Some("Run `sshtuntap-server setup [CIDR]` to create it.")
            }
            ConfigError::InvalidCidr { .. } => {
                Some("Use a block like 192.168.22.0/24 with a prefix of at most /30.")
            }
            _ => None,
        };
    }

    match err.downcast_ref::<HostNetError>()? {
        HostNetError::Permission { .. } => {
            Some("Managing network devices needs root (or CAP_NET_ADMIN).")
        }
        HostNetError::PoolExhausted { .. } => {
            Some("Remove unused hosts or run `setup` with a larger block.")
        }
        HostNetError::UserExists { .. } => Some("Use `user list` to see its addresses."),
        HostNetError::UserNotFound { .. } => Some("Use `user list` to see known users."),
        HostNetError::RegistryCorrupt { .. } => {
            Some("Fix or restore the registry file; it was left untouched.")
        }
        HostNetError::RegistryLock { .. } | HostNetError::RegistryWrite { .. } => {
            Some("Check that the registry directory exists and is writable.")
        }
        HostNetError::InvalidUsername { .. } | HostNetError::DeviceProvision { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hints_survive_context() {
        let err = anyhow::Error::new(HostNetError::Permission {
            device: "tun-alice".to_string(),
            detail: "Operation not permitted".to_string(),
        })
        .context("Failed to add host alice");
        assert!(hint_for(&err).unwrap().contains("root"));

        let err = anyhow::Error::new(CliError::UnknownUser("ghost".to_string()));
        assert!(hint_for(&err).is_some());

        assert!(hint_for(&anyhow::anyhow!("plain")).is_none());
    }
}
