//! Setup command.

use anyhow::{Context, Result};
use clap::Args;
use sshtuntap_hostnet::{Config, ConfigError, DEFAULT_CIDR};
use sshtuntap_networking::NetworkBlock;
use tracing::info;

use super::CommandContext;
use crate::output::{print_info, print_success, print_warning};
use crate::sshd::{SshdConfig, TunnelChange, ADDED_BY};

#[derive(Debug, Args)]
pub struct SetupArgs {
    /// The network/mask (aka CIDR) [default: the configured one, or 192.168.22.0/24].
    cidr: Option<String>,
}

pub fn run(ctx: &CommandContext, args: SetupArgs) -> Result<()> {
    let existing = match Config::load(&ctx.config_file, &ctx.paths) {
        Ok(config) => Some(config),
        Err(ConfigError::NotFound { .. }) => None,
        Err(e) => {
            print_warning(&format!("Replacing unusable configuration: {}", e));
            None
        }
    };

    let cidr = match (&args.cidr, &existing) {
        (Some(cidr), _) => NetworkBlock::from_cidr(cidr)
            .with_context(|| format!("Invalid CIDR '{}'", cidr))?,
        (None, Some(config)) => config.cidr,
        (None, None) => NetworkBlock::from_cidr(DEFAULT_CIDR)?,
    };

    let registry_path = existing
        .map(|c| c.registry_path)
        .unwrap_or_else(|| ctx.paths.default_registry.clone());

    let config = Config::new(cidr, registry_path);
    config.save(&ctx.config_file, &ctx.paths)?;
    info!(path = %ctx.config_file.display(), cidr = %cidr, "Configuration written");
    print_success(&format!(
        "Settings are saved into {}",
        ctx.config_file.display()
    ));

    let sshd_path = &ctx.paths.sshd_config;
    let mut sshd = SshdConfig::load(sshd_path)
        .with_context(|| format!("Failed to read {}", sshd_path.display()))?;

    match sshd.enable_tunnel() {
        TunnelChange::AlreadyEnabled => {
            print_success(&format!(
                "PermitTunnel is already enabled in {}.",
                sshd.path().display()
            ));
        }
        TunnelChange::Added => {
            print_success(&format!(
                "The following lines are added into {}",
                sshd.path().display()
            ));
            print_info(&format!("{}\nPermitTunnel yes", ADDED_BY));
        }
    }

    if sshd
        .save_if_changed()
        .with_context(|| format!("Failed to write {}", sshd_path.display()))?
    {
        print_warning("please restart the openssh-server.");
    }

    Ok(())
}
