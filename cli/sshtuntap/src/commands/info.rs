//! Info command.

use std::path::PathBuf;

use anyhow::Result;
use serde::Serialize;

use super::CommandContext;
use crate::output::{print_json, OutputFormat};

#[derive(Debug, Serialize)]
struct InfoOutput {
    configuration_file: PathBuf,
    cidr: String,
    server_address: String,
    capacity: u64,
    registry: PathBuf,
    sshd_configuration: PathBuf,
}

pub fn run(ctx: &CommandContext) -> Result<()> {
    let config = ctx.load_config()?;

    let info = InfoOutput {
        configuration_file: ctx.config_file.clone(),
        cidr: config.cidr.to_string(),
        server_address: config.cidr.server_address().to_string(),
        capacity: config.cidr.client_capacity(),
        registry: config.registry_path.clone(),
        sshd_configuration: ctx.paths.sshd_config.clone(),
    };

    match ctx.format {
        OutputFormat::Json => print_json(&info),
        OutputFormat::Table => {
            println!("Configuration file: {}", info.configuration_file.display());
            println!("CIDR: {}", info.cidr);
            println!("Server address: {}", info.server_address);
            println!("Capacity: {} hosts", info.capacity);
            println!("Registry: {}", info.registry.display());
            println!("SSH server configuration: {}", info.sshd_configuration.display());
        }
    }
    Ok(())
}
