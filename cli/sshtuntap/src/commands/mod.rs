//! CLI commands.

mod info;
mod setup;
mod user;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sshtuntap_hostnet::config::CONFIG_FILE_ENV;
use sshtuntap_hostnet::{Config, FileRegistryStore, IpCommandDriver, NetworkService, Paths};

use crate::output::OutputFormat;

/// sshtuntap-server - provision per-user tun/tap links for SSH tunnelling.
#[derive(Debug, Parser)]
#[command(name = "sshtuntap-server")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file.
    #[arg(
        short = 'c',
        long = "configurationfilename",
        value_name = "FILENAME",
        global = true,
        env = CONFIG_FILE_ENV
    )]
    configuration_file: Option<PathBuf>,

    /// Output format (table or json).
    #[arg(long, global = true, default_value = "table")]
    format: String,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show the configuration in use.
    Info,

    /// Write the configuration file and enable tunnelling in sshd.
    Setup(setup::SetupArgs),

    /// Manage user links.
    #[command(alias = "u")]
    User(user::UserCommand),
}

impl Cli {
    pub fn log_json(&self) -> bool {
        self.log_json
    }

    /// Run the CLI command.
    pub fn run(self) -> Result<()> {
        let paths = Paths::from_env();
        let config_file = self
            .configuration_file
            .unwrap_or_else(|| paths.config_file.clone());

        let ctx = CommandContext {
            paths,
            config_file,
            format: OutputFormat::parse(&self.format),
        };

        match self.command {
            Commands::Info => info::run(&ctx),
            Commands::Setup(args) => setup::run(&ctx, args),
            Commands::User(cmd) => cmd.run(&ctx),
        }
    }
}

/// Shared command context.
pub struct CommandContext {
    pub paths: Paths,
    pub config_file: PathBuf,
    pub format: OutputFormat,
}

impl CommandContext {
    /// Load the configuration file, which must exist.
    pub fn load_config(&self) -> Result<Config> {
        Ok(Config::load(&self.config_file, &self.paths)?)
    }

    /// Service backed by the configured registry and iproute2.
    pub fn service(&self) -> Result<NetworkService<FileRegistryStore, IpCommandDriver>> {
        let config = self
            .load_config()
            .context("Cannot manage hosts without a configuration")?;
        Ok(NetworkService::from_config(&config))
    }
}
