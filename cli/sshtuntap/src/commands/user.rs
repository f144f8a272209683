//! User commands.

use anyhow::{Context, Result};
use clap::{Args, Subcommand, ValueEnum};
use sshtuntap_hostnet::{DeviceMode, HostListing, HostStatus};
use sshtuntap_reconcile::{ConvergenceStatus, ReconcileAction};
use tabled::Tabled;

use super::CommandContext;
use crate::output::{print_json, print_output, print_success, print_warning, OutputFormat};
use crate::users::lookup_user;

/// User commands.
#[derive(Debug, Args)]
pub struct UserCommand {
    #[command(subcommand)]
    command: UserSubcommand,
}

#[derive(Debug, Subcommand)]
enum UserSubcommand {
    /// Allocate a link for an existing OS user.
    #[command(alias = "a")]
    Add(AddUserArgs),

    /// List users with their addresses and device state.
    #[command(alias = "l")]
    List,

    /// Remove a user's link.
    #[command(alias = "r")]
    Remove(RemoveUserArgs),

    /// Recreate missing or misconfigured devices.
    Sync,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Tun,
    Tap,
}

impl From<ModeArg> for DeviceMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Tun => DeviceMode::Tun,
            ModeArg::Tap => DeviceMode::Tap,
        }
    }
}

#[derive(Debug, Args)]
struct AddUserArgs {
    /// OS account name.
    name: String,

    /// Device mode.
    #[arg(short, long, value_enum, default_value = "tun")]
    mode: ModeArg,
}

#[derive(Debug, Args)]
struct RemoveUserArgs {
    /// Account name.
    name: String,
}

impl UserCommand {
    pub fn run(self, ctx: &CommandContext) -> Result<()> {
        match self.command {
            UserSubcommand::Add(args) => add_user(ctx, args),
            UserSubcommand::List => list_users(ctx),
            UserSubcommand::Remove(args) => remove_user(ctx, args),
            UserSubcommand::Sync => sync_users(ctx),
        }
    }
}

/// One host as shown in tables.
#[derive(Debug, Tabled)]
struct HostRow {
    #[tabled(rename = "Client")]
    client: String,

    #[tabled(rename = "Server")]
    server: String,

    #[tabled(rename = "User")]
    user: String,

    #[tabled(rename = "Device")]
    device: String,

    #[tabled(rename = "Mode")]
    mode: String,

    #[tabled(rename = "State")]
    state: String,
}

impl From<&HostStatus> for HostRow {
    fn from(host: &HostStatus) -> Self {
        let state = match (host.status(), host.outcome.action) {
            (ConvergenceStatus::Converged, _) => "ok".to_string(),
            (ConvergenceStatus::Failed, _) => format!("failed, was {}", host.outcome.drift),
            (_, ReconcileAction::Created) => "created".to_string(),
            (_, ReconcileAction::Recreated) => format!("recreated, was {}", host.outcome.drift),
            _ => host.outcome.drift.to_string(),
        };

        Self {
            client: host.record.client_address.to_string(),
            server: host.record.server_address.to_string(),
            user: host.record.username.clone(),
            device: host.record.device.clone(),
            mode: host.record.mode.to_string(),
            state,
        }
    }
}

fn print_listing(listing: &HostListing, format: OutputFormat) {
    let rows: Vec<HostRow> = listing.hosts.iter().map(HostRow::from).collect();
    print_output(&rows, listing, format);

    if format == OutputFormat::Table {
        for host in &listing.hosts {
            if let Some(error) = &host.outcome.error {
                print_warning(&format!("{}: {}", host.record.username, error));
            }
        }
        if let Some(error) = &listing.orphan_error {
            print_warning(&format!("could not scan for orphaned devices: {}", error));
        }
        for orphan in &listing.orphans {
            print_warning(&format!(
                "device {} has no registry entry (left behind by an interrupted add?)",
                orphan.name
            ));
        }
    }
}

fn add_user(ctx: &CommandContext, args: AddUserArgs) -> Result<()> {
    let user = lookup_user(&args.name)?;
    let service = ctx.service()?;

    let record = service
        .add_host(&user.name, args.mode.into())
        .with_context(|| format!("Failed to add user {}", user.name))?;

    match ctx.format {
        OutputFormat::Json => print_json(&record),
        OutputFormat::Table => {
            print_success(&format!("User {} was created successfully", record.username));
            println!(
                "  {} {} -> {} ({})",
                record.device, record.server_address, record.client_address, record.mode
            );
        }
    }
    Ok(())
}

fn list_users(ctx: &CommandContext) -> Result<()> {
    let listing = ctx
        .service()?
        .list_hosts()
        .context("Failed to list users")?;
    print_listing(&listing, ctx.format);
    Ok(())
}

fn remove_user(ctx: &CommandContext, args: RemoveUserArgs) -> Result<()> {
    let record = ctx
        .service()?
        .remove_host(&args.name)
        .with_context(|| format!("Failed to remove user {}", args.name))?;

    match ctx.format {
        OutputFormat::Json => print_json(&record),
        OutputFormat::Table => print_success(&format!(
            "User {} was removed, {} released",
            record.username, record.client_address
        )),
    }
    Ok(())
}

fn sync_users(ctx: &CommandContext) -> Result<()> {
    let listing = ctx
        .service()?
        .reconcile_hosts()
        .context("Failed to synchronise devices")?;
    print_listing(&listing, ctx.format);

    let failed = listing
        .hosts
        .iter()
        .filter(|h| h.status().is_failed())
        .count();
    if failed > 0 {
        anyhow::bail!("{} of {} devices could not be repaired", failed, listing.hosts.len());
    }
    Ok(())
}
