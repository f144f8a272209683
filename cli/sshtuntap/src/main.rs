//! sshtuntap-server - per-user tun/tap links for SSH tunnelling.
//!
//! Allocates each user a point-to-point address pair and a tun or tap
//! device they own, so `ssh -w` can attach to it.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod error;
mod output;
mod sshd;
mod users;

use commands::Cli;

/// Environment variable holding the log filter.
const LOG_ENV: &str = "SSHTUNTAP_LOG";

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_json());

    if let Err(e) = cli.run() {
        error::print_error(&e);
        std::process::exit(1);
    }
}

/// Log to stderr so command output on stdout stays parseable.
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}
