mod allocator;
mod netlink;
mod service;
mod store;
mod system;
mod traits;
mod ui;
mod utils;
mod wireguard;

use std::{process::ExitCode, sync::Arc};

use clap::Parser;
use service::Registry;
use system::System;

/// Manage WireGuard interfaces and their peers through flat config files.
#[derive(Debug, Parser)]
#[clap(version, about)]
struct Config {
    #[clap(flatten)]
    service: service::Config,
    /// Don't render QR codes for client configs.
    #[clap(long, action)]
    no_qr: bool,

    #[clap(subcommand)]
    command: ui::cli::Command,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let filters = std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".to_owned());
    pretty_env_logger::formatted_builder()
        .parse_filters(&filters)
        .init();

    let config = Config::parse();
    let registry = Registry::new(config.service, Arc::new(System::new()));

    match ui::cli::run(config.command, &registry, !config.no_qr).await {
        Ok(0) => ExitCode::SUCCESS,
        Ok(failed) => {
            eprintln!("{failed} operation(s) failed");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(2)
        }
    }
}
