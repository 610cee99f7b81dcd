//! Syncy - keeps local folders in sync with remote playlists.
//!
//! Playlists are registered in a JSON catalog next to the downloaded files.
//! Syncing downloads, transcodes and tags every track the catalog does not
//! yet have on disk, and availability checks find tracks whose files have
//! since disappeared.

pub mod catalog;
pub mod cli;
pub mod config;
pub mod error;
pub mod health;
pub mod jobs;
pub mod media;
pub mod model;
pub mod organizer;
pub mod reconcile;
pub mod remote;
pub mod sync;
#[cfg(test)]
pub mod test_utils;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive("syncy=info".parse()?))
        .init();

    cli::run_command(&args)
}
