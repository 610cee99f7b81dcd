//! CLI command definitions and dispatch.
//!
//! Each group of subcommands lives in its own submodule:
//! - `sync`: adding and syncing playlists
//! - `library`: listing, removing and blacklisting
//! - `check`: availability checks
//! - `settings`: showing and writing the config file

mod check;
mod library;
mod settings;
mod sync;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::oneshot;

use crate::catalog::CatalogStore;
use crate::config::{self, Config};
use crate::jobs::{JobProgress, JobState};
use crate::sync::{Collaborators, SyncService, SyncSettings};

pub use check::cmd_check;
pub use library::{cmd_blacklist, cmd_list, cmd_remove};
pub use settings::cmd_config;
pub use sync::{cmd_add, cmd_sync};

/// Syncy CLI
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file to use instead of the default location
    #[arg(long, global = true, env = "SYNCY_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Register a remote playlist by URL or id
    Add {
        /// Playlist URL or `<service>:playlist:<id>`
        reference: String,
    },
    /// Download whatever a playlist has that the disk doesn't
    Sync {
        /// Collection to sync
        collection: Option<String>,
        /// Sync every playlist collection
        #[arg(long, conflicts_with = "collection")]
        all: bool,
    },
    /// Check that synced tracks still exist on disk
    Check {
        /// Reset tracks with missing files so the next sync fetches them
        #[arg(long)]
        requeue: bool,
    },
    /// List collections, or the items of one collection
    List {
        collection: Option<String>,
    },
    /// Remove a collection from the catalog (files stay on disk)
    Remove {
        collection: String,
    },
    /// Manage the items a collection never syncs
    Blacklist {
        #[command(subcommand)]
        action: BlacklistAction,
    },
    /// Show or initialize the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum BlacklistAction {
    /// Exclude an item (and drop it from the catalog)
    Add { collection: String, item: String },
    /// Allow an item again
    Remove { collection: String, item: String },
    /// Show excluded items
    List { collection: String },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write the effective configuration to the config file
    Init {
        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Run the specified CLI command.
pub fn run_command(cli: &Cli) -> anyhow::Result<()> {
    let config = load_config(cli);

    match &cli.command {
        Commands::Config { action } => cmd_config(&config, cli.config.as_deref(), action),
        Commands::List { collection } => cmd_list(&open_store(&config)?, collection.as_deref()),
        Commands::Remove { collection } => cmd_remove(&open_store(&config)?, collection),
        Commands::Blacklist { action } => cmd_blacklist(&open_store(&config)?, action),
        Commands::Add { reference } => {
            let rt = Runtime::new()?;
            cmd_add(&rt, &open_service(&config)?, reference)
        }
        Commands::Sync { collection, all } => {
            let rt = Runtime::new()?;
            let service = Arc::new(open_service(&config)?);
            cmd_sync(&rt, service, collection.as_deref(), *all)
        }
        Commands::Check { requeue } => {
            let rt = Runtime::new()?;
            cmd_check(&rt, &open_service(&config)?, *requeue)
        }
    }
}

// ============================================================================
// Shared helper functions
// ============================================================================

fn load_config(cli: &Cli) -> Config {
    match &cli.config {
        Some(path) => config::load_from(path),
        None => config::load(),
    }
}

/// Open the catalog under the configured download root, creating the root.
pub(crate) fn open_store(config: &Config) -> anyhow::Result<CatalogStore> {
    config.validate()?;
    let root = &config.download.download_path;
    std::fs::create_dir_all(root)?;
    let store = CatalogStore::open(root)?;
    if !store.is_initialized() {
        anyhow::bail!(
            "Catalog at {} could not be loaded and was not modified; repair or move it first",
            store.path().display()
        );
    }
    Ok(store)
}

pub(crate) fn open_service(config: &Config) -> anyhow::Result<SyncService> {
    let store = Arc::new(open_store(config)?);
    Ok(SyncService::new(
        store,
        Collaborators::production(config),
        SyncSettings::from_config(config),
    ))
}

/// Print progress events until `stop` fires and everything queued is printed.
pub(crate) async fn print_progress(
    mut rx: UnboundedReceiver<JobProgress>,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            event = rx.recv() => match event {
                Some(event) => {
                    if let Some(line) = progress_line(&event) {
                        println!("{line}");
                    }
                }
                None => break,
            },
            _ = &mut stop => break,
        }
    }
}

fn progress_line(event: &JobProgress) -> Option<String> {
    let key = &event.key.item_id;
    match &event.state {
        JobState::Queued => None,
        JobState::Fetching { percent: None } => Some(format!("  fetching   {key}")),
        // Only whole quarters, yt-dlp reports far more often than that
        JobState::Fetching { percent: Some(p) } => {
            let quarter = (p * 4.0).floor();
            (quarter > 0.0 && (p * 4.0 - quarter).abs() < 0.02)
                .then(|| format!("  fetching   {key} {:.0}%", p * 100.0))
        }
        JobState::PostProcessing => Some(format!("  processing {key}")),
        JobState::Done => Some(format!("  done       {key}")),
        JobState::Failed { reason } => Some(format!("  failed     {key}: {reason}")),
    }
}
