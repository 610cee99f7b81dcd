//! Command-line interface for syncy.
//!
//! This module provides commands for registering playlists, syncing them to
//! disk, and checking that what the catalog records is still there.

mod commands;

pub use commands::{Cli, Commands, run_command};
