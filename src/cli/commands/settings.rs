//! Config file commands.

use std::path::Path;

use super::ConfigAction;
use crate::config::{self, Config};

pub fn cmd_config(config: &Config, path: Option<&Path>, action: &ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            if let Some(p) = path.map(Path::to_path_buf).or_else(config::config_path) {
                println!("# {}", p.display());
            }
            print!("{}", toml::to_string_pretty(config)?);
            if let Err(e) = config.validate() {
                eprintln!("warning: {e}");
            }
        }
        ConfigAction::Init { force } => {
            if let Some(existing) = path.map(Path::to_path_buf).or_else(config::config_path) {
                if existing.exists() && !force {
                    anyhow::bail!("{} already exists (use --force to overwrite)", existing.display());
                }
            }
            let written = match path {
                Some(p) => {
                    config::save_to(config, p)?;
                    p.to_path_buf()
                }
                None => config::save(config)?,
            };
            println!("Wrote {}", written.display());
        }
    }
    Ok(())
}
