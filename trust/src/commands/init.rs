// Copyright (c) 2025 Cascoin Trust Developers

use anyhow::{bail, Result};
use std::path::Path;
use tracing::info;

use crate::config::{trust_db_path_from_config, Config};

/// Run the init command
pub fn run(config_path: &Path, in_memory: bool) -> Result<()> {
    if Config::exists(config_path) {
        bail!(
            "Config already exists at {}\nUse a different --config path or delete the existing config.",
            config_path.display()
        );
    }

    let mut config = Config::default();
    config.storage.in_memory = in_memory;
    config.save(config_path)?;

    info!("Trust engine initialized at {}", config_path.display());
    println!("\nConfig saved to: {}", config_path.display());
    if in_memory {
        println!("Trust data is kept in memory and lost on exit.");
    } else {
        println!("Trust database: {}", trust_db_path_from_config(config_path).display());
    }
    println!("\nNext steps:");
    println!("  1. Run 'cas-trust votereputation <voter> <address> <vote> <reason>' to rate an address");
    println!("  2. Run 'cas-trust trust <address>' to see its trust score");

    Ok(())
}
