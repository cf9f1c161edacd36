// Copyright (c) 2025 Cascoin Trust Developers

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use cas_trust::{commands, config, telemetry};

#[derive(Parser)]
#[command(name = "cas-trust")]
#[command(about = "Bonded web-of-trust reputation engine", long_about = None)]
struct Cli {
    /// Path to config file (default: ~/.cascoin-trust/config.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file
    Init {
        /// Keep the trust database in memory
        #[arg(long)]
        in_memory: bool,
    },

    /// Show the reputation record of an address
    Getreputation {
        /// Address (40 hex characters)
        address: String,
    },

    /// Cast a reputation vote
    Votereputation {
        /// Voting address
        voter: String,

        /// Address being rated
        address: String,

        /// Vote value in [-100, 100], not zero
        #[arg(allow_hyphen_values = true)]
        vote: i16,

        /// Why the vote was cast
        reason: String,
    },

    /// List every address with a reputation record
    Listreputations,

    /// Show the SecureHAT trust breakdown of an address
    Trust {
        address: String,

        /// Score as seen by this address instead of globally
        #[arg(long)]
        viewer: Option<String>,

        /// Print the breakdown as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run the manipulation detectors against an address
    Analyze {
        address: String,

        /// Flag the address when the finding is strong enough
        #[arg(long)]
        flag: bool,
    },

    /// Show graph and cluster statistics
    Stats,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(config::default_config_path);

    let logging = config::Config::load_or_default(&config_path)
        .map(|c| c.logging)
        .unwrap_or_default();
    telemetry::init_tracing(&logging, cli.verbose)?;

    match cli.command {
        Commands::Init { in_memory } => commands::init::run(&config_path, in_memory),
        Commands::Getreputation { address } => commands::reputation::get(&config_path, &address),
        Commands::Votereputation {
            voter,
            address,
            vote,
            reason,
        } => commands::reputation::vote(&config_path, &voter, &address, vote, &reason),
        Commands::Listreputations => commands::reputation::list(&config_path),
        Commands::Trust {
            address,
            viewer,
            json,
        } => commands::trust::run(&config_path, &address, viewer.as_deref(), json),
        Commands::Analyze { address, flag } => commands::analyze::run(&config_path, &address, flag),
        Commands::Stats => commands::stats::run(&config_path),
    }
}
