// Copyright (c) 2025 Cascoin Trust Developers

//! CLI command implementations.
//!
//! These modules implement the user-facing CLI commands and legitimately
//! use stdout for output.

#![allow(clippy::print_stdout)]

pub mod analyze;
pub mod init;
pub mod reputation;
pub mod stats;
pub mod trust;

use anyhow::{Context, Result};
use std::{
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use crate::{
    config::{trust_db_path_from_config, Config},
    context::TrustContext,
    types::Address,
};

/// Load the config and open the trust database next to it.
fn open_context(config_path: &Path) -> Result<TrustContext> {
    let config = Config::load(config_path).context("No config found. Run 'cas-trust init' first.")?;
    let db_path = trust_db_path_from_config(config_path);
    TrustContext::open(config, &db_path)
        .with_context(|| format!("Failed to open trust database at {}", db_path.display()))
}

fn parse_address(s: &str) -> Result<Address> {
    s.parse()
        .with_context(|| format!("Invalid address '{}'", s))
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
