// Copyright (c) 2025 Cascoin Trust Developers

use anyhow::Result;
use std::path::Path;

use super::{open_context, parse_address, unix_now};
use crate::types::Address;

/// Show the SecureHAT trust breakdown of an address
pub fn run(config_path: &Path, address: &str, viewer: Option<&str>, json: bool) -> Result<()> {
    let target = parse_address(address)?;
    let viewer = viewer.map(parse_address).transpose()?.unwrap_or(Address::NULL);
    let ctx = open_context(config_path)?;
    let now = unix_now();

    let breakdown = ctx.scorer().calculate_with_breakdown(&target, &viewer, now);
    let final_trust = ctx.query().get_final_trust(&target, &viewer, now);

    if json {
        println!("{}", serde_json::to_string_pretty(&breakdown)?);
        return Ok(());
    }

    println!();
    println!("=== Trust of {} ===", target);
    if !viewer.is_null() {
        println!("  (as seen by {})", viewer);
    }
    println!();
    println!(
        "  Behavior:  {:.4}  (base {:.4}, diversity {:.4}, volume {:.4}, pattern {:.4})",
        breakdown.secure_behavior,
        breakdown.behavior_base,
        breakdown.diversity_penalty,
        breakdown.volume_penalty,
        breakdown.pattern_penalty
    );
    println!(
        "  WoT:       {:.4}  (base {:.4}, cluster {:.4}, centrality {:.4})",
        breakdown.secure_wot, breakdown.wot_base, breakdown.cluster_penalty, breakdown.centrality_bonus
    );
    println!(
        "  Economic:  {:.4}  (stake {:.4}, time {:.4})",
        breakdown.secure_economic, breakdown.economic_base, breakdown.stake_time_weight
    );
    println!(
        "  Temporal:  {:.4}  (age {:.4}, activity {:.4})",
        breakdown.secure_temporal, breakdown.temporal_base, breakdown.activity_penalty
    );
    println!();
    println!("  Score: {}/100", breakdown.final_score);
    println!("  Wallet cluster score: {}/100", final_trust);
    println!();

    Ok(())
}
