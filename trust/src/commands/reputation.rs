// Copyright (c) 2025 Cascoin Trust Developers

use anyhow::{Context, Result};
use std::path::Path;

use super::{open_context, parse_address, unix_now};

/// Show the reputation record of an address
pub fn get(config_path: &Path, address: &str) -> Result<()> {
    let address = parse_address(address)?;
    let ctx = open_context(config_path)?;
    let now = unix_now();

    let record = ctx.ledger().get_reputation(&address, now)?;
    let effective = ctx
        .clusterer()
        .get_effective_reputation(&address, ctx.ledger(), now)?;
    let members = ctx.clusterer().get_cluster_members(&address);

    println!();
    println!("=== Reputation of {} ===", address);
    println!();
    println!("  Score: {} ({})", record.score, record.level());
    println!("  Category: {}", record.category);
    println!("  Votes: {}", record.vote_count);
    println!("  Transactions: {}", record.total_transactions);
    println!("  Suspicious patterns: {}", record.suspicious_patterns);
    println!();
    println!("  Wallet cluster: {} address(es)", members.len());
    println!("  Effective reputation: {:.2}", effective);
    if record.should_warn() {
        println!();
        println!("  WARNING: address is rated as a likely scam");
    }
    println!();

    Ok(())
}

/// Cast a reputation vote
pub fn vote(config_path: &Path, voter: &str, address: &str, value: i16, reason: &str) -> Result<()> {
    let voter = parse_address(voter)?;
    let target = parse_address(address)?;
    let ctx = open_context(config_path)?;

    let update = ctx
        .ledger()
        .apply_vote(&voter, &target, value, reason, unix_now())
        .context("Vote rejected")?;

    println!(
        "Reputation of {} moved {} -> {} (voting power {})",
        update.target, update.old_score, update.new_score, update.voting_power
    );
    Ok(())
}

/// List every address with a reputation record
pub fn list(config_path: &Path) -> Result<()> {
    let ctx = open_context(config_path)?;
    let records = ctx.ledger().list_reputations(unix_now())?;

    if records.is_empty() {
        println!("No reputation records.");
        return Ok(());
    }

    println!("{:<42} {:>7} {:>6} {:<10} {:<12}", "ADDRESS", "SCORE", "VOTES", "CATEGORY", "LEVEL");
    for record in &records {
        println!(
            "{:<42} {:>7} {:>6} {:<10} {:<12}",
            record.address.to_string(),
            record.score,
            record.vote_count,
            record.category.to_string(),
            record.level().to_string()
        );
    }
    println!("\n{} record(s)", records.len());
    Ok(())
}
