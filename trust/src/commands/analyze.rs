// Copyright (c) 2025 Cascoin Trust Developers

use anyhow::Result;
use std::path::Path;

use super::{open_context, parse_address, unix_now};
use crate::detector::ManipulationResult;

/// Run the manipulation detectors against an address
pub fn run(config_path: &Path, address: &str, flag: bool) -> Result<()> {
    let address = parse_address(address)?;
    let ctx = open_context(config_path)?;
    let now = unix_now();

    let detector = ctx.graph_detector();
    let graph_finding = detector.analyze_address(&address, now)?;
    let vote_finding = ctx.vote_detector().analyze_address(&address, ctx.flags())?;
    let health = detector.calculate_trust_health_score(&address, now)?;

    println!();
    println!("=== Manipulation analysis of {} ===", address);
    println!();
    print_finding("Trust graph", &graph_finding);
    print_finding("Vote history", &vote_finding);
    println!();
    println!("  Trust health: {}/100", health);

    if let Some(existing) = ctx.flags().get(&address)? {
        println!("  Flagged: {} ({:.2})", existing.kind, existing.confidence);
    } else if flag && detector.should_flag(&graph_finding) {
        ctx.flags().flag(&address, &graph_finding)?;
        println!("  Flagged: {} ({:.2})", graph_finding.kind, graph_finding.confidence);
    } else {
        println!("  Flagged: no");
    }
    println!();

    Ok(())
}

fn print_finding(label: &str, finding: &ManipulationResult) {
    if !finding.is_detected() {
        println!("  {}: nothing found", label);
        return;
    }
    println!(
        "  {}: {} (confidence {:.2}{})",
        label,
        finding.kind,
        finding.confidence,
        if finding.escalate_to_dao { ", escalate to DAO" } else { "" }
    );
    println!("    {}", finding.description);
    if !finding.involved_addresses.is_empty() {
        println!("    Involved: {} address(es)", finding.involved_addresses.len());
    }
}
