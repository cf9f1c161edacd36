// Copyright (c) 2025 Cascoin Trust Developers

use anyhow::Result;
use std::path::Path;

use super::open_context;

/// Show graph and cluster statistics
pub fn run(config_path: &Path) -> Result<()> {
    let ctx = open_context(config_path)?;

    let graph = ctx.graph().get_graph_stats()?;
    let clusters = ctx.clusterer().get_stats();
    let flagged = ctx.flags().list()?;

    println!();
    println!("=== Trust Engine Stats ===");
    println!();
    println!("Trust graph:");
    println!("  Edges: {} ({} slashed)", graph.total_trust_edges, graph.slashed_edges);
    println!("  Bonded votes: {} ({} slashed)", graph.total_votes, graph.slashed_votes);
    println!("  Disputes: {} ({} open)", graph.total_disputes, graph.active_disputes);
    println!();
    println!("Wallet clusters:");
    println!("  Clusters: {}", clusters.total_clusters);
    println!("  Addresses: {}", clusters.total_addresses);
    println!("  Largest: {}", clusters.largest_cluster);
    println!("  Indexed up to height: {}", ctx.clusterer().next_height());
    println!();
    println!("Flagged addresses: {}", flagged.len());
    for (address, finding) in flagged.iter().take(10) {
        println!("  {} {} ({:.2})", address, finding.kind, finding.confidence);
    }
    println!();

    Ok(())
}
