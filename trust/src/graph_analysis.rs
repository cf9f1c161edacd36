// Copyright (c) 2025 Cascoin Trust Developers

//! Structural metrics over the trust graph: mutual-trust clusters and
//! centrality.
//!
//! Every metric is a deterministic function of the active edge set. Node and
//! pair iteration follows address order.

use std::collections::{BTreeSet, VecDeque};

use tracing::{debug, info};

use crate::{graph::TrustGraph, store::StoreError, types::Address};

/// Mutual-trust ratio above which an address is considered part of a
/// suspicious cluster
pub const SUSPICIOUS_MUTUAL_RATIO: f64 = 0.9;

/// Largest mutual cluster a BFS will return
const MAX_MUTUAL_CLUSTER: usize = 100;

/// Source/target pairs examined for betweenness
const BETWEENNESS_PAIR_BUDGET: usize = 100;

/// Path depth used for centrality
const CENTRALITY_DEPTH: usize = 5;

/// Structural metrics of one address.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphMetrics {
    pub address: Address,
    pub mutual_trust_ratio: f64,
    pub in_suspicious_cluster: bool,
    /// Mutual-trust neighbourhood, only filled when suspicious
    pub cluster_members: BTreeSet<Address>,
    pub betweenness_centrality: f64,
    pub degree_centrality: f64,
    pub closeness_centrality: f64,
}

/// Read-only analyzer over a snapshot of the graph's node set.
pub struct GraphAnalyzer<'a> {
    graph: &'a TrustGraph,
    nodes: BTreeSet<Address>,
}

impl<'a> GraphAnalyzer<'a> {
    pub fn new(graph: &'a TrustGraph) -> Result<Self, StoreError> {
        let mut nodes = BTreeSet::new();
        for edge in graph.get_all_edges()?.into_iter().filter(|e| e.is_active()) {
            nodes.insert(edge.from);
            nodes.insert(edge.to);
        }
        Ok(Self { graph, nodes })
    }

    pub fn nodes(&self) -> &BTreeSet<Address> {
        &self.nodes
    }

    fn has_edge(&self, from: &Address, to: &Address) -> Result<bool, StoreError> {
        Ok(self
            .graph
            .get_trust_edge(from, to)?
            .is_some_and(|e| e.is_active()))
    }

    /// Share of the address's outgoing edges that are trusted back.
    pub fn mutual_trust_ratio(&self, address: &Address) -> Result<f64, StoreError> {
        let outgoing = self.graph.get_outgoing_trust(address)?;
        if outgoing.is_empty() {
            return Ok(0.0);
        }
        let mut mutual = 0usize;
        for edge in &outgoing {
            if self.has_edge(&edge.to, address)? {
                mutual += 1;
            }
        }
        Ok(mutual as f64 / outgoing.len() as f64)
    }

    /// Addresses whose mutual-trust ratio exceeds the suspicion threshold.
    pub fn detect_suspicious_clusters(&self) -> Result<BTreeSet<Address>, StoreError> {
        let mut suspicious = BTreeSet::new();
        for node in &self.nodes {
            let ratio = self.mutual_trust_ratio(node)?;
            if ratio > SUSPICIOUS_MUTUAL_RATIO {
                debug!(address = %node, ratio, "Suspicious mutual-trust cluster member");
                suspicious.insert(*node);
            }
        }
        if !suspicious.is_empty() {
            info!(count = suspicious.len(), "Detected suspicious mutual-trust clusters");
        }
        Ok(suspicious)
    }

    /// Addresses reachable from `address` over reciprocated edges.
    pub fn find_mutual_cluster(&self, address: &Address) -> Result<BTreeSet<Address>, StoreError> {
        let mut cluster = BTreeSet::new();
        cluster.insert(*address);
        let mut queue = VecDeque::from([*address]);

        while let Some(current) = queue.pop_front() {
            if cluster.len() >= MAX_MUTUAL_CLUSTER {
                break;
            }
            for edge in self.graph.get_outgoing_trust(&current)? {
                if cluster.contains(&edge.to) {
                    continue;
                }
                if self.has_edge(&edge.to, &current)? {
                    cluster.insert(edge.to);
                    queue.push_back(edge.to);
                    if cluster.len() >= MAX_MUTUAL_CLUSTER {
                        break;
                    }
                }
            }
        }
        Ok(cluster)
    }

    /// Fraction of connected node pairs whose trust paths pass through
    /// `address`, over the first pairs in address order.
    pub fn betweenness(&self, address: &Address) -> Result<f64, StoreError> {
        if self.nodes.len() < 3 {
            return Ok(0.0);
        }
        let mut examined = 0usize;
        let mut connected = 0usize;
        let mut through = 0usize;

        'pairs: for source in &self.nodes {
            if source == address {
                continue;
            }
            for target in &self.nodes {
                if target == source || target == address {
                    continue;
                }
                if examined >= BETWEENNESS_PAIR_BUDGET {
                    break 'pairs;
                }
                examined += 1;

                let paths = self.graph.find_trust_paths(source, target, CENTRALITY_DEPTH)?;
                if paths.is_empty() {
                    continue;
                }
                connected += 1;
                if paths.iter().any(|p| p.addresses.contains(address)) {
                    through += 1;
                }
            }
        }

        if connected == 0 {
            Ok(0.0)
        } else {
            Ok(through as f64 / connected as f64)
        }
    }

    /// Incoming plus outgoing active edges over the number of other nodes.
    pub fn degree(&self, address: &Address) -> Result<f64, StoreError> {
        let others = self.nodes.len().saturating_sub(1);
        if others == 0 {
            return Ok(0.0);
        }
        let connections = self.graph.get_outgoing_trust(address)?.len()
            + self.graph.get_incoming_trust(address)?.len();
        Ok(connections as f64 / others as f64)
    }

    /// `1 / (mean shortest hop count + 1)` over reachable nodes.
    pub fn closeness(&self, address: &Address) -> Result<f64, StoreError> {
        let mut total = 0usize;
        let mut reachable = 0usize;
        for target in &self.nodes {
            if target == address {
                continue;
            }
            let paths = self.graph.find_trust_paths(address, target, CENTRALITY_DEPTH)?;
            if let Some(shortest) = paths.iter().map(|p| p.hops()).min() {
                total += shortest;
                reachable += 1;
            }
        }
        if reachable == 0 {
            return Ok(0.0);
        }
        let mean = total as f64 / reachable as f64;
        Ok(1.0 / (mean + 1.0))
    }

    pub fn metrics(&self, address: &Address) -> Result<GraphMetrics, StoreError> {
        let mutual_trust_ratio = self.mutual_trust_ratio(address)?;
        let in_suspicious_cluster = mutual_trust_ratio > SUSPICIOUS_MUTUAL_RATIO;
        let cluster_members = if in_suspicious_cluster {
            self.find_mutual_cluster(address)?
        } else {
            BTreeSet::new()
        };

        let metrics = GraphMetrics {
            address: *address,
            mutual_trust_ratio,
            in_suspicious_cluster,
            cluster_members,
            betweenness_centrality: self.betweenness(address)?,
            degree_centrality: self.degree(address)?,
            closeness_centrality: self.closeness(address)?,
        };
        debug!(
            %address,
            mutual = metrics.mutual_trust_ratio,
            betweenness = metrics.betweenness_centrality,
            degree = metrics.degree_centrality,
            "Computed graph metrics"
        );
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::test_support::*;

    // ========================================================================
    // Mutual trust
    // ========================================================================

    #[test]
    fn test_mutual_ratio() {
        let graph = graph();
        link(&graph, 1, 2, 50, 0);
        link(&graph, 2, 1, 50, 0);
        link(&graph, 1, 3, 50, 0);

        let analyzer = GraphAnalyzer::new(&graph).unwrap();
        assert_eq!(analyzer.mutual_trust_ratio(&addr(1)).unwrap(), 0.5);
        assert_eq!(analyzer.mutual_trust_ratio(&addr(2)).unwrap(), 1.0);
        assert_eq!(analyzer.mutual_trust_ratio(&addr(3)).unwrap(), 0.0);
    }

    #[test]
    fn test_suspicious_clusters_and_bfs() {
        let graph = graph();
        // Fully reciprocated triangle
        for (a, b) in [(1, 2), (2, 3), (1, 3)] {
            link(&graph, a, b, 90, 0);
            link(&graph, b, a, 90, 0);
        }
        // One-way hanger-on
        link(&graph, 4, 1, 50, 0);

        let analyzer = GraphAnalyzer::new(&graph).unwrap();
        let suspicious = analyzer.detect_suspicious_clusters().unwrap();
        assert_eq!(suspicious, BTreeSet::from([addr(1), addr(2), addr(3)]));

        let cluster = analyzer.find_mutual_cluster(&addr(1)).unwrap();
        assert_eq!(cluster, BTreeSet::from([addr(1), addr(2), addr(3)]));

        let metrics = analyzer.metrics(&addr(2)).unwrap();
        assert!(metrics.in_suspicious_cluster);
        assert_eq!(metrics.cluster_members.len(), 3);
    }

    #[test]
    fn test_slashed_edges_not_mutual() {
        let graph = graph();
        link(&graph, 1, 2, 50, 0);
        link(&graph, 2, 1, 50, 0);
        graph.slash_trust_edge(&addr(2), &addr(1), &tx(9)).unwrap();

        let analyzer = GraphAnalyzer::new(&graph).unwrap();
        assert_eq!(analyzer.mutual_trust_ratio(&addr(1)).unwrap(), 0.0);
    }

    // ========================================================================
    // Centrality
    // ========================================================================

    #[test]
    fn test_hub_has_full_betweenness() {
        let graph = graph();
        // 1 -> 2 -> 3 with 2 as the only bridge
        link(&graph, 1, 2, 80, 0);
        link(&graph, 2, 3, 80, 0);

        let analyzer = GraphAnalyzer::new(&graph).unwrap();
        assert_eq!(analyzer.betweenness(&addr(2)).unwrap(), 1.0);
        assert_eq!(analyzer.betweenness(&addr(1)).unwrap(), 0.0);
    }

    #[test]
    fn test_degree_and_closeness() {
        let graph = graph();
        link(&graph, 1, 2, 80, 0);
        link(&graph, 1, 3, 80, 0);
        link(&graph, 3, 4, 80, 0);

        let analyzer = GraphAnalyzer::new(&graph).unwrap();
        // Two connections out of three other nodes
        assert!((analyzer.degree(&addr(1)).unwrap() - 2.0 / 3.0).abs() < 1e-12);

        // Distances 1, 1, 2 give mean 4/3
        let expected = 1.0 / (4.0 / 3.0 + 1.0);
        assert!((analyzer.closeness(&addr(1)).unwrap() - expected).abs() < 1e-12);
        assert_eq!(analyzer.closeness(&addr(4)).unwrap(), 0.0);
    }

    #[test]
    fn test_empty_graph_metrics() {
        let graph = graph();
        let analyzer = GraphAnalyzer::new(&graph).unwrap();
        let metrics = analyzer.metrics(&addr(1)).unwrap();
        assert_eq!(metrics.betweenness_centrality, 0.0);
        assert_eq!(metrics.degree_centrality, 0.0);
        assert!(!metrics.in_suspicious_cluster);
    }
}
