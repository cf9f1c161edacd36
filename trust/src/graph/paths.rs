// Copyright (c) 2025 Cascoin Trust Developers

//! Trust path search and viewer-relative reputation.

use std::collections::BTreeMap;

use tracing::debug;

use super::{bond_weight, TrustEdge, TrustGraph, MAX_WEIGHT};
use crate::{store::StoreError, types::Address};

/// Upper bound on the number of paths one search returns.
const MAX_PATHS: usize = 256;

/// A chain of trust edges from one address to another.
#[derive(Debug, Clone, PartialEq)]
pub struct TrustPath {
    /// Every address on the path, endpoints included
    pub addresses: Vec<Address>,
    /// Weight of each hop, `addresses.len() - 1` entries
    pub weights: Vec<i16>,
    /// Product of `weight / 100` over all hops
    pub total_weight: f64,
}

impl TrustPath {
    fn new(addresses: Vec<Address>, weights: Vec<i16>) -> Self {
        let total_weight = weights
            .iter()
            .fold(1.0, |acc, w| acc * (*w as f64 / MAX_WEIGHT as f64));
        Self {
            addresses,
            weights,
            total_weight,
        }
    }

    pub fn hops(&self) -> usize {
        self.weights.len()
    }
}

impl TrustGraph {
    /// Active outgoing edges strong enough to carry trust along a path.
    fn followable_edges(&self, from: &Address) -> Result<Vec<TrustEdge>, StoreError> {
        let min = self.config.min_path_edge_weight;
        Ok(self
            .get_outgoing_trust(from)?
            .into_iter()
            .filter(|e| e.weight >= min)
            .collect())
    }

    /// All simple paths from `from` to `to` of at most `max_depth` hops.
    ///
    /// Only active edges with weight at or above `min_path_edge_weight` are
    /// followed. Results are ordered by total weight, strongest first, with
    /// ties broken by address sequence.
    pub fn find_trust_paths(
        &self,
        from: &Address,
        to: &Address,
        max_depth: usize,
    ) -> Result<Vec<TrustPath>, StoreError> {
        let mut paths = Vec::new();
        if from == to || max_depth == 0 {
            return Ok(paths);
        }

        let mut adjacency: BTreeMap<Address, Vec<TrustEdge>> = BTreeMap::new();
        let mut stack: Vec<(Vec<Address>, Vec<i16>)> = vec![(vec![*from], Vec::new())];

        'search: while let Some((addresses, weights)) = stack.pop() {
            let Some(&current) = addresses.last() else {
                continue;
            };
            if weights.len() >= max_depth {
                continue;
            }
            if !adjacency.contains_key(&current) {
                adjacency.insert(current, self.followable_edges(&current)?);
            }
            let edges = adjacency.get(&current).cloned().unwrap_or_default();

            // Reverse push so the lowest target is explored first
            for edge in edges.iter().rev() {
                if addresses.contains(&edge.to) {
                    continue;
                }
                let mut next_addresses = addresses.clone();
                next_addresses.push(edge.to);
                let mut next_weights = weights.clone();
                next_weights.push(edge.weight);

                if edge.to == *to {
                    paths.push(TrustPath::new(next_addresses, next_weights));
                    if paths.len() >= MAX_PATHS {
                        break 'search;
                    }
                } else {
                    stack.push((next_addresses, next_weights));
                }
            }
        }

        paths.sort_by(|a, b| {
            b.total_weight
                .total_cmp(&a.total_weight)
                .then_with(|| a.addresses.cmp(&b.addresses))
        });
        debug!(%from, %to, count = paths.len(), "Found trust paths");
        Ok(paths)
    }

    /// Bond-weighted average of every opinion about `target`: active edges
    /// pointing at it and its unslashed bonded votes.
    ///
    /// Zero when nobody has an opinion about the address.
    pub fn global_reputation(&self, target: &Address) -> Result<f64, StoreError> {
        let mut weighted_sum = 0.0;
        let mut total_weight = 0.0;
        for edge in self.get_incoming_trust(target)? {
            let w = bond_weight(edge.bond_amount);
            weighted_sum += edge.weight as f64 * w;
            total_weight += w;
        }
        for vote in self.get_votes_for_address(target)? {
            if vote.slashed {
                continue;
            }
            let w = bond_weight(vote.bond_amount);
            weighted_sum += vote.vote_value as f64 * w;
            total_weight += w;
        }
        if total_weight > 0.0 {
            Ok(weighted_sum / total_weight)
        } else {
            Ok(0.0)
        }
    }

    /// Best path strength from `viewer` to every address within `hops` hops.
    fn reach_from(&self, viewer: &Address, hops: usize) -> Result<BTreeMap<Address, f64>, StoreError> {
        let mut reach = BTreeMap::new();
        reach.insert(*viewer, 1.0);
        let mut frontier: BTreeMap<Address, f64> = reach.clone();

        for _ in 0..hops {
            let mut next: BTreeMap<Address, f64> = BTreeMap::new();
            for (node, strength) in &frontier {
                for edge in self.followable_edges(node)? {
                    let candidate = strength * (edge.weight as f64 / MAX_WEIGHT as f64);
                    let improves = reach.get(&edge.to).map_or(true, |cur| candidate > *cur);
                    if improves {
                        reach.insert(edge.to, candidate);
                        next.insert(edge.to, candidate);
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }
        Ok(reach)
    }

    /// Reputation of `target` as seen from `viewer`.
    ///
    /// Opinions (edges and bonded votes) count only when their author is
    /// reachable from the viewer within `max_hops - 1` hops, scaled by the
    /// strongest path to that author and by bond size. With a null viewer,
    /// a viewer equal to the target, or no reachable opinion at all, this
    /// falls back to [`TrustGraph::global_reputation`].
    pub fn get_weighted_reputation(
        &self,
        viewer: &Address,
        target: &Address,
        max_hops: usize,
    ) -> Result<f64, StoreError> {
        if viewer.is_null() || viewer == target {
            return self.global_reputation(target);
        }

        let mut reach = self.reach_from(viewer, max_hops.saturating_sub(1))?;
        reach.remove(target);

        let mut weighted_sum = 0.0;
        let mut total_weight = 0.0;

        for edge in self.get_incoming_trust(target)? {
            if let Some(strength) = reach.get(&edge.from) {
                let w = bond_weight(edge.bond_amount) * strength;
                weighted_sum += edge.weight as f64 * w;
                total_weight += w;
            }
        }
        for vote in self.get_votes_for_address(target)? {
            if vote.slashed {
                continue;
            }
            if let Some(strength) = reach.get(&vote.voter) {
                let w = bond_weight(vote.bond_amount) * strength;
                weighted_sum += vote.vote_value as f64 * w;
                total_weight += w;
            }
        }

        if total_weight > 0.0 {
            Ok(weighted_sum / total_weight)
        } else {
            self.global_reputation(target)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    // ========================================================================
    // Path search
    // ========================================================================

    #[test]
    fn test_direct_and_indirect_paths() {
        let graph = graph();
        link(&graph, 1, 2, 80, 0);
        link(&graph, 2, 3, 50, 0);
        link(&graph, 1, 3, 30, 0);

        let paths = graph.find_trust_paths(&addr(1), &addr(3), 3).unwrap();
        assert_eq!(paths.len(), 2);

        // 0.8 * 0.5 = 0.4 beats the direct 0.3
        assert_eq!(paths[0].addresses, vec![addr(1), addr(2), addr(3)]);
        assert!((paths[0].total_weight - 0.4).abs() < 1e-12);
        assert_eq!(paths[0].hops(), 2);
        assert_eq!(paths[1].weights, vec![30]);
    }

    #[test]
    fn test_depth_limit() {
        let graph = graph();
        link(&graph, 1, 2, 90, 0);
        link(&graph, 2, 3, 90, 0);
        link(&graph, 3, 4, 90, 0);

        assert!(graph.find_trust_paths(&addr(1), &addr(4), 2).unwrap().is_empty());
        assert_eq!(graph.find_trust_paths(&addr(1), &addr(4), 3).unwrap().len(), 1);
    }

    #[test]
    fn test_weak_and_negative_edges_not_followed() {
        let graph = graph();
        link(&graph, 1, 2, 5, 0);
        link(&graph, 2, 3, 90, 0);
        link(&graph, 1, 4, -60, 0);
        link(&graph, 4, 3, 90, 0);

        assert!(graph.find_trust_paths(&addr(1), &addr(3), 3).unwrap().is_empty());
    }

    #[test]
    fn test_cycles_do_not_loop() {
        let graph = graph();
        link(&graph, 1, 2, 90, 0);
        link(&graph, 2, 1, 90, 0);
        link(&graph, 2, 3, 90, 0);

        let paths = graph.find_trust_paths(&addr(1), &addr(3), 6).unwrap();
        assert_eq!(paths.len(), 1);
    }

    #[test]
    fn test_no_path_to_self() {
        let graph = graph();
        link(&graph, 1, 2, 90, 0);
        link(&graph, 2, 1, 90, 0);
        assert!(graph.find_trust_paths(&addr(1), &addr(1), 3).unwrap().is_empty());
    }

    // ========================================================================
    // Reputation
    // ========================================================================

    #[test]
    fn test_global_reputation_bond_weighted() {
        let graph = graph();
        // Bonds are 1.8 and 1.4 coins
        link(&graph, 1, 9, 80, 0);
        link(&graph, 2, 9, 40, 0);

        let expected = (80.0 * 1.8 + 40.0 * 1.4) / (1.8 + 1.4);
        let got = graph.global_reputation(&addr(9)).unwrap();
        assert!((got - expected).abs() < 1e-9);
        assert_eq!(graph.global_reputation(&addr(5)).unwrap(), 0.0);
    }

    #[test]
    fn test_global_reputation_counts_bonded_votes() {
        let graph = graph();
        let bond = graph.required_bond(60);
        link(&graph, 1, 9, 80, 0);
        graph
            .record_bonded_vote(addr(2), addr(9), -60, bond, tx(500), 0, "late delivery")
            .unwrap();

        let edge_w = bond_weight(graph.required_bond(80));
        let vote_w = bond_weight(bond);
        let expected = (80.0 * edge_w - 60.0 * vote_w) / (edge_w + vote_w);
        let global = graph.global_reputation(&addr(9)).unwrap();
        assert!((global - expected).abs() < 1e-9);

        // A viewer reaching both authors sees the same opinions
        link(&graph, 5, 1, 100, 0);
        link(&graph, 5, 2, 100, 0);
        let seen = graph.get_weighted_reputation(&addr(5), &addr(9), 3).unwrap();
        assert!((seen - global).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_reputation_uses_viewer_paths() {
        let graph = graph();
        link(&graph, 1, 2, 100, 0);
        link(&graph, 2, 9, 80, 0);
        link(&graph, 3, 9, -100, 0);

        // Viewer 1 reaches 2 but not 3
        let seen = graph.get_weighted_reputation(&addr(1), &addr(9), 3).unwrap();
        assert!((seen - 80.0).abs() < 1e-9);

        // Global view mixes both opinions
        let global = graph
            .get_weighted_reputation(&Address::NULL, &addr(9), 3)
            .unwrap();
        assert!(global < seen);
    }

    #[test]
    fn test_weighted_reputation_falls_back_without_paths() {
        let graph = graph();
        link(&graph, 2, 9, 60, 0);

        let isolated = graph.get_weighted_reputation(&addr(1), &addr(9), 3).unwrap();
        assert_eq!(isolated, graph.global_reputation(&addr(9)).unwrap());
    }

    #[test]
    fn test_weighted_reputation_hop_limit() {
        let graph = graph();
        link(&graph, 1, 2, 100, 0);
        link(&graph, 2, 3, 100, 0);
        link(&graph, 3, 9, 90, 0);
        link(&graph, 4, 9, -90, 0);

        // 1 -> 2 -> 3 -> 9 needs three hops
        let near = graph.get_weighted_reputation(&addr(1), &addr(9), 2).unwrap();
        let far = graph.get_weighted_reputation(&addr(1), &addr(9), 3).unwrap();
        assert_eq!(near, graph.global_reputation(&addr(9)).unwrap());
        assert!((far - 90.0).abs() < 1e-9);
    }
}
