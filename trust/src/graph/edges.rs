// Copyright (c) 2025 Cascoin Trust Developers

use tracing::{debug, info};

use super::{GraphStats, SlashOutcome, TrustEdge, TrustGraph, MAX_WEIGHT};
use crate::{
    error::{TrustError, MAX_REASON_LEN},
    store::{keys, read_value, scan_values, KeyRegion, StoreError, WriteBatch},
    types::{Address, Amount, TxHash},
};

impl TrustGraph {
    /// Record a bonded trust edge.
    ///
    /// Replaying the same bond transaction returns the stored edge unchanged.
    /// A slashed edge between the same pair is archived and replaced; an
    /// active one makes the call fail with [`TrustError::DuplicateEdge`].
    #[allow(clippy::too_many_arguments)]
    pub fn add_trust_edge(
        &self,
        from: Address,
        to: Address,
        weight: i16,
        bond_amount: Amount,
        bond_tx_hash: TxHash,
        timestamp: u64,
        reason: &str,
    ) -> Result<TrustEdge, TrustError> {
        if !(-MAX_WEIGHT..=MAX_WEIGHT).contains(&weight) {
            return Err(TrustError::WeightOutOfRange(weight));
        }
        if from == to {
            return Err(TrustError::SelfTrust(from));
        }
        if reason.len() > MAX_REASON_LEN {
            return Err(TrustError::ReasonTooLong(reason.len(), MAX_REASON_LEN));
        }
        let required = self.required_bond(weight);
        if bond_amount < required {
            return Err(TrustError::InsufficientBond {
                provided: bond_amount,
                required,
            });
        }

        let _guard = self.locks.lock(KeyRegion::TrustEdges);
        let mut batch = WriteBatch::new();

        if let Some(existing) = self.get_trust_edge(&from, &to)? {
            if existing.bond_tx_hash == bond_tx_hash {
                debug!(%from, %to, "Trust edge already recorded");
                return Ok(existing);
            }
            if existing.is_active() {
                return Err(TrustError::DuplicateEdge { from, to });
            }
            batch.put_value(keys::slashed_edge(&existing.bond_tx_hash), &existing)?;
        }

        let edge = TrustEdge {
            from,
            to,
            weight,
            bond_amount,
            bond_tx_hash,
            timestamp,
            slashed: false,
            reason: reason.to_string(),
        };
        batch.put_value(keys::trust_edge(&from, &to), &edge)?;
        batch.put_value(keys::trust_in(&to, &from), &edge)?;
        self.store.commit(batch)?;

        info!(%from, %to, weight, bond = bond_amount, "Added trust edge");
        Ok(edge)
    }

    /// The current edge between `from` and `to`, slashed or not.
    pub fn get_trust_edge(
        &self,
        from: &Address,
        to: &Address,
    ) -> Result<Option<TrustEdge>, StoreError> {
        read_value(self.store.as_ref(), &keys::trust_edge(from, to))
    }

    /// Active edges leaving `from`, ordered by target.
    pub fn get_outgoing_trust(&self, from: &Address) -> Result<Vec<TrustEdge>, StoreError> {
        let edges: Vec<TrustEdge> =
            scan_values(self.store.as_ref(), &keys::trust_out_prefix(from))?;
        Ok(edges.into_iter().filter(TrustEdge::is_active).collect())
    }

    /// Active edges pointing at `to`, ordered by source.
    pub fn get_incoming_trust(&self, to: &Address) -> Result<Vec<TrustEdge>, StoreError> {
        let edges: Vec<TrustEdge> = scan_values(self.store.as_ref(), &keys::trust_in_prefix(to))?;
        Ok(edges.into_iter().filter(TrustEdge::is_active).collect())
    }

    /// Every current edge in the graph, including slashed ones, ordered by
    /// source then target.
    pub fn get_all_edges(&self) -> Result<Vec<TrustEdge>, StoreError> {
        self.store
            .scan_prefix(keys::TRUST_PREFIX.as_bytes())?
            .into_iter()
            .filter(|(key, _)| keys::is_forward_edge_key(key))
            .map(|(_, value)| bincode::deserialize(&value).map_err(StoreError::from))
            .collect()
    }

    /// Mark an edge slashed. Slashing twice is a no-op.
    pub fn slash_trust_edge(
        &self,
        from: &Address,
        to: &Address,
        slash_tx: &TxHash,
    ) -> Result<SlashOutcome, TrustError> {
        let _guard = self.locks.lock(KeyRegion::TrustEdges);

        let mut edge = self
            .get_trust_edge(from, to)?
            .ok_or(TrustError::UnknownEdge {
                from: *from,
                to: *to,
            })?;
        if edge.slashed {
            return Ok(SlashOutcome::AlreadySlashed);
        }
        edge.slashed = true;

        let mut batch = WriteBatch::new();
        batch.put_value(keys::trust_edge(from, to), &edge)?;
        batch.put_value(keys::trust_in(to, from), &edge)?;
        self.store.commit(batch)?;

        info!(%from, %to, slash_tx = %slash_tx, "Slashed trust edge");
        Ok(SlashOutcome::Slashed)
    }

    /// Counters over edges, votes and disputes.
    pub fn get_graph_stats(&self) -> Result<GraphStats, StoreError> {
        let mut stats = GraphStats::default();

        for edge in self.get_all_edges()? {
            stats.total_trust_edges += 1;
            if edge.slashed {
                stats.slashed_edges += 1;
            }
        }
        for vote in self.list_votes()? {
            stats.total_votes += 1;
            if vote.slashed {
                stats.slashed_votes += 1;
            }
        }
        for dispute in self.list_disputes()? {
            stats.total_disputes += 1;
            if !dispute.resolved {
                stats.active_disputes += 1;
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::types::COIN;

    // ========================================================================
    // Validation
    // ========================================================================

    #[test]
    fn test_rejects_out_of_range_weight() {
        let graph = graph();
        let err = graph
            .add_trust_edge(addr(1), addr(2), 101, 100 * COIN, tx(1), 0, "")
            .unwrap_err();
        assert!(matches!(err, TrustError::WeightOutOfRange(101)));

        let err = graph
            .add_trust_edge(addr(1), addr(2), -101, 100 * COIN, tx(1), 0, "")
            .unwrap_err();
        assert!(matches!(err, TrustError::WeightOutOfRange(-101)));
    }

    #[test]
    fn test_rejects_self_trust() {
        let graph = graph();
        let err = graph
            .add_trust_edge(addr(1), addr(1), 50, 100 * COIN, tx(1), 0, "")
            .unwrap_err();
        assert!(matches!(err, TrustError::SelfTrust(_)));
    }

    #[test]
    fn test_rejects_insufficient_bond() {
        let graph = graph();
        let required = graph.required_bond(80);
        assert_eq!(required, COIN + 80 * (COIN / 100));

        let err = graph
            .add_trust_edge(addr(1), addr(2), 80, required - 1, tx(1), 0, "")
            .unwrap_err();
        assert!(matches!(
            err,
            TrustError::InsufficientBond { provided, required: r } if provided == required - 1 && r == required
        ));
        assert!(graph.get_trust_edge(&addr(1), &addr(2)).unwrap().is_none());
    }

    #[test]
    fn test_negative_weight_bond_uses_magnitude() {
        let graph = graph();
        assert_eq!(graph.required_bond(-50), graph.required_bond(50));
    }

    // ========================================================================
    // Storage and indexing
    // ========================================================================

    #[test]
    fn test_edge_is_indexed_both_directions() {
        let graph = graph();
        let edge = link(&graph, 1, 2, 60, 1_000);

        assert_eq!(graph.get_trust_edge(&addr(1), &addr(2)).unwrap(), Some(edge.clone()));
        assert_eq!(graph.get_outgoing_trust(&addr(1)).unwrap(), vec![edge.clone()]);
        assert_eq!(graph.get_incoming_trust(&addr(2)).unwrap(), vec![edge]);
        assert!(graph.get_incoming_trust(&addr(1)).unwrap().is_empty());
    }

    #[test]
    fn test_replay_is_idempotent() {
        let graph = graph();
        let first = link(&graph, 1, 2, 60, 1_000);
        let second = link(&graph, 1, 2, 60, 1_000);
        assert_eq!(first, second);
        assert_eq!(graph.get_all_edges().unwrap().len(), 1);
    }

    #[test]
    fn test_duplicate_active_edge_rejected() {
        let graph = graph();
        link(&graph, 1, 2, 60, 1_000);

        let err = graph
            .add_trust_edge(addr(1), addr(2), 30, 10 * COIN, tx(99), 2_000, "again")
            .unwrap_err();
        assert!(matches!(err, TrustError::DuplicateEdge { .. }));
    }

    #[test]
    fn test_slashed_edge_can_be_replaced() {
        let graph = graph();
        link(&graph, 1, 2, 60, 1_000);
        graph.slash_trust_edge(&addr(1), &addr(2), &tx(500)).unwrap();

        let edge = graph
            .add_trust_edge(addr(1), addr(2), 20, 10 * COIN, tx(99), 2_000, "second chance")
            .unwrap();
        assert_eq!(edge.weight, 20);
        assert!(edge.is_active());
        assert_eq!(graph.get_incoming_trust(&addr(2)).unwrap(), vec![edge]);
    }

    #[test]
    fn test_all_edges_excludes_reverse_index() {
        let graph = graph();
        link(&graph, 1, 2, 60, 0);
        link(&graph, 2, 3, 40, 0);
        link(&graph, 3, 1, -20, 0);

        let edges = graph.get_all_edges().unwrap();
        assert_eq!(edges.len(), 3);
        assert_eq!(edges[0].from, addr(1));
        assert_eq!(edges[2].from, addr(3));
    }

    // ========================================================================
    // Slashing
    // ========================================================================

    #[test]
    fn test_slash_edge_is_idempotent() {
        let graph = graph();
        link(&graph, 1, 2, 60, 0);

        assert_eq!(
            graph.slash_trust_edge(&addr(1), &addr(2), &tx(7)).unwrap(),
            SlashOutcome::Slashed
        );
        assert_eq!(
            graph.slash_trust_edge(&addr(1), &addr(2), &tx(7)).unwrap(),
            SlashOutcome::AlreadySlashed
        );

        // Slashed edges drop out of the active views but stay stored
        assert!(graph.get_outgoing_trust(&addr(1)).unwrap().is_empty());
        assert!(graph.get_incoming_trust(&addr(2)).unwrap().is_empty());
        assert!(graph.get_trust_edge(&addr(1), &addr(2)).unwrap().unwrap().slashed);
    }

    #[test]
    fn test_slash_unknown_edge() {
        let graph = graph();
        let err = graph
            .slash_trust_edge(&addr(1), &addr(2), &tx(7))
            .unwrap_err();
        assert!(matches!(err, TrustError::UnknownEdge { .. }));
    }

    #[test]
    fn test_graph_stats_counts_edges() {
        let graph = graph();
        link(&graph, 1, 2, 60, 0);
        link(&graph, 2, 3, 60, 0);
        graph.slash_trust_edge(&addr(2), &addr(3), &tx(9)).unwrap();

        let stats = graph.get_graph_stats().unwrap();
        assert_eq!(stats.total_trust_edges, 2);
        assert_eq!(stats.slashed_edges, 1);
        assert_eq!(stats.total_votes, 0);
        assert_eq!(stats.total_disputes, 0);
    }
}
