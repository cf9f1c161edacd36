// Copyright (c) 2025 Cascoin Trust Developers

//! Read API used by the rest of the node.
//!
//! Trust of an address is always judged together with its wallet cluster:
//! edges pointing at any member count for every member, and the effective
//! values are the cluster minimum.

use std::collections::{btree_map::Entry, BTreeMap};
use tracing::{debug, warn};

use crate::{
    behavior::BehaviorStore,
    cluster::AddressClusterer,
    flags::FlagSet,
    graph::{bond_weight, TrustEdge, TrustGraph},
    reputation::ReputationLedger,
    securehat::{SecureHat, NEUTRAL_SCORE},
    store::StoreError,
    types::Address,
};

/// Share of validators that must sit outside the trust graph
pub const MIN_NON_WOT_VALIDATORS: f64 = 0.40;

/// Largest tolerated gap between the two groups' average votes, in points
pub const MAX_CROSS_GROUP_DISAGREEMENT: f64 = 60.0;

pub struct ClusterTrustQuery<'a> {
    graph: &'a TrustGraph,
    ledger: &'a ReputationLedger,
    behavior: &'a BehaviorStore,
    flags: &'a FlagSet,
    clusterer: &'a AddressClusterer,
}

impl<'a> ClusterTrustQuery<'a> {
    pub fn new(
        graph: &'a TrustGraph,
        ledger: &'a ReputationLedger,
        behavior: &'a BehaviorStore,
        flags: &'a FlagSet,
        clusterer: &'a AddressClusterer,
    ) -> Self {
        Self {
            graph,
            ledger,
            behavior,
            flags,
            clusterer,
        }
    }

    fn scorer(&self) -> SecureHat<'a> {
        SecureHat::new(self.graph, self.ledger, self.behavior, self.flags)
    }

    /// Edges pointing at other members of `target`'s cluster, re-targeted
    /// onto `target`.
    fn propagated_edges(&self, target: &Address) -> Result<Vec<TrustEdge>, StoreError> {
        let mut propagated = Vec::new();
        for member in self.clusterer.get_cluster_members(target) {
            if member == *target {
                continue;
            }
            for mut edge in self.graph.get_incoming_trust(&member)? {
                if edge.from == *target {
                    continue;
                }
                edge.to = *target;
                edge.reason = format!("propagated from {}", member);
                propagated.push(edge);
            }
        }
        Ok(propagated)
    }

    /// Trust score of a single address.
    ///
    /// With a viewer this is the viewer-relative weighted reputation. The
    /// global view averages direct and propagated incoming edges by bond,
    /// counting each source once with its largest bond.
    pub fn get_address_trust_score(
        &self,
        target: &Address,
        viewer: &Address,
    ) -> Result<f64, StoreError> {
        if !viewer.is_null() {
            let depth = self.graph.config().max_trust_path_depth;
            return self.graph.get_weighted_reputation(viewer, target, depth);
        }

        let mut by_source: BTreeMap<Address, TrustEdge> = BTreeMap::new();
        let direct = self.graph.get_incoming_trust(target)?;
        for edge in direct.into_iter().chain(self.propagated_edges(target)?) {
            match by_source.entry(edge.from) {
                Entry::Vacant(slot) => {
                    slot.insert(edge);
                }
                Entry::Occupied(mut slot) => {
                    if edge.bond_amount > slot.get().bond_amount {
                        slot.insert(edge);
                    }
                }
            }
        }

        let mut weighted_sum = 0.0;
        let mut total_weight = 0.0;
        for edge in by_source.values() {
            let w = bond_weight(edge.bond_amount);
            weighted_sum += edge.weight as f64 * w;
            total_weight += w;
        }
        if total_weight > 0.0 {
            Ok(weighted_sum / total_weight)
        } else {
            Ok(0.0)
        }
    }

    /// Lowest trust score among the members of `target`'s cluster.
    pub fn get_effective_trust(&self, target: &Address, viewer: &Address) -> Result<f64, StoreError> {
        let mut min = f64::INFINITY;
        for member in self.clusterer.get_cluster_members(target) {
            min = min.min(self.get_address_trust_score(&member, viewer)?);
        }
        debug!(%target, effective = min, "Computed effective trust");
        Ok(min)
    }

    /// Active edges pointing at any member of the cluster, ordered by
    /// member and then by source.
    pub fn get_all_cluster_trust_edges(
        &self,
        address: &Address,
    ) -> Result<Vec<TrustEdge>, StoreError> {
        let mut edges = Vec::new();
        for member in self.clusterer.get_cluster_members(address) {
            edges.extend(self.graph.get_incoming_trust(&member)?);
        }
        Ok(edges)
    }

    pub fn get_cluster_incoming_trust(
        &self,
        address: &Address,
    ) -> Result<Vec<TrustEdge>, StoreError> {
        self.get_all_cluster_trust_edges(address)
    }

    /// Whether anyone distrusts any member of the cluster.
    pub fn has_negative_cluster_trust(&self, address: &Address) -> Result<bool, StoreError> {
        Ok(self
            .get_all_cluster_trust_edges(address)?
            .iter()
            .any(|e| e.weight < 0))
    }

    /// Cluster member with the lowest global trust score. Ties keep the
    /// lower address.
    pub fn get_worst_cluster_member(&self, address: &Address) -> Result<(Address, f64), StoreError> {
        let mut worst = (*address, f64::INFINITY);
        for member in self.clusterer.get_cluster_members(address) {
            let score = self.get_address_trust_score(&member, &Address::NULL)?;
            if score < worst.1 {
                worst = (member, score);
            }
        }
        Ok(worst)
    }

    /// Cluster minimum of the SecureHAT scores, in [0, 100].
    pub fn get_final_trust(&self, target: &Address, viewer: &Address, now: u64) -> u8 {
        let scorer = self.scorer();
        self.clusterer
            .get_cluster_members(target)
            .iter()
            .map(|member| scorer.calculate_final_trust(member, viewer, now))
            .min()
            .unwrap_or(NEUTRAL_SCORE)
    }

    pub fn is_address_flagged(&self, address: &Address) -> Result<bool, StoreError> {
        self.flags.is_flagged(address)
    }

    fn has_wot_connection(&self, address: &Address) -> Result<bool, StoreError> {
        Ok(!self.graph.get_outgoing_trust(address)?.is_empty()
            || !self.graph.get_incoming_trust(address)?.is_empty())
    }

    /// Compare the average vote of validators inside the trust graph with
    /// that of validators outside it.
    ///
    /// Returns false when the averages are more than 60 points apart. A side
    /// without votes agrees trivially.
    pub fn check_cross_group_agreement(
        &self,
        validators: &[Address],
        votes: &BTreeMap<Address, i32>,
    ) -> Result<bool, StoreError> {
        let mut wot = Vec::new();
        let mut non_wot = Vec::new();
        for validator in validators {
            let Some(vote) = votes.get(validator) else {
                continue;
            };
            if self.has_wot_connection(validator)? {
                wot.push(*vote as f64);
            } else {
                non_wot.push(*vote as f64);
            }
        }
        if wot.is_empty() || non_wot.is_empty() {
            return Ok(true);
        }

        let wot_avg = wot.iter().sum::<f64>() / wot.len() as f64;
        let non_wot_avg = non_wot.iter().sum::<f64>() / non_wot.len() as f64;
        let disagreement = (wot_avg - non_wot_avg).abs();
        if disagreement > MAX_CROSS_GROUP_DISAGREEMENT {
            warn!(wot_avg, non_wot_avg, "Validator groups disagree");
            return Ok(false);
        }
        Ok(true)
    }

    /// At least 40% of `validators` have no trust-graph connection.
    pub fn check_cross_validation_requirements(
        &self,
        validators: &[Address],
    ) -> Result<bool, StoreError> {
        if validators.is_empty() {
            return Ok(true);
        }
        let mut outside = 0usize;
        for validator in validators {
            if !self.has_wot_connection(validator)? {
                outside += 1;
            }
        }
        let ratio = outside as f64 / validators.len() as f64;
        if ratio < MIN_NON_WOT_VALIDATORS {
            debug!(ratio, "Too few validators outside the trust graph");
            return Ok(false);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::WotConfig,
        store::{KvStore, MemoryStore, PrefixLocks},
        types::{TxHash, COIN},
    };
    use std::{collections::BTreeSet, sync::Arc};

    const T0: u64 = 1_700_000_000;

    struct Fixture {
        graph: TrustGraph,
        ledger: ReputationLedger,
        behavior: BehaviorStore,
        flags: FlagSet,
        clusterer: AddressClusterer,
    }

    impl Fixture {
        fn new() -> Self {
            let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
            let locks = Arc::new(PrefixLocks::new());
            Self {
                graph: TrustGraph::new(store.clone(), locks.clone(), WotConfig::default()),
                ledger: ReputationLedger::new(store.clone(), locks.clone()),
                behavior: BehaviorStore::new(store.clone(), locks.clone()),
                flags: FlagSet::new(store.clone(), locks.clone()),
                clusterer: AddressClusterer::new(store, locks),
            }
        }

        fn query(&self) -> ClusterTrustQuery<'_> {
            ClusterTrustQuery::new(&self.graph, &self.ledger, &self.behavior, &self.flags, &self.clusterer)
        }

        fn link_bonded(&self, from: u64, to: u64, weight: i16, bond: u64) {
            self.graph
                .add_trust_edge(
                    addr(from),
                    addr(to),
                    weight,
                    bond,
                    TxHash::from_low_u64_be(from * 1_000 + to),
                    T0,
                    "",
                )
                .unwrap();
        }

        fn link(&self, from: u64, to: u64, weight: i16) {
            self.link_bonded(from, to, weight, self.graph.required_bond(weight));
        }

        fn wallet(&self, a: u64, b: u64) {
            self.clusterer.link_addresses(&addr(a), &addr(b)).unwrap();
        }
    }

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    // ========================================================================
    // Scores
    // ========================================================================

    #[test]
    fn test_unknown_address_defaults() {
        let f = Fixture::new();
        let q = f.query();
        let x = addr(1);
        assert_eq!(q.get_effective_trust(&x, &Address::NULL).unwrap(), 0.0);
        assert_eq!(q.get_final_trust(&x, &Address::NULL, T0), 50);
        assert_eq!(f.clusterer.get_cluster_members(&x), BTreeSet::from([x]));
        assert!(!q.is_address_flagged(&x).unwrap());
        assert_eq!(q.get_worst_cluster_member(&x).unwrap(), (x, 0.0));
    }

    #[test]
    fn test_propagated_edges_count_for_cluster() {
        let f = Fixture::new();
        f.wallet(1, 2);
        f.link(10, 1, 80);
        f.link(11, 2, -40);

        // (80 * 1.8 - 40 * 1.4) / 3.2
        let score = f.query().get_address_trust_score(&addr(1), &Address::NULL).unwrap();
        assert!((score - 27.5).abs() < 1e-9);

        // Outside the cluster only direct edges count
        let alone = f.graph.global_reputation(&addr(1)).unwrap();
        assert!((alone - 80.0).abs() < 1e-9);
    }

    #[test]
    fn test_duplicate_source_keeps_larger_bond() {
        let f = Fixture::new();
        f.wallet(1, 2);
        f.link(10, 1, 80);
        f.link_bonded(10, 2, -50, 5 * COIN);

        let score = f.query().get_address_trust_score(&addr(1), &Address::NULL).unwrap();
        assert!((score + 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_effective_trust_is_cluster_minimum() {
        let f = Fixture::new();
        f.wallet(1, 2);
        f.link(10, 1, 80);
        f.link(11, 2, -40);

        let q = f.query();
        let viewer = addr(10);
        assert!((q.get_address_trust_score(&addr(1), &viewer).unwrap() - 80.0).abs() < 1e-9);
        assert!((q.get_address_trust_score(&addr(2), &viewer).unwrap() + 40.0).abs() < 1e-9);
        let effective = q.get_effective_trust(&addr(1), &viewer).unwrap();
        assert!((effective + 40.0).abs() < 1e-9);
        assert_eq!(effective, q.get_effective_trust(&addr(2), &viewer).unwrap());
    }

    #[test]
    fn test_final_trust_is_cluster_minimum() {
        let f = Fixture::new();
        f.wallet(1, 2);
        f.ledger.apply_vote(&addr(9), &addr(1), 100, "paid late", T0).unwrap();

        let q = f.query();
        // Member 1 scores 20, member 2 has no history and scores 50
        assert_eq!(q.get_final_trust(&addr(1), &Address::NULL, T0), 20);
        assert_eq!(q.get_final_trust(&addr(2), &Address::NULL, T0), 20);
        assert_eq!(q.get_final_trust(&addr(3), &Address::NULL, T0), 50);
    }

    // ========================================================================
    // Cluster edges
    // ========================================================================

    #[test]
    fn test_cluster_edges_and_negative_trust() {
        let f = Fixture::new();
        f.wallet(1, 2);
        f.link(10, 1, 80);
        f.link(11, 2, -40);
        f.link(12, 3, 60);

        let q = f.query();
        let edges = q.get_all_cluster_trust_edges(&addr(2)).unwrap();
        let pairs: Vec<(Address, Address)> = edges.iter().map(|e| (e.from, e.to)).collect();
        assert_eq!(pairs, vec![(addr(10), addr(1)), (addr(11), addr(2))]);
        assert_eq!(q.get_cluster_incoming_trust(&addr(2)).unwrap(), edges);

        assert!(q.has_negative_cluster_trust(&addr(1)).unwrap());
        assert!(!q.has_negative_cluster_trust(&addr(3)).unwrap());
    }

    #[test]
    fn test_worst_member_tie_keeps_lower_address() {
        let f = Fixture::new();
        f.wallet(1, 2);
        f.link(10, 1, 80);
        f.link(11, 2, -40);

        let (worst, score) = f.query().get_worst_cluster_member(&addr(2)).unwrap();
        assert_eq!(worst, addr(1));
        assert!((score - 27.5).abs() < 1e-9);
    }

    // ========================================================================
    // Validator diversity
    // ========================================================================

    #[test]
    fn test_cross_group_agreement() {
        let f = Fixture::new();
        f.link(1, 2, 50);
        let validators = [addr(1), addr(2), addr(3), addr(4)];
        let q = f.query();

        let split = BTreeMap::from([(addr(1), 100), (addr(2), 80), (addr(3), 10), (addr(4), 0)]);
        assert!(!q.check_cross_group_agreement(&validators, &split).unwrap());

        let close = BTreeMap::from([(addr(1), 100), (addr(2), 80), (addr(3), 50), (addr(4), 40)]);
        assert!(q.check_cross_group_agreement(&validators, &close).unwrap());

        let one_sided = BTreeMap::from([(addr(1), 100), (addr(2), -100)]);
        assert!(q.check_cross_group_agreement(&validators, &one_sided).unwrap());
    }

    #[test]
    fn test_cross_validation_requirements() {
        let f = Fixture::new();
        let validators: Vec<Address> = (1..=5).map(addr).collect();
        f.link(1, 2, 50);
        assert!(f.query().check_cross_validation_requirements(&validators).unwrap());

        f.link(3, 4, 50);
        assert!(!f.query().check_cross_validation_requirements(&validators).unwrap());
        assert!(f.query().check_cross_validation_requirements(&[]).unwrap());
    }
}
