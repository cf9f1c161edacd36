// Copyright (c) 2025 Cascoin Trust Developers

//! Address-to-root arena with union by size.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use super::WalletCluster;
use crate::types::{Address, TxHash};

/// In-memory union-find over addresses.
///
/// Every seen address maps to a parent; roots map to themselves and own a
/// [`WalletCluster`]. Merges repoint every member of the absorbed cluster, so
/// chains stay short even without compression.
#[derive(Debug, Clone, Default)]
pub struct ClusterIndex {
    parent: BTreeMap<Address, Address>,
    clusters: BTreeMap<Address, WalletCluster>,
    /// Transactions already counted against a cluster
    counted_txs: BTreeSet<TxHash>,
    /// Counted since the last save
    unsaved_txs: Vec<TxHash>,
    /// First block height not yet folded in
    pub(crate) next_height: u64,
}

impl ClusterIndex {
    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    pub fn address_count(&self) -> usize {
        self.parent.len()
    }

    pub fn clusters(&self) -> impl Iterator<Item = &WalletCluster> {
        self.clusters.values()
    }

    /// Root of `address` without mutating the arena.
    ///
    /// Unseen addresses are their own root.
    pub fn find(&self, address: &Address) -> Address {
        let mut current = *address;
        // Bounded walk; a well-formed arena never needs more than its size
        for _ in 0..=self.parent.len() {
            match self.parent.get(&current) {
                Some(parent) if *parent != current => current = *parent,
                _ => break,
            }
        }
        current
    }

    /// Root of `address`, compressing the path behind it.
    pub fn find_compress(&mut self, address: &Address) -> Address {
        let root = self.find(address);
        let mut current = *address;
        while current != root {
            let Some(next) = self.parent.insert(current, root) else {
                break;
            };
            current = next;
        }
        root
    }

    /// Register `address` as a singleton cluster if it was never seen.
    pub fn ensure(&mut self, address: Address, timestamp: u64) {
        if self.parent.contains_key(&address) {
            return;
        }
        self.parent.insert(address, address);
        self.clusters
            .insert(address, WalletCluster::singleton(address, timestamp));
    }

    /// Merge the clusters of `a` and `b`. Returns false if already joined.
    ///
    /// The larger member set absorbs the smaller; on equal sizes the lower
    /// root address wins.
    pub fn union(&mut self, a: &Address, b: &Address) -> bool {
        let ra = self.find_compress(a);
        let rb = self.find_compress(b);
        if ra == rb {
            return false;
        }

        let size_a = self.clusters.get(&ra).map_or(1, |c| c.size());
        let size_b = self.clusters.get(&rb).map_or(1, |c| c.size());
        let (root, absorbed) = if size_a > size_b || (size_a == size_b && ra < rb) {
            (ra, rb)
        } else {
            (rb, ra)
        };

        let absorbed_cluster = self
            .clusters
            .remove(&absorbed)
            .unwrap_or_else(|| WalletCluster::singleton(absorbed, 0));
        for member in &absorbed_cluster.member_addresses {
            self.parent.insert(*member, root);
        }
        self.parent.insert(absorbed, root);

        let target = self
            .clusters
            .entry(root)
            .or_insert_with(|| WalletCluster::singleton(root, 0));
        target.absorb(absorbed_cluster);

        debug!(%root, %absorbed, size = target.size(), "Merged wallet clusters");
        true
    }

    /// Count `txid` against the cluster rooted at `root`.
    ///
    /// Returns false, changing nothing, if the transaction was counted before.
    pub fn record_transaction(&mut self, root: &Address, txid: TxHash, timestamp: u64) -> bool {
        if !self.counted_txs.insert(txid) {
            return false;
        }
        self.unsaved_txs.push(txid);
        if let Some(cluster) = self.clusters.get_mut(root) {
            cluster.record_activity(timestamp);
            cluster.transaction_count += 1;
        }
        true
    }

    pub fn is_counted(&self, txid: &TxHash) -> bool {
        self.counted_txs.contains(txid)
    }

    /// Transactions counted since the last [`mark_saved`](Self::mark_saved).
    pub fn unsaved_txs(&self) -> &[TxHash] {
        &self.unsaved_txs
    }

    pub fn mark_saved(&mut self) {
        self.unsaved_txs.clear();
    }

    pub fn cluster(&self, root: &Address) -> Option<&WalletCluster> {
        self.clusters.get(root)
    }

    /// Members of the cluster containing `address`; `{address}` if unseen.
    pub fn members(&self, address: &Address) -> BTreeSet<Address> {
        let root = self.find(address);
        match self.clusters.get(&root) {
            Some(cluster) => cluster.member_addresses.clone(),
            None => BTreeSet::from([*address]),
        }
    }

    /// Rebuild an index from persisted clusters and counted transactions.
    pub fn from_clusters(
        clusters: Vec<WalletCluster>,
        counted_txs: BTreeSet<TxHash>,
        next_height: u64,
    ) -> Self {
        let mut index = ClusterIndex {
            counted_txs,
            next_height,
            ..Default::default()
        };
        for cluster in clusters {
            for member in &cluster.member_addresses {
                index.parent.insert(*member, cluster.cluster_id);
            }
            index.parent.insert(cluster.cluster_id, cluster.cluster_id);
            index.clusters.insert(cluster.cluster_id, cluster);
        }
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    fn index_with(addresses: &[u64]) -> ClusterIndex {
        let mut index = ClusterIndex::default();
        for a in addresses {
            index.ensure(addr(*a), 100);
        }
        index
    }

    #[test]
    fn test_unseen_address_is_own_root() {
        let index = ClusterIndex::default();
        assert_eq!(index.find(&addr(7)), addr(7));
        assert_eq!(index.members(&addr(7)), BTreeSet::from([addr(7)]));
    }

    #[test]
    fn test_union_joins_members() {
        let mut index = index_with(&[1, 2, 3]);
        assert!(index.union(&addr(1), &addr(2)));
        assert!(!index.union(&addr(2), &addr(1)));
        assert_eq!(index.find(&addr(1)), index.find(&addr(2)));
        assert_ne!(index.find(&addr(1)), index.find(&addr(3)));
        assert_eq!(index.members(&addr(2)).len(), 2);
    }

    #[test]
    fn test_equal_sizes_lower_root_wins() {
        let mut index = index_with(&[5, 9]);
        index.union(&addr(9), &addr(5));
        assert_eq!(index.find(&addr(9)), addr(5));
    }

    #[test]
    fn test_larger_cluster_absorbs_smaller() {
        let mut index = index_with(&[1, 2, 3, 50]);
        index.union(&addr(50), &addr(3));
        index.union(&addr(50), &addr(2));
        // 3 won the first tie as the lower address, then absorbed 2
        let big_root = index.find(&addr(50));
        assert_eq!(big_root, addr(3));

        index.union(&addr(1), &addr(50));
        assert_eq!(index.find(&addr(1)), big_root);
        assert_eq!(index.members(&addr(1)).len(), 4);
        assert_eq!(index.clusters().count(), 1);
    }

    #[test]
    fn test_metadata_merges() {
        let mut index = ClusterIndex::default();
        index.ensure(addr(1), 500);
        index.ensure(addr(2), 100);
        assert!(index.record_transaction(&addr(1), TxHash::from_low_u64_be(1), 900));
        assert!(index.record_transaction(&addr(2), TxHash::from_low_u64_be(2), 200));

        index.union(&addr(1), &addr(2));
        let root = index.find(&addr(1));
        let cluster = index.cluster(&root).unwrap();
        assert_eq!(cluster.first_seen, 100);
        assert_eq!(cluster.last_activity, 900);
        assert_eq!(cluster.transaction_count, 2);
    }

    #[test]
    fn test_transaction_counted_once() {
        let mut index = index_with(&[1, 2]);
        let tx = TxHash::from_low_u64_be(7);
        assert!(index.record_transaction(&addr(1), tx, 300));
        index.union(&addr(1), &addr(2));

        let root = index.find(&addr(2));
        assert!(!index.record_transaction(&root, tx, 300));
        assert_eq!(index.cluster(&root).unwrap().transaction_count, 1);
        assert_eq!(index.unsaved_txs(), &[tx]);

        index.mark_saved();
        assert!(index.unsaved_txs().is_empty());
        assert!(index.is_counted(&tx));
    }

    #[test]
    fn test_rebuild_from_clusters() {
        let mut index = index_with(&[1, 2, 3]);
        index.union(&addr(1), &addr(2));
        let clusters: Vec<WalletCluster> = index.clusters().cloned().collect();

        let counted = BTreeSet::from([TxHash::from_low_u64_be(5)]);
        let rebuilt = ClusterIndex::from_clusters(clusters, counted, 42);
        assert_eq!(rebuilt.next_height, 42);
        assert!(rebuilt.is_counted(&TxHash::from_low_u64_be(5)));
        assert!(rebuilt.unsaved_txs().is_empty());
        assert_eq!(rebuilt.find(&addr(2)), index.find(&addr(2)));
        assert_eq!(rebuilt.members(&addr(3)), BTreeSet::from([addr(3)]));
    }
}
