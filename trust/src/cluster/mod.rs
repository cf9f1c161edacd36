// Copyright (c) 2025 Cascoin Trust Developers

//! Wallet clustering from on-chain co-spend evidence.
//!
//! Two heuristics feed a union-find index:
//!
//! - **Common input**: every input address of one transaction belongs to the
//!   same wallet.
//! - **Change output**: in a two-output transaction the smaller output is
//!   taken to be change and joins the inputs' wallet.
//!
//! Clusters only ever merge. The index is a derived cache of chain history:
//! it is persisted for fast restarts but can always be rebuilt by replaying
//! the chain through [`AddressClusterer::build_clusters`]. With a chain source
//! attached, an empty or invalidated index is rebuilt on first use.

mod union_find;

pub use union_find::ClusterIndex;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tracing::{debug, info, warn};

use crate::{
    reputation::{ReputationLedger, TxSummary},
    store::{keys, read_value, scan_values, KeyRegion, KvStore, PrefixLocks, StoreError, WriteBatch},
    types::{Address, Amount, TxHash},
};

/// Blocks folded in between intermediate saves during a rebuild
const SAVE_INTERVAL_BLOCKS: u64 = 1_000;

/// A group of addresses believed to belong to one wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletCluster {
    /// Union-find root
    pub cluster_id: Address,
    pub member_addresses: BTreeSet<Address>,
    pub first_seen: u64,
    pub last_activity: u64,
    pub transaction_count: u64,
}

impl WalletCluster {
    pub fn singleton(address: Address, timestamp: u64) -> Self {
        Self {
            cluster_id: address,
            member_addresses: BTreeSet::from([address]),
            first_seen: timestamp,
            last_activity: timestamp,
            transaction_count: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.member_addresses.len()
    }

    fn record_activity(&mut self, timestamp: u64) {
        if self.first_seen == 0 || timestamp < self.first_seen {
            self.first_seen = timestamp;
        }
        self.last_activity = self.last_activity.max(timestamp);
    }

    /// Fold another cluster's members and metadata into this one.
    fn absorb(&mut self, other: WalletCluster) {
        if other.first_seen != 0 && (self.first_seen == 0 || other.first_seen < self.first_seen) {
            self.first_seen = other.first_seen;
        }
        self.last_activity = self.last_activity.max(other.last_activity);
        self.transaction_count += other.transaction_count;
        self.member_addresses.extend(other.member_addresses);
    }
}

/// A transaction as seen by the clusterer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainTransaction {
    pub txid: TxHash,
    pub is_coinbase: bool,
    pub timestamp: u64,
    /// Addresses that funded the inputs
    pub inputs: Vec<Address>,
    pub outputs: Vec<(Address, Amount)>,
}

impl ChainTransaction {
    pub fn summary(&self) -> TxSummary {
        TxSummary {
            input_count: self.inputs.len(),
            output_values: self.outputs.iter().map(|(_, v)| *v).collect(),
        }
    }

    /// Likely change address of a two-output transaction.
    ///
    /// The smaller output; the second one when both are equal.
    pub fn change_output(&self) -> Option<Address> {
        match self.outputs.as_slice() {
            [(a0, v0), (a1, v1)] => Some(if v0 < v1 { *a0 } else { *a1 }),
            _ => None,
        }
    }
}

/// Chain history the clusterer replays.
pub trait ChainSource: Send + Sync {
    /// Height of the best block, or `None` for an empty chain.
    fn tip_height(&self) -> Option<u64>;

    /// Transactions of the block at `height` in block order, or `None` if
    /// the block is unavailable.
    fn transactions_at(&self, height: u64) -> Option<Vec<ChainTransaction>>;
}

/// Blocks indexed by height.
impl ChainSource for Vec<Vec<ChainTransaction>> {
    fn tip_height(&self) -> Option<u64> {
        self.len().checked_sub(1).map(|h| h as u64)
    }

    fn transactions_at(&self, height: u64) -> Option<Vec<ChainTransaction>> {
        self.get(height as usize).cloned()
    }
}

/// Receives every non-coinbase transaction replayed by a cluster build.
///
/// Resumed builds may deliver a transaction more than once, so
/// implementations must be idempotent per transaction id.
pub trait TransactionObserver: Send + Sync {
    fn observe_transaction(&self, tx: &ChainTransaction) -> Result<(), StoreError>;
}

/// Summary of a [`AddressClusterer::build_clusters`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub blocks: u64,
    pub transactions: u64,
    pub merges: u64,
}

/// Aggregate shape of the cluster index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClusterStats {
    pub total_clusters: usize,
    pub total_addresses: usize,
    pub largest_cluster: usize,
    /// cluster size -> number of clusters of that size
    pub size_distribution: BTreeMap<usize, usize>,
}

/// Groups addresses into wallets.
///
/// Reads share the index; writers take it exclusively.
pub struct AddressClusterer {
    store: Arc<dyn KvStore>,
    locks: Arc<PrefixLocks>,
    index: RwLock<ClusterIndex>,
    chain: RwLock<Option<Arc<dyn ChainSource>>>,
    observer: Option<Arc<dyn TransactionObserver>>,
    /// Set while the index is empty or invalidated
    stale: AtomicBool,
    rebuild: Mutex<()>,
}

impl AddressClusterer {
    pub fn new(store: Arc<dyn KvStore>, locks: Arc<PrefixLocks>) -> Self {
        Self {
            store,
            locks,
            index: RwLock::new(ClusterIndex::default()),
            chain: RwLock::new(None),
            observer: None,
            stale: AtomicBool::new(true),
            rebuild: Mutex::new(()),
        }
    }

    /// Feed every replayed transaction to `observer`.
    pub fn with_observer(mut self, observer: Arc<dyn TransactionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Chain used for lazy rebuilds.
    pub fn set_chain_source(&self, chain: Arc<dyn ChainSource>) {
        *self.chain.write() = Some(chain);
    }

    /// Whether the next read triggers a rebuild, given a chain source.
    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    /// Rebuild from the chain source if the index is empty or invalidated.
    ///
    /// Without a chain source this does nothing. A failed rebuild is logged
    /// and retried on the next read.
    pub fn ensure_built(&self) {
        if !self.is_stale() {
            return;
        }
        let _rebuild = self.rebuild.lock();
        if !self.is_stale() {
            return;
        }
        let Some(chain) = self.chain.read().clone() else {
            return;
        };
        info!("Cluster cache empty or invalidated, rebuilding");
        if let Err(e) = self.build_clusters(chain.as_ref()) {
            warn!(error = %e, "Lazy cluster rebuild failed");
        }
    }

    /// Apply both heuristics to one transaction.
    ///
    /// Returns true when at least one merge happened. Coinbase transactions
    /// and transactions without input addresses are ignored. Analyzing the
    /// same transaction again changes nothing.
    pub fn analyze_transaction(&self, tx: &ChainTransaction) -> bool {
        if tx.is_coinbase {
            return false;
        }
        let inputs: BTreeSet<Address> = tx.inputs.iter().copied().collect();
        let Some(&first) = inputs.iter().next() else {
            return false;
        };

        let mut index = self.index.write();
        for input in &inputs {
            index.ensure(*input, tx.timestamp);
        }

        let mut merged = false;
        for other in inputs.iter().skip(1) {
            merged |= index.union(&first, other);
        }

        if let Some(change) = tx.change_output() {
            index.ensure(change, tx.timestamp);
            for input in &inputs {
                merged |= index.union(input, &change);
            }
        }

        let root = index.find_compress(&first);
        index.record_transaction(&root, tx.txid, tx.timestamp);

        if merged {
            debug!(txid = %tx.txid, %root, "Transaction merged clusters");
        }
        merged
    }

    /// Manually join two addresses and persist the result.
    pub fn link_addresses(&self, a: &Address, b: &Address) -> Result<bool, StoreError> {
        let merged = {
            let mut index = self.index.write();
            index.ensure(*a, 0);
            index.ensure(*b, 0);
            index.union(a, b)
        };
        if merged {
            info!(%a, %b, "Linked addresses");
            self.save()?;
        }
        Ok(merged)
    }

    /// Fold every block from the last processed height up to the tip.
    ///
    /// Progress is saved periodically, so an interrupted rebuild resumes
    /// where it stopped. Running it again at the same tip does nothing.
    pub fn build_clusters(&self, chain: &dyn ChainSource) -> Result<BuildReport, StoreError> {
        let mut report = BuildReport::default();
        let Some(tip) = chain.tip_height() else {
            info!("No chain data yet, skipping cluster build");
            return Ok(report);
        };

        let start = self.index.read().next_height;
        if start > tip {
            debug!(start, tip, "Cluster index up to date");
            self.stale.store(false, Ordering::Release);
            return Ok(report);
        }
        info!(start, tip, "Building wallet clusters");

        for height in start..=tip {
            match chain.transactions_at(height) {
                Some(txs) => {
                    for tx in txs.iter().filter(|tx| !tx.is_coinbase) {
                        if self.analyze_transaction(tx) {
                            report.merges += 1;
                        }
                        if let Some(observer) = &self.observer {
                            observer.observe_transaction(tx)?;
                        }
                        report.transactions += 1;
                    }
                }
                None => warn!(height, "Block unavailable during cluster build"),
            }
            report.blocks += 1;
            self.index.write().next_height = height + 1;

            if report.blocks % SAVE_INTERVAL_BLOCKS == 0 {
                self.save()?;
            }
        }
        self.save()?;
        self.stale.store(false, Ordering::Release);

        info!(
            blocks = report.blocks,
            transactions = report.transactions,
            merges = report.merges,
            clusters = self.index.read().clusters().count(),
            "Cluster build complete"
        );
        Ok(report)
    }

    /// Drop the in-memory index, the counted transactions and the persisted
    /// progress marker so the next build starts from genesis.
    pub fn invalidate_cache(&self) -> Result<(), StoreError> {
        let _guard = self.locks.lock(KeyRegion::Clusters);
        let mut batch = WriteBatch::new();
        for (key, _) in self.store.scan_prefix(keys::CLUSTER_TX_PREFIX.as_bytes())? {
            batch.delete(key);
        }
        batch.delete(keys::META_CLUSTER_HEIGHT);
        self.store.commit(batch)?;

        *self.index.write() = ClusterIndex::default();
        self.stale.store(true, Ordering::Release);
        info!("Invalidated cluster cache");
        Ok(())
    }

    /// Persist every cluster and address mapping, replacing what was stored.
    pub fn save(&self) -> Result<(), StoreError> {
        let _guard = self.locks.lock(KeyRegion::Clusters);
        let mut index = self.index.write();

        let mut batch = WriteBatch::new();
        for prefix in [keys::CLUSTER_PREFIX, keys::CLUSTER_ADDR_PREFIX] {
            for (key, _) in self.store.scan_prefix(prefix.as_bytes())? {
                batch.delete(key);
            }
        }
        for cluster in index.clusters() {
            batch.put_value(keys::cluster(&cluster.cluster_id), cluster)?;
            for member in &cluster.member_addresses {
                batch.put_value(keys::cluster_addr(member), &cluster.cluster_id)?;
            }
        }
        for txid in index.unsaved_txs() {
            batch.put_value(keys::cluster_tx(txid), &true)?;
        }
        batch.put_value(keys::META_CLUSTER_HEIGHT, &index.next_height)?;
        self.store.commit(batch)?;
        index.mark_saved();

        debug!(clusters = index.clusters().count(), "Saved wallet clusters");
        Ok(())
    }

    /// Replace the in-memory index with the persisted one.
    ///
    /// Returns the number of clusters loaded.
    pub fn load(&self) -> Result<usize, StoreError> {
        let clusters: Vec<WalletCluster> =
            scan_values(self.store.as_ref(), keys::CLUSTER_PREFIX.as_bytes())?;
        let next_height: u64 =
            read_value(self.store.as_ref(), keys::META_CLUSTER_HEIGHT)?.unwrap_or(0);
        let mut counted = BTreeSet::new();
        for (key, _) in self.store.scan_prefix(keys::CLUSTER_TX_PREFIX.as_bytes())? {
            let hex = String::from_utf8_lossy(&key[keys::CLUSTER_TX_PREFIX.len()..]).into_owned();
            let txid: TxHash = hex
                .parse()
                .map_err(|e| StoreError::Serialization(format!("bad cluster tx key: {}", e)))?;
            counted.insert(txid);
        }
        let count = clusters.len();

        *self.index.write() = ClusterIndex::from_clusters(clusters, counted, next_height);
        self.stale.store(count == 0, Ordering::Release);
        info!(clusters = count, next_height, "Loaded wallet clusters");
        Ok(count)
    }

    /// Height of the first block not yet folded into the index.
    pub fn next_height(&self) -> u64 {
        self.index.read().next_height
    }

    /// Root of the cluster containing `address`.
    pub fn cluster_id(&self, address: &Address) -> Address {
        self.ensure_built();
        self.index.read().find(address)
    }

    pub fn get_cluster_for_address(&self, address: &Address) -> Option<WalletCluster> {
        self.ensure_built();
        let index = self.index.read();
        let root = index.find(address);
        index.cluster(&root).cloned()
    }

    /// All addresses in `address`'s wallet; `{address}` if it was never seen.
    pub fn get_cluster_members(&self, address: &Address) -> BTreeSet<Address> {
        self.ensure_built();
        self.index.read().members(address)
    }

    pub fn get_all_clusters(&self) -> Vec<WalletCluster> {
        self.ensure_built();
        self.index.read().clusters().cloned().collect()
    }

    pub fn get_stats(&self) -> ClusterStats {
        self.ensure_built();
        let index = self.index.read();
        let mut stats = ClusterStats {
            total_addresses: index.address_count(),
            ..Default::default()
        };
        for cluster in index.clusters() {
            stats.total_clusters += 1;
            stats.largest_cluster = stats.largest_cluster.max(cluster.size());
            *stats.size_distribution.entry(cluster.size()).or_insert(0) += 1;
        }
        stats
    }

    /// Lowest member reputation of the cluster, mapped onto [0, 100].
    pub fn calculate_cluster_reputation(
        &self,
        cluster_id: &Address,
        ledger: &ReputationLedger,
        now: u64,
    ) -> Result<f64, StoreError> {
        let mut min = 100.0f64;
        for member in self.get_cluster_members(cluster_id) {
            let score = ledger.get_reputation(&member, now)?.score;
            let normalized = (score as f64 / 100.0).clamp(0.0, 100.0);
            min = min.min(normalized);
        }
        Ok(min)
    }

    /// Cluster reputation of the wallet containing `address`.
    pub fn get_effective_reputation(
        &self,
        address: &Address,
        ledger: &ReputationLedger,
        now: u64,
    ) -> Result<f64, StoreError> {
        let root = self.cluster_id(address);
        self.calculate_cluster_reputation(&root, ledger, now)
    }
}
