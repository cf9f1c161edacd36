// Copyright (c) 2025 Cascoin Trust Developers

//! Wiring of the trust engine.
//!
//! A [`TrustContext`] is built once at startup and passed by reference to
//! everything that reads or writes trust data.

use parking_lot::Mutex;
use std::{path::Path, sync::Arc};
use tracing::info;

use crate::{
    behavior::BehaviorStore,
    cluster::{AddressClusterer, ChainSource},
    config::Config,
    detector::{TrustGraphManipulationDetector, VoteManipulationDetector},
    flags::FlagSet,
    graph::TrustGraph,
    query::ClusterTrustQuery,
    reputation::ReputationLedger,
    securehat::SecureHat,
    store::{KvStore, LmdbStore, MemoryStore, PrefixLocks, StoreError},
};

pub struct TrustContext {
    config: Config,
    store: Arc<dyn KvStore>,
    graph: Arc<TrustGraph>,
    ledger: Arc<ReputationLedger>,
    behavior: Arc<BehaviorStore>,
    clusterer: Arc<AddressClusterer>,
    flags: Arc<FlagSet>,
    graph_detector: TrustGraphManipulationDetector,
    vote_detector: VoteManipulationDetector,
    /// Serializes block application
    apply_lock: Mutex<()>,
}

impl TrustContext {
    /// Open the engine over the database in `db_path`, or in memory when the
    /// config asks for it. Persisted clusters are loaded back.
    pub fn open(config: Config, db_path: &Path) -> Result<Self, StoreError> {
        let store: Arc<dyn KvStore> = if config.storage.in_memory {
            Arc::new(MemoryStore::new())
        } else {
            Arc::new(LmdbStore::open(db_path, config.storage.map_size_bytes())?)
        };
        let ctx = Self::with_store(config, store);
        let clusters = ctx.clusterer.load()?;
        info!(clusters, next_height = ctx.clusterer.next_height(), "Trust engine ready");
        Ok(ctx)
    }

    /// Engine over a fresh in-memory store.
    pub fn in_memory(config: Config) -> Self {
        Self::with_store(config, Arc::new(MemoryStore::new()))
    }

    pub fn with_store(config: Config, store: Arc<dyn KvStore>) -> Self {
        let locks = Arc::new(PrefixLocks::new());
        let graph = Arc::new(TrustGraph::new(
            store.clone(),
            locks.clone(),
            config.trust_graph.clone(),
        ));
        let ledger = Arc::new(ReputationLedger::new(store.clone(), locks.clone()));
        let behavior = Arc::new(BehaviorStore::new(store.clone(), locks.clone()));
        let clusterer = Arc::new(
            AddressClusterer::new(store.clone(), locks.clone()).with_observer(ledger.clone()),
        );
        let flags = Arc::new(FlagSet::new(store.clone(), locks));
        let graph_detector = TrustGraphManipulationDetector::new(
            graph.clone(),
            clusterer.clone(),
            behavior.clone(),
            flags.clone(),
            config.detector.graph.clone(),
        );
        let vote_detector = VoteManipulationDetector::new(config.detector.votes.clone());

        Self {
            config,
            store,
            graph,
            ledger,
            behavior,
            clusterer,
            flags,
            graph_detector,
            vote_detector,
            apply_lock: Mutex::new(()),
        }
    }

    /// Chain history used to rebuild the cluster cache on demand.
    pub fn attach_chain(&self, chain: Arc<dyn ChainSource>) {
        self.clusterer.set_chain_source(chain);
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    pub fn graph(&self) -> &TrustGraph {
        &self.graph
    }

    pub fn ledger(&self) -> &ReputationLedger {
        &self.ledger
    }

    pub fn behavior(&self) -> &BehaviorStore {
        &self.behavior
    }

    pub fn clusterer(&self) -> &AddressClusterer {
        &self.clusterer
    }

    pub fn flags(&self) -> &FlagSet {
        &self.flags
    }

    pub fn graph_detector(&self) -> &TrustGraphManipulationDetector {
        &self.graph_detector
    }

    pub fn vote_detector(&self) -> &VoteManipulationDetector {
        &self.vote_detector
    }

    pub(crate) fn apply_lock(&self) -> &Mutex<()> {
        &self.apply_lock
    }

    pub fn scorer(&self) -> SecureHat<'_> {
        SecureHat::new(&self.graph, &self.ledger, &self.behavior, &self.flags)
    }

    pub fn query(&self) -> ClusterTrustQuery<'_> {
        ClusterTrustQuery::new(
            &self.graph,
            &self.ledger,
            &self.behavior,
            &self.flags,
            &self.clusterer,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cluster::ChainTransaction,
        config::StorageConfig,
        types::{Address, TxHash},
    };
    use tempfile::tempdir;

    #[test]
    fn test_in_memory_context() {
        let ctx = TrustContext::in_memory(Config::default());
        let x = Address::from_low_u64_be(7);
        assert_eq!(ctx.scorer().calculate_final_trust(&x, &Address::NULL, 0), 50);
        assert_eq!(ctx.query().get_final_trust(&x, &Address::NULL, 0), 50);
        assert_eq!(ctx.clusterer().next_height(), 0);
    }

    #[test]
    fn test_in_memory_flag_skips_disk() {
        let dir = tempdir().unwrap();
        let config = Config {
            storage: StorageConfig {
                in_memory: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let db_path = dir.path().join("trustdb");
        TrustContext::open(config, &db_path).unwrap();
        assert!(!db_path.exists());
    }

    #[test]
    fn test_attached_chain_builds_clusters_and_behavior() {
        let ctx = TrustContext::in_memory(Config::default());
        let (a, b) = (Address::from_low_u64_be(1), Address::from_low_u64_be(2));
        let spend = ChainTransaction {
            txid: TxHash::from_low_u64_be(1),
            is_coinbase: false,
            timestamp: 1_000,
            inputs: vec![a, b],
            outputs: vec![(Address::from_low_u64_be(9), 5_000), (Address::from_low_u64_be(8), 5_000)],
        };
        ctx.attach_chain(Arc::new(vec![vec![spend]]));

        assert!(ctx.clusterer().get_cluster_members(&a).contains(&b));
        let record = ctx.ledger().get_reputation(&b, 1_000).unwrap();
        assert_eq!(record.total_transactions, 1);
        assert_eq!(record.total_volume, 10_000);
    }
}
