// Copyright (c) 2025 Cascoin Trust Developers

//! Validator-vote and score-history analysis.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use super::{ManipulationResult, ManipulationType};
use crate::{
    config::VoteDetectorConfig,
    flags::FlagSet,
    store::StoreError,
    types::{Address, TxHash},
};

/// One validator's verdict on a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub tx_hash: TxHash,
    pub validator: Address,
    pub accept: bool,
    pub timestamp_ms: u64,
    /// Difference between the validator's and the sender's claimed score
    pub score_diff: i16,
}

/// A recorded score movement of one address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReputationChange {
    pub address: Address,
    pub height: u64,
    pub old_score: i64,
    pub new_score: i64,
    pub reason: String,
}

impl ReputationChange {
    pub fn delta(&self) -> i64 {
        self.new_score - self.old_score
    }
}

#[derive(Debug, Default)]
struct History {
    votes: BTreeMap<TxHash, Vec<VoteRecord>>,
    changes: BTreeMap<Address, Vec<ReputationChange>>,
    /// Lowest height still retained in `changes`
    retained_from: u64,
}

impl History {
    fn prune_changes(&mut self, min_height: u64) {
        for changes in self.changes.values_mut() {
            changes.retain(|c| c.height >= min_height);
        }
        self.changes.retain(|_, changes| !changes.is_empty());
        self.retained_from = self.retained_from.max(min_height);
    }

    /// Returns the number of transactions dropped.
    fn prune_votes(&mut self, keep: usize) -> usize {
        if self.votes.len() <= keep {
            return 0;
        }
        let mut latest: Vec<(u64, TxHash)> = self
            .votes
            .iter()
            .map(|(tx, votes)| (votes.iter().map(|v| v.timestamp_ms).max().unwrap_or(0), *tx))
            .collect();
        latest.sort_by(|a, b| b.cmp(a));

        let mut dropped = 0;
        for (_, tx) in latest.into_iter().skip(keep) {
            self.votes.remove(&tx);
            dropped += 1;
        }
        dropped
    }
}

/// In-memory vote and score history with the detectors that read it.
pub struct VoteManipulationDetector {
    config: VoteDetectorConfig,
    history: RwLock<History>,
    /// Symmetric agreement cache, cleared whenever a vote arrives. Lock it
    /// only after `history` when holding both.
    correlations: Mutex<BTreeMap<(Address, Address), f64>>,
}

impl VoteManipulationDetector {
    pub fn new(config: VoteDetectorConfig) -> Self {
        Self {
            config,
            history: RwLock::new(History::default()),
            correlations: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn config(&self) -> &VoteDetectorConfig {
        &self.config
    }

    /// Record a validator vote. A second vote by the same validator on the
    /// same transaction replaces the first.
    ///
    /// Once more than `max_tracked_txs` transactions are held, the least
    /// recently voted ones are dropped down to nine tenths of the limit.
    pub fn record_vote(&self, record: VoteRecord) {
        debug!(
            tx = %record.tx_hash,
            validator = %record.validator,
            accept = record.accept,
            diff = record.score_diff,
            "Recorded validator vote"
        );
        let mut history = self.history.write();
        let votes = history.votes.entry(record.tx_hash).or_default();
        match votes.iter_mut().find(|v| v.validator == record.validator) {
            Some(existing) => *existing = record,
            None => votes.push(record),
        }
        let limit = self.config.max_tracked_txs;
        if history.votes.len() > limit {
            let dropped = history.prune_votes(limit - limit / 10);
            debug!(dropped, limit, "Vote history over limit, dropped oldest transactions");
        }
        self.correlations.lock().clear();
    }

    /// Record a score movement. History stays ordered by height.
    ///
    /// Movements more than `history_retention_blocks` below the newest
    /// recorded height are dropped.
    pub fn record_reputation_change(&self, change: ReputationChange) {
        debug!(
            address = %change.address,
            height = change.height,
            old = change.old_score,
            new = change.new_score,
            "Recorded reputation change"
        );
        let mut history = self.history.write();
        let cutoff = change.height.saturating_sub(self.config.history_retention_blocks);
        if cutoff > history.retained_from {
            history.prune_changes(cutoff);
        }
        if change.height < history.retained_from {
            return;
        }
        let changes = history.changes.entry(change.address).or_default();
        let pos = changes.partition_point(|c| c.height <= change.height);
        changes.insert(pos, change);
    }

    pub fn get_vote_history(&self, tx_hash: &TxHash) -> Vec<VoteRecord> {
        self.history
            .read()
            .votes
            .get(tx_hash)
            .cloned()
            .unwrap_or_default()
    }

    pub fn get_reputation_history(&self, address: &Address) -> Vec<ReputationChange> {
        self.history
            .read()
            .changes
            .get(address)
            .cloned()
            .unwrap_or_default()
    }

    /// Sorted list of every validator that has voted.
    pub fn validators(&self) -> BTreeSet<Address> {
        self.history
            .read()
            .votes
            .values()
            .flatten()
            .map(|v| v.validator)
            .collect()
    }

    /// One side of the vote holding a dominant share of the validators.
    pub fn detect_coordinated_voting(&self, tx_hash: &TxHash) -> ManipulationResult {
        let votes = self.get_vote_history(tx_hash);
        if votes.len() < self.config.min_votes_for_analysis {
            return ManipulationResult::none();
        }

        // Accepting side first, then rejecting
        for side in [true, false] {
            let group: Vec<Address> = votes
                .iter()
                .filter(|v| v.accept == side)
                .map(|v| v.validator)
                .collect();
            let ratio = group.len() as f64 / votes.len() as f64;
            if ratio < self.config.coordinated_ratio || group.len() < self.config.min_votes_for_analysis {
                continue;
            }

            warn!(
                tx = %tx_hash,
                identical = group.len(),
                total = votes.len(),
                confidence = ratio,
                "Coordinated voting detected"
            );
            return ManipulationResult {
                kind: ManipulationType::CoordinatedVoting,
                confidence: ratio,
                description: format!(
                    "{}/{} validators voted identically",
                    group.len(),
                    votes.len()
                ),
                involved_addresses: group,
                suspicious_txs: vec![*tx_hash],
                escalate_to_dao: ratio >= self.config.coordinated_escalation,
                ..Default::default()
            };
        }
        ManipulationResult::none()
    }

    /// Votes landing inside one short time window.
    ///
    /// Votes are grouped greedily: a group starts at its earliest vote and
    /// takes every later vote within the window.
    pub fn analyze_vote_timing_correlation(&self, tx_hash: &TxHash) -> ManipulationResult {
        let mut votes = self.get_vote_history(tx_hash);
        if votes.len() < self.config.min_votes_for_analysis {
            return ManipulationResult::none();
        }
        votes.sort_by(|a, b| {
            a.timestamp_ms
                .cmp(&b.timestamp_ms)
                .then(a.validator.cmp(&b.validator))
        });

        let mut largest: Vec<Address> = Vec::new();
        let mut current: Vec<Address> = Vec::new();
        let mut start = 0u64;
        for vote in &votes {
            if !current.is_empty() && vote.timestamp_ms - start > self.config.timing_window_ms {
                if current.len() > largest.len() {
                    largest = std::mem::take(&mut current);
                }
                current.clear();
            }
            if current.is_empty() {
                start = vote.timestamp_ms;
            }
            current.push(vote.validator);
        }
        if current.len() > largest.len() {
            largest = current;
        }

        if largest.len() < self.config.timing_min_cluster {
            return ManipulationResult::none();
        }
        let ratio = largest.len() as f64 / votes.len() as f64;
        if ratio < self.config.timing_flag_ratio {
            return ManipulationResult::none();
        }

        warn!(
            tx = %tx_hash,
            clustered = largest.len(),
            window_ms = self.config.timing_window_ms,
            confidence = ratio,
            "Vote timing correlation detected"
        );
        ManipulationResult {
            kind: ManipulationType::TimingCorrelation,
            confidence: ratio,
            description: format!(
                "{} validators voted within {}ms",
                largest.len(),
                self.config.timing_window_ms
            ),
            involved_addresses: largest,
            suspicious_txs: vec![*tx_hash],
            escalate_to_dao: ratio >= self.config.timing_escalation_ratio,
            ..Default::default()
        }
    }

    /// Score gained too fast over the recent block window.
    ///
    /// The rate is the summed change of every movement within
    /// `spike_window_blocks` of the latest one, per 1000 blocks.
    pub fn detect_reputation_spike(&self, address: &Address) -> ManipulationResult {
        let history = self.get_reputation_history(address);
        let Some(latest) = history.last() else {
            return ManipulationResult::none();
        };
        let window_start = latest.height.saturating_sub(self.config.spike_window_blocks);
        let recent: Vec<&ReputationChange> =
            history.iter().filter(|c| c.height >= window_start).collect();
        if recent.len() < 2 {
            return ManipulationResult::none();
        }

        let total: i64 = recent.iter().map(|c| c.delta()).sum();
        let span = (latest.height - recent[0].height).max(1);
        let rate = total as f64 / span as f64 * 1000.0;
        if rate < self.config.spike_threshold {
            return ManipulationResult::none();
        }

        let escalation = self.config.spike_threshold * 2.0;
        let confidence = (rate / escalation).min(1.0);
        warn!(%address, total, blocks = span, rate, confidence, "Reputation spike detected");
        ManipulationResult {
            kind: ManipulationType::ReputationSpike,
            confidence,
            involved_addresses: vec![*address],
            description: format!("+{} points in {} blocks ({:.1} per 1000 blocks)", total, span, rate),
            escalate_to_dao: rate >= escalation,
            ..Default::default()
        }
    }

    /// Share of commonly voted transactions on which the two validators
    /// agreed, or 0 with too little overlap.
    pub fn validator_correlation(&self, a: &Address, b: &Address) -> f64 {
        let key = if a <= b { (*a, *b) } else { (*b, *a) };
        if let Some(cached) = self.correlations.lock().get(&key) {
            return *cached;
        }

        // Hold the history guard until the result is cached, so a vote
        // recorded meanwhile clears it rather than being masked by it.
        let history = self.history.read();
        let mut common = 0usize;
        let mut agreements = 0usize;
        for votes in history.votes.values() {
            let va = votes.iter().find(|v| v.validator == *a);
            let vb = votes.iter().find(|v| v.validator == *b);
            if let (Some(va), Some(vb)) = (va, vb) {
                common += 1;
                if va.accept == vb.accept {
                    agreements += 1;
                }
            }
        }

        let correlation = if common < self.config.collusion_min_common {
            0.0
        } else {
            agreements as f64 / common as f64
        };
        self.correlations.lock().insert(key, correlation);
        drop(history);
        correlation
    }

    /// Two validators agreeing almost always. Always escalated.
    pub fn detect_validator_collusion(&self, a: &Address, b: &Address) -> ManipulationResult {
        if a == b {
            return ManipulationResult::none();
        }
        let correlation = self.validator_correlation(a, b);
        if correlation < self.config.collusion_threshold {
            return ManipulationResult::none();
        }

        warn!(validator_a = %a, validator_b = %b, agreement = correlation, "Validator collusion detected");
        ManipulationResult {
            kind: ManipulationType::ValidatorCollusion,
            confidence: correlation,
            involved_addresses: vec![*a, *b],
            description: format!("{:.1}% agreement", correlation * 100.0),
            escalate_to_dao: true,
            ..Default::default()
        }
    }

    /// Collusion findings over every validator pair, in address order.
    pub fn scan_validator_collusion(&self) -> Vec<ManipulationResult> {
        let validators: Vec<Address> = self.validators().into_iter().collect();
        let mut findings = Vec::new();
        for (i, a) in validators.iter().enumerate() {
            for b in &validators[i + 1..] {
                let result = self.detect_validator_collusion(a, b);
                if result.is_detected() {
                    findings.push(result);
                }
            }
        }
        findings
    }

    /// Strongest vote-level finding for a transaction.
    pub fn analyze_transaction(&self, tx_hash: &TxHash) -> ManipulationResult {
        ManipulationResult::strongest([
            self.detect_coordinated_voting(tx_hash),
            self.analyze_vote_timing_correlation(tx_hash),
        ])
    }

    /// Spike check for an address, falling back to a weak finding when the
    /// address is already flagged.
    pub fn analyze_address(
        &self,
        address: &Address,
        flags: &FlagSet,
    ) -> Result<ManipulationResult, StoreError> {
        let result = self.detect_reputation_spike(address);
        if result.is_detected() || !flags.is_flagged(address)? {
            return Ok(result);
        }
        Ok(ManipulationResult {
            kind: ManipulationType::SuspiciousPattern,
            confidence: 0.5,
            involved_addresses: vec![*address],
            description: "Address previously flagged for suspicious activity".to_string(),
            ..Default::default()
        })
    }

    /// Drop score movements recorded below `min_height`.
    pub fn prune_history(&self, min_height: u64) {
        self.history.write().prune_changes(min_height);
        debug!(min_height, "Pruned reputation history");
    }

    /// Keep the votes of the `keep` most recently voted transactions.
    pub fn prune_votes(&self, keep: usize) {
        let mut history = self.history.write();
        let dropped = history.prune_votes(keep);
        if dropped > 0 {
            self.correlations.lock().clear();
            debug!(keep, dropped, "Pruned vote history");
        }
    }

    /// Number of transactions with recorded votes.
    pub fn tracked_transactions(&self) -> usize {
        self.history.read().votes.len()
    }
}
