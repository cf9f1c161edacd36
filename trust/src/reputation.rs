// Copyright (c) 2025 Cascoin Trust Developers

//! Vote-based behavioral reputation ledger.
//!
//! One [`ReputationScore`] per address, created lazily on the first vote or
//! observed transaction. Scores decay toward zero while an address sits idle;
//! decay is applied whenever a record is read or updated, never by a timer.

use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};
use tracing::{debug, info, warn};

use crate::{
    cluster::{ChainTransaction, TransactionObserver},
    error::{validate_reason, TrustError},
    graph::MAX_WEIGHT,
    store::{keys, read_value, scan_values, KeyRegion, KvStore, PrefixLocks, StoreError, WriteBatch},
    types::{Address, Amount, TxHash, SECS_PER_DAY},
};

/// Largest absolute reputation score
pub const MAX_SCORE: i64 = 10_000;

/// Length of one decay period
const DECAY_PERIOD_DAYS: u64 = 30;

/// Maximum voting power of a single address
const MAX_VOTING_POWER: i64 = 10;

/// Score penalty for each suspicious transaction pattern
const SUSPICIOUS_PATTERN_PENALTY: i64 = 10;

/// Outputs below this many base units count as dust
const DUST_THRESHOLD: Amount = 1_000;

/// Scores below this are categorized as scams and trigger warnings
const SCAM_SCORE: i64 = -5_000;

/// Coarse classification of an address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    #[default]
    Normal,
    Scam,
    Mixer,
    Exchange,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Category::Normal => "normal",
            Category::Scam => "scam",
            Category::Mixer => "mixer",
            Category::Exchange => "exchange",
        };
        f.write_str(s)
    }
}

/// Human-readable band of a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReputationLevel {
    Dangerous,
    VeryPoor,
    Poor,
    Questionable,
    Neutral,
    Good,
    VeryGood,
    Excellent,
}

impl ReputationLevel {
    pub fn from_score(score: i64) -> Self {
        match score {
            s if s >= 7_500 => ReputationLevel::Excellent,
            s if s >= 5_000 => ReputationLevel::VeryGood,
            s if s >= 2_500 => ReputationLevel::Good,
            s if s >= 0 => ReputationLevel::Neutral,
            s if s >= -2_500 => ReputationLevel::Questionable,
            s if s >= -5_000 => ReputationLevel::Poor,
            s if s >= -7_500 => ReputationLevel::VeryPoor,
            _ => ReputationLevel::Dangerous,
        }
    }
}

impl fmt::Display for ReputationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReputationLevel::Excellent => "Excellent",
            ReputationLevel::VeryGood => "Very Good",
            ReputationLevel::Good => "Good",
            ReputationLevel::Neutral => "Neutral",
            ReputationLevel::Questionable => "Questionable",
            ReputationLevel::Poor => "Poor",
            ReputationLevel::VeryPoor => "Very Poor",
            ReputationLevel::Dangerous => "Dangerous",
        };
        f.write_str(s)
    }
}

/// Reputation record of one address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReputationScore {
    pub address: Address,
    /// Score in [-10000, 10000]
    pub score: i64,
    pub vote_count: u64,
    pub category: Category,
    pub total_transactions: u64,
    pub total_volume: Amount,
    pub suspicious_patterns: u32,
    /// Time of the last vote or behavior update, 0 if never
    pub last_updated: u64,
    /// Start of the current inactivity window, 0 if never active
    pub last_decay: u64,
}

impl ReputationScore {
    /// Neutral record for an address nobody has rated.
    pub fn new(address: Address) -> Self {
        Self {
            address,
            score: 0,
            vote_count: 0,
            category: Category::Normal,
            total_transactions: 0,
            total_volume: 0,
            suspicious_patterns: 0,
            last_updated: 0,
            last_decay: 0,
        }
    }

    pub fn level(&self) -> ReputationLevel {
        ReputationLevel::from_score(self.score)
    }

    pub fn should_warn(&self) -> bool {
        self.score < SCAM_SCORE
    }

    /// Whether the address has any recorded history.
    pub fn has_history(&self) -> bool {
        self.vote_count > 0 || self.total_transactions > 0
    }

    fn recategorize(&mut self) {
        self.category = if self.score < SCAM_SCORE {
            Category::Scam
        } else if self.suspicious_patterns > 10 {
            Category::Mixer
        } else if self.total_transactions > 10_000 {
            Category::Exchange
        } else {
            Category::Normal
        };
    }

    fn clamp(&mut self) {
        self.score = self.score.clamp(-MAX_SCORE, MAX_SCORE);
    }

    /// Decay the score by 1% for every full 30-day period of inactivity
    /// since `last_decay`.
    ///
    /// Integer arithmetic truncating toward zero, so the magnitude never grows.
    pub fn apply_decay(&mut self, now: u64) {
        if self.last_decay == 0 || now <= self.last_decay {
            return;
        }
        let period_secs = DECAY_PERIOD_DAYS * SECS_PER_DAY;
        let periods = (now - self.last_decay) / period_secs;
        if periods == 0 {
            return;
        }
        for _ in 0..periods {
            if self.score == 0 {
                break;
            }
            self.score = self.score * 99 / 100;
        }
        self.last_decay = self
            .last_decay
            .saturating_add(periods.saturating_mul(period_secs));
    }

    /// Record activity at `now`, restarting the inactivity window. Pending
    /// decay must be applied first.
    fn touch(&mut self, now: u64) {
        self.last_updated = now;
        self.last_decay = self.last_decay.max(now);
    }
}

/// The parts of a transaction the pattern detectors look at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxSummary {
    pub input_count: usize,
    pub output_values: Vec<Amount>,
}

impl TxSummary {
    /// Many inputs, many outputs, and most outputs close to the first one.
    pub fn is_mixer_pattern(&self) -> bool {
        if self.input_count < 3 || self.output_values.len() < 3 {
            return false;
        }
        let first = self.output_values[0];
        let threshold = first / 10;
        let similar = self.output_values[1..]
            .iter()
            .filter(|v| v.abs_diff(first) < threshold)
            .count();
        similar > self.output_values.len() / 2
    }

    /// Mostly tiny outputs to many recipients.
    pub fn is_dusting_pattern(&self) -> bool {
        let dust = self
            .output_values
            .iter()
            .filter(|v| **v < DUST_THRESHOLD)
            .count();
        dust > self.output_values.len() / 2 && dust > 2
    }

    fn suspicious_pattern(&self) -> Option<&'static str> {
        if self.is_mixer_pattern() {
            Some("mixer")
        } else if self.is_dusting_pattern() {
            Some("dusting")
        } else {
            None
        }
    }

    pub fn total_output(&self) -> Amount {
        self.output_values
            .iter()
            .fold(0, |acc: Amount, v| acc.saturating_add(*v))
    }
}

/// Effect of one applied reputation vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreUpdate {
    pub target: Address,
    pub old_score: i64,
    pub new_score: i64,
    pub voting_power: i64,
}

/// Store-backed reputation ledger.
pub struct ReputationLedger {
    store: Arc<dyn KvStore>,
    locks: Arc<PrefixLocks>,
}

impl ReputationLedger {
    pub fn new(store: Arc<dyn KvStore>, locks: Arc<PrefixLocks>) -> Self {
        Self { store, locks }
    }

    fn load(&self, address: &Address) -> Result<Option<ReputationScore>, StoreError> {
        read_value(self.store.as_ref(), &keys::reputation(address))
    }

    #[cfg(test)]
    fn save(&self, record: &ReputationScore) -> Result<(), StoreError> {
        let mut batch = WriteBatch::new();
        batch.put_value(keys::reputation(&record.address), record)?;
        self.store.commit(batch)
    }

    /// Current record with decay applied as of `now`.
    ///
    /// Unknown addresses get a neutral record with score 0.
    pub fn get_reputation(&self, address: &Address, now: u64) -> Result<ReputationScore, StoreError> {
        let mut record = self
            .load(address)?
            .unwrap_or_else(|| ReputationScore::new(*address));
        record.apply_decay(now);
        Ok(record)
    }

    /// Voting power in [0, 10] derived from the voter's own score.
    pub fn voting_power(&self, voter: &Address, now: u64) -> Result<i64, StoreError> {
        let score = self.get_reputation(voter, now)?.score;
        let mut power = 1;
        if score > 0 {
            power += score / 1_000;
        } else if score < 0 {
            power += score / 500;
        }
        Ok(power.clamp(0, MAX_VOTING_POWER))
    }

    /// Apply a reputation vote from `voter` to `target`.
    ///
    /// The score moves by `vote * voting_power`, after decay, and is clamped
    /// to ±10000.
    pub fn apply_vote(
        &self,
        voter: &Address,
        target: &Address,
        vote: i16,
        reason: &str,
        now: u64,
    ) -> Result<ScoreUpdate, TrustError> {
        self.apply_vote_with(voter, target, vote, reason, now, WriteBatch::new())
    }

    /// Like [`apply_vote`](Self::apply_vote), committing the updated record
    /// together with the writes already queued in `batch`.
    pub fn apply_vote_with(
        &self,
        voter: &Address,
        target: &Address,
        vote: i16,
        reason: &str,
        now: u64,
        mut batch: WriteBatch,
    ) -> Result<ScoreUpdate, TrustError> {
        if vote == 0 || !(-MAX_WEIGHT..=MAX_WEIGHT).contains(&vote) {
            return Err(TrustError::VoteOutOfRange(vote));
        }
        if voter == target {
            return Err(TrustError::SelfTrust(*voter));
        }
        validate_reason(reason)?;

        let _guard = self.locks.lock(KeyRegion::Reputation);
        let power = self.voting_power(voter, now)?;
        if power <= 0 {
            return Err(TrustError::NoVotingPower(*voter));
        }

        let mut record = self.get_reputation(target, now)?;
        let old_score = record.score;
        record.score += vote as i64 * power;
        record.clamp();
        record.vote_count += 1;
        record.touch(now);
        record.recategorize();
        batch.put_value(keys::reputation(&record.address), &record)?;
        self.store.commit(batch)?;

        info!(
            %voter,
            %target,
            vote,
            power,
            old_score,
            new_score = record.score,
            "Applied reputation vote"
        );
        Ok(ScoreUpdate {
            target: *target,
            old_score,
            new_score: record.score,
            voting_power: power,
        })
    }

    /// Fold an observed transaction into the address's behavior counters.
    ///
    /// Each `(address, txid)` pair is counted once; repeats return the
    /// current record unchanged.
    pub fn update_behavior(
        &self,
        address: &Address,
        txid: &TxHash,
        tx: &TxSummary,
        now: u64,
    ) -> Result<ReputationScore, StoreError> {
        let _guard = self.locks.lock(KeyRegion::Reputation);
        let mut record = self.get_reputation(address, now)?;
        let marker = keys::observed_tx(address, txid);
        if self.store.exists(&marker)? {
            debug!(%address, %txid, "Transaction already observed");
            return Ok(record);
        }

        record.total_transactions += 1;
        record.total_volume = record.total_volume.saturating_add(tx.total_output());
        if let Some(pattern) = tx.suspicious_pattern() {
            record.suspicious_patterns += 1;
            record.score -= SUSPICIOUS_PATTERN_PENALTY;
            record.clamp();
            warn!(%address, pattern, "Suspicious transaction pattern");
        }
        record.touch(now);
        record.recategorize();

        let mut batch = WriteBatch::new();
        batch.put_value(keys::reputation(&record.address), &record)?;
        batch.put(marker, Vec::new());
        self.store.commit(batch)?;

        debug!(%address, txs = record.total_transactions, "Updated behavior counters");
        Ok(record)
    }

    /// Every stored record ordered by address, decayed as of `now`.
    pub fn list_reputations(&self, now: u64) -> Result<Vec<ReputationScore>, StoreError> {
        let mut records: Vec<ReputationScore> =
            scan_values(self.store.as_ref(), keys::REPUTATION_PREFIX.as_bytes())?;
        for record in &mut records {
            record.apply_decay(now);
        }
        Ok(records)
    }
}

impl TransactionObserver for ReputationLedger {
    /// Count the transaction once for every distinct spending address.
    fn observe_transaction(&self, tx: &ChainTransaction) -> Result<(), StoreError> {
        if tx.is_coinbase {
            return Ok(());
        }
        let summary = tx.summary();
        let mut inputs = tx.inputs.clone();
        inputs.sort();
        inputs.dedup();
        for address in &inputs {
            self.update_behavior(address, &tx.txid, &summary, tx.timestamp)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    const DAY: u64 = SECS_PER_DAY;
    const T0: u64 = 1_700_000_000;

    fn ledger() -> ReputationLedger {
        ReputationLedger::new(Arc::new(MemoryStore::new()), Arc::new(PrefixLocks::new()))
    }

    fn tx(n: u64) -> TxHash {
        TxHash::from_low_u64_be(n)
    }

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    // ========================================================================
    // Levels and categories
    // ========================================================================

    #[test]
    fn test_level_boundaries() {
        assert_eq!(ReputationLevel::from_score(10_000), ReputationLevel::Excellent);
        assert_eq!(ReputationLevel::from_score(7_500), ReputationLevel::Excellent);
        assert_eq!(ReputationLevel::from_score(7_499), ReputationLevel::VeryGood);
        assert_eq!(ReputationLevel::from_score(0), ReputationLevel::Neutral);
        assert_eq!(ReputationLevel::from_score(-1), ReputationLevel::Questionable);
        assert_eq!(ReputationLevel::from_score(-5_000), ReputationLevel::Poor);
        assert_eq!(ReputationLevel::from_score(-7_501), ReputationLevel::Dangerous);
        assert_eq!(ReputationLevel::VeryGood.to_string(), "Very Good");
    }

    #[test]
    fn test_recategorize_priority() {
        let mut record = ReputationScore::new(addr(1));
        record.score = -6_000;
        record.suspicious_patterns = 20;
        record.recategorize();
        assert_eq!(record.category, Category::Scam);
        assert!(record.should_warn());

        record.score = 0;
        record.recategorize();
        assert_eq!(record.category, Category::Mixer);

        record.suspicious_patterns = 0;
        record.total_transactions = 10_001;
        record.recategorize();
        assert_eq!(record.category, Category::Exchange);
    }

    // ========================================================================
    // Decay
    // ========================================================================

    #[test]
    fn test_decay_per_full_period() {
        let mut record = ReputationScore::new(addr(1));
        record.score = 1_000;
        record.last_decay = T0;

        record.apply_decay(T0 + 29 * DAY);
        assert_eq!(record.score, 1_000);

        record.apply_decay(T0 + 30 * DAY);
        assert_eq!(record.score, 990);
        assert_eq!(record.last_decay, T0 + 30 * DAY);

        // Two more periods at once
        record.apply_decay(T0 + 95 * DAY);
        assert_eq!(record.score, 970);
    }

    #[test]
    fn test_decay_truncates_toward_zero() {
        let mut record = ReputationScore::new(addr(1));
        record.score = -150;
        record.last_decay = T0;
        record.apply_decay(T0 + 30 * DAY);
        // -150 * 99 / 100 = -148.5, truncated to -148
        assert_eq!(record.score, -148);
    }

    #[test]
    fn test_decay_without_clock_is_noop() {
        let mut record = ReputationScore::new(addr(1));
        record.score = 500;
        record.apply_decay(T0);
        assert_eq!(record.score, 500);
    }

    // ========================================================================
    // Votes
    // ========================================================================

    #[test]
    fn test_unknown_address_is_neutral() {
        let ledger = ledger();
        let record = ledger.get_reputation(&addr(42), T0).unwrap();
        assert_eq!(record.score, 0);
        assert_eq!(record.category, Category::Normal);
        assert!(!record.has_history());
        assert_eq!(ledger.voting_power(&addr(42), T0).unwrap(), 1);
    }

    #[test]
    fn test_apply_vote_updates_score() {
        let ledger = ledger();
        let update = ledger
            .apply_vote(&addr(1), &addr(2), -80, "rug pull", T0)
            .unwrap();
        assert_eq!(update.old_score, 0);
        assert_eq!(update.new_score, -80);
        assert_eq!(update.voting_power, 1);

        let record = ledger.get_reputation(&addr(2), T0).unwrap();
        assert_eq!(record.vote_count, 1);
        assert_eq!(record.last_updated, T0);
    }

    #[test]
    fn test_voting_power_scales_with_score() {
        let ledger = ledger();
        let mut voter = ReputationScore::new(addr(1));
        voter.score = 3_500;
        ledger.save(&voter).unwrap();
        assert_eq!(ledger.voting_power(&addr(1), T0).unwrap(), 4);

        voter.score = 10_000;
        ledger.save(&voter).unwrap();
        assert_eq!(ledger.voting_power(&addr(1), T0).unwrap(), 10);

        voter.score = -600;
        ledger.save(&voter).unwrap();
        assert_eq!(ledger.voting_power(&addr(1), T0).unwrap(), 0);

        let err = ledger
            .apply_vote(&addr(1), &addr(2), 50, "trusted", T0)
            .unwrap_err();
        assert!(matches!(err, TrustError::NoVotingPower(_)));
    }

    #[test]
    fn test_vote_validation() {
        let ledger = ledger();
        assert!(matches!(
            ledger.apply_vote(&addr(1), &addr(2), 0, "x", T0),
            Err(TrustError::VoteOutOfRange(0))
        ));
        assert!(matches!(
            ledger.apply_vote(&addr(1), &addr(2), -101, "x", T0),
            Err(TrustError::VoteOutOfRange(-101))
        ));
        assert!(matches!(
            ledger.apply_vote(&addr(1), &addr(2), 10, "", T0),
            Err(TrustError::EmptyReason)
        ));
        assert!(ledger.list_reputations(T0).unwrap().is_empty());
    }

    #[test]
    fn test_score_clamped() {
        let ledger = ledger();
        let mut voter = ReputationScore::new(addr(1));
        voter.score = 10_000;
        ledger.save(&voter).unwrap();

        for _ in 0..15 {
            ledger.apply_vote(&addr(1), &addr(2), 100, "great", T0).unwrap();
        }
        assert_eq!(ledger.get_reputation(&addr(2), T0).unwrap().score, MAX_SCORE);
    }

    #[test]
    fn test_vote_applies_pending_decay_first() {
        let ledger = ledger();
        let mut voter = ReputationScore::new(addr(1));
        voter.score = 10_000;
        ledger.save(&voter).unwrap();

        ledger.apply_vote(&addr(1), &addr(2), 100, "great", T0).unwrap();
        let update = ledger
            .apply_vote(&addr(1), &addr(2), 10, "still good", T0 + 31 * DAY)
            .unwrap();
        assert_eq!(update.old_score, 990);
        assert_eq!(update.new_score, 1_090);
    }

    #[test]
    fn test_regular_votes_prevent_decay() {
        let ledger = ledger();
        let mut voter = ReputationScore::new(addr(1));
        voter.score = 10_000;
        ledger.save(&voter).unwrap();

        // A vote every 20 days never leaves a full idle period
        for i in 0..6 {
            ledger
                .apply_vote(&addr(1), &addr(2), 10, "regular trade", T0 + i * 20 * DAY)
                .unwrap();
        }
        let record = ledger.get_reputation(&addr(2), T0 + 120 * DAY).unwrap();
        assert_eq!(record.score, 600);
        assert_eq!(record.last_decay, T0 + 100 * DAY);

        // The idle window counts from the last vote
        let idle = ledger.get_reputation(&addr(2), T0 + 130 * DAY).unwrap();
        assert_eq!(idle.score, 594);
    }

    // ========================================================================
    // Behavior
    // ========================================================================

    #[test]
    fn test_mixer_pattern() {
        let mixer = TxSummary {
            input_count: 3,
            output_values: vec![1_000_000, 1_000_001, 999_999, 1_000_002],
        };
        assert!(mixer.is_mixer_pattern());

        let few_inputs = TxSummary {
            input_count: 2,
            ..mixer.clone()
        };
        assert!(!few_inputs.is_mixer_pattern());

        let spread = TxSummary {
            input_count: 3,
            output_values: vec![1_000, 5_000, 9_000, 20_000],
        };
        assert!(!spread.is_mixer_pattern());
    }

    #[test]
    fn test_dusting_pattern() {
        let dust = TxSummary {
            input_count: 1,
            output_values: vec![1, 2, 3, 500_000],
        };
        assert!(dust.is_dusting_pattern());

        let two_dust = TxSummary {
            input_count: 1,
            output_values: vec![1, 2, 500_000],
        };
        assert!(!two_dust.is_dusting_pattern());
    }

    #[test]
    fn test_update_behavior_penalizes_patterns() {
        let ledger = ledger();
        let normal = TxSummary {
            input_count: 1,
            output_values: vec![5_000, 7_000],
        };
        let record = ledger.update_behavior(&addr(1), &tx(1), &normal, T0).unwrap();
        assert_eq!(record.total_transactions, 1);
        assert_eq!(record.total_volume, 12_000);
        assert_eq!(record.score, 0);

        let dust = TxSummary {
            input_count: 1,
            output_values: vec![1, 1, 1, 1],
        };
        let record = ledger.update_behavior(&addr(1), &tx(2), &dust, T0).unwrap();
        assert_eq!(record.suspicious_patterns, 1);
        assert_eq!(record.score, -10);
        assert!(record.has_history());
    }

    #[test]
    fn test_update_behavior_counts_each_transaction_once() {
        let ledger = ledger();
        let dust = TxSummary {
            input_count: 1,
            output_values: vec![1, 1, 1, 1],
        };
        ledger.update_behavior(&addr(1), &tx(7), &dust, T0).unwrap();
        let record = ledger.update_behavior(&addr(1), &tx(7), &dust, T0).unwrap();
        assert_eq!(record.total_transactions, 1);
        assert_eq!(record.suspicious_patterns, 1);
        assert_eq!(record.score, -10);

        // Same transaction seen from another spender counts for that spender
        let record = ledger.update_behavior(&addr(2), &tx(7), &dust, T0).unwrap();
        assert_eq!(record.total_transactions, 1);
    }

    #[test]
    fn test_observer_updates_each_spender() {
        let ledger = ledger();
        let spend = ChainTransaction {
            txid: tx(3),
            is_coinbase: false,
            timestamp: T0,
            inputs: vec![addr(1), addr(2), addr(1)],
            outputs: vec![(addr(9), 4_000), (addr(8), 6_000)],
        };
        ledger.observe_transaction(&spend).unwrap();
        ledger.observe_transaction(&spend).unwrap();

        for spender in [addr(1), addr(2)] {
            let record = ledger.get_reputation(&spender, T0).unwrap();
            assert_eq!(record.total_transactions, 1);
            assert_eq!(record.total_volume, 10_000);
        }
        assert!(!ledger.get_reputation(&addr(9), T0).unwrap().has_history());

        let coinbase = ChainTransaction {
            txid: tx(4),
            is_coinbase: true,
            inputs: vec![addr(5)],
            ..Default::default()
        };
        ledger.observe_transaction(&coinbase).unwrap();
        assert!(!ledger.get_reputation(&addr(5), T0).unwrap().has_history());
    }

    #[test]
    fn test_list_reputations_ordered() {
        let ledger = ledger();
        ledger.apply_vote(&addr(1), &addr(9), 10, "ok", T0).unwrap();
        ledger.apply_vote(&addr(1), &addr(3), 10, "ok", T0).unwrap();

        let list = ledger.list_reputations(T0).unwrap();
        let addresses: Vec<_> = list.iter().map(|r| r.address).collect();
        assert_eq!(addresses, vec![addr(3), addr(9)]);
    }
}
