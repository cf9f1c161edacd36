// Copyright (c) 2025 Cascoin Trust Developers

//! Per-address trade, stake and activity records feeding the scorer.

use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, sync::Arc};
use tracing::debug;

use crate::{
    store::{keys, read_value, KeyRegion, KvStore, PrefixLocks, StoreError, WriteBatch},
    types::{to_coins, Address, Amount, TxHash, SECS_PER_DAY},
};

/// Activity bucket width used for "active months"
const MONTH_SECS: u64 = 30 * SECS_PER_DAY;

/// Inactivity half-life in days
const ACTIVITY_HALF_LIFE_DAYS: f64 = 90.0;

/// Gap between activities that counts as abandonment
const SUSPICIOUS_GAP_SECS: u64 = 180 * SECS_PER_DAY;

const SECS_PER_YEAR: f64 = 365.0 * SECS_PER_DAY as f64;

/// Trades needed before interval regularity is judged
const MIN_TRADES_FOR_PATTERN: usize = 10;

/// Oldest activity timestamps are dropped beyond this many
const MAX_ACTIVITY_ENTRIES: usize = 4_096;

/// One completed trade between two addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub txid: TxHash,
    pub partner: Address,
    pub volume: Amount,
    pub timestamp: u64,
    pub success: bool,
    pub disputed: bool,
}

/// Trade history of one address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BehaviorMetrics {
    pub address: Address,
    pub trades: Vec<TradeRecord>,
    pub unique_partners: BTreeSet<Address>,
    pub total_volume: Amount,
    pub successful_trades: u64,
    pub disputed_trades: u64,
}

impl BehaviorMetrics {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            trades: Vec::new(),
            unique_partners: BTreeSet::new(),
            total_volume: 0,
            successful_trades: 0,
            disputed_trades: 0,
        }
    }

    pub fn has_trades(&self) -> bool {
        !self.trades.is_empty()
    }

    /// Add a trade. Returns false if the same txid was already recorded.
    pub fn add_trade(&mut self, trade: TradeRecord) -> bool {
        if self.trades.iter().any(|t| t.txid == trade.txid) {
            return false;
        }
        if trade.success {
            self.successful_trades += 1;
        }
        if trade.disputed {
            self.disputed_trades += 1;
        }
        self.total_volume = self.total_volume.saturating_add(trade.volume);
        self.unique_partners.insert(trade.partner);

        // Keep history ordered by time, stable for equal timestamps
        let pos = self
            .trades
            .partition_point(|t| t.timestamp <= trade.timestamp);
        self.trades.insert(pos, trade);
        true
    }

    /// Distinct partners relative to `sqrt(trades)`, capped at 1.
    pub fn diversity_score(&self) -> f64 {
        if self.trades.is_empty() {
            return 0.0;
        }
        let expected = (self.trades.len() as f64).sqrt();
        (self.unique_partners.len() as f64 / expected).min(1.0)
    }

    /// Logarithmic volume score reaching 1 at one million coins.
    pub fn volume_score(&self) -> f64 {
        ((to_coins(self.total_volume) + 1.0).log10() / 6.0).min(1.0)
    }

    /// 0.5 when trade intervals are suspiciously regular, else 1.
    pub fn pattern_score(&self) -> f64 {
        if self.trades.len() < MIN_TRADES_FOR_PATTERN {
            return 1.0;
        }
        let intervals: Vec<f64> = self
            .trades
            .windows(2)
            .map(|w| w[1].timestamp.saturating_sub(w[0].timestamp))
            .filter(|i| *i > 0)
            .map(|i| i as f64)
            .collect();
        if intervals.is_empty() {
            return 1.0;
        }

        let n = intervals.len() as f64;
        let mean = intervals.iter().sum::<f64>() / n;
        let variance = intervals.iter().map(|i| (i - mean).powi(2)).sum::<f64>() / n;
        let cv = variance.sqrt() / mean;

        if cv < 0.5 {
            debug!(address = %self.address, cv, "Regular trade intervals");
            0.5
        } else {
            1.0
        }
    }
}

/// Locked stake of an address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeInfo {
    pub amount: Amount,
    pub stake_start: u64,
    pub min_lock_duration: u64,
}

impl StakeInfo {
    pub fn is_locked(&self, now: u64) -> bool {
        now < self.stake_start.saturating_add(self.min_lock_duration)
    }

    /// `sqrt(years staked)`, clamped to [0, 1].
    pub fn time_weight(&self, now: u64) -> f64 {
        let staked_for = now.saturating_sub(self.stake_start) as f64;
        (staked_for / SECS_PER_YEAR).sqrt().clamp(0.0, 1.0)
    }
}

/// Account age and activity timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporalMetrics {
    pub address: Address,
    pub account_creation: u64,
    pub last_activity: u64,
    /// Ascending
    pub activity_timestamps: Vec<u64>,
}

impl TemporalMetrics {
    pub fn new(address: Address, created: u64) -> Self {
        Self {
            address,
            account_creation: created,
            last_activity: created,
            activity_timestamps: Vec::new(),
        }
    }

    pub fn record(&mut self, timestamp: u64) {
        let pos = self.activity_timestamps.partition_point(|t| *t <= timestamp);
        self.activity_timestamps.insert(pos, timestamp);
        if self.activity_timestamps.len() > MAX_ACTIVITY_ENTRIES {
            self.activity_timestamps.remove(0);
        }
        self.account_creation = self.account_creation.min(timestamp);
        self.last_activity = self.last_activity.max(timestamp);
    }

    pub fn activity_count(&self) -> usize {
        self.activity_timestamps.len()
    }

    pub fn age_days(&self, now: u64) -> f64 {
        now.saturating_sub(self.account_creation) as f64 / SECS_PER_DAY as f64
    }

    /// Distinct 30-day buckets with any activity.
    pub fn active_months(&self) -> usize {
        self.activity_timestamps
            .iter()
            .map(|t| t / MONTH_SECS)
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// `activity_ratio * 0.5^(inactive_days / 90)`.
    pub fn activity_score(&self, now: u64) -> f64 {
        if self.activity_timestamps.is_empty() {
            return 0.0;
        }
        let age = now.saturating_sub(self.account_creation);
        let inactive_days = now.saturating_sub(self.last_activity) as f64 / SECS_PER_DAY as f64;
        let inactivity = 0.5f64.powf(inactive_days / ACTIVITY_HALF_LIFE_DAYS);

        let total_months = (age / MONTH_SECS).max(1) as f64;
        let ratio = (self.active_months() as f64 / total_months).min(1.0);
        ratio * inactivity
    }

    /// Any two consecutive activities more than 180 days apart.
    pub fn has_suspicious_gaps(&self) -> bool {
        self.activity_timestamps
            .windows(2)
            .any(|w| w[1] - w[0] > SUSPICIOUS_GAP_SECS)
    }
}

/// Persistence for behavior, stake and temporal records.
pub struct BehaviorStore {
    store: Arc<dyn KvStore>,
    locks: Arc<PrefixLocks>,
}

impl BehaviorStore {
    pub fn new(store: Arc<dyn KvStore>, locks: Arc<PrefixLocks>) -> Self {
        Self { store, locks }
    }

    pub fn get_behavior(&self, address: &Address) -> Result<Option<BehaviorMetrics>, StoreError> {
        read_value(self.store.as_ref(), &keys::behavior(address))
    }

    pub fn get_stake(&self, address: &Address) -> Result<Option<StakeInfo>, StoreError> {
        read_value(self.store.as_ref(), &keys::stake(address))
    }

    pub fn get_temporal(&self, address: &Address) -> Result<Option<TemporalMetrics>, StoreError> {
        read_value(self.store.as_ref(), &keys::temporal(address))
    }

    /// Record a trade and the activity it implies.
    pub fn record_trade(&self, address: &Address, trade: TradeRecord) -> Result<bool, StoreError> {
        let _guard = self.locks.lock(KeyRegion::Behavior);
        let timestamp = trade.timestamp;

        let mut metrics = self
            .get_behavior(address)?
            .unwrap_or_else(|| BehaviorMetrics::new(*address));
        if !metrics.add_trade(trade) {
            return Ok(false);
        }
        let mut temporal = self
            .get_temporal(address)?
            .unwrap_or_else(|| TemporalMetrics::new(*address, timestamp));
        temporal.record(timestamp);

        let mut batch = WriteBatch::new();
        batch.put_value(keys::behavior(address), &metrics)?;
        batch.put_value(keys::temporal(address), &temporal)?;
        self.store.commit(batch)?;
        Ok(true)
    }

    pub fn set_stake(&self, address: &Address, stake: &StakeInfo) -> Result<(), StoreError> {
        let _guard = self.locks.lock(KeyRegion::Behavior);
        let mut batch = WriteBatch::new();
        batch.put_value(keys::stake(address), stake)?;
        self.store.commit(batch)?;
        debug!(%address, amount = stake.amount, "Updated stake");
        Ok(())
    }

    /// Note that `address` was active at `timestamp`, creating its temporal
    /// record on first sight.
    pub fn record_activity(&self, address: &Address, timestamp: u64) -> Result<(), StoreError> {
        let _guard = self.locks.lock(KeyRegion::Behavior);
        let mut temporal = self
            .get_temporal(address)?
            .unwrap_or_else(|| TemporalMetrics::new(*address, timestamp));
        temporal.record(timestamp);

        let mut batch = WriteBatch::new();
        batch.put_value(keys::temporal(address), &temporal)?;
        self.store.commit(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{store::MemoryStore, types::COIN};

    const DAY: u64 = SECS_PER_DAY;
    const T0: u64 = 1_700_000_000;

    fn trade(id: u64, partner: u64, volume: Amount, ts: u64) -> TradeRecord {
        TradeRecord {
            txid: TxHash::from_low_u64_be(id),
            partner: Address::from_low_u64_be(partner),
            volume,
            timestamp: ts,
            success: true,
            disputed: false,
        }
    }

    // ========================================================================
    // BehaviorMetrics
    // ========================================================================

    #[test]
    fn test_diversity_score() {
        let mut metrics = BehaviorMetrics::new(Address::from_low_u64_be(1));
        assert_eq!(metrics.diversity_score(), 0.0);

        // 4 trades with one partner: 1 / sqrt(4)
        for i in 0..4 {
            metrics.add_trade(trade(i, 7, COIN, T0 + i * 1000));
        }
        assert!((metrics.diversity_score() - 0.5).abs() < 1e-12);

        // Many partners caps at 1
        for i in 4..8 {
            metrics.add_trade(trade(i, 100 + i, COIN, T0 + i * 1000));
        }
        assert_eq!(metrics.diversity_score(), 1.0);
    }

    #[test]
    fn test_duplicate_trade_ignored() {
        let mut metrics = BehaviorMetrics::new(Address::from_low_u64_be(1));
        assert!(metrics.add_trade(trade(1, 7, COIN, T0)));
        assert!(!metrics.add_trade(trade(1, 7, COIN, T0)));
        assert_eq!(metrics.total_volume, COIN);
    }

    #[test]
    fn test_volume_score() {
        let mut metrics = BehaviorMetrics::new(Address::from_low_u64_be(1));
        assert_eq!(metrics.volume_score(), 0.0);

        metrics.add_trade(trade(1, 2, 999 * COIN, T0));
        // log10(1000) / 6
        assert!((metrics.volume_score() - 0.5).abs() < 1e-12);

        metrics.add_trade(trade(2, 3, 10_000_000 * COIN, T0));
        assert_eq!(metrics.volume_score(), 1.0);
    }

    #[test]
    fn test_regular_intervals_penalized() {
        let mut bot = BehaviorMetrics::new(Address::from_low_u64_be(1));
        for i in 0..12 {
            bot.add_trade(trade(i, i, COIN, T0 + i * 3_600));
        }
        assert_eq!(bot.pattern_score(), 0.5);

        let mut human = BehaviorMetrics::new(Address::from_low_u64_be(2));
        let offsets = [0, 10, 500, 520, 9_000, 9_100, 40_000, 40_005, 90_000, 200_000, 200_100];
        for (i, off) in offsets.iter().enumerate() {
            human.add_trade(trade(i as u64, i as u64, COIN, T0 + off));
        }
        assert_eq!(human.pattern_score(), 1.0);
    }

    #[test]
    fn test_few_trades_not_judged() {
        let mut metrics = BehaviorMetrics::new(Address::from_low_u64_be(1));
        for i in 0..9 {
            metrics.add_trade(trade(i, i, COIN, T0 + i * 60));
        }
        assert_eq!(metrics.pattern_score(), 1.0);
    }

    // ========================================================================
    // Stake and temporal
    // ========================================================================

    #[test]
    fn test_stake_time_weight() {
        let stake = StakeInfo {
            amount: 100 * COIN,
            stake_start: T0,
            min_lock_duration: 30 * DAY,
        };
        assert_eq!(stake.time_weight(T0), 0.0);
        assert_eq!(stake.time_weight(T0 - 10), 0.0);

        // A quarter year gives sqrt(0.25)
        let quarter = T0 + (SECS_PER_YEAR / 4.0) as u64;
        assert!((stake.time_weight(quarter) - 0.5).abs() < 1e-9);
        assert_eq!(stake.time_weight(T0 + 3 * 365 * DAY), 1.0);

        assert!(stake.is_locked(T0 + DAY));
        assert!(!stake.is_locked(T0 + 30 * DAY));
    }

    #[test]
    fn test_activity_half_life() {
        let mut temporal = TemporalMetrics::new(Address::from_low_u64_be(1), T0);
        temporal.record(T0);

        // Same month, no inactivity
        assert!((temporal.activity_score(T0) - 1.0).abs() < 1e-12);

        // 90 idle days halves the inactivity factor; 3 months of age with
        // one active bucket gives a ratio of 1/3
        let score = temporal.activity_score(T0 + 90 * DAY);
        assert!((score - 0.5 / 3.0).abs() < 1e-9);

        assert_eq!(TemporalMetrics::new(Address::NULL, T0).activity_score(T0), 0.0);
    }

    #[test]
    fn test_suspicious_gaps() {
        let mut temporal = TemporalMetrics::new(Address::from_low_u64_be(1), T0);
        temporal.record(T0);
        temporal.record(T0 + 100 * DAY);
        assert!(!temporal.has_suspicious_gaps());

        temporal.record(T0 + 400 * DAY);
        assert!(temporal.has_suspicious_gaps());
    }

    #[test]
    fn test_out_of_order_activity_kept_sorted() {
        let mut temporal = TemporalMetrics::new(Address::from_low_u64_be(1), T0 + 50);
        temporal.record(T0 + 50);
        temporal.record(T0);
        temporal.record(T0 + 20);
        assert_eq!(temporal.activity_timestamps, vec![T0, T0 + 20, T0 + 50]);
        assert_eq!(temporal.account_creation, T0);
        assert_eq!(temporal.last_activity, T0 + 50);
    }

    // ========================================================================
    // BehaviorStore
    // ========================================================================

    #[test]
    fn test_store_round_trip() {
        let store = BehaviorStore::new(Arc::new(MemoryStore::new()), Arc::new(PrefixLocks::new()));
        let address = Address::from_low_u64_be(1);

        assert!(store.get_behavior(&address).unwrap().is_none());
        assert!(store.record_trade(&address, trade(1, 2, COIN, T0)).unwrap());
        assert!(!store.record_trade(&address, trade(1, 2, COIN, T0)).unwrap());

        let metrics = store.get_behavior(&address).unwrap().unwrap();
        assert_eq!(metrics.trades.len(), 1);

        store.record_activity(&address, T0 + DAY).unwrap();
        let temporal = store.get_temporal(&address).unwrap().unwrap();
        assert_eq!(temporal.activity_count(), 2);
        assert_eq!(temporal.account_creation, T0);

        let stake = StakeInfo {
            amount: COIN,
            stake_start: T0,
            min_lock_duration: 0,
        };
        store.set_stake(&address, &stake).unwrap();
        assert_eq!(store.get_stake(&address).unwrap(), Some(stake));
    }
}
