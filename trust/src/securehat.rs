// Copyright (c) 2025 Cascoin Trust Developers

//! Multi-factor trust score.
//!
//! Four components, each in [0, 1], blended with fixed weights:
//!
//! | Component | Weight | Source                                   |
//! |-----------|--------|------------------------------------------|
//! | behavior  | 0.40   | ledger score and trade history           |
//! | wot       | 0.30   | viewer-relative graph reputation         |
//! | economic  | 0.20   | locked stake and how long it was held    |
//! | temporal  | 0.10   | account age and recent activity          |
//!
//! Every node must arrive at the same integer score for the same state, so
//! components are snapped to a 1e-9 grid before blending, the blend is
//! evaluated in one fixed order, and every time-dependent term reads the
//! caller's `now` instead of the wall clock.

use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    behavior::BehaviorStore,
    flags::FlagSet,
    graph::TrustGraph,
    graph_analysis::{GraphAnalyzer, SUSPICIOUS_MUTUAL_RATIO},
    reputation::{ReputationLedger, MAX_SCORE},
    store::StoreError,
    types::{to_coins, Address},
};

pub const BEHAVIOR_WEIGHT: f64 = 0.40;
pub const WOT_WEIGHT: f64 = 0.30;
pub const ECONOMIC_WEIGHT: f64 = 0.20;
pub const TEMPORAL_WEIGHT: f64 = 0.10;

/// Score of an address nothing is known about
pub const NEUTRAL_SCORE: u8 = 50;

const SUSPICIOUS_CLUSTER_PENALTY: f64 = 0.3;
const MIN_VOLUME_PENALTY: f64 = 0.1;
const MIN_CENTRALITY_BONUS: f64 = 0.5;
const MAX_CENTRALITY_BONUS: f64 = 1.5;
const FULL_AGE_DAYS: f64 = 730.0;

/// Snap to the 1e-9 grid.
fn quantize(x: f64) -> f64 {
    (x * 1e9).round() / 1e9
}

/// Every intermediate term of one score computation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrustBreakdown {
    pub behavior_base: f64,
    pub diversity_penalty: f64,
    pub volume_penalty: f64,
    pub pattern_penalty: f64,
    pub secure_behavior: f64,

    pub wot_base: f64,
    pub cluster_penalty: f64,
    pub centrality_bonus: f64,
    pub secure_wot: f64,

    pub economic_base: f64,
    pub stake_time_weight: f64,
    pub secure_economic: f64,

    pub temporal_base: f64,
    pub activity_penalty: f64,
    pub secure_temporal: f64,

    pub final_score: u8,
}

impl TrustBreakdown {
    /// Breakdown of an address without any recorded history.
    pub fn neutral() -> Self {
        let half = NEUTRAL_SCORE as f64 / 100.0;
        Self {
            secure_behavior: half,
            secure_wot: half,
            secure_economic: half,
            secure_temporal: half,
            final_score: NEUTRAL_SCORE,
            ..Default::default()
        }
    }

    /// Weighted blend in the fixed evaluation order.
    pub fn blend(&self) -> f64 {
        ((BEHAVIOR_WEIGHT * self.secure_behavior + WOT_WEIGHT * self.secure_wot)
            + ECONOMIC_WEIGHT * self.secure_economic)
            + TEMPORAL_WEIGHT * self.secure_temporal
    }

    fn finalize(&mut self) {
        self.secure_behavior = quantize(self.secure_behavior);
        self.secure_wot = quantize(self.secure_wot);
        self.secure_economic = quantize(self.secure_economic);
        self.secure_temporal = quantize(self.secure_temporal);
        self.final_score = (100.0 * self.blend()).round().clamp(0.0, 100.0) as u8;
    }
}

/// Read-only scorer over the trust stores.
pub struct SecureHat<'a> {
    graph: &'a TrustGraph,
    ledger: &'a ReputationLedger,
    behavior: &'a BehaviorStore,
    flags: &'a FlagSet,
}

impl<'a> SecureHat<'a> {
    pub fn new(
        graph: &'a TrustGraph,
        ledger: &'a ReputationLedger,
        behavior: &'a BehaviorStore,
        flags: &'a FlagSet,
    ) -> Self {
        Self {
            graph,
            ledger,
            behavior,
            flags,
        }
    }

    /// Whether anything at all was recorded about `address`.
    fn has_history(&self, address: &Address, now: u64) -> Result<bool, StoreError> {
        Ok(self.ledger.get_reputation(address, now)?.has_history()
            || !self.graph.get_incoming_trust(address)?.is_empty()
            || !self.graph.get_outgoing_trust(address)?.is_empty()
            || !self.graph.get_votes_for_address(address)?.is_empty()
            || self.behavior.get_behavior(address)?.is_some()
            || self.behavior.get_stake(address)?.is_some()
            || self.behavior.get_temporal(address)?.is_some())
    }

    fn try_breakdown(
        &self,
        target: &Address,
        viewer: &Address,
        now: u64,
    ) -> Result<TrustBreakdown, StoreError> {
        if !self.has_history(target, now)? {
            return Ok(TrustBreakdown::neutral());
        }
        let mut b = TrustBreakdown::default();

        // Behavior
        let score = self.ledger.get_reputation(target, now)?.score;
        b.behavior_base = ((score + MAX_SCORE) as f64 / (2 * MAX_SCORE) as f64).clamp(0.0, 1.0);
        match self.behavior.get_behavior(target)? {
            Some(metrics) if metrics.has_trades() => {
                b.diversity_penalty = metrics.diversity_score();
                b.volume_penalty = metrics.volume_score().max(MIN_VOLUME_PENALTY);
                b.pattern_penalty = metrics.pattern_score();
            }
            _ => {
                b.diversity_penalty = 1.0;
                b.volume_penalty = 1.0;
                b.pattern_penalty = 1.0;
            }
        }
        b.secure_behavior =
            b.behavior_base * b.diversity_penalty * b.volume_penalty * b.pattern_penalty;

        // Web of trust
        let depth = self.graph.config().max_trust_path_depth;
        let reputation = self.graph.get_weighted_reputation(viewer, target, depth)?;
        b.wot_base = (reputation / 100.0).clamp(0.0, 1.0);

        let analyzer = GraphAnalyzer::new(self.graph)?;
        let suspicious = self.flags.is_flagged(target)?
            || analyzer.mutual_trust_ratio(target)? > SUSPICIOUS_MUTUAL_RATIO;
        b.cluster_penalty = if suspicious { SUSPICIOUS_CLUSTER_PENALTY } else { 1.0 };
        b.centrality_bonus =
            (analyzer.betweenness(target)? * 2.0).clamp(MIN_CENTRALITY_BONUS, MAX_CENTRALITY_BONUS);
        b.secure_wot = (b.wot_base * b.cluster_penalty * b.centrality_bonus).clamp(0.0, 1.0);

        // Economic
        if let Some(stake) = self.behavior.get_stake(target)?.filter(|s| s.amount > 0) {
            b.economic_base = ((to_coins(stake.amount) + 1.0).log10() / 4.0).min(1.0);
            b.stake_time_weight = stake.time_weight(now);
        }
        b.secure_economic = b.economic_base * b.stake_time_weight;

        // Temporal
        if let Some(temporal) = self.behavior.get_temporal(target)? {
            b.temporal_base = (temporal.age_days(now) / FULL_AGE_DAYS).min(1.0);
            b.activity_penalty = temporal.activity_score(now);
            if temporal.has_suspicious_gaps() {
                b.activity_penalty *= 0.5;
            }
        }
        b.secure_temporal = b.temporal_base * b.activity_penalty;

        b.finalize();
        Ok(b)
    }

    /// Full breakdown of `target` as seen by `viewer` (`Address::NULL` for
    /// the global view).
    ///
    /// Storage failures degrade to the neutral breakdown.
    pub fn calculate_with_breakdown(
        &self,
        target: &Address,
        viewer: &Address,
        now: u64,
    ) -> TrustBreakdown {
        match self.try_breakdown(target, viewer, now) {
            Ok(b) => {
                debug!(
                    %target,
                    %viewer,
                    score = b.final_score,
                    behavior = b.secure_behavior,
                    wot = b.secure_wot,
                    economic = b.secure_economic,
                    temporal = b.secure_temporal,
                    "Computed trust score"
                );
                b
            }
            Err(e) => {
                warn!(%target, error = %e, "Trust score unavailable, using neutral");
                TrustBreakdown::neutral()
            }
        }
    }

    pub fn calculate_final_trust(&self, target: &Address, viewer: &Address, now: u64) -> u8 {
        self.calculate_with_breakdown(target, viewer, now).final_score
    }
}
