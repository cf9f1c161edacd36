// Copyright (c) 2025 Cascoin Trust Developers

//! Bonded web-of-trust graph.
//!
//! Directed, weighted trust edges between addresses, bonded reputation votes,
//! and the DAO disputes that can slash them. Everything lives in the
//! [`KvStore`]; this type only adds validation and indexing on top.

mod disputes;
mod edges;
mod paths;

pub use disputes::{DisputeVoteOutcome, ResolveOutcome};
pub use paths::TrustPath;

use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc};

use crate::{
    config::WotConfig,
    store::{KvStore, PrefixLocks},
    types::{Address, Amount, TxHash, COIN},
};

/// Largest absolute trust weight or vote value.
pub const MAX_WEIGHT: i16 = 100;

/// A bonded trust relationship from one address to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustEdge {
    pub from: Address,
    pub to: Address,
    /// Signed trust in [-100, 100]
    pub weight: i16,
    pub bond_amount: Amount,
    /// Transaction that locked the bond
    pub bond_tx_hash: TxHash,
    pub timestamp: u64,
    pub slashed: bool,
    pub reason: String,
}

impl TrustEdge {
    pub fn is_active(&self) -> bool {
        !self.slashed
    }
}

/// A one-shot bonded reputation vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BondedVote {
    pub voter: Address,
    pub target: Address,
    pub vote_value: i16,
    pub bond_amount: Amount,
    pub bond_tx_hash: TxHash,
    pub timestamp: u64,
    pub slashed: bool,
    /// Transaction that slashed the bond, if any
    pub slash_tx_hash: Option<TxHash>,
    pub reason: String,
}

/// A community challenge against a bonded vote.
///
/// Lifecycle: created, then voted on by DAO members, then resolved. Resolution
/// is terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaoDispute {
    /// Hash of the challenge transaction
    pub dispute_id: TxHash,
    pub original_vote_tx: TxHash,
    pub challenger: Address,
    pub challenge_bond: Amount,
    pub challenge_reason: String,
    pub created_time: u64,
    /// DAO member -> supports slashing
    pub dao_votes: BTreeMap<Address, bool>,
    /// DAO member -> stake behind the vote
    pub dao_stakes: BTreeMap<Address, Amount>,
    pub resolved: bool,
    pub slash_decision: bool,
    pub resolved_time: u64,
}

/// Dispute phase derived from its recorded state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisputeState {
    Created,
    Voting,
    Resolved,
}

impl DaoDispute {
    pub fn state(&self) -> DisputeState {
        if self.resolved {
            DisputeState::Resolved
        } else if self.dao_votes.is_empty() {
            DisputeState::Created
        } else {
            DisputeState::Voting
        }
    }

    /// Total stake behind all recorded DAO votes.
    pub fn total_stake(&self) -> Amount {
        self.dao_stakes
            .values()
            .fold(0, |acc: Amount, s| acc.saturating_add(*s))
    }

    /// Stake behind votes on one side.
    pub fn stake_for(&self, support_slash: bool) -> Amount {
        self.dao_votes
            .iter()
            .filter(|(_, support)| **support == support_slash)
            .map(|(voter, _)| self.dao_stakes.get(voter).copied().unwrap_or(0))
            .fold(0, |acc: Amount, s| acc.saturating_add(s))
    }
}

/// Aggregate counters over the whole graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub total_trust_edges: usize,
    pub slashed_edges: usize,
    pub total_votes: usize,
    pub slashed_votes: usize,
    pub total_disputes: usize,
    pub active_disputes: usize,
}

/// Result of a slash request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlashOutcome {
    Slashed,
    AlreadySlashed,
}

/// Bond below one coin still counts with weight 1.
pub fn bond_weight(bond: Amount) -> f64 {
    let coins = bond as f64 / COIN as f64;
    if coins < 1.0 {
        1.0
    } else {
        coins
    }
}

/// Bonded web-of-trust graph over a shared store.
pub struct TrustGraph {
    store: Arc<dyn KvStore>,
    locks: Arc<PrefixLocks>,
    config: WotConfig,
}

impl TrustGraph {
    pub fn new(store: Arc<dyn KvStore>, locks: Arc<PrefixLocks>, config: WotConfig) -> Self {
        Self {
            store,
            locks,
            config,
        }
    }

    pub fn config(&self) -> &WotConfig {
        &self.config
    }

    /// Bond required for an edge or vote of `weight`.
    pub fn required_bond(&self, weight: i16) -> Amount {
        self.config.required_bond(weight)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bond_weight_floor() {
        assert_eq!(bond_weight(0), 1.0);
        assert_eq!(bond_weight(COIN / 2), 1.0);
        assert_eq!(bond_weight(COIN), 1.0);
        assert_eq!(bond_weight(3 * COIN), 3.0);
    }

    #[test]
    fn test_dispute_state_and_stakes() {
        let mut dispute = DaoDispute {
            dispute_id: TxHash::from_low_u64_be(1),
            original_vote_tx: TxHash::from_low_u64_be(2),
            challenger: Address::from_low_u64_be(3),
            challenge_bond: COIN,
            challenge_reason: "false accusation".into(),
            created_time: 10,
            dao_votes: BTreeMap::new(),
            dao_stakes: BTreeMap::new(),
            resolved: false,
            slash_decision: false,
            resolved_time: 0,
        };
        assert_eq!(dispute.state(), DisputeState::Created);

        let a = Address::from_low_u64_be(10);
        let b = Address::from_low_u64_be(11);
        dispute.dao_votes.insert(a, true);
        dispute.dao_stakes.insert(a, 3 * COIN);
        dispute.dao_votes.insert(b, false);
        dispute.dao_stakes.insert(b, COIN);

        assert_eq!(dispute.state(), DisputeState::Voting);
        assert_eq!(dispute.total_stake(), 4 * COIN);
        assert_eq!(dispute.stake_for(true), 3 * COIN);
        assert_eq!(dispute.stake_for(false), COIN);

        dispute.resolved = true;
        assert_eq!(dispute.state(), DisputeState::Resolved);
    }
}
