// Copyright (c) 2025 Cascoin Trust Developers

//! Key layout of the trust database.
//!
//! Text prefixes followed by lowercase hex, except flagged addresses which
//! use a single `M` byte followed by the raw 20-byte address.

use crate::types::{Address, TxHash};

pub const TRUST_PREFIX: &str = "trust_";
pub const TRUST_IN_PREFIX: &str = "trust_in_";
pub const SLASHED_EDGE_PREFIX: &str = "slashed_edge_";
pub const VOTE_PREFIX: &str = "vote_";
pub const VOTES_PREFIX: &str = "votes_";
pub const DISPUTE_PREFIX: &str = "dispute_";
pub const REPUTATION_PREFIX: &str = "reputation_";
pub const CLUSTER_PREFIX: &str = "wc_";
pub const CLUSTER_ADDR_PREFIX: &str = "wca_";
pub const CLUSTER_TX_PREFIX: &str = "wct_";
pub const FLAG_PREFIX: u8 = b'M';
pub const BEHAVIOR_PREFIX: &str = "behavior_";
pub const STAKE_PREFIX: &str = "stake_";
pub const TEMPORAL_PREFIX: &str = "temporal_";
pub const APPLIED_PREFIX: &str = "applied_";
pub const OBSERVED_PREFIX: &str = "observed_";

/// Height of the last block folded into the persisted cluster index.
pub const META_CLUSTER_HEIGHT: &[u8] = b"meta_cluster_height";

pub fn trust_edge(from: &Address, to: &Address) -> Vec<u8> {
    format!("{}{}_{}", TRUST_PREFIX, from, to).into_bytes()
}

/// Outgoing edges of `from`.
pub fn trust_out_prefix(from: &Address) -> Vec<u8> {
    format!("{}{}_", TRUST_PREFIX, from).into_bytes()
}

/// Reverse index entry, keyed by target first.
pub fn trust_in(to: &Address, from: &Address) -> Vec<u8> {
    format!("{}{}_{}", TRUST_IN_PREFIX, to, from).into_bytes()
}

pub fn trust_in_prefix(to: &Address) -> Vec<u8> {
    format!("{}{}_", TRUST_IN_PREFIX, to).into_bytes()
}

/// Whether a key under `trust_` is a forward edge rather than an index entry.
pub fn is_forward_edge_key(key: &[u8]) -> bool {
    key.starts_with(TRUST_PREFIX.as_bytes()) && !key.starts_with(TRUST_IN_PREFIX.as_bytes())
}

/// Archived edge that was replaced after being slashed.
pub fn slashed_edge(bond_tx: &TxHash) -> Vec<u8> {
    format!("{}{}", SLASHED_EDGE_PREFIX, bond_tx).into_bytes()
}

pub fn vote(tx: &TxHash) -> Vec<u8> {
    format!("{}{}", VOTE_PREFIX, tx).into_bytes()
}

/// Per-target vote index entry.
pub fn votes_for(target: &Address, tx: &TxHash) -> Vec<u8> {
    format!("{}{}_{}", VOTES_PREFIX, target, tx).into_bytes()
}

pub fn votes_for_prefix(target: &Address) -> Vec<u8> {
    format!("{}{}_", VOTES_PREFIX, target).into_bytes()
}

pub fn dispute(id: &TxHash) -> Vec<u8> {
    format!("{}{}", DISPUTE_PREFIX, id).into_bytes()
}

pub fn reputation(address: &Address) -> Vec<u8> {
    format!("{}{}", REPUTATION_PREFIX, address).into_bytes()
}

pub fn cluster(root: &Address) -> Vec<u8> {
    format!("{}{}", CLUSTER_PREFIX, root).into_bytes()
}

pub fn cluster_addr(address: &Address) -> Vec<u8> {
    format!("{}{}", CLUSTER_ADDR_PREFIX, address).into_bytes()
}

/// Transaction already counted by the cluster index.
pub fn cluster_tx(tx: &TxHash) -> Vec<u8> {
    format!("{}{}", CLUSTER_TX_PREFIX, tx).into_bytes()
}

pub fn flag(address: &Address) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + Address::LEN);
    key.push(FLAG_PREFIX);
    key.extend_from_slice(address.as_bytes());
    key
}

pub fn behavior(address: &Address) -> Vec<u8> {
    format!("{}{}", BEHAVIOR_PREFIX, address).into_bytes()
}

pub fn stake(address: &Address) -> Vec<u8> {
    format!("{}{}", STAKE_PREFIX, address).into_bytes()
}

pub fn temporal(address: &Address) -> Vec<u8> {
    format!("{}{}", TEMPORAL_PREFIX, address).into_bytes()
}

/// Marker recording that the operation carried by `tx` was applied.
pub fn applied(tx: &TxHash) -> Vec<u8> {
    format!("{}{}", APPLIED_PREFIX, tx).into_bytes()
}

/// Marker recording that `tx` was folded into `address`'s behavior counters.
pub fn observed_tx(address: &Address, tx: &TxHash) -> Vec<u8> {
    format!("{}{}_{}", OBSERVED_PREFIX, address, tx).into_bytes()
}
