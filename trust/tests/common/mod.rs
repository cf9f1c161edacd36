// Copyright (c) 2025 Cascoin Trust Developers
//
//! Shared helpers for the trust engine integration tests.

#![allow(dead_code)]

use cas_trust::{
    cluster::ChainTransaction,
    config::Config,
    context::TrustContext,
    ops::{BondedVoteData, Provenance, TrustEdgeData, TrustOp},
    types::{Address, Amount, TxHash, COIN},
};

/// Block time of height 0
pub const T0: u64 = 1_700_000_000;

/// Seconds between blocks
pub const BLOCK_SECS: u64 = 60;

pub fn addr(n: u64) -> Address {
    Address::from_low_u64_be(n)
}

pub fn tx(n: u64) -> TxHash {
    TxHash::from_low_u64_be(n)
}

pub fn block_time(height: u64) -> u64 {
    T0 + height * BLOCK_SECS
}

pub fn at(tx_id: u64, height: u64) -> Provenance {
    Provenance {
        tx_hash: tx(tx_id),
        height,
        timestamp: block_time(height),
    }
}

/// Bond that covers any weight under the default config
pub const FULL_BOND: Amount = 2 * COIN;

pub fn edge(from: u64, to: u64, weight: i16) -> TrustOp {
    TrustOp::Edge(TrustEdgeData {
        from: addr(from),
        to: addr(to),
        weight,
        bond_amount: FULL_BOND,
        reason: String::new(),
    })
}

pub fn vote(voter: u64, target: u64, value: i16) -> TrustOp {
    TrustOp::Vote(BondedVoteData {
        voter: addr(voter),
        target: addr(target),
        vote_value: value,
        bond_amount: FULL_BOND,
        reason: "traded with them".to_string(),
    })
}

pub fn memory_context() -> TrustContext {
    TrustContext::in_memory(Config::default())
}

/// A spend from `inputs` to a single unrelated output.
pub fn spend(id: u64, inputs: &[u64]) -> ChainTransaction {
    ChainTransaction {
        txid: tx(id),
        timestamp: block_time(id),
        inputs: inputs.iter().map(|n| addr(*n)).collect(),
        outputs: vec![(addr(9_000 + id), COIN)],
        ..Default::default()
    }
}
