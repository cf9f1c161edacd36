// Copyright (c) 2025 Cascoin Trust Developers

//! Persisted set of addresses flagged for manipulation.
//!
//! Anyone holding a [`FlagSet`] can flag. Clearing a flag takes a
//! [`DaoAuthorization`] naming that address, which only a dispute that
//! overturned a vote against it or an explicit operator override can produce.

use std::sync::Arc;
use tracing::{info, warn};

use crate::{
    detector::ManipulationResult,
    error::TrustError,
    graph::{BondedVote, DaoDispute},
    store::{keys, read_value, KeyRegion, KvStore, PrefixLocks, StoreError, WriteBatch},
    types::{Address, TxHash},
};

/// Proof that clearing the flag on one address was sanctioned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaoAuthorization {
    address: Address,
    source: AuthorizationSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum AuthorizationSource {
    Dispute(TxHash),
    Operator(String),
}

impl DaoAuthorization {
    /// Authorization to clear the target of `disputed_vote`.
    ///
    /// Only a resolved dispute against that vote which slashed it
    /// qualifies; `None` otherwise.
    pub fn from_dispute(dispute: &DaoDispute, disputed_vote: &BondedVote) -> Option<Self> {
        let overturned = dispute.resolved
            && dispute.slash_decision
            && dispute.original_vote_tx == disputed_vote.bond_tx_hash;
        overturned.then(|| Self {
            address: disputed_vote.target,
            source: AuthorizationSource::Dispute(dispute.dispute_id),
        })
    }

    /// Manual override by the node operator for `address`.
    pub fn operator_override(address: Address, reason: impl Into<String>) -> Self {
        Self {
            address,
            source: AuthorizationSource::Operator(reason.into()),
        }
    }

    /// Address this authorization may unflag.
    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn describe(&self) -> String {
        match &self.source {
            AuthorizationSource::Dispute(id) => format!("dispute {}", id),
            AuthorizationSource::Operator(reason) => format!("operator override ({})", reason),
        }
    }
}

pub struct FlagSet {
    store: Arc<dyn KvStore>,
    locks: Arc<PrefixLocks>,
}

impl FlagSet {
    pub fn new(store: Arc<dyn KvStore>, locks: Arc<PrefixLocks>) -> Self {
        Self { store, locks }
    }

    /// Flag `address`, replacing any earlier finding.
    pub fn flag(&self, address: &Address, result: &ManipulationResult) -> Result<(), StoreError> {
        let _guard = self.locks.lock(KeyRegion::Flags);
        let mut batch = WriteBatch::new();
        batch.put_value(keys::flag(address), result)?;
        self.store.commit(batch)?;
        warn!(
            %address,
            kind = %result.kind,
            confidence = result.confidence,
            "Flagged address"
        );
        Ok(())
    }

    /// Clear a flag. Returns false if the address was not flagged.
    pub fn unflag(&self, address: &Address, authority: &DaoAuthorization) -> Result<bool, TrustError> {
        if authority.address != *address {
            warn!(%address, authority = %authority.describe(), "Rejected unflag for another address");
            return Err(TrustError::UnauthorizedUnflag {
                address: *address,
                authorized: authority.address,
            });
        }
        let _guard = self.locks.lock(KeyRegion::Flags);
        let key = keys::flag(address);
        if !self.store.exists(&key)? {
            return Ok(false);
        }
        self.store.erase(&key)?;
        info!(%address, authority = %authority.describe(), "Unflagged address");
        Ok(true)
    }

    pub fn is_flagged(&self, address: &Address) -> Result<bool, StoreError> {
        self.store.exists(&keys::flag(address))
    }

    pub fn get(&self, address: &Address) -> Result<Option<ManipulationResult>, StoreError> {
        read_value(self.store.as_ref(), &keys::flag(address))
    }

    /// Every flagged address with its finding, in address order.
    pub fn list(&self) -> Result<Vec<(Address, ManipulationResult)>, StoreError> {
        let mut flagged = Vec::new();
        for (key, value) in self.store.scan_prefix(&[keys::FLAG_PREFIX])? {
            let Ok(raw) = <[u8; Address::LEN]>::try_from(&key[1..]) else {
                warn!(len = key.len(), "Skipping malformed flag key");
                continue;
            };
            let result: ManipulationResult = bincode::deserialize(&value)?;
            flagged.push((Address(raw), result));
        }
        Ok(flagged)
    }
}
