// Copyright (c) 2025 Cascoin Trust Developers

use thiserror::Error;

use crate::{
    store::StoreError,
    types::{Address, Amount, TxHash},
};

/// Errors raised when a trust operation is rejected.
///
/// A rejected operation leaves no partial state behind. Replays of work that
/// already happened are not errors; they come back as `Ok` outcomes.
#[derive(Debug, Error)]
pub enum TrustError {
    #[error("Trust weight {0} outside [-100, 100]")]
    WeightOutOfRange(i16),

    #[error("Vote value {0} outside [-100, 100] or zero")]
    VoteOutOfRange(i16),

    #[error("Reason must not be empty")]
    EmptyReason,

    #[error("Reason is {0} bytes, limit is {1}")]
    ReasonTooLong(usize, usize),

    #[error("Active trust edge already exists from {from} to {to}")]
    DuplicateEdge { from: Address, to: Address },

    #[error("Bond {provided} below required {required}")]
    InsufficientBond { provided: Amount, required: Amount },

    #[error("Address {0} cannot trust itself")]
    SelfTrust(Address),

    #[error("Dispute not found: {0}")]
    UnknownDispute(TxHash),

    #[error("Vote not found: {0}")]
    UnknownVote(TxHash),

    #[error("Trust edge not found from {from} to {to}")]
    UnknownEdge { from: Address, to: Address },

    #[error("Voter {0} has no voting power")]
    NoVotingPower(Address),

    #[error("Authorization covers {authorized}, not {address}")]
    UnauthorizedUnflag { address: Address, authorized: Address },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Maximum length in bytes of a free-text reason.
pub const MAX_REASON_LEN: usize = 500;

/// Check a free-text reason for emptiness and length.
pub fn validate_reason(reason: &str) -> Result<(), TrustError> {
    if reason.trim().is_empty() {
        return Err(TrustError::EmptyReason);
    }
    if reason.len() > MAX_REASON_LEN {
        return Err(TrustError::ReasonTooLong(reason.len(), MAX_REASON_LEN));
    }
    Ok(())
}
