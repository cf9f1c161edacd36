// Copyright (c) 2025 Cascoin Trust Developers

//! Trust operations carried by block transactions.
//!
//! The block processor hands over already parsed and validated payloads;
//! [`TrustContext::apply_block`] applies them in transaction order. Each
//! operation is keyed by its transaction hash, so replaying a block after a
//! restart does not apply anything twice.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::{
    context::TrustContext,
    detector::ReputationChange,
    error::TrustError,
    graph::{BondedVote, DaoDispute, DisputeVoteOutcome, TrustEdge},
    reputation::ScoreUpdate,
    store::{keys, StoreError, WriteBatch},
    types::{Address, Amount, TxHash},
};

/// Where an operation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub tx_hash: TxHash,
    pub height: u64,
    /// Block time in seconds
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustEdgeData {
    pub from: Address,
    pub to: Address,
    pub weight: i16,
    pub bond_amount: Amount,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BondedVoteData {
    pub voter: Address,
    pub target: Address,
    pub vote_value: i16,
    pub bond_amount: Amount,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaoDisputeData {
    pub original_vote_tx: TxHash,
    pub challenger: Address,
    pub challenge_bond: Amount,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaoVoteData {
    pub dispute_id: TxHash,
    pub voter: Address,
    pub support_slash: bool,
    pub stake: Amount,
}

/// One parsed trust payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrustOp {
    Edge(TrustEdgeData),
    Vote(BondedVoteData),
    Dispute(DaoDisputeData),
    DaoVote(DaoVoteData),
}

impl TrustOp {
    /// Addresses whose activity the operation demonstrates.
    pub fn touched_addresses(&self) -> BTreeSet<Address> {
        match self {
            TrustOp::Edge(d) => BTreeSet::from([d.from, d.to]),
            TrustOp::Vote(d) => BTreeSet::from([d.voter, d.target]),
            TrustOp::Dispute(d) => BTreeSet::from([d.challenger]),
            TrustOp::DaoVote(d) => BTreeSet::from([d.voter]),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TrustOp::Edge(_) => "edge",
            TrustOp::Vote(_) => "vote",
            TrustOp::Dispute(_) => "dispute",
            TrustOp::DaoVote(_) => "dao_vote",
        }
    }
}

/// Result of applying one operation.
#[derive(Debug)]
pub enum ApplyOutcome {
    Edge(TrustEdge),
    Vote { vote: BondedVote, update: ScoreUpdate },
    Dispute(DaoDispute),
    DaoVote(DisputeVoteOutcome),
    /// The transaction was applied before; nothing changed
    Replayed,
    /// Carried a height other than the block being applied
    WrongHeight { expected: u64, found: u64 },
    Rejected(TrustError),
}

impl ApplyOutcome {
    pub fn is_applied(&self) -> bool {
        !matches!(
            self,
            ApplyOutcome::Replayed | ApplyOutcome::WrongHeight { .. } | ApplyOutcome::Rejected(_)
        )
    }
}

impl TrustContext {
    /// Apply the trust operations of block `height` in order.
    ///
    /// Returns one outcome per operation. A rejected operation changes
    /// nothing and does not stop the ones after it.
    pub fn apply_block(&self, height: u64, ops: &[(Provenance, TrustOp)]) -> Vec<ApplyOutcome> {
        let _block = self.apply_lock().lock();
        let outcomes: Vec<ApplyOutcome> = ops
            .iter()
            .map(|(provenance, op)| self.apply_one(height, provenance, op))
            .collect();

        let applied = outcomes.iter().filter(|o| o.is_applied()).count();
        info!(height, ops = ops.len(), applied, "Applied trust operations");
        outcomes
    }

    fn apply_one(&self, height: u64, provenance: &Provenance, op: &TrustOp) -> ApplyOutcome {
        if provenance.height != height {
            warn!(
                tx = %provenance.tx_hash,
                expected = height,
                found = provenance.height,
                "Operation from another block"
            );
            return ApplyOutcome::WrongHeight {
                expected: height,
                found: provenance.height,
            };
        }

        let marker = keys::applied(&provenance.tx_hash);
        match self.store().exists(&marker) {
            Ok(true) => {
                debug!(tx = %provenance.tx_hash, "Operation already applied");
                return ApplyOutcome::Replayed;
            }
            Ok(false) => {}
            Err(e) => return ApplyOutcome::Rejected(e.into()),
        }

        let outcome = match self.dispatch(provenance, op, &marker) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    tx = %provenance.tx_hash,
                    kind = op.kind(),
                    error = %e,
                    "Rejected trust operation"
                );
                return ApplyOutcome::Rejected(e);
            }
        };

        // Votes commit their marker with the score update. The other
        // operations are keyed by transaction hash in the graph, so a lost
        // marker only costs a harmless replay.
        if !matches!(op, TrustOp::Vote(_)) {
            if let Err(e) = self.mark_applied(marker, provenance.height) {
                warn!(tx = %provenance.tx_hash, error = %e, "Failed to mark operation applied");
            }
        }

        for address in op.touched_addresses() {
            if let Err(e) = self.behavior().record_activity(&address, provenance.timestamp) {
                warn!(%address, error = %e, "Failed to record activity");
            }
        }
        outcome
    }

    fn mark_applied(&self, marker: Vec<u8>, height: u64) -> Result<(), StoreError> {
        self.store().commit(applied_batch(marker, height)?)
    }

    fn dispatch(
        &self,
        provenance: &Provenance,
        op: &TrustOp,
        marker: &[u8],
    ) -> Result<ApplyOutcome, TrustError> {
        let Provenance {
            tx_hash,
            height,
            timestamp,
        } = *provenance;

        match op {
            TrustOp::Edge(d) => {
                let edge = self.graph().add_trust_edge(
                    d.from,
                    d.to,
                    d.weight,
                    d.bond_amount,
                    tx_hash,
                    timestamp,
                    &d.reason,
                )?;
                Ok(ApplyOutcome::Edge(edge))
            }
            TrustOp::Vote(d) => {
                // A voter without power must not leave a bonded vote behind
                if self.ledger().voting_power(&d.voter, timestamp)? <= 0 {
                    return Err(TrustError::NoVotingPower(d.voter));
                }
                let vote = self.graph().record_bonded_vote(
                    d.voter,
                    d.target,
                    d.vote_value,
                    d.bond_amount,
                    tx_hash,
                    timestamp,
                    &d.reason,
                )?;
                // The bonded vote above is keyed by hash; the score update
                // is not, so it lands atomically with the applied marker
                let update = self.ledger().apply_vote_with(
                    &d.voter,
                    &d.target,
                    d.vote_value,
                    &d.reason,
                    timestamp,
                    applied_batch(marker.to_vec(), height)?,
                )?;
                self.vote_detector().record_reputation_change(ReputationChange {
                    address: d.target,
                    height,
                    old_score: update.old_score,
                    new_score: update.new_score,
                    reason: d.reason.clone(),
                });
                Ok(ApplyOutcome::Vote { vote, update })
            }
            TrustOp::Dispute(d) => {
                let dispute = self.graph().create_dispute(
                    tx_hash,
                    d.original_vote_tx,
                    d.challenger,
                    d.challenge_bond,
                    &d.reason,
                    timestamp,
                )?;
                Ok(ApplyOutcome::Dispute(dispute))
            }
            TrustOp::DaoVote(d) => {
                let outcome = self.graph().vote_on_dispute(
                    &d.dispute_id,
                    d.voter,
                    d.support_slash,
                    d.stake,
                    timestamp,
                )?;
                Ok(ApplyOutcome::DaoVote(outcome))
            }
        }
    }
}

fn applied_batch(marker: Vec<u8>, height: u64) -> Result<WriteBatch, StoreError> {
    let mut batch = WriteBatch::new();
    batch.put_value(marker, &height)?;
    Ok(batch)
}
