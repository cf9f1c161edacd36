// Copyright (c) 2025 Cascoin Trust Developers

//! Bonded votes and the DAO disputes that can slash them.

use tracing::{debug, info, warn};

use super::{BondedVote, DaoDispute, SlashOutcome, TrustGraph, MAX_WEIGHT};
use crate::{
    error::{validate_reason, TrustError},
    store::{keys, read_value, scan_values, KeyRegion, StoreError, WriteBatch},
    types::{Address, Amount, TxHash},
};

/// What happened when a DAO member voted on a dispute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisputeVoteOutcome {
    /// Vote stored; quorum not reached yet
    Recorded { votes: usize, stake: Amount },
    /// Vote stored and the dispute resolved on the spot
    Resolved { slash: bool },
    /// Dispute was already settled; nothing changed
    AlreadyResolved,
}

/// Result of an explicit resolution request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    Resolved { slash: bool },
    AlreadyResolved { slash: bool },
    /// Quorum not reached
    Pending,
}

impl TrustGraph {
    // ------------------------------------------------------------------------
    // Votes
    // ------------------------------------------------------------------------

    /// Record a bonded reputation vote keyed by its bond transaction.
    #[allow(clippy::too_many_arguments)]
    pub fn record_bonded_vote(
        &self,
        voter: Address,
        target: Address,
        vote_value: i16,
        bond_amount: Amount,
        bond_tx_hash: TxHash,
        timestamp: u64,
        reason: &str,
    ) -> Result<BondedVote, TrustError> {
        if vote_value == 0 || !(-MAX_WEIGHT..=MAX_WEIGHT).contains(&vote_value) {
            return Err(TrustError::VoteOutOfRange(vote_value));
        }
        if voter == target {
            return Err(TrustError::SelfTrust(voter));
        }
        validate_reason(reason)?;
        let required = self.required_bond(vote_value);
        if bond_amount < required {
            return Err(TrustError::InsufficientBond {
                provided: bond_amount,
                required,
            });
        }

        let _guard = self.locks.lock(KeyRegion::Votes);
        if let Some(existing) = self.get_vote(&bond_tx_hash)? {
            debug!(tx = %bond_tx_hash, "Vote already recorded");
            return Ok(existing);
        }

        let vote = BondedVote {
            voter,
            target,
            vote_value,
            bond_amount,
            bond_tx_hash,
            timestamp,
            slashed: false,
            slash_tx_hash: None,
            reason: reason.to_string(),
        };
        let mut batch = WriteBatch::new();
        batch.put_value(keys::vote(&bond_tx_hash), &vote)?;
        batch.put_value(keys::votes_for(&target, &bond_tx_hash), &bond_tx_hash)?;
        self.store.commit(batch)?;

        info!(%voter, %target, vote = vote_value, bond = bond_amount, "Recorded bonded vote");
        Ok(vote)
    }

    pub fn get_vote(&self, vote_tx: &TxHash) -> Result<Option<BondedVote>, StoreError> {
        read_value(self.store.as_ref(), &keys::vote(vote_tx))
    }

    /// Every vote cast on `target`, slashed ones included, in tx order.
    pub fn get_votes_for_address(&self, target: &Address) -> Result<Vec<BondedVote>, StoreError> {
        let txs: Vec<TxHash> = scan_values(self.store.as_ref(), &keys::votes_for_prefix(target))?;
        let mut votes = Vec::with_capacity(txs.len());
        for tx in txs {
            match self.get_vote(&tx)? {
                Some(vote) => votes.push(vote),
                None => warn!(%target, tx = %tx, "Vote index points at missing vote"),
            }
        }
        Ok(votes)
    }

    /// Every stored vote, in tx order.
    pub fn list_votes(&self) -> Result<Vec<BondedVote>, StoreError> {
        scan_values(self.store.as_ref(), keys::VOTE_PREFIX.as_bytes())
    }

    /// Slash a vote's bond. Slashing twice is a no-op.
    pub fn slash_vote(&self, vote_tx: &TxHash, slash_tx: &TxHash) -> Result<SlashOutcome, TrustError> {
        let _guard = self.locks.lock(KeyRegion::Votes);
        let mut batch = WriteBatch::new();
        let outcome = self.stage_vote_slash(vote_tx, slash_tx, &mut batch)?;
        self.store.commit(batch)?;
        Ok(outcome)
    }

    /// Queue a vote slash into `batch`. Caller holds the votes lock.
    fn stage_vote_slash(
        &self,
        vote_tx: &TxHash,
        slash_tx: &TxHash,
        batch: &mut WriteBatch,
    ) -> Result<SlashOutcome, TrustError> {
        let mut vote = self
            .get_vote(vote_tx)?
            .ok_or(TrustError::UnknownVote(*vote_tx))?;
        if vote.slashed {
            return Ok(SlashOutcome::AlreadySlashed);
        }
        vote.slashed = true;
        vote.slash_tx_hash = Some(*slash_tx);
        batch.put_value(keys::vote(vote_tx), &vote)?;

        info!(voter = %vote.voter, target = %vote.target, vote_tx = %vote_tx, "Slashed bonded vote");
        Ok(SlashOutcome::Slashed)
    }

    // ------------------------------------------------------------------------
    // Disputes
    // ------------------------------------------------------------------------

    /// Open a dispute against an existing vote.
    ///
    /// Replaying the same dispute id returns the stored dispute.
    pub fn create_dispute(
        &self,
        dispute_id: TxHash,
        original_vote_tx: TxHash,
        challenger: Address,
        challenge_bond: Amount,
        challenge_reason: &str,
        created_time: u64,
    ) -> Result<DaoDispute, TrustError> {
        validate_reason(challenge_reason)?;
        if challenge_bond < self.config.min_bond {
            return Err(TrustError::InsufficientBond {
                provided: challenge_bond,
                required: self.config.min_bond,
            });
        }
        if self.get_vote(&original_vote_tx)?.is_none() {
            return Err(TrustError::UnknownVote(original_vote_tx));
        }

        let _guard = self.locks.lock(KeyRegion::Disputes);
        if let Some(existing) = self.get_dispute(&dispute_id)? {
            debug!(dispute = %dispute_id, "Dispute already recorded");
            return Ok(existing);
        }

        let dispute = DaoDispute {
            dispute_id,
            original_vote_tx,
            challenger,
            challenge_bond,
            challenge_reason: challenge_reason.to_string(),
            created_time,
            dao_votes: Default::default(),
            dao_stakes: Default::default(),
            resolved: false,
            slash_decision: false,
            resolved_time: 0,
        };
        let mut batch = WriteBatch::new();
        batch.put_value(keys::dispute(&dispute_id), &dispute)?;
        self.store.commit(batch)?;

        info!(dispute = %dispute_id, vote = %original_vote_tx, %challenger, "Opened DAO dispute");
        Ok(dispute)
    }

    pub fn get_dispute(&self, dispute_id: &TxHash) -> Result<Option<DaoDispute>, StoreError> {
        read_value(self.store.as_ref(), &keys::dispute(dispute_id))
    }

    /// Every dispute, in id order.
    pub fn list_disputes(&self) -> Result<Vec<DaoDispute>, StoreError> {
        scan_values(self.store.as_ref(), keys::DISPUTE_PREFIX.as_bytes())
    }

    fn has_quorum(&self, dispute: &DaoDispute) -> bool {
        dispute.dao_votes.len() >= self.config.min_dao_votes
            || dispute.total_stake() >= self.config.min_dao_stake
    }

    /// Settle `dispute` in place and queue the resulting writes.
    ///
    /// Slashing wins when it has strictly more stake behind it, or when every
    /// recorded vote supports it.
    fn settle(
        &self,
        dispute: &mut DaoDispute,
        now: u64,
        batch: &mut WriteBatch,
    ) -> Result<bool, TrustError> {
        let support = dispute.stake_for(true);
        let oppose = dispute.stake_for(false);
        let unanimous = !dispute.dao_votes.is_empty() && dispute.dao_votes.values().all(|s| *s);
        let slash = unanimous || support > oppose;

        dispute.resolved = true;
        dispute.slash_decision = slash;
        dispute.resolved_time = now;

        if slash {
            match self.stage_vote_slash(&dispute.original_vote_tx, &dispute.dispute_id, batch) {
                Ok(_) => {}
                Err(TrustError::UnknownVote(tx)) => {
                    warn!(dispute = %dispute.dispute_id, vote = %tx, "Disputed vote vanished")
                }
                Err(e) => return Err(e),
            }
        }
        batch.put_value(keys::dispute(&dispute.dispute_id), &*dispute)?;

        info!(
            dispute = %dispute.dispute_id,
            slash,
            support_stake = support,
            oppose_stake = oppose,
            "Resolved DAO dispute"
        );
        Ok(slash)
    }

    /// Record a DAO member's vote. A second vote from the same member
    /// replaces the first. Reaching quorum resolves the dispute immediately.
    pub fn vote_on_dispute(
        &self,
        dispute_id: &TxHash,
        voter: Address,
        support_slash: bool,
        stake: Amount,
        now: u64,
    ) -> Result<DisputeVoteOutcome, TrustError> {
        if stake == 0 {
            return Err(TrustError::NoVotingPower(voter));
        }

        let _votes = self.locks.lock(KeyRegion::Votes);
        let _disputes = self.locks.lock(KeyRegion::Disputes);

        let mut dispute = self
            .get_dispute(dispute_id)?
            .ok_or(TrustError::UnknownDispute(*dispute_id))?;
        if dispute.resolved {
            return Ok(DisputeVoteOutcome::AlreadyResolved);
        }

        dispute.dao_votes.insert(voter, support_slash);
        dispute.dao_stakes.insert(voter, stake);
        debug!(dispute = %dispute_id, %voter, support_slash, stake, "DAO vote recorded");

        let mut batch = WriteBatch::new();
        let outcome = if self.has_quorum(&dispute) {
            let slash = self.settle(&mut dispute, now, &mut batch)?;
            DisputeVoteOutcome::Resolved { slash }
        } else {
            batch.put_value(keys::dispute(dispute_id), &dispute)?;
            DisputeVoteOutcome::Recorded {
                votes: dispute.dao_votes.len(),
                stake: dispute.total_stake(),
            }
        };
        self.store.commit(batch)?;
        Ok(outcome)
    }

    /// Resolve a dispute that has reached quorum.
    pub fn resolve_dispute(&self, dispute_id: &TxHash, now: u64) -> Result<ResolveOutcome, TrustError> {
        let _votes = self.locks.lock(KeyRegion::Votes);
        let _disputes = self.locks.lock(KeyRegion::Disputes);

        let mut dispute = self
            .get_dispute(dispute_id)?
            .ok_or(TrustError::UnknownDispute(*dispute_id))?;
        if dispute.resolved {
            return Ok(ResolveOutcome::AlreadyResolved {
                slash: dispute.slash_decision,
            });
        }
        if !self.has_quorum(&dispute) {
            return Ok(ResolveOutcome::Pending);
        }

        let mut batch = WriteBatch::new();
        let slash = self.settle(&mut dispute, now, &mut batch)?;
        self.store.commit(batch)?;
        Ok(ResolveOutcome::Resolved { slash })
    }

    /// Close every open dispute older than the timeout without slashing.
    ///
    /// Returns the ids of the disputes that were closed.
    pub fn expire_disputes(&self, now: u64) -> Result<Vec<TxHash>, TrustError> {
        let _disputes = self.locks.lock(KeyRegion::Disputes);
        let timeout = self.config.dispute_timeout_secs;

        let mut batch = WriteBatch::new();
        let mut expired = Vec::new();
        for mut dispute in self.list_disputes()? {
            if dispute.resolved || self.has_quorum(&dispute) {
                continue;
            }
            if now < dispute.created_time.saturating_add(timeout) {
                continue;
            }
            dispute.resolved = true;
            dispute.slash_decision = false;
            dispute.resolved_time = now;
            batch.put_value(keys::dispute(&dispute.dispute_id), &dispute)?;
            expired.push(dispute.dispute_id);
        }

        if !expired.is_empty() {
            self.store.commit(batch)?;
            info!(count = expired.len(), "Expired DAO disputes without quorum");
        }
        Ok(expired)
    }
}
