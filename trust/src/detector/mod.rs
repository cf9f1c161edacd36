// Copyright (c) 2025 Cascoin Trust Developers

//! Manipulation detection over validator votes and trust-graph structure.
//!
//! Detectors only analyze. They never flag an address themselves; the caller
//! decides what to do with a finding (see [`crate::flags::FlagSet`]).

mod graph;
mod vote;

pub use graph::TrustGraphManipulationDetector;
pub use vote::{ReputationChange, VoteManipulationDetector, VoteRecord};

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{
    graph::TrustEdge,
    types::{Address, TxHash},
};

/// Kind of manipulation a detector found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ManipulationType {
    #[default]
    None,
    // Graph structure
    ArtificialPathCreation,
    CircularTrustRing,
    RapidTrustAccumulation,
    CoordinatedTrustBoost,
    SybilTrustNetwork,
    TrustWashing,
    ReciprocalTrustAbuse,
    // Validator votes and score history
    CoordinatedVoting,
    TimingCorrelation,
    ReputationSpike,
    ValidatorCollusion,
    SuspiciousPattern,
}

impl ManipulationType {
    /// Extra trust-health deduction on top of the confidence-based one.
    pub fn severity_penalty(&self) -> i32 {
        match self {
            ManipulationType::SybilTrustNetwork => 30,
            ManipulationType::CircularTrustRing => 25,
            ManipulationType::CoordinatedTrustBoost => 20,
            ManipulationType::ArtificialPathCreation | ManipulationType::TrustWashing => 15,
            ManipulationType::RapidTrustAccumulation | ManipulationType::ReciprocalTrustAbuse => 10,
            _ => 0,
        }
    }
}

impl fmt::Display for ManipulationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ManipulationType::None => "NONE",
            ManipulationType::ArtificialPathCreation => "ARTIFICIAL_PATH_CREATION",
            ManipulationType::CircularTrustRing => "CIRCULAR_TRUST_RING",
            ManipulationType::RapidTrustAccumulation => "RAPID_TRUST_ACCUMULATION",
            ManipulationType::CoordinatedTrustBoost => "COORDINATED_TRUST_BOOST",
            ManipulationType::SybilTrustNetwork => "SYBIL_TRUST_NETWORK",
            ManipulationType::TrustWashing => "TRUST_WASHING",
            ManipulationType::ReciprocalTrustAbuse => "RECIPROCAL_TRUST_ABUSE",
            ManipulationType::CoordinatedVoting => "COORDINATED_VOTING",
            ManipulationType::TimingCorrelation => "TIMING_CORRELATION",
            ManipulationType::ReputationSpike => "REPUTATION_SPIKE",
            ManipulationType::ValidatorCollusion => "VALIDATOR_COLLUSION",
            ManipulationType::SuspiciousPattern => "SUSPICIOUS_PATTERN",
        };
        f.write_str(label)
    }
}

/// Outcome of one detector run.
///
/// `kind == None` means nothing was found; that is a normal result, not an
/// error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManipulationResult {
    pub kind: ManipulationType,
    /// In [0, 1]
    pub confidence: f64,
    pub involved_addresses: Vec<Address>,
    pub suspicious_edges: Vec<TrustEdge>,
    pub suspicious_txs: Vec<TxHash>,
    pub description: String,
    pub escalate_to_dao: bool,
}

impl ManipulationResult {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_detected(&self) -> bool {
        self.kind != ManipulationType::None
    }

    /// The finding with the highest confidence. Ties keep the earlier one.
    pub fn strongest(results: impl IntoIterator<Item = ManipulationResult>) -> ManipulationResult {
        results
            .into_iter()
            .filter(ManipulationResult::is_detected)
            .fold(ManipulationResult::none(), |best, r| {
                if !best.is_detected() || r.confidence > best.confidence {
                    r
                } else {
                    best
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(kind: ManipulationType, confidence: f64) -> ManipulationResult {
        ManipulationResult {
            kind,
            confidence,
            ..Default::default()
        }
    }

    #[test]
    fn test_strongest_prefers_confidence_then_order() {
        let picked = ManipulationResult::strongest(vec![
            ManipulationResult::none(),
            finding(ManipulationType::TrustWashing, 0.8),
            finding(ManipulationType::CircularTrustRing, 0.9),
            finding(ManipulationType::SybilTrustNetwork, 0.9),
        ]);
        assert_eq!(picked.kind, ManipulationType::CircularTrustRing);
    }

    #[test]
    fn test_strongest_of_nothing_is_none() {
        let picked = ManipulationResult::strongest(vec![ManipulationResult::none()]);
        assert!(!picked.is_detected());
        assert_eq!(picked.confidence, 0.0);
    }

    #[test]
    fn test_labels() {
        assert_eq!(ManipulationType::CoordinatedVoting.to_string(), "COORDINATED_VOTING");
        assert_eq!(ManipulationType::SybilTrustNetwork.severity_penalty(), 30);
        assert_eq!(ManipulationType::ReputationSpike.severity_penalty(), 0);
    }
}
