// Copyright (c) 2025 Cascoin Trust Developers

//! Structural manipulation patterns in the trust graph.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};
use tracing::{debug, warn};

use super::{ManipulationResult, ManipulationType};
use crate::{
    behavior::BehaviorStore,
    cluster::AddressClusterer,
    config::GraphDetectorConfig,
    flags::FlagSet,
    graph::{TrustEdge, TrustGraph},
    store::StoreError,
    types::{Address, SECS_PER_DAY},
};

const ARTIFICIAL_PATH_FLAG: f64 = 0.60;
const ARTIFICIAL_PATH_ESCALATION: f64 = 0.80;
const RAPID_ESCALATION: f64 = 0.90;
const COORDINATED_ESCALATION: f64 = 0.85;
const WASHING_ESCALATION: f64 = 0.85;
const RECIPROCAL_ESCALATION: f64 = 0.80;

const SUSPICIOUS_EDGES_PER_HOUR: f64 = 5.0;
const SUSPICIOUS_WEIGHT_PER_HOUR: f64 = 200.0;

/// Edges from one hour bucket that make it suspicious on their own
const BUCKET_SIZE_ALONE: usize = 5;
const BUCKET_MIN_EDGES: usize = 3;
const BUCKET_CLUSTER_RATIO: f64 = 0.30;

const SYBIL_MIN_DENSITY: f64 = 0.30;
const SYBIL_MIN_EDGES: usize = 3;

const RECIPROCAL_MAX_WEIGHT_DIFF: i16 = 10;
const RECIPROCAL_MAX_TIME_DIFF: u64 = 3_600;
const RECIPROCAL_MAX_PARTNER_ACTIVITY: usize = 10;

/// Stricter weight match when judging a single new edge
const EDGE_RECIPROCAL_MAX_WEIGHT_DIFF: i16 = 5;

/// Intermediary created this shortly before passing trust on
const WASHING_MAX_SOURCE_AGE: u64 = SECS_PER_DAY;

/// DFS expansions allowed per ring search
const MAX_RING_STEPS: usize = 100_000;

const GENUINE_MIN_AGE: u64 = 7 * SECS_PER_DAY;
const GENUINE_MIN_ACTIVITY: usize = 5;
const GENUINE_MIN_COUNTERPARTIES: usize = 3;

/// Detects Sybil rings, washing and other structural abuse of the graph.
pub struct TrustGraphManipulationDetector {
    graph: Arc<TrustGraph>,
    clusterer: Arc<AddressClusterer>,
    behavior: Arc<BehaviorStore>,
    flags: Arc<FlagSet>,
    config: GraphDetectorConfig,
}

impl TrustGraphManipulationDetector {
    pub fn new(
        graph: Arc<TrustGraph>,
        clusterer: Arc<AddressClusterer>,
        behavior: Arc<BehaviorStore>,
        flags: Arc<FlagSet>,
        config: GraphDetectorConfig,
    ) -> Self {
        Self {
            graph,
            clusterer,
            behavior,
            flags,
            config,
        }
    }

    pub fn config(&self) -> &GraphDetectorConfig {
        &self.config
    }

    /// Whether a finding is strong enough to flag its address.
    pub fn should_flag(&self, result: &ManipulationResult) -> bool {
        result.is_detected() && result.confidence >= self.config.flag_threshold
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn same_cluster(&self, a: &Address, b: &Address) -> bool {
        a != b && self.clusterer.cluster_id(a) == self.clusterer.cluster_id(b)
    }

    fn activity_count(&self, address: &Address) -> Result<usize, StoreError> {
        Ok(self
            .behavior
            .get_temporal(address)?
            .map_or(0, |t| t.activity_count()))
    }

    /// Older than a week, active, and connected to several counterparties.
    pub fn has_genuine_history(&self, address: &Address, now: u64) -> Result<bool, StoreError> {
        let Some(temporal) = self.behavior.get_temporal(address)? else {
            return Ok(false);
        };
        if now.saturating_sub(temporal.account_creation) < GENUINE_MIN_AGE
            || temporal.activity_count() < GENUINE_MIN_ACTIVITY
        {
            return Ok(false);
        }
        let mut counterparties = BTreeSet::new();
        for edge in self.graph.get_outgoing_trust(address)? {
            counterparties.insert(edge.to);
        }
        for edge in self.graph.get_incoming_trust(address)? {
            counterparties.insert(edge.from);
        }
        Ok(counterparties.len() >= GENUINE_MIN_COUNTERPARTIES)
    }

    /// `1 - cv` of the gaps between edge timestamps; 1 when all coincide.
    fn time_clustering_score(edges: &[TrustEdge]) -> f64 {
        if edges.len() < 2 {
            return 0.0;
        }
        let mut timestamps: Vec<u64> = edges.iter().map(|e| e.timestamp).collect();
        timestamps.sort_unstable();
        let gaps: Vec<f64> = timestamps.windows(2).map(|w| (w[1] - w[0]) as f64).collect();

        let n = gaps.len() as f64;
        let mean = gaps.iter().sum::<f64>() / n;
        if mean == 0.0 {
            return 1.0;
        }
        let variance = gaps.iter().map(|g| (g - mean).powi(2)).sum::<f64>() / n;
        (1.0 - variance.sqrt() / mean).max(0.0)
    }

    /// `1 - stddev / 50` of the edge weights.
    fn weight_similarity_score(edges: &[TrustEdge]) -> f64 {
        if edges.len() < 2 {
            return 0.0;
        }
        let n = edges.len() as f64;
        let mean = edges.iter().map(|e| e.weight as f64).sum::<f64>() / n;
        let variance = edges
            .iter()
            .map(|e| (e.weight as f64 - mean).powi(2))
            .sum::<f64>()
            / n;
        (1.0 - variance.sqrt() / 50.0).max(0.0)
    }

    /// Targets of active positive edges, in address order.
    fn ring_successors(&self, address: &Address) -> Result<Vec<Address>, StoreError> {
        Ok(self
            .graph
            .get_outgoing_trust(address)?
            .into_iter()
            .filter(|e| e.weight > 0)
            .map(|e| e.to)
            .collect())
    }

    /// First cycle back to `start` with 3 to `max_len` members, found by an
    /// iterative DFS in address order.
    fn find_ring(&self, start: &Address, max_len: usize) -> Result<Option<Vec<Address>>, StoreError> {
        let mut path = vec![*start];
        let mut on_path = BTreeSet::from([*start]);
        let mut stack: Vec<(Vec<Address>, usize)> = vec![(self.ring_successors(start)?, 0)];
        let mut steps = 0usize;

        loop {
            let Some(frame) = stack.last_mut() else {
                return Ok(None);
            };
            let Some(next) = frame.0.get(frame.1).copied() else {
                stack.pop();
                if let Some(node) = path.pop() {
                    on_path.remove(&node);
                }
                continue;
            };
            frame.1 += 1;

            if next == *start && path.len() >= 3 {
                return Ok(Some(path));
            }
            if on_path.contains(&next) || path.len() >= max_len {
                continue;
            }
            steps += 1;
            if steps > MAX_RING_STEPS {
                debug!(%start, "Ring search budget exhausted");
                return Ok(None);
            }
            path.push(next);
            on_path.insert(next);
            stack.push((self.ring_successors(&next)?, 0));
        }
    }

    // ------------------------------------------------------------------------
    // Detectors
    // ------------------------------------------------------------------------

    /// Many similar, simultaneous endorsements from addresses without real
    /// history.
    pub fn detect_artificial_path_creation(
        &self,
        address: &Address,
        now: u64,
    ) -> Result<ManipulationResult, StoreError> {
        let incoming = self.graph.get_incoming_trust(address)?;
        if incoming.len() < self.config.min_edges_for_pattern {
            return Ok(ManipulationResult::none());
        }

        let time_cluster = Self::time_clustering_score(&incoming);
        let weight_similarity = Self::weight_similarity_score(&incoming);

        let mut suspicious_sources = Vec::new();
        let mut suspicious_edges = Vec::new();
        for edge in &incoming {
            if !self.has_genuine_history(&edge.from, now)? {
                suspicious_sources.push(edge.from);
                suspicious_edges.push(edge.clone());
            }
        }
        let suspicious_ratio = suspicious_sources.len() as f64 / incoming.len() as f64;

        let confidence = time_cluster * 0.3 + weight_similarity * 0.3 + suspicious_ratio * 0.4;
        if confidence < ARTIFICIAL_PATH_FLAG {
            return Ok(ManipulationResult::none());
        }

        warn!(%address, confidence, sources = suspicious_sources.len(), "Artificial trust paths detected");
        let description = format!(
            "{} suspicious sources, time clustering {:.0}%, weight similarity {:.0}%",
            suspicious_sources.len(),
            time_cluster * 100.0,
            weight_similarity * 100.0
        );
        let mut involved = suspicious_sources;
        involved.push(*address);
        Ok(ManipulationResult {
            kind: ManipulationType::ArtificialPathCreation,
            confidence,
            involved_addresses: involved,
            suspicious_edges,
            description,
            escalate_to_dao: confidence >= ARTIFICIAL_PATH_ESCALATION,
            ..Default::default()
        })
    }

    /// A positive-trust cycle through the address. Always escalated.
    pub fn detect_circular_trust_ring(&self, address: &Address) -> Result<ManipulationResult, StoreError> {
        let max_len = self.config.max_ring_size;
        let Some(ring) = self.find_ring(address, max_len)? else {
            return Ok(ManipulationResult::none());
        };

        let mut edges = Vec::with_capacity(ring.len());
        for (i, from) in ring.iter().enumerate() {
            let to = &ring[(i + 1) % ring.len()];
            if let Some(edge) = self.graph.get_trust_edge(from, to)? {
                edges.push(edge);
            }
        }

        let confidence =
            self.config.ring_threshold + 0.30 * (1.0 - ring.len() as f64 / max_len as f64);
        warn!(%address, members = ring.len(), confidence, "Circular trust ring detected");
        Ok(ManipulationResult {
            kind: ManipulationType::CircularTrustRing,
            confidence,
            description: format!("Circular trust ring with {} addresses", ring.len()),
            involved_addresses: ring,
            suspicious_edges: edges,
            escalate_to_dao: true,
            ..Default::default()
        })
    }

    /// Burst of incoming trust in the window ending at the newest edge.
    pub fn detect_rapid_trust_accumulation(
        &self,
        address: &Address,
    ) -> Result<ManipulationResult, StoreError> {
        let incoming = self.graph.get_incoming_trust(address)?;
        let Some(newest) = incoming.iter().map(|e| e.timestamp).max() else {
            return Ok(ManipulationResult::none());
        };
        let window = self.config.rapid_window_secs.max(1);
        let window_start = newest.saturating_sub(window);

        let recent: Vec<TrustEdge> = incoming
            .into_iter()
            .filter(|e| e.timestamp >= window_start)
            .collect();
        let total_weight: i64 = recent.iter().map(|e| e.weight as i64).sum();

        let hours = window as f64 / 3_600.0;
        let edges_per_hour = recent.len() as f64 / hours;
        let weight_per_hour = total_weight as f64 / hours;
        let edge_rate = (edges_per_hour / SUSPICIOUS_EDGES_PER_HOUR).min(1.0);
        let weight_rate = (weight_per_hour / SUSPICIOUS_WEIGHT_PER_HOUR).min(1.0);
        let confidence = edge_rate * 0.5 + weight_rate * 0.5;

        if confidence < self.config.rapid_threshold {
            return Ok(ManipulationResult::none());
        }

        warn!(%address, edges = recent.len(), total_weight, confidence, "Rapid trust accumulation detected");
        let mut involved = vec![*address];
        involved.extend(recent.iter().map(|e| e.from));
        Ok(ManipulationResult {
            kind: ManipulationType::RapidTrustAccumulation,
            confidence,
            involved_addresses: involved,
            description: format!(
                "{} edges in {} hours, total weight {}",
                recent.len(),
                window / 3_600,
                total_weight
            ),
            suspicious_edges: recent,
            escalate_to_dao: confidence >= RAPID_ESCALATION,
            ..Default::default()
        })
    }

    /// Hour buckets of endorsements from related or numerous sources.
    pub fn detect_coordinated_trust_boost(
        &self,
        address: &Address,
    ) -> Result<ManipulationResult, StoreError> {
        let incoming = self.graph.get_incoming_trust(address)?;
        if incoming.len() < self.config.min_edges_for_pattern {
            return Ok(ManipulationResult::none());
        }

        let bucket_width = self.config.coordinated_window_secs.max(1);
        let mut buckets: BTreeMap<u64, Vec<TrustEdge>> = BTreeMap::new();
        for edge in incoming {
            buckets.entry(edge.timestamp / bucket_width).or_default().push(edge);
        }

        let mut suspicious_edges = Vec::new();
        let mut sources = BTreeSet::new();
        for edges in buckets.into_values() {
            if edges.len() < BUCKET_MIN_EDGES {
                continue;
            }
            let mut matches = 0usize;
            for (i, a) in edges.iter().enumerate() {
                for b in &edges[i + 1..] {
                    if self.same_cluster(&a.from, &b.from) {
                        matches += 1;
                    }
                }
            }
            let pairs = edges.len() * (edges.len() - 1) / 2;
            let cluster_ratio = matches as f64 / pairs as f64;
            if cluster_ratio >= BUCKET_CLUSTER_RATIO || edges.len() >= BUCKET_SIZE_ALONE {
                sources.extend(edges.iter().map(|e| e.from));
                suspicious_edges.extend(edges);
            }
        }

        let confidence = (suspicious_edges.len() as f64 / 10.0).min(1.0);
        if suspicious_edges.is_empty() || confidence < self.config.coordinated_threshold {
            return Ok(ManipulationResult::none());
        }

        warn!(%address, edges = suspicious_edges.len(), sources = sources.len(), confidence, "Coordinated trust boost detected");
        let mut involved = vec![*address];
        involved.extend(sources.iter().copied());
        Ok(ManipulationResult {
            kind: ManipulationType::CoordinatedTrustBoost,
            confidence,
            involved_addresses: involved,
            description: format!(
                "{} edges from {} addresses",
                suspicious_edges.len(),
                sources.len()
            ),
            suspicious_edges,
            escalate_to_dao: confidence >= COORDINATED_ESCALATION,
            ..Default::default()
        })
    }

    /// Dense trust among the members of one wallet. Always escalated.
    pub fn detect_sybil_trust_network(&self, address: &Address) -> Result<ManipulationResult, StoreError> {
        let members = self.clusterer.get_cluster_members(address);
        if members.len() <= 1 {
            return Ok(ManipulationResult::none());
        }

        let mut intra = Vec::new();
        for member in &members {
            for edge in self.graph.get_outgoing_trust(member)? {
                if members.contains(&edge.to) {
                    intra.push(edge);
                }
            }
        }

        let n = members.len();
        let density = intra.len() as f64 / (n * (n - 1)) as f64;
        if density < SYBIL_MIN_DENSITY || intra.len() < SYBIL_MIN_EDGES {
            return Ok(ManipulationResult::none());
        }

        let confidence = (density + 0.5).min(1.0);
        warn!(%address, members = n, edges = intra.len(), density, "Sybil trust network detected");
        Ok(ManipulationResult {
            kind: ManipulationType::SybilTrustNetwork,
            confidence,
            description: format!(
                "{} addresses in cluster, {} intra-cluster edges, density {:.0}%",
                n,
                intra.len(),
                density * 100.0
            ),
            involved_addresses: members.into_iter().collect(),
            suspicious_edges: intra,
            escalate_to_dao: true,
            ..Default::default()
        })
    }

    /// Trust relayed through freshly created intermediaries.
    pub fn detect_trust_washing(&self, address: &Address) -> Result<ManipulationResult, StoreError> {
        let incoming = self.graph.get_incoming_trust(address)?;
        let mut suspicious_edges = Vec::new();
        let mut intermediaries = BTreeSet::new();

        for edge in incoming {
            let created = self
                .behavior
                .get_temporal(&edge.from)?
                .map_or(edge.timestamp, |t| t.account_creation);
            if edge.timestamp.saturating_sub(created) >= WASHING_MAX_SOURCE_AGE {
                continue;
            }
            if self.graph.get_incoming_trust(&edge.from)?.is_empty() {
                continue;
            }
            intermediaries.insert(edge.from);
            suspicious_edges.push(edge);
        }

        let confidence = (suspicious_edges.len() as f64 / 5.0).min(1.0);
        if suspicious_edges.is_empty() || confidence < self.config.washing_threshold {
            return Ok(ManipulationResult::none());
        }

        warn!(%address, intermediaries = intermediaries.len(), confidence, "Trust washing detected");
        let mut involved = vec![*address];
        involved.extend(intermediaries.iter().copied());
        Ok(ManipulationResult {
            kind: ManipulationType::TrustWashing,
            confidence,
            involved_addresses: involved,
            description: format!("{} intermediary addresses", intermediaries.len()),
            suspicious_edges,
            escalate_to_dao: confidence >= WASHING_ESCALATION,
            ..Default::default()
        })
    }

    /// Quick, equal trust swaps with otherwise inactive partners.
    pub fn detect_reciprocal_trust_abuse(
        &self,
        address: &Address,
    ) -> Result<ManipulationResult, StoreError> {
        let mut involved = vec![*address];
        let mut suspicious_edges = Vec::new();
        let mut pairs = 0usize;

        for out in self.graph.get_outgoing_trust(address)? {
            let Some(back) = self.graph.get_trust_edge(&out.to, address)? else {
                continue;
            };
            if !back.is_active() {
                continue;
            }
            let weight_close = (out.weight - back.weight).abs() <= RECIPROCAL_MAX_WEIGHT_DIFF;
            let time_close = out.timestamp.abs_diff(back.timestamp) <= RECIPROCAL_MAX_TIME_DIFF;
            if weight_close
                && time_close
                && self.activity_count(&out.to)? < RECIPROCAL_MAX_PARTNER_ACTIVITY
            {
                pairs += 1;
                involved.push(out.to);
                suspicious_edges.push(out);
                suspicious_edges.push(back);
            }
        }

        let confidence = (pairs as f64 / 3.0).min(1.0);
        if pairs == 0 || confidence < self.config.reciprocal_threshold {
            return Ok(ManipulationResult::none());
        }

        warn!(%address, pairs, confidence, "Reciprocal trust abuse detected");
        Ok(ManipulationResult {
            kind: ManipulationType::ReciprocalTrustAbuse,
            confidence,
            involved_addresses: involved,
            suspicious_edges,
            description: format!("{} suspicious reciprocal pairs", pairs),
            escalate_to_dao: confidence >= RECIPROCAL_ESCALATION,
            ..Default::default()
        })
    }

    /// Quick screen of one new edge.
    pub fn analyze_trust_edge(&self, edge: &TrustEdge) -> Result<ManipulationResult, StoreError> {
        let endpoints = vec![edge.from, edge.to];

        if self.flags.is_flagged(&edge.from)? || self.flags.is_flagged(&edge.to)? {
            return Ok(ManipulationResult {
                kind: ManipulationType::SybilTrustNetwork,
                confidence: 0.80,
                involved_addresses: endpoints,
                suspicious_edges: vec![edge.clone()],
                description: "Trust edge involves flagged address".to_string(),
                escalate_to_dao: true,
                ..Default::default()
            });
        }

        if self.same_cluster(&edge.from, &edge.to) {
            return Ok(ManipulationResult {
                kind: ManipulationType::SybilTrustNetwork,
                confidence: 0.95,
                involved_addresses: endpoints,
                suspicious_edges: vec![edge.clone()],
                description: "Trust edge inside one wallet cluster".to_string(),
                escalate_to_dao: true,
                ..Default::default()
            });
        }

        if let Some(back) = self.graph.get_trust_edge(&edge.to, &edge.from)? {
            let weight_close = (edge.weight - back.weight).abs() <= EDGE_RECIPROCAL_MAX_WEIGHT_DIFF;
            let time_close = edge.timestamp.abs_diff(back.timestamp) <= RECIPROCAL_MAX_TIME_DIFF;
            if back.is_active() && weight_close && time_close {
                return Ok(ManipulationResult {
                    kind: ManipulationType::ReciprocalTrustAbuse,
                    confidence: 0.75,
                    involved_addresses: endpoints,
                    suspicious_edges: vec![edge.clone(), back],
                    description: "Reciprocal trust with similar weight and timing".to_string(),
                    ..Default::default()
                });
            }
        }

        Ok(ManipulationResult::none())
    }

    /// Run every structural detector and keep the strongest finding.
    pub fn analyze_address(&self, address: &Address, now: u64) -> Result<ManipulationResult, StoreError> {
        let result = ManipulationResult::strongest([
            self.detect_artificial_path_creation(address, now)?,
            self.detect_circular_trust_ring(address)?,
            self.detect_rapid_trust_accumulation(address)?,
            self.detect_coordinated_trust_boost(address)?,
            self.detect_sybil_trust_network(address)?,
            self.detect_trust_washing(address)?,
            self.detect_reciprocal_trust_abuse(address)?,
        ]);
        debug!(%address, kind = %result.kind, confidence = result.confidence, "Analyzed address");
        Ok(result)
    }

    /// 100 for a clean address, reduced by the strongest finding and by an
    /// existing flag.
    pub fn calculate_trust_health_score(&self, address: &Address, now: u64) -> Result<u8, StoreError> {
        let mut score = 100i32;
        let result = self.analyze_address(address, now)?;
        if result.is_detected() {
            score -= (result.confidence * 50.0) as i32;
            score -= result.kind.severity_penalty();
        }
        if self.flags.is_flagged(address)? {
            score -= 20;
        }
        Ok(score.clamp(0, 100) as u8)
    }
}
