// Copyright (c) 2025 Cascoin Trust Developers

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::types::{Amount, COIN};

/// Main configuration for the trust engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub trust_graph: WotConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// LMDB map size in megabytes
    #[serde(default = "default_map_size_mb")]
    pub map_size_mb: usize,

    /// Keep everything in memory (nothing survives restart)
    #[serde(default)]
    pub in_memory: bool,
}

fn default_map_size_mb() -> usize {
    1024
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            map_size_mb: default_map_size_mb(),
            in_memory: false,
        }
    }
}

impl StorageConfig {
    pub fn map_size_bytes(&self) -> usize {
        self.map_size_mb.saturating_mul(1024 * 1024)
    }
}

/// Web-of-trust parameters. These are protocol constants on a live network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WotConfig {
    /// Bond every edge or vote must carry regardless of weight
    #[serde(default = "default_min_bond")]
    pub min_bond: Amount,

    /// Additional bond per point of absolute weight
    #[serde(default = "default_bond_per_point")]
    pub bond_per_point: Amount,

    /// Hop limit for weighted reputation walks
    #[serde(default = "default_max_trust_path_depth")]
    pub max_trust_path_depth: usize,

    /// DAO votes that settle a dispute
    #[serde(default = "default_min_dao_votes")]
    pub min_dao_votes: usize,

    /// DAO stake that settles a dispute
    #[serde(default = "default_min_dao_stake")]
    pub min_dao_stake: Amount,

    /// Seconds after which an unsettled dispute expires
    #[serde(default = "default_dispute_timeout_secs")]
    pub dispute_timeout_secs: u64,

    /// Edges lighter than this are not followed when searching paths
    #[serde(default = "default_min_path_edge_weight")]
    pub min_path_edge_weight: i16,
}

fn default_min_bond() -> Amount {
    COIN
}

fn default_bond_per_point() -> Amount {
    COIN / 100
}

fn default_max_trust_path_depth() -> usize {
    3
}

fn default_min_dao_votes() -> usize {
    5
}

fn default_min_dao_stake() -> Amount {
    5 * COIN
}

fn default_dispute_timeout_secs() -> u64 {
    86_400
}

fn default_min_path_edge_weight() -> i16 {
    10
}

impl Default for WotConfig {
    fn default() -> Self {
        Self {
            min_bond: default_min_bond(),
            bond_per_point: default_bond_per_point(),
            max_trust_path_depth: default_max_trust_path_depth(),
            min_dao_votes: default_min_dao_votes(),
            min_dao_stake: default_min_dao_stake(),
            dispute_timeout_secs: default_dispute_timeout_secs(),
            min_path_edge_weight: default_min_path_edge_weight(),
        }
    }
}

impl WotConfig {
    /// Bond required for an edge or vote of the given weight.
    pub fn required_bond(&self, weight: i16) -> Amount {
        self.min_bond
            .saturating_add(self.bond_per_point.saturating_mul(weight.unsigned_abs() as Amount))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    #[serde(default)]
    pub votes: VoteDetectorConfig,
    #[serde(default)]
    pub graph: GraphDetectorConfig,
}

/// Thresholds for validator-vote and reputation-history analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteDetectorConfig {
    /// Share of votes on one side that counts as coordinated
    #[serde(default = "default_coordinated_ratio")]
    pub coordinated_ratio: f64,

    /// Votes needed on a transaction before it is analyzed
    #[serde(default = "default_min_votes_for_analysis")]
    pub min_votes_for_analysis: usize,

    #[serde(default = "default_coordinated_escalation")]
    pub coordinated_escalation: f64,

    /// Votes closer than this are treated as simultaneous
    #[serde(default = "default_timing_window_ms")]
    pub timing_window_ms: u64,

    #[serde(default = "default_timing_min_cluster")]
    pub timing_min_cluster: usize,

    #[serde(default = "default_timing_flag_ratio")]
    pub timing_flag_ratio: f64,

    #[serde(default = "default_timing_escalation_ratio")]
    pub timing_escalation_ratio: f64,

    /// Score points per 1000 blocks that count as a spike
    #[serde(default = "default_spike_threshold")]
    pub spike_threshold: f64,

    #[serde(default = "default_spike_window_blocks")]
    pub spike_window_blocks: u64,

    /// Agreement rate between two validators that counts as collusion
    #[serde(default = "default_collusion_threshold")]
    pub collusion_threshold: f64,

    #[serde(default = "default_collusion_min_common")]
    pub collusion_min_common: usize,

    /// Transactions whose validator votes are kept in memory
    #[serde(default = "default_max_tracked_txs")]
    pub max_tracked_txs: usize,

    /// Score movements older than this many blocks behind the newest are dropped
    #[serde(default = "default_history_retention_blocks")]
    pub history_retention_blocks: u64,
}

fn default_coordinated_ratio() -> f64 {
    0.70
}

fn default_min_votes_for_analysis() -> usize {
    5
}

fn default_coordinated_escalation() -> f64 {
    0.95
}

fn default_timing_window_ms() -> u64 {
    500
}

fn default_timing_min_cluster() -> usize {
    2
}

fn default_timing_flag_ratio() -> f64 {
    0.5
}

fn default_timing_escalation_ratio() -> f64 {
    0.75
}

fn default_spike_threshold() -> f64 {
    20.0
}

fn default_spike_window_blocks() -> u64 {
    1000
}

fn default_collusion_threshold() -> f64 {
    0.95
}

fn default_collusion_min_common() -> usize {
    5
}

fn default_max_tracked_txs() -> usize {
    10_000
}

fn default_history_retention_blocks() -> u64 {
    10_000
}

impl Default for VoteDetectorConfig {
    fn default() -> Self {
        Self {
            coordinated_ratio: default_coordinated_ratio(),
            min_votes_for_analysis: default_min_votes_for_analysis(),
            coordinated_escalation: default_coordinated_escalation(),
            timing_window_ms: default_timing_window_ms(),
            timing_min_cluster: default_timing_min_cluster(),
            timing_flag_ratio: default_timing_flag_ratio(),
            timing_escalation_ratio: default_timing_escalation_ratio(),
            spike_threshold: default_spike_threshold(),
            spike_window_blocks: default_spike_window_blocks(),
            collusion_threshold: default_collusion_threshold(),
            collusion_min_common: default_collusion_min_common(),
            max_tracked_txs: default_max_tracked_txs(),
            history_retention_blocks: default_history_retention_blocks(),
        }
    }
}

/// Thresholds for structural trust-graph analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDetectorConfig {
    #[serde(default = "default_ring_threshold")]
    pub ring_threshold: f64,

    #[serde(default = "default_rapid_threshold")]
    pub rapid_threshold: f64,

    #[serde(default = "default_coordinated_threshold")]
    pub coordinated_threshold: f64,

    #[serde(default = "default_washing_threshold")]
    pub washing_threshold: f64,

    #[serde(default = "default_reciprocal_threshold")]
    pub reciprocal_threshold: f64,

    /// Lookback for rapid accumulation, in seconds
    #[serde(default = "default_rapid_window_secs")]
    pub rapid_window_secs: u64,

    /// Bucket width for coordinated boosts, in seconds
    #[serde(default = "default_coordinated_window_secs")]
    pub coordinated_window_secs: u64,

    /// Incoming edges needed before pattern analysis runs
    #[serde(default = "default_min_edges_for_pattern")]
    pub min_edges_for_pattern: usize,

    #[serde(default = "default_max_ring_size")]
    pub max_ring_size: usize,

    /// Combined confidence at which an address is flagged
    #[serde(default = "default_flag_threshold")]
    pub flag_threshold: f64,
}

fn default_ring_threshold() -> f64 {
    0.70
}

fn default_rapid_threshold() -> f64 {
    0.80
}

fn default_coordinated_threshold() -> f64 {
    0.75
}

fn default_washing_threshold() -> f64 {
    0.70
}

fn default_reciprocal_threshold() -> f64 {
    0.65
}

fn default_rapid_window_secs() -> u64 {
    86_400
}

fn default_coordinated_window_secs() -> u64 {
    3_600
}

fn default_min_edges_for_pattern() -> usize {
    3
}

fn default_max_ring_size() -> usize {
    10
}

fn default_flag_threshold() -> f64 {
    0.70
}

impl Default for GraphDetectorConfig {
    fn default() -> Self {
        Self {
            ring_threshold: default_ring_threshold(),
            rapid_threshold: default_rapid_threshold(),
            coordinated_threshold: default_coordinated_threshold(),
            washing_threshold: default_washing_threshold(),
            reciprocal_threshold: default_reciprocal_threshold(),
            rapid_window_secs: default_rapid_window_secs(),
            coordinated_window_secs: default_coordinated_window_secs(),
            min_edges_for_pattern: default_min_edges_for_pattern(),
            max_ring_size: default_max_ring_size(),
            flag_threshold: default_flag_threshold(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default level when RUST_LOG is unset (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load config from a file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load config from a file, falling back to defaults if it does not exist
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if Self::exists(path) {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, contents)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;

        Ok(())
    }

    /// Check if config file exists
    pub fn exists(path: &Path) -> bool {
        path.exists()
    }
}

/// Get the default data directory path
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".cascoin-trust")
}

/// Get the default config file path
pub fn default_config_path() -> PathBuf {
    default_data_dir().join("config.toml")
}

/// Get the trust database path from config file path
pub fn trust_db_path_from_config(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .unwrap_or(config_path)
        .join("trustdb")
}
