// Copyright (c) 2025 Cascoin Trust Developers

//! Cascoin trust engine library.
//!
//! Bonded web-of-trust graph, wallet clustering, the SecureHAT trust score
//! and the manipulation detectors that guard it. Everything a node needs to
//! agree on per-address trust lives here; the node wires it up through
//! [`context::TrustContext`].

#![deny(clippy::print_stdout)]

pub mod behavior;
pub mod cluster;
pub mod config;
pub mod context;
pub mod detector;
pub mod error;
pub mod flags;
pub mod graph;
pub mod graph_analysis;
pub mod ops;
pub mod query;
pub mod reputation;
pub mod securehat;
pub mod store;
pub mod telemetry;
pub mod types;

// Re-export commands module for CLI binary
pub mod commands;
