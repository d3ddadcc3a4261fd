//! SentinelChain - a tamper-evident hash chain for security threat events
//!
//! # Architecture
//!
//! ## Core Chain
//! - [`blockchain`] - Blocks, the append-only chain and its verification
//! - [`crypto`] - Canonical serialization and SHA-256 digests
//!
//! ## Ingestion
//! - [`threat`] - Threat submissions and their normalized payloads
//!
//! ## Storage
//! - [`persistence`] - Storage backends (in-memory, JSON file, SQLite)
//!
//! ## Integration
//! - [`api`] - HTTP API
//! - [`node`] - Process bootstrap
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Core Chain
// ============================================================================
pub mod blockchain;
pub mod crypto;

// ============================================================================
// Ingestion
// ============================================================================
pub mod threat;

// ============================================================================
// Storage
// ============================================================================
pub mod persistence;

// ============================================================================
// Integration
// ============================================================================
#[cfg(feature = "api")]
pub mod api;
pub mod node;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;
