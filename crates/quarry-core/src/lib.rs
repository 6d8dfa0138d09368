//! Core types and shared utilities for the quarry ingestion pipeline.
//!
//! This crate provides:
//! - The [`Record`] field bag passed between pipeline nodes
//! - `%(field)s` interpolation, compound extension splitting and rename rules
//! - Staging branch names used by the ingestion workflow
//! - Prometheus metrics helpers
//! - Shared error types

mod error;
pub mod metrics;
mod record;
mod strings;

// ═══════════════════════════════════════════════════════════════════════════
// Staging branches
// ═══════════════════════════════════════════════════════════════════════════

/// Branch receiving raw captured content.
pub const BRANCH_INCOMING: &str = "incoming";

/// Branch holding content after archive extraction and normalization.
pub const BRANCH_INCOMING_PROCESSED: &str = "incoming-processed";

/// Externally visible publication branch.
pub const BRANCH_MASTER: &str = "master";

pub use error::{Error, Result};
pub use record::{Record, Value};
pub use strings::{interpolate, parse_rename_rules, split_ext};
