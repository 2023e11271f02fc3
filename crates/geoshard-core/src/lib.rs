//! Geoshard Core - sharded geo-bbox ingestion and hotspot summarization
//!
//! This library provides the core functionality for ingesting geo-referenced
//! bounding-box records into a sharded relational layout with:
//!
//! - One physical partition table per group key, with a unified logical view
//! - Resumable batch writes via a durable per-item progress ledger
//! - Per-step failure classification (fetch / transform / insert)
//! - Two-phase (inspect/run) hotspot extraction under a top-N or
//!   top-percent selection policy

pub mod config;
pub mod error;
pub mod hotspot;
pub mod ledger;
pub mod manifest;
pub mod partition;
pub mod pipeline;
pub mod record;
pub mod store;
pub mod writer;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
pub use error::{LedgerError, PartitionError, StoreError};
