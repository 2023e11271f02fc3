//! Durable per-item progress tracking.
//!
//! The ledger is the pipeline's resumability primitive:
//! - one outcome entry per processed item, appended as JSONL
//! - keyed upsert semantics on read (latest entry per item wins)
//! - failure counts aggregated by pipeline step
//! - single-writer lock per working directory

mod entries;
mod log;

pub use entries::{FailureStep, LedgerEntry, Outcome};
pub use log::{LedgerStats, ProgressLedger};
