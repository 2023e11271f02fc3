//! Pipeline orchestration.
//!
//! Integrates the components for manifest-to-store ingestion:
//! - Record source with per-item fetch failure classification
//! - Batch writer with per-partition transactional commits
//! - Progress ledger for resumable retry-failed-only runs
//! - Optional overlap analysis phase with per-partition error scoping

mod analyzer;
mod controller;

pub use analyzer::OverlapAnalyzer;
pub use controller::{AnalysisStats, PipelineController, RunOptions, RunState, RunStats};
