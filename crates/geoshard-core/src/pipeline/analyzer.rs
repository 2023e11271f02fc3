//! Seam for the external overlap computation.

use crate::Result;
use async_trait::async_trait;

/// External capability that computes pairwise spatial overlap for one
/// partition and appends ranked candidate rows to the shared
/// overlap-results table.
///
/// Invoked per partition during the optional Analyzing phase; a failure is
/// scoped to its partition and never aborts the run.
#[async_trait]
pub trait OverlapAnalyzer: Send + Sync {
    /// Analyze one partition, returning the number of candidate rows
    /// produced.
    async fn analyze_partition(&self, partition: &str) -> Result<u64>;
}
