//! Storage backend capability trait.
//!
//! Abstracts the relational store behind the operations the pipeline needs
//! (table creation, transactional batch insert, catalog introspection, view
//! creation, read queries) so alternate backends can be substituted without
//! touching pipeline logic.

use crate::record::BboxRecord;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// One candidate hotspot row from the shared overlap-results table.
///
/// Populated externally, one row per candidate per group/analysis run. The
/// rank is assigned by the external overlap computation and is monotonically
/// meaningful only within one (group, analysis run) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlapRow {
    /// Opaque group/analysis identifier assigned by the overlap computation
    pub analysis_key: String,
    /// Serialized key/value analysis parameters (group key, grid coordinates,
    /// filters)
    pub params: String,
    /// Overlap magnitude
    pub overlap_area: f64,
    /// Number of participating subgroups
    pub subgroup_count: i64,
    /// Number of participating scenes
    pub scene_count: i64,
    /// Hotspot geometry in WKT form
    pub geometry_wkt: String,
    /// Rank within the group, ascending (1 = strongest)
    pub rank: i64,
    /// Analysis timestamp
    pub analysed_at: DateTime<Utc>,
}

/// One materialized hotspot summary row.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    /// Owning group key
    pub group_key: String,
    /// Overlap magnitude
    pub overlap_area: f64,
    /// Number of participating subgroups
    pub subgroup_count: i64,
    /// Number of participating scenes
    pub scene_count: i64,
    /// Hotspot geometry in WKT form
    pub geometry_wkt: String,
    /// Grid x position extracted from the analysis parameters
    pub grid_x: i64,
    /// Grid y position extracted from the analysis parameters
    pub grid_y: i64,
    /// Rank within the group
    pub rank: i64,
    /// Analysis timestamp
    pub analysed_at: DateTime<Utc>,
}

/// One row read back through the unified view.
#[derive(Debug, Clone)]
pub struct ViewRow {
    /// The record as stored in its partition
    pub record: BboxRecord,
    /// Name of the partition the row came from
    pub source_partition: String,
}

/// Capability interface over the relational store.
///
/// Implementations must be safe to share across tasks; per-partition write
/// paths are never driven concurrently for the same partition.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Create a bbox partition table if it does not exist. Idempotent.
    async fn create_record_table(&self, table: &str) -> Result<()>;

    /// Check whether a table exists.
    async fn table_exists(&self, table: &str) -> Result<bool>;

    /// Insert records into one partition table within a single transaction:
    /// either every record is persisted or none are.
    async fn insert_records(&self, table: &str, records: &[BboxRecord]) -> Result<u64>;

    /// Count rows in a table.
    async fn count_rows(&self, table: &str) -> Result<u64>;

    /// List tables whose names start with `prefix`, sorted ascending.
    ///
    /// Introspects the store catalog at call time so newly created
    /// partitions are discovered without restart.
    async fn list_tables(&self, prefix: &str) -> Result<Vec<String>>;

    /// Create or replace the unified view over the given partitions, adding
    /// a literal source-partition column per branch.
    async fn create_or_replace_view(&self, view: &str, partitions: &[String]) -> Result<()>;

    /// Read all rows exposed by the unified view.
    async fn fetch_view_rows(&self, view: &str) -> Result<Vec<ViewRow>>;

    /// Drop a table. Administrative operation; partitions are never dropped
    /// implicitly.
    async fn drop_table(&self, table: &str) -> Result<()>;

    /// Read every row of the shared overlap-results table.
    async fn fetch_overlap_rows(&self, table: &str) -> Result<Vec<OverlapRow>>;

    /// Drop and recreate the hotspot summary output table, discarding any
    /// prior contents.
    async fn init_summary_table(&self, table: &str) -> Result<()>;

    /// Append summary rows for one group to the output table.
    async fn insert_summary_rows(&self, table: &str, rows: &[SummaryRow]) -> Result<u64>;

    /// Release the underlying connections gracefully.
    async fn close(&self) -> Result<()>;
}
