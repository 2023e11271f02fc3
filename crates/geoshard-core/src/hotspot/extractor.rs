//! Two-phase hotspot summary extraction.
//!
//! `inspect` is a read-only dry run that discovers candidate groups and
//! predicts the output row count; `run` materializes the top-ranked rows per
//! group into the output table. Both phases share one selection-count
//! function, so the estimate and the materialized count cannot diverge.

use super::params::{grid_position, group_key, parse_params};
use crate::store::{OverlapRow, StoreBackend, SummaryRow};
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Row selection policy, exactly one of top-N or top-percent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SelectionPolicy {
    /// First N ranks per group
    TopN(u64),
    /// Top percentage of ranks per group, at least one row for a non-empty
    /// group
    TopPercent(f64),
}

/// Validated extraction configuration.
///
/// Construction fails before any store access when the output table is
/// empty or the policy values are out of range.
#[derive(Debug, Clone)]
pub struct HotspotConfig {
    output_table: String,
    policy: SelectionPolicy,
}

impl HotspotConfig {
    /// Select the first `n` ranks per group.
    pub fn top_n(output_table: impl Into<String>, n: u64) -> Result<Self> {
        if n == 0 {
            return Err(Error::Config("top_n must be positive".into()));
        }
        Self::build(output_table.into(), SelectionPolicy::TopN(n))
    }

    /// Select the top `percent` of ranks per group.
    pub fn top_percent(output_table: impl Into<String>, percent: f64) -> Result<Self> {
        if !percent.is_finite() || percent <= 0.0 || percent > 100.0 {
            return Err(Error::Config(format!(
                "top_percent must be in (0, 100], got {percent}"
            )));
        }
        Self::build(output_table.into(), SelectionPolicy::TopPercent(percent))
    }

    /// Build a config from optional CLI-style inputs; exactly one of the two
    /// selectors must be present.
    pub fn from_options(
        output_table: impl Into<String>,
        top_n: Option<u64>,
        top_percent: Option<f64>,
    ) -> Result<Self> {
        match (top_n, top_percent) {
            (Some(n), None) => Self::top_n(output_table, n),
            (None, Some(p)) => Self::top_percent(output_table, p),
            (Some(_), Some(_)) => Err(Error::Config(
                "top_n and top_percent are mutually exclusive".into(),
            )),
            (None, None) => Err(Error::Config(
                "one of top_n or top_percent is required".into(),
            )),
        }
    }

    fn build(output_table: String, policy: SelectionPolicy) -> Result<Self> {
        if output_table.trim().is_empty() {
            return Err(Error::Config("Output table name is required".into()));
        }
        Ok(Self {
            output_table,
            policy,
        })
    }

    /// Output table name.
    pub fn output_table(&self) -> &str {
        &self.output_table
    }

    /// Active selection policy.
    pub fn policy(&self) -> SelectionPolicy {
        self.policy
    }
}

/// Rows the policy selects out of a group with `rows` candidates.
pub fn selection_count(policy: SelectionPolicy, rows: usize) -> usize {
    match policy {
        SelectionPolicy::TopN(n) => rows.min(n as usize),
        SelectionPolicy::TopPercent(percent) => {
            if rows == 0 {
                0
            } else {
                let count = ((rows as f64) * percent / 100.0).ceil() as usize;
                count.max(1)
            }
        }
    }
}

/// Result of the read-only inspect phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inspection {
    /// Discovered groups, ordered
    pub candidate_groups: Vec<String>,
    /// Rows `run` would extract across all groups
    pub expected_rows: u64,
    /// Overlap rows whose payload carried no usable group key
    pub skipped_rows: u64,
}

/// One failed group with its error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupFailure {
    /// Group key
    pub group: String,
    /// Failure description
    pub message: String,
}

/// Result of the materializing run phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionResult {
    /// Groups whose summary rows were written
    pub successful_groups: Vec<String>,
    /// Groups that failed, with reasons
    pub failed_groups: Vec<GroupFailure>,
    /// Total rows written to the output table
    pub extracted_rows: u64,
}

/// Extracts ranked hotspot summaries from the shared overlap-results table.
pub struct HotspotExtractor {
    store: Arc<dyn StoreBackend>,
    results_table: String,
}

impl HotspotExtractor {
    /// Create an extractor reading from `results_table`.
    pub fn new(store: Arc<dyn StoreBackend>, results_table: impl Into<String>) -> Self {
        Self {
            store,
            results_table: results_table.into(),
        }
    }

    /// Dry run: discover groups and predict the output row count without
    /// writing anything.
    pub async fn inspect(&self, config: &HotspotConfig) -> Result<Inspection> {
        let rows = self.store.fetch_overlap_rows(&self.results_table).await?;
        let (groups, skipped_rows) = group_rows(rows);

        let expected_rows: u64 = groups
            .values()
            .map(|rows| selection_count(config.policy(), rows.len()) as u64)
            .sum();

        let inspection = Inspection {
            candidate_groups: groups.keys().cloned().collect(),
            expected_rows,
            skipped_rows,
        };
        debug!(
            groups = inspection.candidate_groups.len(),
            expected_rows = inspection.expected_rows,
            skipped = inspection.skipped_rows,
            "Inspection complete"
        );
        Ok(inspection)
    }

    /// Materialize the top-ranked rows per group into the output table,
    /// replacing any prior contents.
    ///
    /// Per-group failures are collected; one group never aborts the others.
    pub async fn run(&self, config: &HotspotConfig) -> Result<ExtractionResult> {
        let rows = self.store.fetch_overlap_rows(&self.results_table).await?;
        let (groups, skipped_rows) = group_rows(rows);
        if skipped_rows > 0 {
            warn!(skipped_rows, "Overlap rows without a usable group key were ignored");
        }

        self.store.init_summary_table(config.output_table()).await?;

        let mut result = ExtractionResult::default();
        for (group, group_rows) in groups {
            match self.extract_group(config, &group, group_rows).await {
                Ok(written) => {
                    result.extracted_rows += written;
                    result.successful_groups.push(group);
                }
                Err(e) => {
                    warn!(group = %group, error = %e, "Group extraction failed");
                    result.failed_groups.push(GroupFailure {
                        group,
                        message: e.to_string(),
                    });
                }
            }
        }

        info!(
            groups = result.successful_groups.len(),
            failed = result.failed_groups.len(),
            rows = result.extracted_rows,
            output = config.output_table(),
            "Hotspot extraction finished"
        );
        Ok(result)
    }

    async fn extract_group(
        &self,
        config: &HotspotConfig,
        group: &str,
        mut rows: Vec<OverlapRow>,
    ) -> Result<u64> {
        rows.sort_by_key(|row| row.rank);
        let take = selection_count(config.policy(), rows.len());

        let summaries: Vec<SummaryRow> = rows
            .into_iter()
            .take(take)
            .map(|row| {
                let params = parse_params(&row.params);
                let (grid_x, grid_y) = grid_position(&params).ok_or_else(|| {
                    Error::Serialization(format!(
                        "group {group}: rank {} carries no grid position",
                        row.rank
                    ))
                })?;
                Ok(SummaryRow {
                    group_key: group.to_string(),
                    overlap_area: row.overlap_area,
                    subgroup_count: row.subgroup_count,
                    scene_count: row.scene_count,
                    geometry_wkt: row.geometry_wkt,
                    grid_x,
                    grid_y,
                    rank: row.rank,
                    analysed_at: row.analysed_at,
                })
            })
            .collect::<Result<_>>()?;

        self.store
            .insert_summary_rows(config.output_table(), &summaries)
            .await
    }
}

/// Group overlap rows by the group key embedded in their payloads.
///
/// Rows without a usable group key are counted, not failed.
fn group_rows(rows: Vec<OverlapRow>) -> (BTreeMap<String, Vec<OverlapRow>>, u64) {
    let mut groups: BTreeMap<String, Vec<OverlapRow>> = BTreeMap::new();
    let mut skipped = 0u64;
    for row in rows {
        let params = parse_params(&row.params);
        match group_key(&params) {
            Some(group) => groups.entry(group.to_string()).or_default().push(row),
            None => skipped += 1,
        }
    }
    (groups, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::Utc;

    const RESULTS: &str = "bbox_overlap_results";

    fn overlap(group: &str, rank: i64) -> OverlapRow {
        OverlapRow {
            analysis_key: format!("run-{group}"),
            params: format!(r#"{{"region":"{group}","grid_x":{rank},"grid_y":7}}"#),
            overlap_area: 100.0 / rank as f64,
            subgroup_count: 3,
            scene_count: 12,
            geometry_wkt: "POLYGON((0 0,1 0,1 1,0 1,0 0))".to_string(),
            rank,
            analysed_at: Utc::now(),
        }
    }

    fn extractor_with(rows: Vec<OverlapRow>) -> (Arc<MemoryStore>, HotspotExtractor) {
        let store = Arc::new(MemoryStore::new());
        store.seed_overlap_rows(RESULTS, rows);
        let extractor = HotspotExtractor::new(store.clone(), RESULTS);
        (store, extractor)
    }

    #[test]
    fn test_config_requires_exactly_one_selector() {
        assert!(HotspotConfig::from_options("out", Some(3), None).is_ok());
        assert!(HotspotConfig::from_options("out", None, Some(25.0)).is_ok());
        assert!(HotspotConfig::from_options("out", Some(3), Some(25.0)).is_err());
        assert!(HotspotConfig::from_options("out", None, None).is_err());
    }

    #[test]
    fn test_config_rejects_out_of_range_values() {
        assert!(HotspotConfig::top_n("out", 0).is_err());
        assert!(HotspotConfig::top_percent("out", 0.0).is_err());
        assert!(HotspotConfig::top_percent("out", -5.0).is_err());
        assert!(HotspotConfig::top_percent("out", 150.0).is_err());
        assert!(HotspotConfig::top_percent("out", f64::NAN).is_err());
        assert!(HotspotConfig::top_n("", 3).is_err());
        assert!(HotspotConfig::top_n("   ", 3).is_err());
    }

    #[test]
    fn test_selection_count_arithmetic() {
        use SelectionPolicy::*;
        assert_eq!(selection_count(TopN(3), 10), 3);
        assert_eq!(selection_count(TopN(3), 2), 2);
        assert_eq!(selection_count(TopPercent(50.0), 2), 1);
        assert_eq!(selection_count(TopPercent(50.0), 1), 1);
        assert_eq!(selection_count(TopPercent(25.0), 10), 3); // ceil(2.5)
        assert_eq!(selection_count(TopPercent(1.0), 5), 1); // floor of one row
        assert_eq!(selection_count(TopPercent(100.0), 7), 7);
        assert_eq!(selection_count(TopPercent(50.0), 0), 0);
    }

    #[tokio::test]
    async fn test_inspect_is_read_only() {
        let (store, extractor) = extractor_with(vec![overlap("A001", 1), overlap("B009", 1)]);
        let config = HotspotConfig::top_n("hotspots", 1).unwrap();

        let inspection = extractor.inspect(&config).await.unwrap();
        assert_eq!(inspection.candidate_groups, vec!["A001", "B009"]);
        assert_eq!(inspection.expected_rows, 2);

        // No output table was created by inspect.
        assert!(!store.table_exists("hotspots").await.unwrap());
    }

    #[tokio::test]
    async fn test_run_selects_by_ascending_rank() {
        let (store, extractor) =
            extractor_with(vec![overlap("A001", 3), overlap("A001", 1), overlap("A001", 2)]);
        let config = HotspotConfig::top_n("hotspots", 2).unwrap();

        let result = extractor.run(&config).await.unwrap();
        assert_eq!(result.extracted_rows, 2);

        let rows = store.summary_rows("hotspots");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].rank, 1);
        assert_eq!(rows[1].rank, 2);
        assert_eq!(rows[0].grid_y, 7);
    }

    #[tokio::test]
    async fn test_group_failure_does_not_abort_others() {
        let mut corrupt = overlap("B009", 1);
        corrupt.params = r#"{"region":"B009"}"#.to_string(); // no grid position
        let (store, extractor) = extractor_with(vec![overlap("A001", 1), corrupt]);
        let config = HotspotConfig::top_n("hotspots", 1).unwrap();

        let result = extractor.run(&config).await.unwrap();
        assert_eq!(result.successful_groups, vec!["A001"]);
        assert_eq!(result.failed_groups.len(), 1);
        assert_eq!(result.failed_groups[0].group, "B009");
        assert_eq!(result.extracted_rows, 1);
        assert_eq!(store.summary_rows("hotspots").len(), 1);
    }

    #[tokio::test]
    async fn test_run_replaces_prior_contents() {
        let (store, extractor) = extractor_with(vec![overlap("A001", 1)]);
        let config = HotspotConfig::top_n("hotspots", 5).unwrap();

        extractor.run(&config).await.unwrap();
        extractor.run(&config).await.unwrap();
        assert_eq!(store.summary_rows("hotspots").len(), 1);
    }

    #[tokio::test]
    async fn test_unparsable_payload_rows_are_skipped_not_fatal() {
        let mut garbage = overlap("A001", 2);
        garbage.params = "{broken".to_string();
        let (_store, extractor) = extractor_with(vec![overlap("A001", 1), garbage]);
        let config = HotspotConfig::top_percent("hotspots", 100.0).unwrap();

        let inspection = extractor.inspect(&config).await.unwrap();
        assert_eq!(inspection.candidate_groups, vec!["A001"]);
        assert_eq!(inspection.expected_rows, 1);
        assert_eq!(inspection.skipped_rows, 1);

        let result = extractor.run(&config).await.unwrap();
        assert_eq!(result.extracted_rows, 1);
        assert!(result.failed_groups.is_empty());
    }
}
