//! Pipeline run orchestration.
//!
//! Drives manifest consumption through batching, writing, and the optional
//! overlap analysis phase. The controller owns the store handle for the
//! run's lifetime and releases it on every exit path. Cancellation is
//! observed between batches only: the in-flight batch always finishes
//! committing, so no partial batch is ever left half-committed.

use super::analyzer::OverlapAnalyzer;
use crate::ledger::{FailureStep, LedgerStats, Outcome, ProgressLedger};
use crate::manifest::{self, ManifestItem, RecordSource};
use crate::partition::{ensure_unified_view, list_partitions};
use crate::store::StoreBackend;
use crate::writer::{BatchWriter, WriterOptions};
use crate::Result;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Options for one pipeline run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Records per batch
    pub batch_size: usize,
    /// Process only items previously marked failed in the ledger
    pub retry_failed_only: bool,
    /// Rebuild this unified view after writing
    pub maintain_view: Option<String>,
    /// Worker count for per-partition parallelism
    pub workers: usize,
    /// Working directory holding the progress ledger
    pub workdir: PathBuf,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            retry_failed_only: false,
            maintain_view: None,
            workers: 1,
            workdir: PathBuf::from("./geoshard_work"),
        }
    }
}

/// Pipeline run lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Not started
    Idle,
    /// Reading the manifest
    Loading,
    /// Assembling the next batch
    Batching,
    /// Committing batches
    Writing,
    /// Running overlap analysis per partition
    Analyzing,
    /// Compacting the ledger and reporting
    Finalizing,
    /// All batches processed
    Completed,
    /// Cancellation observed between batches
    Interrupted,
    /// Fatal error
    Failed,
}

/// Per-partition overlap analysis outcome.
#[derive(Debug, Clone, Default)]
pub struct AnalysisStats {
    /// Partitions analyzed successfully
    pub analyzed_partitions: u64,
    /// Candidate rows produced across partitions
    pub candidate_rows: u64,
    /// Failed partitions with their error messages
    pub failed_partitions: BTreeMap<String, String>,
}

/// Final statistics for one pipeline run.
#[derive(Debug, Clone)]
pub struct RunStats {
    /// Run identifier
    pub run_id: Uuid,
    /// Items loaded from the manifest (after retry filtering)
    pub total_loaded: u64,
    /// Items processed (fetched and handed to the writer)
    pub processed: u64,
    /// Records persisted
    pub inserted: u64,
    /// Items that failed fetch, transform, or insert
    pub failed: u64,
    /// Batches fully committed
    pub completed_batches: u64,
    /// Whether cancellation ended the run early
    pub interrupted: bool,
    /// Final lifecycle state
    pub state: RunState,
    /// Ledger statistics at finalization
    pub ledger: LedgerStats,
    /// Overlap analysis statistics, when the phase ran
    pub analysis: Option<AnalysisStats>,
}

/// Orchestrates manifest consumption, batching, writes, and analysis.
pub struct PipelineController {
    store: Arc<dyn StoreBackend>,
    source: Arc<dyn RecordSource>,
    analyzer: Option<Arc<dyn OverlapAnalyzer>>,
    options: RunOptions,
    shutdown_tx: broadcast::Sender<()>,
}

impl PipelineController {
    /// Create a controller over the given store and record source.
    pub fn new(
        store: Arc<dyn StoreBackend>,
        source: Arc<dyn RecordSource>,
        options: RunOptions,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            store,
            source,
            analyzer: None,
            options,
            shutdown_tx,
        }
    }

    /// Attach the external overlap analyzer, enabling the Analyzing phase.
    pub fn with_analyzer(mut self, analyzer: Arc<dyn OverlapAnalyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    /// Get the shutdown signal sender.
    ///
    /// Sending on it requests cancellation; the signal is polled between
    /// batches.
    pub fn shutdown_signal(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Run the pipeline over the given manifest.
    pub async fn run(&self, manifest_path: &Path) -> Result<RunStats> {
        let run_id = Uuid::new_v4();
        info!(%run_id, manifest = %manifest_path.display(), "Pipeline run starting");

        let result = self.run_inner(run_id, manifest_path).await;

        // The store handle is released on every exit path.
        if let Err(e) = self.store.close().await {
            warn!(error = %e, "Store close failed");
        }

        match &result {
            Ok(stats) => info!(
                %run_id,
                state = ?stats.state,
                processed = stats.processed,
                inserted = stats.inserted,
                failed = stats.failed,
                batches = stats.completed_batches,
                interrupted = stats.interrupted,
                "Pipeline run finished"
            ),
            Err(e) => error!(%run_id, error = %e, "Pipeline run failed"),
        }

        result
    }

    async fn run_inner(&self, run_id: Uuid, manifest_path: &Path) -> Result<RunStats> {
        let mut stats = RunStats {
            run_id,
            total_loaded: 0,
            processed: 0,
            inserted: 0,
            failed: 0,
            completed_batches: 0,
            interrupted: false,
            state: RunState::Idle,
            ledger: LedgerStats::default(),
            analysis: None,
        };

        // Single writer per working directory; a held lock is fatal here.
        let ledger = Arc::new(ProgressLedger::open(&self.options.workdir)?);

        stats.state = RunState::Loading;
        let mut items = manifest::load_manifest(manifest_path)?;

        if self.options.retry_failed_only {
            let pending = ledger.pending_retries();
            let before = items.len();
            items.retain(|item| pending.contains(&item.id));
            info!(
                candidates = before,
                retries = items.len(),
                "Retry mode: processing previously failed items only"
            );
        }
        stats.total_loaded = items.len() as u64;

        let writer = BatchWriter::new(
            self.store.clone(),
            ledger.clone(),
            WriterOptions {
                workers: self.options.workers,
                maintain_view: None,
            },
        );

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        stats.state = RunState::Batching;
        for batch in items.chunks(self.options.batch_size.max(1)) {
            if shutdown_requested(&mut shutdown_rx) {
                info!("Cancellation observed between batches");
                stats.interrupted = true;
                break;
            }

            stats.state = RunState::Writing;
            let records = self.fetch_batch(batch, &ledger, &mut stats).await?;
            let report = writer.write_batch(&records).await?;

            stats.processed += batch.len() as u64;
            stats.inserted += report.inserted;
            stats.failed += report.failed;
            stats.completed_batches += 1;
            debug!(
                batch = stats.completed_batches,
                inserted = report.inserted,
                "Batch done"
            );
        }

        if let Some(view) = &self.options.maintain_view {
            if !stats.interrupted {
                ensure_unified_view(self.store.as_ref(), view).await?;
            }
        }

        if let Some(analyzer) = &self.analyzer {
            if !stats.interrupted {
                stats.state = RunState::Analyzing;
                stats.analysis = Some(self.analyze(analyzer.as_ref()).await?);
            }
        }

        stats.state = RunState::Finalizing;
        ledger.compact()?;
        stats.ledger = ledger.statistics();

        stats.state = if stats.interrupted {
            RunState::Interrupted
        } else {
            RunState::Completed
        };
        Ok(stats)
    }

    /// Fetch the records for one batch of manifest items.
    ///
    /// Fetch failures are per-item: recorded with their step and skipped.
    async fn fetch_batch(
        &self,
        batch: &[ManifestItem],
        ledger: &ProgressLedger,
        stats: &mut RunStats,
    ) -> Result<Vec<crate::record::BboxRecord>> {
        let mut records = Vec::with_capacity(batch.len());
        for item in batch {
            match self.source.fetch(item).await {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(id = %item.id, error = %e, "Record fetch failed");
                    ledger.record(
                        &item.id,
                        Outcome::Failed {
                            step: FailureStep::Fetch,
                        },
                    )?;
                    stats.failed += 1;
                }
            }
        }
        Ok(records)
    }

    /// Run overlap analysis for every partition.
    ///
    /// One partition's failure does not abort the others.
    async fn analyze(&self, analyzer: &dyn OverlapAnalyzer) -> Result<AnalysisStats> {
        let partitions = list_partitions(self.store.as_ref()).await?;
        let mut analysis = AnalysisStats::default();

        for partition in partitions {
            match analyzer.analyze_partition(&partition).await {
                Ok(rows) => {
                    analysis.analyzed_partitions += 1;
                    analysis.candidate_rows += rows;
                }
                Err(e) => {
                    warn!(partition = %partition, error = %e, "Overlap analysis failed");
                    analysis
                        .failed_partitions
                        .insert(partition, e.to_string());
                }
            }
        }

        info!(
            analyzed = analysis.analyzed_partitions,
            failed = analysis.failed_partitions.len(),
            candidates = analysis.candidate_rows,
            "Overlap analysis phase finished"
        );
        Ok(analysis)
    }
}

/// Check the shutdown channel without blocking.
fn shutdown_requested(rx: &mut broadcast::Receiver<()>) -> bool {
    use broadcast::error::TryRecvError;
    match rx.try_recv() {
        Ok(()) => true,
        Err(TryRecvError::Empty) => false,
        // Lagged still means a signal was sent; Closed cannot happen while
        // the controller holds the sender.
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::BboxRecord;
    use crate::store::MemoryStore;
    use crate::Error;
    use async_trait::async_trait;
    use std::io::Write;
    use tempfile::TempDir;

    struct FlakySource {
        fail_ids: Vec<String>,
    }

    #[async_trait]
    impl RecordSource for FlakySource {
        async fn fetch(&self, item: &ManifestItem) -> Result<BboxRecord> {
            if self.fail_ids.contains(&item.id) {
                return Err(Error::Manifest(format!("unreachable source for {}", item.id)));
            }
            manifest::ManifestRecordSource.fetch(item).await
        }
    }

    fn write_manifest(dir: &TempDir, count: usize) -> std::path::PathBuf {
        let path = dir.path().join("manifest.jsonl");
        let mut file = std::fs::File::create(&path).unwrap();
        for i in 0..count {
            writeln!(
                file,
                r#"{{"id":"s{}","group_key":"g{:02}","geometry_wkt":"POLYGON((0 0,1 0,1 1,0 1,0 0))"}}"#,
                i,
                i % 3
            )
            .unwrap();
        }
        path
    }

    #[tokio::test]
    async fn test_completed_run_reports_stats() {
        let dir = TempDir::new().unwrap();
        let manifest = write_manifest(&dir, 7);
        let store = Arc::new(MemoryStore::new());

        let controller = PipelineController::new(
            store.clone(),
            Arc::new(manifest::ManifestRecordSource),
            RunOptions {
                batch_size: 3,
                workdir: dir.path().join("work"),
                ..RunOptions::default()
            },
        );

        let stats = controller.run(&manifest).await.unwrap();
        assert_eq!(stats.state, RunState::Completed);
        assert_eq!(stats.total_loaded, 7);
        assert_eq!(stats.processed, 7);
        assert_eq!(stats.inserted, 7);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.completed_batches, 3);
        assert!(!stats.interrupted);
        assert!(store.is_closed());
    }

    #[tokio::test]
    async fn test_fetch_failures_are_recorded_not_fatal() {
        let dir = TempDir::new().unwrap();
        let manifest = write_manifest(&dir, 5);
        let store = Arc::new(MemoryStore::new());

        let controller = PipelineController::new(
            store,
            Arc::new(FlakySource {
                fail_ids: vec!["s1".into(), "s3".into()],
            }),
            RunOptions {
                batch_size: 2,
                workdir: dir.path().join("work"),
                ..RunOptions::default()
            },
        );

        let stats = controller.run(&manifest).await.unwrap();
        assert_eq!(stats.state, RunState::Completed);
        assert_eq!(stats.inserted, 3);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.ledger.failed_by_step[&FailureStep::Fetch], 2);
    }

    #[tokio::test]
    async fn test_missing_manifest_is_fatal() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let controller = PipelineController::new(
            store.clone(),
            Arc::new(manifest::ManifestRecordSource),
            RunOptions {
                workdir: dir.path().join("work"),
                ..RunOptions::default()
            },
        );

        let err = controller.run(&dir.path().join("missing.jsonl")).await;
        assert!(err.is_err());
        // The store is released even on the failure path.
        assert!(store.is_closed());
    }

    struct NullAnalyzer {
        fail_partition: Option<String>,
    }

    #[async_trait]
    impl OverlapAnalyzer for NullAnalyzer {
        async fn analyze_partition(&self, partition: &str) -> Result<u64> {
            if self.fail_partition.as_deref() == Some(partition) {
                return Err(Error::Manifest("analysis blew up".into()));
            }
            Ok(4)
        }
    }

    #[tokio::test]
    async fn test_analysis_failures_are_per_partition() {
        let dir = TempDir::new().unwrap();
        let manifest = write_manifest(&dir, 6);
        let store = Arc::new(MemoryStore::new());

        let controller = PipelineController::new(
            store,
            Arc::new(manifest::ManifestRecordSource),
            RunOptions {
                batch_size: 6,
                workdir: dir.path().join("work"),
                ..RunOptions::default()
            },
        )
        .with_analyzer(Arc::new(NullAnalyzer {
            fail_partition: Some("bbox_p_g01".into()),
        }));

        let stats = controller.run(&manifest).await.unwrap();
        assert_eq!(stats.state, RunState::Completed);

        let analysis = stats.analysis.unwrap();
        assert_eq!(analysis.analyzed_partitions, 2);
        assert_eq!(analysis.candidate_rows, 8);
        assert!(analysis.failed_partitions.contains_key("bbox_p_g01"));
    }
}
