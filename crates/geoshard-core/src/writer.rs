//! Chunked, per-partition transactional batch writer.
//!
//! Input records are grouped by target partition; each per-partition group
//! within a batch commits as a unit, and every record's outcome is reported
//! to the progress ledger with its failure step. Partitions are created on
//! demand once per run. Parallelism, when enabled, only ever spans
//! *different* partitions; a single partition's write path stays sequential.

use crate::ledger::{FailureStep, Outcome, ProgressLedger};
use crate::partition::{ensure_unified_view, partition_name};
use crate::record::BboxRecord;
use crate::store::StoreBackend;
use crate::Result;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Batch writer options.
#[derive(Debug, Clone)]
pub struct WriterOptions {
    /// Concurrent per-partition commits (1 = sequential)
    pub workers: usize,
    /// Rebuild this unified view after a write run
    pub maintain_view: Option<String>,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            maintain_view: None,
        }
    }
}

/// Aggregate outcome of a write run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteReport {
    /// Records taken in
    pub processed: u64,
    /// Records persisted
    pub inserted: u64,
    /// Records that failed transform or insert
    pub failed: u64,
    /// Batches fully committed
    pub completed_batches: u64,
    /// Inserted row counts per partition
    pub per_partition: BTreeMap<String, u64>,
}

impl WriteReport {
    fn merge(&mut self, other: WriteReport) {
        self.processed += other.processed;
        self.inserted += other.inserted;
        self.failed += other.failed;
        self.completed_batches += other.completed_batches;
        for (partition, count) in other.per_partition {
            *self.per_partition.entry(partition).or_insert(0) += count;
        }
    }
}

struct PartitionOutcome {
    partition: String,
    inserted: u64,
    failed: u64,
}

/// Writes validated record sets into their partitions.
pub struct BatchWriter {
    store: Arc<dyn StoreBackend>,
    ledger: Arc<ProgressLedger>,
    options: WriterOptions,
    created: Mutex<HashSet<String>>,
}

impl BatchWriter {
    /// Create a writer reporting outcomes to `ledger`.
    pub fn new(
        store: Arc<dyn StoreBackend>,
        ledger: Arc<ProgressLedger>,
        options: WriterOptions,
    ) -> Self {
        Self {
            store,
            ledger,
            options,
            created: Mutex::new(HashSet::new()),
        }
    }

    /// Write `records`, chunked into batches of at most `batch_size`.
    pub async fn write(&self, records: &[BboxRecord], batch_size: usize) -> Result<WriteReport> {
        let mut report = WriteReport::default();
        for batch in records.chunks(batch_size.max(1)) {
            report.merge(self.write_batch(batch).await?);
        }

        if let Some(view) = &self.options.maintain_view {
            if !report.per_partition.is_empty() {
                ensure_unified_view(self.store.as_ref(), view).await?;
            }
        }

        Ok(report)
    }

    /// Commit one pre-chunked batch.
    ///
    /// Per-record failures are reported to the ledger and reflected in the
    /// report; only ledger write failures propagate as errors.
    pub async fn write_batch(&self, records: &[BboxRecord]) -> Result<WriteReport> {
        let mut report = WriteReport {
            processed: records.len() as u64,
            completed_batches: 1,
            ..WriteReport::default()
        };

        // Route each record; transform failures never reach the store.
        let mut groups: BTreeMap<String, Vec<BboxRecord>> = BTreeMap::new();
        for record in records {
            let routed = record
                .validate()
                .and_then(|_| partition_name(&record.group_key));
            match routed {
                Ok(partition) => groups.entry(partition).or_default().push(record.clone()),
                Err(e) => {
                    warn!(id = %record.id, error = %e, "Record failed transform");
                    self.ledger.record(
                        &record.id,
                        Outcome::Failed {
                            step: FailureStep::Transform,
                        },
                    )?;
                    report.failed += 1;
                }
            }
        }

        let outcomes: Vec<Result<PartitionOutcome>> = if self.options.workers > 1 {
            stream::iter(
                groups
                    .into_iter()
                    .map(|(partition, records)| self.commit_partition(partition, records)),
            )
            .buffer_unordered(self.options.workers)
            .collect()
            .await
        } else {
            let mut outcomes = Vec::new();
            for (partition, records) in groups {
                outcomes.push(self.commit_partition(partition, records).await);
            }
            outcomes
        };

        for outcome in outcomes {
            let outcome = outcome?;
            report.inserted += outcome.inserted;
            report.failed += outcome.failed;
            if outcome.inserted > 0 {
                *report.per_partition.entry(outcome.partition).or_insert(0) += outcome.inserted;
            }
        }

        debug!(
            processed = report.processed,
            inserted = report.inserted,
            failed = report.failed,
            "Batch committed"
        );

        Ok(report)
    }

    /// Commit all records of one batch destined for one partition: either
    /// every record is persisted, or all are reported failed.
    async fn commit_partition(
        &self,
        partition: String,
        records: Vec<BboxRecord>,
    ) -> Result<PartitionOutcome> {
        if !self.created.lock().contains(&partition) {
            if let Err(e) = self.store.create_record_table(&partition).await {
                warn!(partition = %partition, error = %e, "Partition creation failed");
                return self.fail_partition(partition, &records).await;
            }
            self.created.lock().insert(partition.clone());
        }

        match self.store.insert_records(&partition, &records).await {
            Ok(inserted) => {
                for record in &records {
                    self.ledger.record(&record.id, Outcome::Success)?;
                }
                Ok(PartitionOutcome {
                    partition,
                    inserted,
                    failed: 0,
                })
            }
            Err(e) => {
                warn!(partition = %partition, error = %e, "Partition insert rejected");
                self.fail_partition(partition, &records).await
            }
        }
    }

    async fn fail_partition(
        &self,
        partition: String,
        records: &[BboxRecord],
    ) -> Result<PartitionOutcome> {
        for record in records {
            self.ledger.record(
                &record.id,
                Outcome::Failed {
                    step: FailureStep::Insert,
                },
            )?;
        }
        Ok(PartitionOutcome {
            partition,
            inserted: 0,
            failed: records.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerStats;
    use crate::record::QualityFlag;
    use crate::store::MemoryStore;
    use tempfile::TempDir;

    fn record(id: &str, group: &str) -> BboxRecord {
        BboxRecord {
            id: id.to_string(),
            group_key: group.to_string(),
            subgroup: "default".to_string(),
            geometry_wkt: "POLYGON((0 0,1 0,1 1,0 1,0 0))".to_string(),
            quality: QualityFlag::Good,
            metadata: serde_json::Value::Null,
        }
    }

    fn setup(options: WriterOptions) -> (Arc<MemoryStore>, Arc<ProgressLedger>, BatchWriter, TempDir)
    {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(ProgressLedger::open(dir.path()).unwrap());
        let writer = BatchWriter::new(store.clone(), ledger.clone(), options);
        (store, ledger, writer, dir)
    }

    #[tokio::test]
    async fn test_write_routes_to_partitions() {
        let (store, _ledger, writer, _dir) = setup(WriterOptions::default());

        let records = vec![
            record("r1", "A001"),
            record("r2", "A001"),
            record("r3", "B009"),
        ];
        let report = writer.write(&records, 10).await.unwrap();

        assert_eq!(report.processed, 3);
        assert_eq!(report.inserted, 3);
        assert_eq!(report.failed, 0);
        assert_eq!(report.per_partition["bbox_p_a001"], 2);
        assert_eq!(report.per_partition["bbox_p_b009"], 1);
        assert_eq!(store.count_rows("bbox_p_a001").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_transform_failures_never_reach_store() {
        let (store, ledger, writer, _dir) = setup(WriterOptions::default());

        let mut bad_geometry = record("r2", "a001");
        bad_geometry.geometry_wkt = String::new();
        let records = vec![record("r1", "no spaces allowed"), bad_geometry];

        let report = writer.write(&records, 10).await.unwrap();
        assert_eq!(report.failed, 2);
        assert_eq!(report.inserted, 0);
        assert!(store.list_tables("bbox_p_").await.unwrap().is_empty());

        let stats = ledger.statistics();
        assert_eq!(stats.failed_by_step[&FailureStep::Transform], 2);
    }

    #[tokio::test]
    async fn test_insert_failure_is_per_partition() {
        let (store, ledger, writer, _dir) = setup(WriterOptions::default());
        store.fail_inserts_into("bbox_p_a001");

        let records = vec![
            record("r1", "a001"),
            record("r2", "a001"),
            record("r3", "b009"),
        ];
        let report = writer.write(&records, 10).await.unwrap();

        assert_eq!(report.inserted, 1);
        assert_eq!(report.failed, 2);
        assert!(!report.per_partition.contains_key("bbox_p_a001"));

        let stats: LedgerStats = ledger.statistics();
        assert_eq!(stats.success_count, 1);
        assert_eq!(stats.failed_by_step[&FailureStep::Insert], 2);
    }

    #[tokio::test]
    async fn test_chunking_bounds_commits_per_partition() {
        let (store, ledger, writer, _dir) = setup(WriterOptions::default());

        // 10 records over 3 groups, batch size 5: at most 2 commits per
        // partition, and exactly one ledger entry per record.
        let records: Vec<BboxRecord> = (0..10)
            .map(|i| record(&format!("r{i}"), ["a001", "b009", "c027"][i % 3]))
            .collect();
        let report = writer.write(&records, 5).await.unwrap();

        assert_eq!(report.processed, 10);
        assert_eq!(report.inserted, 10);
        assert_eq!(report.completed_batches, 2);
        for partition in ["bbox_p_a001", "bbox_p_b009", "bbox_p_c027"] {
            assert!(store.insert_calls(partition) <= 2, "{partition}");
        }

        let stats = ledger.statistics();
        assert_eq!(stats.success_count + stats.failed_count, 10);
    }

    #[tokio::test]
    async fn test_view_maintenance_is_caller_controlled() {
        let (store, _ledger, writer, _dir) = setup(WriterOptions::default());
        writer
            .write(&[record("r1", "a001")], 10)
            .await
            .unwrap();
        assert!(store.fetch_view_rows("bbox_all").await.is_err());

        let (store, _ledger, writer, _dir) = setup(WriterOptions {
            workers: 1,
            maintain_view: Some("bbox_all".to_string()),
        });
        writer
            .write(&[record("r1", "a001")], 10)
            .await
            .unwrap();
        let rows = store.fetch_view_rows("bbox_all").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].source_partition, "bbox_p_a001");
    }

    #[tokio::test]
    async fn test_parallel_workers_commit_all_partitions() {
        let (store, _ledger, writer, _dir) = setup(WriterOptions {
            workers: 4,
            maintain_view: None,
        });

        let records: Vec<BboxRecord> = (0..20)
            .map(|i| record(&format!("r{i}"), &format!("g{:02}", i % 5)))
            .collect();
        let report = writer.write(&records, 20).await.unwrap();

        assert_eq!(report.inserted, 20);
        assert_eq!(report.per_partition.len(), 5);
        assert_eq!(store.count_rows("bbox_p_g00").await.unwrap(), 4);
    }
}
