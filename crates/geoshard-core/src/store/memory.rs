//! In-memory store backend.
//!
//! Behaves like the SQL backends at the trait surface (create-before-insert,
//! insert-or-ignore on duplicate ids, catalog listing, view resolution) and
//! adds failure injection plus commit counting, so pipeline and extractor
//! logic can be exercised without a live database.

use crate::record::BboxRecord;
use crate::store::{OverlapRow, StoreBackend, SummaryRow, ViewRow};
use crate::{Result, StoreError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Default)]
struct Inner {
    record_tables: BTreeMap<String, Vec<BboxRecord>>,
    overlap_tables: BTreeMap<String, Vec<OverlapRow>>,
    summary_tables: BTreeMap<String, Vec<SummaryRow>>,
    views: BTreeMap<String, Vec<String>>,
    insert_calls: BTreeMap<String, usize>,
    fail_inserts: HashSet<String>,
}

/// In-memory implementation of [`StoreBackend`].
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    closed: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the shared overlap-results table with externally computed rows.
    pub fn seed_overlap_rows(&self, table: &str, rows: Vec<OverlapRow>) {
        self.inner
            .lock()
            .overlap_tables
            .insert(table.to_string(), rows);
    }

    /// Make every subsequent insert into `table` fail atomically.
    pub fn fail_inserts_into(&self, table: &str) {
        self.inner.lock().fail_inserts.insert(table.to_string());
    }

    /// Number of insert transactions issued against `table`.
    pub fn insert_calls(&self, table: &str) -> usize {
        self.inner
            .lock()
            .insert_calls
            .get(table)
            .copied()
            .unwrap_or(0)
    }

    /// Snapshot of a summary output table.
    pub fn summary_rows(&self, table: &str) -> Vec<SummaryRow> {
        self.inner
            .lock()
            .summary_tables
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot of a record partition table.
    pub fn partition_rows(&self, table: &str) -> Vec<BboxRecord> {
        self.inner
            .lock()
            .record_tables
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StoreBackend for MemoryStore {
    async fn create_record_table(&self, table: &str) -> Result<()> {
        self.inner
            .lock()
            .record_tables
            .entry(table.to_string())
            .or_default();
        Ok(())
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let inner = self.inner.lock();
        Ok(inner.record_tables.contains_key(table)
            || inner.overlap_tables.contains_key(table)
            || inner.summary_tables.contains_key(table))
    }

    async fn insert_records(&self, table: &str, records: &[BboxRecord]) -> Result<u64> {
        let mut inner = self.inner.lock();
        *inner.insert_calls.entry(table.to_string()).or_insert(0) += 1;

        if inner.fail_inserts.contains(table) {
            return Err(StoreError::InsertFailed {
                table: table.to_string(),
                message: "injected insert failure".into(),
            }
            .into());
        }

        let rows = inner
            .record_tables
            .get_mut(table)
            .ok_or_else(|| StoreError::NotFound(table.to_string()))?;

        let existing: HashSet<String> = rows.iter().map(|r| r.id.clone()).collect();
        let mut inserted = 0u64;
        for record in records {
            if !existing.contains(&record.id) {
                rows.push(record.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn count_rows(&self, table: &str) -> Result<u64> {
        let inner = self.inner.lock();
        if let Some(rows) = inner.record_tables.get(table) {
            return Ok(rows.len() as u64);
        }
        if let Some(rows) = inner.overlap_tables.get(table) {
            return Ok(rows.len() as u64);
        }
        if let Some(rows) = inner.summary_tables.get(table) {
            return Ok(rows.len() as u64);
        }
        Err(StoreError::NotFound(table.to_string()).into())
    }

    async fn list_tables(&self, prefix: &str) -> Result<Vec<String>> {
        let inner = self.inner.lock();
        let mut tables: Vec<String> = inner
            .record_tables
            .keys()
            .chain(inner.overlap_tables.keys())
            .chain(inner.summary_tables.keys())
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect();
        tables.sort();
        tables.dedup();
        Ok(tables)
    }

    async fn create_or_replace_view(&self, view: &str, partitions: &[String]) -> Result<()> {
        self.inner
            .lock()
            .views
            .insert(view.to_string(), partitions.to_vec());
        Ok(())
    }

    async fn fetch_view_rows(&self, view: &str) -> Result<Vec<ViewRow>> {
        let inner = self.inner.lock();
        let partitions = inner
            .views
            .get(view)
            .ok_or_else(|| StoreError::NotFound(view.to_string()))?;

        let mut rows = Vec::new();
        for partition in partitions {
            if let Some(records) = inner.record_tables.get(partition) {
                rows.extend(records.iter().map(|record| ViewRow {
                    record: record.clone(),
                    source_partition: partition.clone(),
                }));
            }
        }
        Ok(rows)
    }

    async fn drop_table(&self, table: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.record_tables.remove(table);
        inner.overlap_tables.remove(table);
        inner.summary_tables.remove(table);
        Ok(())
    }

    async fn fetch_overlap_rows(&self, table: &str) -> Result<Vec<OverlapRow>> {
        let inner = self.inner.lock();
        inner
            .overlap_tables
            .get(table)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(table.to_string()).into())
    }

    async fn init_summary_table(&self, table: &str) -> Result<()> {
        self.inner
            .lock()
            .summary_tables
            .insert(table.to_string(), Vec::new());
        Ok(())
    }

    async fn insert_summary_rows(&self, table: &str, rows: &[SummaryRow]) -> Result<u64> {
        let mut inner = self.inner.lock();
        if inner.fail_inserts.contains(table) {
            return Err(StoreError::InsertFailed {
                table: table.to_string(),
                message: "injected insert failure".into(),
            }
            .into());
        }
        let stored = inner
            .summary_tables
            .get_mut(table)
            .ok_or_else(|| StoreError::NotFound(table.to_string()))?;
        stored.extend(rows.iter().cloned());
        Ok(rows.len() as u64)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::QualityFlag;

    fn record(id: &str) -> BboxRecord {
        BboxRecord {
            id: id.to_string(),
            group_key: "a001".to_string(),
            subgroup: "default".to_string(),
            geometry_wkt: "POLYGON((0 0,1 0,1 1,0 1,0 0))".to_string(),
            quality: QualityFlag::Good,
            metadata: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn test_insert_requires_created_table() {
        let store = MemoryStore::new();
        let err = store.insert_records("missing", &[record("r1")]).await;
        assert!(err.is_err());

        store.create_record_table("bbox_p_a001").await.unwrap();
        let inserted = store
            .insert_records("bbox_p_a001", &[record("r1"), record("r2")])
            .await
            .unwrap();
        assert_eq!(inserted, 2);
        assert_eq!(store.count_rows("bbox_p_a001").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_ids_are_ignored() {
        let store = MemoryStore::new();
        store.create_record_table("bbox_p_a001").await.unwrap();
        store
            .insert_records("bbox_p_a001", &[record("r1")])
            .await
            .unwrap();
        let inserted = store
            .insert_records("bbox_p_a001", &[record("r1"), record("r2")])
            .await
            .unwrap();
        assert_eq!(inserted, 1);
        assert_eq!(store.insert_calls("bbox_p_a001"), 2);
    }

    #[tokio::test]
    async fn test_injected_failure_is_atomic() {
        let store = MemoryStore::new();
        store.create_record_table("bbox_p_a001").await.unwrap();
        store.fail_inserts_into("bbox_p_a001");

        let err = store
            .insert_records("bbox_p_a001", &[record("r1")])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("injected"));
        assert_eq!(store.count_rows("bbox_p_a001").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_list_tables_filters_by_prefix() {
        let store = MemoryStore::new();
        store.create_record_table("bbox_p_b").await.unwrap();
        store.create_record_table("bbox_p_a").await.unwrap();
        store.init_summary_table("hotspots").await.unwrap();

        let tables = store.list_tables("bbox_p_").await.unwrap();
        assert_eq!(tables, vec!["bbox_p_a", "bbox_p_b"]);
    }
}
