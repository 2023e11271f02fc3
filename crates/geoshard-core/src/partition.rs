//! Partition routing and the unified view.
//!
//! Every record belongs to exactly one partition table derived from its
//! group key. Partition naming is deterministic and collision-free: keys are
//! lowercased and must then consist of `[a-z0-9_]` only, so two distinct
//! normalized keys can never map to the same table. The unified view is the
//! UNION ALL of all currently discovered partitions with a literal
//! `source_partition` column.

use crate::store::StoreBackend;
use crate::{PartitionError, Result};
use tracing::{debug, info};

/// Prefix shared by every partition table.
pub const PARTITION_PREFIX: &str = "bbox_p_";

/// Map a group key to its partition table name.
///
/// Pure and case-normalizing; empty or non-identifier keys are rejected.
pub fn partition_name(group_key: &str) -> Result<String> {
    let normalized = group_key.trim().to_ascii_lowercase();
    if normalized.is_empty() {
        return Err(PartitionError::InvalidGroupKey(group_key.to_string()).into());
    }
    if !normalized
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(PartitionError::InvalidGroupKey(group_key.to_string()).into());
    }
    Ok(format!("{PARTITION_PREFIX}{normalized}"))
}

/// List all partition tables currently present in the store, sorted.
///
/// Introspects the catalog at call time, so partitions created by other
/// writers are discovered without restart.
pub async fn list_partitions(store: &dyn StoreBackend) -> Result<Vec<String>> {
    let partitions = store.list_tables(PARTITION_PREFIX).await?;
    debug!(count = partitions.len(), "Partitions discovered");
    Ok(partitions)
}

/// A freshly (re)built unified view.
#[derive(Debug, Clone)]
pub struct UnifiedView {
    /// View name
    pub name: String,
    /// Partitions the view unions, sorted
    pub partitions: Vec<String>,
}

/// (Re)build the unified view over all currently discovered partitions.
///
/// Idempotent: with an unchanged partition set the produced definition is
/// byte-identical. Fails with [`PartitionError::NoPartitions`] rather than
/// creating an empty view.
pub async fn ensure_unified_view(store: &dyn StoreBackend, view: &str) -> Result<UnifiedView> {
    let partitions = list_partitions(store).await?;
    if partitions.is_empty() {
        return Err(PartitionError::NoPartitions.into());
    }

    store.create_or_replace_view(view, &partitions).await?;
    info!(
        view,
        partitions = partitions.len(),
        "Unified view is current"
    );

    Ok(UnifiedView {
        name: view.to_string(),
        partitions,
    })
}

/// Deterministic SQL definition for the unified view.
///
/// Used by SQL backends; the partition order is taken as given, so callers
/// pass the sorted catalog listing.
pub fn view_definition(view: &str, partitions: &[String]) -> String {
    let branches: Vec<String> = partitions
        .iter()
        .map(|partition| {
            format!(
                "SELECT id, group_key, subgroup, geometry, quality, metadata, \
                 '{partition}' AS source_partition FROM {partition}"
            )
        })
        .collect();
    format!(
        "CREATE OR REPLACE VIEW {view} AS {}",
        branches.join(" UNION ALL ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::Error;

    #[test]
    fn test_route_normalizes_case() {
        assert_eq!(partition_name("A001").unwrap(), "bbox_p_a001");
        assert_eq!(partition_name("  B009 ").unwrap(), "bbox_p_b009");
        assert_eq!(partition_name("city_west").unwrap(), "bbox_p_city_west");
    }

    #[test]
    fn test_route_rejects_invalid_keys() {
        for key in ["", "   ", "a 001", "a-001", "söder", "a;b"] {
            match partition_name(key) {
                Err(Error::Partition(PartitionError::InvalidGroupKey(_))) => {}
                other => panic!("expected InvalidGroupKey for {key:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_view_definition_is_deterministic() {
        let partitions = vec!["bbox_p_a001".to_string(), "bbox_p_b009".to_string()];
        let first = view_definition("bbox_all", &partitions);
        let second = view_definition("bbox_all", &partitions);
        assert_eq!(first, second);
        assert!(first.contains("'bbox_p_a001' AS source_partition"));
        assert!(first.contains("UNION ALL"));
    }

    #[tokio::test]
    async fn test_ensure_view_requires_partitions() {
        let store = MemoryStore::new();
        let err = ensure_unified_view(&store, "bbox_all").await.unwrap_err();
        match err {
            Error::Partition(PartitionError::NoPartitions) => {}
            other => panic!("expected NoPartitions, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_ensure_view_is_idempotent() {
        let store = MemoryStore::new();
        store.create_record_table("bbox_p_a001").await.unwrap();
        store.create_record_table("bbox_p_b009").await.unwrap();

        let first = ensure_unified_view(&store, "bbox_all").await.unwrap();
        let second = ensure_unified_view(&store, "bbox_all").await.unwrap();
        assert_eq!(first.partitions, second.partitions);
        assert_eq!(
            view_definition("bbox_all", &first.partitions),
            view_definition("bbox_all", &second.partitions)
        );
    }

    #[tokio::test]
    async fn test_ensure_view_discovers_new_partitions() {
        let store = MemoryStore::new();
        store.create_record_table("bbox_p_a001").await.unwrap();

        let view = ensure_unified_view(&store, "bbox_all").await.unwrap();
        assert_eq!(view.partitions, vec!["bbox_p_a001"]);

        store.create_record_table("bbox_p_b009").await.unwrap();
        let view = ensure_unified_view(&store, "bbox_all").await.unwrap();
        assert_eq!(view.partitions, vec!["bbox_p_a001", "bbox_p_b009"]);
    }
}
