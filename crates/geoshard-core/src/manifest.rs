//! Manifest input and the record source seam.
//!
//! The manifest enumerates source items, one JSON object per line, with at
//! least an identifier and a group key. Fetching the full record for an item
//! (e.g. from a remote geometry store) is abstracted behind [`RecordSource`]
//! so the pipeline can be driven without the external connector; the default
//! [`ManifestRecordSource`] builds records directly from manifest fields.

use crate::record::{BboxRecord, QualityFlag};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// One source item from the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestItem {
    /// Item identifier
    pub id: String,

    /// Owning group key
    pub group_key: String,

    /// Dataset/subdataset name
    #[serde(default = "default_subgroup")]
    pub subgroup: String,

    /// Geometry in WKT form, when the manifest inlines it
    #[serde(default)]
    pub geometry_wkt: String,

    /// Quality flag
    #[serde(default)]
    pub quality: QualityFlag,

    /// Arbitrary metadata
    #[serde(default)]
    pub metadata: serde_json::Value,
}

fn default_subgroup() -> String {
    "default".to_string()
}

/// Load a JSONL manifest file.
///
/// Loading failures are fatal: there is no partial state to resume, so a
/// malformed line aborts with the offending line number.
pub fn load_manifest(path: &Path) -> Result<Vec<ManifestItem>> {
    let file = File::open(path)
        .map_err(|e| Error::Manifest(format!("Failed to open {}: {}", path.display(), e)))?;
    let reader = BufReader::new(file);

    let mut items = Vec::new();
    for (line_num, line) in reader.lines().enumerate() {
        let line = line
            .map_err(|e| Error::Manifest(format!("Read failed at line {}: {}", line_num + 1, e)))?;

        if line.trim().is_empty() {
            continue;
        }

        let item: ManifestItem = serde_json::from_str(&line).map_err(|e| {
            Error::Manifest(format!("Malformed entry at line {}: {}", line_num + 1, e))
        })?;
        items.push(item);
    }

    Ok(items)
}

/// Source of full bbox records for manifest items.
///
/// Implementations may reach out to a remote geometry store; a fetch failure
/// is a per-item error recorded in the progress ledger, never a run abort.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Fetch the full record for one manifest item.
    async fn fetch(&self, item: &ManifestItem) -> Result<BboxRecord>;
}

/// Record source that materializes records directly from manifest fields.
#[derive(Debug, Default)]
pub struct ManifestRecordSource;

#[async_trait]
impl RecordSource for ManifestRecordSource {
    async fn fetch(&self, item: &ManifestItem) -> Result<BboxRecord> {
        if item.geometry_wkt.trim().is_empty() {
            return Err(Error::Manifest(format!(
                "Item {} carries no inline geometry",
                item.id
            )));
        }

        Ok(BboxRecord {
            id: item.id.clone(),
            group_key: item.group_key.clone(),
            subgroup: item.subgroup.clone(),
            geometry_wkt: item.geometry_wkt.clone(),
            quality: item.quality,
            metadata: item.metadata.clone(),
        })
    }
}
