//! Bounding-box record types.

use serde::{Deserialize, Serialize};

/// Quality assessment flag carried by every bbox record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityFlag {
    /// Passed upstream quality checks
    #[default]
    Good,
    /// Flagged for manual review
    Suspect,
    /// Failed upstream quality checks
    Bad,
}

impl QualityFlag {
    /// Stable lowercase name, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityFlag::Good => "good",
            QualityFlag::Suspect => "suspect",
            QualityFlag::Bad => "bad",
        }
    }

    /// Parse the stable lowercase name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "good" => Some(QualityFlag::Good),
            "suspect" => Some(QualityFlag::Suspect),
            "bad" => Some(QualityFlag::Bad),
            _ => None,
        }
    }
}

/// One geo-bounded spatial unit belonging to exactly one scene/clip.
///
/// Every record resolves to exactly one partition via its group key and is
/// never split or duplicated across partitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BboxRecord {
    /// Record identifier, unique within its partition
    pub id: String,

    /// Owning group key (e.g. city/region code); determines the partition
    pub group_key: String,

    /// Dataset/subdataset name within the group
    pub subgroup: String,

    /// Geometry in WKT form (polygon/box)
    pub geometry_wkt: String,

    /// Quality flag
    #[serde(default)]
    pub quality: QualityFlag,

    /// Arbitrary metadata carried through to the partition table
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl BboxRecord {
    /// Check the record is well-formed enough to persist.
    ///
    /// Routing validity of the group key is checked separately by the
    /// partition router.
    pub fn validate(&self) -> crate::Result<()> {
        if self.id.is_empty() {
            return Err(crate::Error::Config("Record id is required".into()));
        }
        if self.geometry_wkt.trim().is_empty() {
            return Err(crate::Error::Config(format!(
                "Record {} has empty geometry",
                self.id
            )));
        }
        Ok(())
    }
}
