//! Hotspot summary extraction.
//!
//! Condenses externally computed per-shard overlap statistics into a ranked
//! cross-shard summary table under a top-N or top-percent selection policy.

mod extractor;
mod params;

pub use extractor::{
    selection_count, ExtractionResult, GroupFailure, HotspotConfig, HotspotExtractor, Inspection,
    SelectionPolicy,
};
pub use params::{parse_params, GRID_X_PARAM, GRID_Y_PARAM, GROUP_KEY_PARAM};
