//! Hotspot extraction command implementation.

use anyhow::Result;
use geoshard_core::hotspot::{HotspotConfig, HotspotExtractor};
use geoshard_core::store::{PostgresStore, StoreBackend};
use geoshard_core::Config;
use std::sync::Arc;

/// Run the hotspot extraction, or just the inspect phase.
pub async fn run(
    config: Config,
    output_table: String,
    top_n: Option<u64>,
    top_percent: Option<f64>,
    inspect_only: bool,
) -> Result<()> {
    // Policy validation happens before any database access.
    let hotspot_config = HotspotConfig::from_options(output_table, top_n, top_percent)?;

    let store = Arc::new(PostgresStore::connect(&config.store).await?);
    let extractor = HotspotExtractor::new(store.clone(), config.overlap.results_table.clone());

    let inspection = extractor.inspect(&hotspot_config).await?;
    println!(
        "Inspection: {} group(s), {} expected row(s), {} row(s) without group key",
        inspection.candidate_groups.len(),
        inspection.expected_rows,
        inspection.skipped_rows,
    );
    for group in &inspection.candidate_groups {
        println!("  {group}");
    }

    if !inspect_only {
        let result = extractor.run(&hotspot_config).await?;
        println!(
            "Extracted {} row(s) into {}: {} group(s) succeeded, {} failed",
            result.extracted_rows,
            hotspot_config.output_table(),
            result.successful_groups.len(),
            result.failed_groups.len(),
        );
        for failure in &result.failed_groups {
            println!("  failed {}: {}", failure.group, failure.message);
        }
    }

    store.close().await?;
    Ok(())
}
