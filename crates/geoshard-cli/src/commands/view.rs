//! Unified view command implementation.

use anyhow::Result;
use geoshard_core::partition::ensure_unified_view;
use geoshard_core::store::{PostgresStore, StoreBackend};
use geoshard_core::Config;

/// Create or refresh the unified view.
pub async fn run(config: Config, name: Option<String>) -> Result<()> {
    let view_name = name.unwrap_or_else(|| config.view.name.clone());

    let store = PostgresStore::connect(&config.store).await?;
    let view = ensure_unified_view(&store, &view_name).await?;

    println!(
        "View {} covers {} partition(s):",
        view.name,
        view.partitions.len()
    );
    for partition in &view.partitions {
        println!("  {partition}");
    }

    store.close().await?;
    Ok(())
}
