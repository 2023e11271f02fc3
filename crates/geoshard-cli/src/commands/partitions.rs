//! Partition listing command implementation.

use anyhow::Result;
use geoshard_core::partition::list_partitions;
use geoshard_core::store::{PostgresStore, StoreBackend};
use geoshard_core::Config;

/// List partitions, optionally with row counts.
pub async fn run(config: Config, counts: bool) -> Result<()> {
    let store = PostgresStore::connect(&config.store).await?;
    let partitions = list_partitions(&store).await?;

    if partitions.is_empty() {
        println!("No partitions");
    }
    for partition in &partitions {
        if counts {
            let rows = store.count_rows(partition).await?;
            println!("{partition}\t{rows}");
        } else {
            println!("{partition}");
        }
    }

    store.close().await?;
    Ok(())
}
