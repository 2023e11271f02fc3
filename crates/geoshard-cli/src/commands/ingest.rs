//! Ingest command implementation.

use anyhow::Result;
use geoshard_core::manifest::ManifestRecordSource;
use geoshard_core::pipeline::{PipelineController, RunOptions};
use geoshard_core::store::PostgresStore;
use geoshard_core::Config;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// CLI overrides for the ingest command.
pub struct IngestArgs {
    pub manifest: PathBuf,
    pub batch_size: Option<usize>,
    pub insert_batch_size: Option<usize>,
    pub retry_failed: bool,
    pub maintain_view: bool,
    pub workdir: Option<PathBuf>,
    pub workers: Option<usize>,
}

/// Run the ingest pipeline.
pub async fn run(mut config: Config, args: IngestArgs) -> Result<()> {
    // Apply CLI overrides
    if let Some(batch_size) = args.batch_size {
        config.pipeline.batch_size = batch_size;
    }
    if let Some(insert_batch_size) = args.insert_batch_size {
        config.store.insert_chunk_size = insert_batch_size;
    }
    if let Some(workdir) = args.workdir {
        config.pipeline.workdir = workdir;
    }
    if let Some(workers) = args.workers {
        config.pipeline.workers = workers;
    }
    let maintain_view = args.maintain_view || config.pipeline.maintain_view;
    config.validate()?;

    info!(
        manifest = %args.manifest.display(),
        batch_size = config.pipeline.batch_size,
        retry_failed = args.retry_failed,
        workers = config.pipeline.workers,
        "Starting ingest pipeline"
    );

    let store = Arc::new(PostgresStore::connect(&config.store).await?);

    let controller = PipelineController::new(
        store,
        Arc::new(ManifestRecordSource),
        RunOptions {
            batch_size: config.pipeline.batch_size,
            retry_failed_only: args.retry_failed,
            maintain_view: maintain_view.then(|| config.view.name.clone()),
            workers: config.pipeline.workers,
            workdir: config.pipeline.workdir.clone(),
        },
    );

    // Handle shutdown signals (SIGINT and SIGTERM); the pipeline observes
    // the signal between batches and finishes the in-flight batch.
    let shutdown_signal = controller.shutdown_signal();
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            let mut sigterm =
                signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Received SIGINT (Ctrl+C), finishing the in-flight batch");
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, finishing the in-flight batch");
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received Ctrl+C, finishing the in-flight batch");
        }

        let _ = shutdown_signal.send(());
    });

    let stats = controller.run(&args.manifest).await?;

    println!(
        "Run {:?}: loaded={} processed={} inserted={} failed={} batches={} interrupted={}",
        stats.state,
        stats.total_loaded,
        stats.processed,
        stats.inserted,
        stats.failed,
        stats.completed_batches,
        stats.interrupted,
    );
    println!(
        "Ledger: {} succeeded, {} failed",
        stats.ledger.success_count, stats.ledger.failed_count
    );
    for (step, count) in &stats.ledger.failed_by_step {
        println!("  failed at {step}: {count}");
    }
    if let Some(analysis) = &stats.analysis {
        println!(
            "Analysis: {} partitions, {} candidate rows, {} failed",
            analysis.analyzed_partitions,
            analysis.candidate_rows,
            analysis.failed_partitions.len()
        );
        for (partition, error) in &analysis.failed_partitions {
            println!("  {partition}: {error}");
        }
    }

    // An interrupted run that made progress is not a failure exit.
    if stats.interrupted && stats.processed == 0 {
        anyhow::bail!("run interrupted before any progress was made");
    }

    Ok(())
}
