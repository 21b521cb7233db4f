//! Granule Batch Pipeline
//!
//! Orchestrates batch processing of time-ordered sensor-data granules
//! through an external, black-box processing engine: a pile of input files
//! in a working directory becomes a set of verified output products.
//!
//! # Architecture
//!
//! The pipeline consists of:
//!
//! - **Catalog**: granule metadata records, contiguity grouping, coverage
//! - **Ancillary**: static search and dynamic retrieval of reference data
//! - **Engine**: task descriptors, child-process execution, log-classified
//!   success
//! - **Products**: expectation table, output verification, geo-reference
//!   patching
//! - **Pipeline**: the per-granule state machine with lag-deferred cleanup
//!
//! # Usage
//!
//! ```no_run
//! use granule_runner::{run_batch, BatchRequest, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_file(&"config.yaml".into())?;
//!     let request = BatchRequest {
//!         work_dir: "/data/work".into(),
//!         out_dir: "/data/out".into(),
//!         signal: String::new(),
//!         inputs: vec!["granules.h5".into()],
//!     };
//!     let stats = run_batch(config, request).await?;
//!     std::process::exit(stats.exit_code());
//! }
//! ```

pub mod ancillary;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod notify;
pub mod pipeline;
pub mod products;

pub use config::Config;
pub use error::PipelineError;
pub use pipeline::{BatchRequest, BatchStats, GranuleState, Metrics, Orchestrator, PlanEntry};
pub use products::ProductTable;

use crate::ancillary::{CommandRetriever, NoopRetriever, Retriever};
use crate::catalog::{Catalog, FsCatalog};
use crate::notify::{HookNotifier, Notifier, NullNotifier};
use crate::products::{CommandGeoRef, GeoRefWriter, NoopGeoRef};
use anyhow::Result;
use std::sync::Arc;

/// Run one full batch with the given configuration.
pub async fn run_batch(config: Config, request: BatchRequest) -> Result<BatchStats> {
    config.validate()?;
    let config = Arc::new(config);

    tracing::info!("Starting granule batch pipeline");
    tracing::info!("Working directory is {}", request.work_dir.display());
    tracing::info!("Final products will be published from {}", request.out_dir.display());

    let catalog: Arc<dyn Catalog> = Arc::new(FsCatalog::new(&request.work_dir));

    let retriever: Arc<dyn Retriever> = match &config.ancillary.fetch_command {
        Some(command) => Arc::new(CommandRetriever::new(command.clone())),
        None => Arc::new(NoopRetriever),
    };

    let geo_ref: Arc<dyn GeoRefWriter> = match &config.products.geo_ref_command {
        Some(command) => Arc::new(CommandGeoRef::new(command.clone())),
        None => Arc::new(NoopGeoRef),
    };

    let notifier: Arc<dyn Notifier> = match &config.notification.hook_command {
        Some(command) => Arc::new(HookNotifier::new(command.clone())),
        None => Arc::new(NullNotifier),
    };

    let product_table = match &config.products.table_path {
        Some(path) => ProductTable::from_file(path)?,
        None => ProductTable::builtin(),
    };

    let metrics = Metrics::new();
    let orchestrator = Orchestrator::new(
        config.clone(),
        catalog,
        retriever,
        geo_ref,
        notifier,
        product_table,
        metrics.clone(),
    );

    let stats = orchestrator.run(&request).await?;

    if config.processing.enable_metrics {
        let snapshot = metrics.snapshot();
        tracing::info!("Batch metrics: {}", snapshot);
        if let Some(path) = &config.processing.metrics_output_path {
            if let Err(e) = snapshot.save_to_file(path) {
                tracing::warn!("Failed to save metrics to {}: {}", path, e);
            }
        }
    }

    tracing::info!("Batch complete: {}", stats);
    Ok(stats)
}

/// Build a Tokio runtime with the specified configuration.
pub fn build_runtime(worker_threads: Option<usize>) -> Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();

    if let Some(threads) = worker_threads {
        builder.worker_threads(threads);
    }

    builder.enable_all();

    Ok(builder.build()?)
}
