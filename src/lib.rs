//! Batch prediction over multi-table time-series datasets.
//!
//! Each table of a dataset is cleaned, paired with the pre-trained model
//! stored under its name, predicted in full, and written out as a chart and
//! a CSV. One table failing never stops the others.

pub mod color;
pub mod config;
pub mod data;
pub mod emit;
pub mod error;
pub mod fetch;
pub mod metrics;
pub mod model;
pub mod runner;

use std::sync::Arc;

use anyhow::{Context, Result};
use log::{error, info};

use config::PipelineConfig;
use data::catalog::{self, TableSource};
use emit::{ArtifactEmitter, BlobStore, DirStore};
use fetch::{AnyFetcher, ArtifactFetch};
use model::ArtifactModelBinding;
use runner::{BatchReport, BatchRunner, CancelFlag, PredictionRunner};

/// Name of the JSON batch summary written next to the table artifacts.
pub const SUMMARY_NAME: &str = "batch_summary.json";

/// Fetch and open the configured dataset.
pub fn open_source(
    cfg: &PipelineConfig,
    fetcher: &dyn ArtifactFetch,
) -> Result<Arc<dyn TableSource>> {
    let bytes = fetcher
        .fetch(&cfg.dataset)
        .with_context(|| format!("fetching dataset {}", cfg.dataset))?;
    let source = catalog::open_dataset(&bytes, &cfg.dataset, &cfg.work_dir, cfg.fetch_timeout())?;
    Ok(Arc::from(source))
}

/// Run a whole batch from configuration and write its summary. A failed
/// summary write is logged; the report is still returned.
pub fn run_pipeline(cfg: &PipelineConfig, cancel: CancelFlag) -> Result<BatchReport> {
    let fetcher: Arc<dyn ArtifactFetch> =
        Arc::new(AnyFetcher::new(cfg.fetch_timeout()).context("building HTTP client")?);
    let source = open_source(cfg, fetcher.as_ref())?;
    let binding = Arc::new(ArtifactModelBinding::new(fetcher, cfg.models.clone()));
    let store: Arc<dyn BlobStore> = Arc::new(DirStore::new(&cfg.output_dir));

    let report = BatchRunner::new(
        PredictionRunner::new(source, binding),
        ArtifactEmitter::with_store(store.clone()),
    )
    .jobs(cfg.jobs)
    .only(cfg.tables.clone())
    .cancel_flag(cancel)
    .run_all()
    .context("listing dataset tables")?;

    // Statuses stand even when the summary cannot be written.
    if let Err(e) = write_summary(store.as_ref(), &report) {
        error!("{e:#}");
    }
    info!("{report}");
    Ok(report)
}

pub fn write_summary(store: &dyn BlobStore, report: &BatchReport) -> Result<()> {
    let json = serde_json::to_vec_pretty(report).context("encoding batch summary")?;
    store
        .put(SUMMARY_NAME, &json)
        .with_context(|| format!("writing {SUMMARY_NAME}"))
}

