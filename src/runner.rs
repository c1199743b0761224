//! Per-table prediction and the batch loop around it.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{error, info, warn};
use rayon::prelude::*;
use serde::Serialize;

use crate::data::catalog::TableSource;
use crate::data::model::{CleaningReport, PredictionRecord};
use crate::data::preprocess;
use crate::emit::{ArtifactEmitter, EmitResult};
use crate::error::{FailureKind, InferenceError, SourceError, TableError};
use crate::metrics::FitMetrics;
use crate::model::ModelBinding;

// ---------------------------------------------------------------------------
// Single table
// ---------------------------------------------------------------------------

/// Predictions for one table, in ascending index order.
#[derive(Debug, Clone, PartialEq)]
pub struct TablePrediction {
    pub table: String,
    pub index_name: String,
    pub records: Vec<PredictionRecord>,
    pub report: CleaningReport,
}

/// Read → clean → resolve model → predict, for one table at a time.
/// Invocations share nothing mutable.
#[derive(Clone)]
pub struct PredictionRunner {
    source: Arc<dyn TableSource>,
    binding: Arc<dyn ModelBinding>,
}

impl PredictionRunner {
    pub fn new(source: Arc<dyn TableSource>, binding: Arc<dyn ModelBinding>) -> Self {
        Self { source, binding }
    }

    pub fn source(&self) -> &dyn TableSource {
        self.source.as_ref()
    }

    pub fn run(&self, table: &str) -> Result<TablePrediction, TableError> {
        let raw = self.source.read_table(table)?;
        let clean = preprocess::clean(&raw)?;
        if clean.is_empty() {
            return Err(TableError::EmptyAfterCleaning {
                rows_in: clean.report.rows_in,
            });
        }

        let model = self.binding.resolve(table)?;
        let predicted = model.predict(&clean.features)?;
        if predicted.len() != clean.len() {
            return Err(InferenceError::LengthMismatch {
                expected: clean.len(),
                actual: predicted.len(),
            }
            .into());
        }

        let records = clean
            .index
            .iter()
            .zip(&clean.target)
            .zip(&predicted)
            .map(|((&index, &actual), &predicted)| PredictionRecord {
                index,
                actual,
                predicted,
            })
            .collect();

        Ok(TablePrediction {
            table: table.to_string(),
            index_name: clean.index_name,
            records,
            report: clean.report,
        })
    }
}

// ---------------------------------------------------------------------------
// Batch status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSummary {
    pub records: usize,
    pub dropped_rows: usize,
    pub metrics: Option<FitMetrics>,
    pub artifacts: EmitResult,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TableStatus {
    Success(TableSummary),
    Failure { kind: FailureKind, message: String },
    /// Not started because the batch was cancelled.
    Skipped,
}

impl TableStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, TableStatus::Success(_))
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            TableStatus::Failure { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

impl fmt::Display for TableStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableStatus::Success(s) => {
                write!(f, "ok, {} record(s)", s.records)?;
                if let Some(m) = &s.metrics {
                    write!(f, ", rmse {:.4}, mae {:.4}", m.rmse, m.mae)?;
                    if let Some(r2) = m.r2 {
                        write!(f, ", r2 {r2:.4}")?;
                    }
                }
                Ok(())
            }
            TableStatus::Failure { kind, message } => write!(f, "FAILED [{kind}] {message}"),
            TableStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Terminal result of a batch: one status per table.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub tables: BTreeMap<String, TableStatus>,
}

impl BatchReport {
    pub fn get(&self, table: &str) -> Option<&TableStatus> {
        self.tables.get(table)
    }

    pub fn succeeded(&self) -> usize {
        self.tables.values().filter(|s| s.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.tables
            .values()
            .filter(|s| matches!(s, TableStatus::Failure { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.tables
            .values()
            .filter(|s| matches!(s, TableStatus::Skipped))
            .count()
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} table(s): {} succeeded, {} failed, {} skipped",
            self.tables.len(),
            self.succeeded(),
            self.failed(),
            self.skipped()
        )
    }
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Checked between tables; a table already running is not interrupted.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Batch loop
// ---------------------------------------------------------------------------

pub struct BatchRunner {
    runner: PredictionRunner,
    emitter: ArtifactEmitter,
    jobs: usize,
    only: Vec<String>,
    cancel: CancelFlag,
}

impl BatchRunner {
    pub fn new(runner: PredictionRunner, emitter: ArtifactEmitter) -> Self {
        Self {
            runner,
            emitter,
            jobs: 1,
            only: Vec::new(),
            cancel: CancelFlag::new(),
        }
    }

    /// Worker threads; `1` keeps the loop sequential.
    pub fn jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    /// Restrict the batch to these tables. Empty means every listed table.
    pub fn only(mut self, tables: Vec<String>) -> Self {
        self.only = tables;
        self
    }

    pub fn cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run every table. Only a failure to list the tables fails the batch;
    /// per-table failures are recorded in the report.
    pub fn run_all(&self) -> Result<BatchReport, SourceError> {
        let tables = if self.only.is_empty() {
            self.runner.source().list_tables()?
        } else {
            self.only.clone()
        };
        info!("running {} table(s) with {} worker(s)", tables.len(), self.jobs);

        let statuses: Vec<(String, TableStatus)> = if self.jobs > 1 {
            match rayon::ThreadPoolBuilder::new().num_threads(self.jobs).build() {
                Ok(pool) => pool.install(|| {
                    tables
                        .par_iter()
                        .map(|t| (t.clone(), self.process(t)))
                        .collect()
                }),
                Err(e) => {
                    warn!("failed to build worker pool ({e}); running sequentially");
                    self.run_sequential(&tables)
                }
            }
        } else {
            self.run_sequential(&tables)
        };

        Ok(BatchReport {
            tables: statuses.into_iter().collect(),
        })
    }

    fn run_sequential(&self, tables: &[String]) -> Vec<(String, TableStatus)> {
        tables
            .iter()
            .map(|t| (t.clone(), self.process(t)))
            .collect()
    }

    /// Predict and emit one table, folding any failure into its status.
    pub fn process(&self, table: &str) -> TableStatus {
        if self.cancel.is_cancelled() {
            return TableStatus::Skipped;
        }
        info!("predicting entire dataset for table: {table}");

        match self.predict_and_emit(table) {
            Ok(summary) => {
                info!("{table}: {} record(s) written", summary.records);
                TableStatus::Success(summary)
            }
            Err(err) => {
                let kind = err.kind();
                error!("error processing table '{table}': [{kind}] {err}");
                TableStatus::Failure {
                    kind,
                    message: err.to_string(),
                }
            }
        }
    }

    fn predict_and_emit(&self, table: &str) -> Result<TableSummary, TableError> {
        let prediction = self.runner.run(table)?;
        let artifacts = self
            .emitter
            .emit(table, &prediction.index_name, &prediction.records)?;
        Ok(TableSummary {
            records: prediction.records.len(),
            dropped_rows: prediction.report.dropped_missing_features
                + prediction.report.dropped_missing_target,
            metrics: FitMetrics::compute(&prediction.records),
            artifacts,
        })
    }
}
