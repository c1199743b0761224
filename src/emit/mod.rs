/// Artifact emission: chart + CSV per table, written to a blob store.
///
/// ```text
///   records ──► chart renderer ──► "{table}_predictions.html" ─┐
///      │                                                      ├──► BlobStore
///      └──────► csv writer ─────► "{table}_predictions.csv" ──┘
/// ```
pub mod chart;
pub mod store;

use std::fmt::Write as _;
use std::sync::Arc;

use chrono::{NaiveDateTime, NaiveTime};
use log::debug;
use serde::Serialize;

use crate::data::model::PredictionRecord;
use crate::error::EmitError;

pub use chart::{ChartRenderer, PlotlyHtml};
pub use store::{BlobStore, DirStore, MemoryStore};

/// Names of the artifacts written for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmitResult {
    pub chart: String,
    pub table: String,
}

pub struct ArtifactEmitter {
    store: Arc<dyn BlobStore>,
    renderer: Box<dyn ChartRenderer>,
}

impl ArtifactEmitter {
    pub fn new(store: Arc<dyn BlobStore>, renderer: Box<dyn ChartRenderer>) -> Self {
        Self { store, renderer }
    }

    /// Plotly HTML charts.
    pub fn with_store(store: Arc<dyn BlobStore>) -> Self {
        Self::new(store, Box::new(PlotlyHtml))
    }

    /// Write the chart and the CSV for `table`. Names depend only on the
    /// table name, so a re-run overwrites the previous output.
    pub fn emit(
        &self,
        table: &str,
        index_name: &str,
        records: &[PredictionRecord],
    ) -> Result<EmitResult, EmitError> {
        let stem = artifact_stem(table);

        let chart_name = format!("{stem}_predictions.{}", self.renderer.extension());
        let chart = self
            .renderer
            .render(&format!("Actual vs Predicted for {table}"), records)?;
        self.put(&chart_name, &chart)?;

        let csv_name = format!("{stem}_predictions.csv");
        let csv = records_to_csv(index_name, records)?;
        self.put(&csv_name, &csv)?;

        debug!("{table}: wrote {chart_name}, {csv_name}");
        Ok(EmitResult {
            chart: chart_name,
            table: csv_name,
        })
    }

    fn put(&self, name: &str, bytes: &[u8]) -> Result<(), EmitError> {
        self.store.put(name, bytes).map_err(|source| EmitError::Write {
            name: name.to_string(),
            source,
        })
    }
}

/// `{index_name},Actual,Predicted` with one row per record.
pub fn records_to_csv(
    index_name: &str,
    records: &[PredictionRecord],
) -> Result<Vec<u8>, EmitError> {
    let date_only = records
        .iter()
        .filter_map(|r| r.index)
        .all(|t| t.time() == NaiveTime::MIN);

    let mut wtr = csv::Writer::from_writer(Vec::new());
    wtr.write_record([index_name, "Actual", "Predicted"])?;
    for r in records {
        let index = r
            .index
            .map(|t| format_timestamp(&t, date_only))
            .unwrap_or_default();
        wtr.write_record([index, r.actual.to_string(), r.predicted.to_string()])?;
    }
    wtr.into_inner().map_err(|e| EmitError::Write {
        name: "csv buffer".to_string(),
        source: e.into_error(),
    })
}

pub(crate) fn format_timestamp(t: &NaiveDateTime, date_only: bool) -> String {
    if date_only {
        t.format("%Y-%m-%d").to_string()
    } else {
        t.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

/// Table name made safe to use as a file name. Bytes outside
/// `[A-Za-z0-9._-]` are percent-encoded, as are the dots of a name made only
/// of dots, so distinct tables never share a stem.
pub fn artifact_stem(table: &str) -> String {
    let all_dots = table.bytes().all(|b| b == b'.');
    let mut stem = String::with_capacity(table.len());
    for b in table.bytes() {
        let keep = b.is_ascii_alphanumeric()
            || matches!(b, b'_' | b'-')
            || (b == b'.' && !all_dots);
        if keep {
            stem.push(char::from(b));
        } else {
            let _ = write!(stem, "%{b:02X}");
        }
    }
    stem
}
