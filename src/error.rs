//! Error taxonomy for the prediction pipeline.
//!
//! Each stage has its own error type; [`TableError`] wraps them at the
//! single-table granularity and [`FailureKind`] is the flat tag reported in
//! the batch status map.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Failure of the artifact-fetch capability.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("artifact not found: {0}")]
    NotFound(String),

    #[error("timed out after {timeout:?} fetching {location}")]
    Timeout { location: String, timeout: Duration },

    #[error("HTTP {status} fetching {location}")]
    Http { location: String, status: u16 },

    #[error("request for {location} failed: {source}")]
    Request {
        location: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("I/O error reading {location}: {source}")]
    Io {
        location: String,
        #[source]
        source: std::io::Error,
    },
}

/// Failure of the tabular data source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("no such table: {0}")]
    NoSuchTable(String),

    #[error("data source lock poisoned")]
    Poisoned,

    #[error("{0:#}")]
    Load(anyhow::Error),
}

/// Input the preprocessor cannot interpret at all.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PreprocessError {
    #[error("table has {0} column(s); need an index column and a target column")]
    TooFewColumns(usize),

    #[error("row {row} has {actual} cells, header has {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        actual: usize,
    },
}

/// Failure to resolve a table's model.
#[derive(Debug, Error)]
pub enum BindingError {
    #[error("no model artifact for table '{table}': {source}")]
    Unavailable {
        table: String,
        #[source]
        source: FetchError,
    },

    #[error("model artifact for table '{table}' is corrupt: {reason}")]
    Corrupt { table: String, reason: String },
}

/// Failure while running a model over a feature matrix.
#[derive(Debug, Error, PartialEq)]
pub enum InferenceError {
    #[error("model expects {expected} feature(s), got {actual}")]
    FeatureCountMismatch { expected: usize, actual: usize },

    #[error("tree splits on feature {feature} but the matrix has {n_cols} column(s)")]
    FeatureOutOfRange { feature: usize, n_cols: usize },

    #[error("non-finite prediction at row {row}")]
    NonFinite { row: usize },

    #[error("model returned {actual} prediction(s) for {expected} row(s)")]
    LengthMismatch { expected: usize, actual: usize },
}

/// Failure to persist a table's artifacts.
#[derive(Debug, Error)]
pub enum EmitError {
    #[error("writing {name}: {source}")]
    Write {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("encoding CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("rendering chart: {0}")]
    Render(#[from] serde_json::Error),
}

/// Everything that can stop a single table. Never escapes the batch loop.
#[derive(Debug, Error)]
pub enum TableError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Malformed(#[from] PreprocessError),

    #[error("every row was dropped during cleaning ({rows_in} row(s) in)")]
    EmptyAfterCleaning { rows_in: usize },

    #[error(transparent)]
    Binding(#[from] BindingError),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error(transparent)]
    Emit(#[from] EmitError),
}

impl TableError {
    pub fn kind(&self) -> FailureKind {
        match self {
            TableError::Source(_) => FailureKind::FetchError,
            TableError::Malformed(_) => FailureKind::MalformedTable,
            TableError::EmptyAfterCleaning { .. } => FailureKind::EmptyTableAfterCleaning,
            TableError::Binding(BindingError::Unavailable { .. }) => {
                FailureKind::ArtifactUnavailable
            }
            TableError::Binding(BindingError::Corrupt { .. }) => FailureKind::ArtifactCorrupt,
            TableError::Inference(_) => FailureKind::InferenceError,
            TableError::Emit(_) => FailureKind::EmitFailure,
        }
    }
}

/// Flat failure tag used in status lines and the batch summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FailureKind {
    FetchError,
    MalformedTable,
    ArtifactUnavailable,
    ArtifactCorrupt,
    EmptyTableAfterCleaning,
    InferenceError,
    EmitFailure,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_errors_map_to_their_kinds() {
        let unavailable = TableError::from(BindingError::Unavailable {
            table: "t".into(),
            source: FetchError::NotFound("t.json".into()),
        });
        assert_eq!(unavailable.kind(), FailureKind::ArtifactUnavailable);

        let corrupt = TableError::from(BindingError::Corrupt {
            table: "t".into(),
            reason: "bad".into(),
        });
        assert_eq!(corrupt.kind(), FailureKind::ArtifactCorrupt);
    }

    #[test]
    fn empty_table_message_mentions_row_count() {
        let err = TableError::EmptyAfterCleaning { rows_in: 4 };
        assert_eq!(err.kind(), FailureKind::EmptyTableAfterCleaning);
        assert!(err.to_string().contains("4 row(s)"));
    }
}
