use std::fmt;

use chrono::NaiveDateTime;

// ---------------------------------------------------------------------------
// RawValue – a single cell of a source table
// ---------------------------------------------------------------------------

/// A dynamically-typed cell as it comes out of the data source.
#[derive(Debug, Clone)]
pub enum RawValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    /// Already-typed timestamp (Parquet timestamp columns, fixtures).
    Timestamp(NaiveDateTime),
    Null,
}

// -- Manual Eq/Hash so distinct values can key a HashMap during encoding.
// Floats compare by bit pattern, which also makes NaN equal to itself. --

impl PartialEq for RawValue {
    fn eq(&self, other: &Self) -> bool {
        use RawValue::*;
        match (self, other) {
            (Text(a), Text(b)) => a == b,
            (Integer(a), Integer(b)) => a == b,
            (Float(a), Float(b)) => a.to_bits() == b.to_bits(),
            (Bool(a), Bool(b)) => a == b,
            (Timestamp(a), Timestamp(b)) => a == b,
            (Null, Null) => true,
            _ => false,
        }
    }
}

impl Eq for RawValue {}

impl std::hash::Hash for RawValue {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            RawValue::Text(s) => s.hash(state),
            RawValue::Integer(i) => i.hash(state),
            RawValue::Float(f) => f.to_bits().hash(state),
            RawValue::Bool(b) => b.hash(state),
            RawValue::Timestamp(t) => t.hash(state),
            RawValue::Null => {}
        }
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::Text(s) => write!(f, "{s}"),
            RawValue::Integer(i) => write!(f, "{i}"),
            RawValue::Float(v) => write!(f, "{v}"),
            RawValue::Bool(b) => write!(f, "{b}"),
            RawValue::Timestamp(t) => write!(f, "{t}"),
            RawValue::Null => write!(f, "<null>"),
        }
    }
}

impl RawValue {
    /// Numeric view of the value. `None` is the missing marker: nulls,
    /// text, and non-finite floats all coerce to it.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RawValue::Float(v) if v.is_finite() => Some(*v),
            RawValue::Integer(i) => Some(*i as f64),
            RawValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            RawValue::Timestamp(t) => Some(t.and_utc().timestamp() as f64),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RawValue::Null)
    }

    pub fn is_text(&self) -> bool {
        matches!(self, RawValue::Text(_))
    }
}

// ---------------------------------------------------------------------------
// RawTable – one named relation as read from the source
// ---------------------------------------------------------------------------

/// Ordered columns and rows. First column is the timestamp-like index, last
/// column is the target, everything in between is a feature.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTable {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<RawValue>>,
}

impl RawTable {
    pub fn new(name: impl Into<String>, columns: Vec<String>, rows: Vec<Vec<RawValue>>) -> Self {
        Self {
            name: name.into(),
            columns,
            rows,
        }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    /// Iterate the cells of column `idx`, top to bottom.
    pub fn column(&self, idx: usize) -> impl Iterator<Item = &RawValue> + Clone + '_ {
        self.rows.iter().map(move |row| &row[idx])
    }
}

// ---------------------------------------------------------------------------
// FeatureMatrix – dense row-major numeric features
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeatureMatrix {
    data: Vec<f64>,
    n_rows: usize,
    n_cols: usize,
}

impl FeatureMatrix {
    /// Empty matrix with a fixed column count.
    pub fn with_columns(n_cols: usize) -> Self {
        Self {
            data: Vec::new(),
            n_rows: 0,
            n_cols,
        }
    }

    /// Append one row. Panics if the width differs from `n_cols`.
    pub fn push_row(&mut self, row: &[f64]) {
        assert_eq!(row.len(), self.n_cols, "feature row width mismatch");
        self.data.extend_from_slice(row);
        self.n_rows += 1;
    }

    pub fn from_rows(n_cols: usize, rows: &[Vec<f64>]) -> Self {
        let mut m = Self::with_columns(n_cols);
        for row in rows {
            m.push_row(row);
        }
        m
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.n_cols..(i + 1) * self.n_cols]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> + '_ {
        (0..self.n_rows).map(move |i| self.row(i))
    }
}

// ---------------------------------------------------------------------------
// CleanTable – the preprocessed, model-ready table
// ---------------------------------------------------------------------------

/// Row counts observed while cleaning a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CleaningReport {
    pub rows_in: usize,
    pub dropped_missing_features: usize,
    pub dropped_missing_target: usize,
}

/// Index, features and target aligned row by row, sorted by index.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanTable {
    pub index_name: String,
    pub feature_names: Vec<String>,
    pub target_name: String,
    /// `None` marks a timestamp that could not be parsed.
    pub index: Vec<Option<NaiveDateTime>>,
    pub features: FeatureMatrix,
    pub target: Vec<f64>,
    pub report: CleaningReport,
}

impl CleanTable {
    pub fn len(&self) -> usize {
        self.target.len()
    }

    pub fn is_empty(&self) -> bool {
        self.target.is_empty()
    }
}

// ---------------------------------------------------------------------------
// PredictionRecord
// ---------------------------------------------------------------------------

/// One row of the prediction output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictionRecord {
    pub index: Option<NaiveDateTime>,
    pub actual: f64,
    pub predicted: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn float_values_hash_by_bits() {
        let mut seen = HashSet::new();
        seen.insert(RawValue::Float(f64::NAN));
        assert!(seen.contains(&RawValue::Float(f64::NAN)));
        assert!(!seen.contains(&RawValue::Integer(0)));
    }

    #[test]
    fn as_f64_treats_non_finite_as_missing() {
        assert_eq!(RawValue::Float(f64::INFINITY).as_f64(), None);
        assert_eq!(RawValue::Text("1".into()).as_f64(), None);
        assert_eq!(RawValue::Bool(true).as_f64(), Some(1.0));
        assert_eq!(RawValue::Integer(-3).as_f64(), Some(-3.0));
    }

    #[test]
    fn feature_matrix_rows_are_row_major() {
        let m = FeatureMatrix::from_rows(2, &[vec![1.0, 2.0], vec![3.0, 4.0]]);
        assert_eq!(m.n_rows(), 2);
        assert_eq!(m.row(1), &[3.0, 4.0]);
        assert_eq!(m.rows().count(), 2);
    }
}
