use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use log::{debug, warn};

use super::model::{CleanTable, CleaningReport, FeatureMatrix, RawTable, RawValue};
use crate::error::PreprocessError;

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Normalize a raw table into a model-ready [`CleanTable`].
///
/// Order of operations:
/// 1. parse the first column as timestamps (unparseable → `None`)
/// 2. promote it to the index
/// 3. encode text feature columns by first occurrence, coerce to `f64`
/// 4. drop rows missing any feature
/// 5. drop rows missing the target, with a warning
/// 6. stable-sort by index, missing timestamps last
///
/// Anomalies degrade to dropped rows. An empty result is returned as-is.
pub fn clean(raw: &RawTable) -> Result<CleanTable, PreprocessError> {
    let n_cols = raw.n_columns();
    if n_cols < 2 {
        return Err(PreprocessError::TooFewColumns(n_cols));
    }
    if let Some((row, cells)) = raw.rows.iter().enumerate().find(|(_, r)| r.len() != n_cols) {
        return Err(PreprocessError::RaggedRow {
            row,
            expected: n_cols,
            actual: cells.len(),
        });
    }

    let target_idx = n_cols - 1;
    let index = parse_index(raw.column(0));
    let features: Vec<Vec<Option<f64>>> = (1..target_idx)
        .map(|c| encode_feature(raw.column(c)))
        .collect();
    let target: Vec<Option<f64>> = raw.column(target_idx).map(coerce_target).collect();

    let mut keep: Vec<usize> = (0..raw.len())
        .filter(|&r| features.iter().all(|col| col[r].is_some()))
        .collect();
    let dropped_missing_features = raw.len() - keep.len();
    if dropped_missing_features > 0 {
        debug!(
            "{}: dropped {dropped_missing_features} row(s) with missing feature values",
            raw.name
        );
    }

    let before_target = keep.len();
    keep.retain(|&r| target[r].is_some());
    let dropped_missing_target = before_target - keep.len();
    if dropped_missing_target > 0 {
        warn!(
            "{}: dropping {dropped_missing_target} row(s) missing target column '{}'",
            raw.name,
            raw.columns[target_idx]
        );
    }

    // `sort_by` is stable, so rows sharing a timestamp keep source order.
    keep.sort_by(|&a, &b| cmp_index(&index[a], &index[b]));

    let mut matrix = FeatureMatrix::with_columns(features.len());
    let mut row_buf = Vec::with_capacity(features.len());
    for &r in &keep {
        row_buf.clear();
        row_buf.extend(features.iter().filter_map(|col| col[r]));
        matrix.push_row(&row_buf);
    }

    Ok(CleanTable {
        index_name: raw.columns[0].clone(),
        feature_names: raw.columns[1..target_idx].to_vec(),
        target_name: raw.columns[target_idx].clone(),
        index: keep.iter().map(|&r| index[r]).collect(),
        features: matrix,
        target: keep.iter().filter_map(|&r| target[r]).collect(),
        report: CleaningReport {
            rows_in: raw.len(),
            dropped_missing_features,
            dropped_missing_target,
        },
    })
}

// ---------------------------------------------------------------------------
// Index parsing
// ---------------------------------------------------------------------------

fn parse_index<'a>(values: impl Iterator<Item = &'a RawValue>) -> Vec<Option<NaiveDateTime>> {
    let values: Vec<&RawValue> = values.collect();
    let already_typed = values
        .iter()
        .all(|v| matches!(v, RawValue::Timestamp(_) | RawValue::Null));

    if already_typed {
        return values
            .iter()
            .map(|v| match v {
                RawValue::Timestamp(t) => Some(*t),
                _ => None,
            })
            .collect();
    }
    values.into_iter().map(to_timestamp).collect()
}

fn to_timestamp(value: &RawValue) -> Option<NaiveDateTime> {
    match value {
        RawValue::Timestamp(t) => Some(*t),
        RawValue::Text(s) => parse_timestamp(s),
        RawValue::Integer(secs) => DateTime::from_timestamp(*secs, 0).map(|t| t.naive_utc()),
        RawValue::Float(secs) if secs.is_finite() => {
            let whole = secs.floor();
            let nanos = ((secs - whole) * 1e9).round() as u32;
            DateTime::from_timestamp(whole as i64, nanos.min(999_999_999)).map(|t| t.naive_utc())
        }
        _ => None,
    }
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d.%m.%Y"];

/// Parse a timestamp from text. Returns `None` rather than failing.
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.naive_utc());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(t) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(t);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    // Year-month, e.g. "2020-02"
    NaiveDate::parse_from_str(&format!("{s}-01"), "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn cmp_index(a: &Option<NaiveDateTime>, b: &Option<NaiveDateTime>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

// ---------------------------------------------------------------------------
// Feature / target coercion
// ---------------------------------------------------------------------------

/// Integer codes for a column, assigned in first-occurrence order.
/// Nulls and NaN get `-1` and do not consume a code.
pub fn factorize<'a>(values: impl Iterator<Item = &'a RawValue>) -> Vec<i64> {
    let mut codes: HashMap<&RawValue, i64> = HashMap::new();
    values
        .map(|v| {
            if is_na(v) {
                return -1;
            }
            let next = codes.len() as i64;
            *codes.entry(v).or_insert(next)
        })
        .collect()
}

fn is_na(v: &RawValue) -> bool {
    match v {
        RawValue::Null => true,
        RawValue::Float(f) => f.is_nan(),
        _ => false,
    }
}

/// A column holding any text, or nothing but nulls, is categorical and gets
/// encoded; anything else is coerced value by value.
fn encode_feature<'a>(values: impl Iterator<Item = &'a RawValue> + Clone) -> Vec<Option<f64>> {
    let categorical =
        values.clone().any(RawValue::is_text) || values.clone().all(RawValue::is_null);
    if categorical {
        factorize(values).into_iter().map(|c| Some(c as f64)).collect()
    } else {
        values.map(RawValue::as_f64).collect()
    }
}

fn coerce_target(value: &RawValue) -> Option<f64> {
    match value {
        RawValue::Text(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        other => other.as_f64(),
    }
}
