use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use arrow::array::{Array, AsArray};
use arrow::datatypes::{
    DataType, Date32Type, Date64Type, Float32Type, Float64Type, Int32Type, Int64Type, TimeUnit,
    TimestampMicrosecondType, TimestampMillisecondType, TimestampNanosecondType,
    TimestampSecondType,
};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::Value as JsonValue;

use super::model::{RawTable, RawValue};

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Load a single-table file. The table is named after the file stem.
/// Dispatch by extension.
///
/// Supported formats:
/// * `.parquet` – any flat schema; timestamp and date columns stay typed
/// * `.json`    – `[{ "date": ..., "f1": ..., "target": ... }, ...]`
/// * `.csv`     – header row, cell types guessed per value
pub fn load_file(path: &Path) -> Result<RawTable> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let name = table_name_for(path);
    match ext.as_str() {
        "parquet" | "pq" => load_parquet(path, name),
        "json" => load_json(path, name),
        "csv" => load_csv(path, name),
        other => bail!("Unsupported file extension: .{other}"),
    }
}

/// Whether [`load_file`] understands this path.
pub fn is_supported(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref(),
        Some("parquet" | "pq" | "json" | "csv")
    )
}

pub fn table_name_for(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("table")
        .to_string()
}

// ---------------------------------------------------------------------------
// JSON loader
// ---------------------------------------------------------------------------

/// Expected JSON schema (records-oriented, `df.to_json(orient='records')`).
/// Column order is taken from the first record:
///
/// ```json
/// [
///   { "date": "2021-01-04", "volume": 1200, "sector": "tech", "close": 10.5 },
///   ...
/// ]
/// ```
fn load_json(path: &Path, name: String) -> Result<RawTable> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    let root: JsonValue = serde_json::from_str(&text).context("parsing JSON")?;

    let records = root
        .as_array()
        .context("Expected top-level JSON array")?;

    let columns: Vec<String> = match records.first() {
        Some(first) => first
            .as_object()
            .context("Row 0 is not a JSON object")?
            .keys()
            .cloned()
            .collect(),
        None => Vec::new(),
    };

    let mut rows = Vec::with_capacity(records.len());
    for (i, rec) in records.iter().enumerate() {
        let obj = rec
            .as_object()
            .with_context(|| format!("Row {i} is not a JSON object"))?;

        // Keys absent from a record read as null.
        let row = columns
            .iter()
            .map(|col| obj.get(col).map(json_to_value).unwrap_or(RawValue::Null))
            .collect();
        rows.push(row);
    }

    Ok(RawTable::new(name, columns, rows))
}

fn json_to_value(val: &JsonValue) -> RawValue {
    match val {
        JsonValue::String(s) => RawValue::Text(s.clone()),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                RawValue::Integer(i)
            } else if let Some(f) = n.as_f64() {
                RawValue::Float(f)
            } else {
                RawValue::Text(n.to_string())
            }
        }
        JsonValue::Bool(b) => RawValue::Bool(*b),
        JsonValue::Null => RawValue::Null,
        other => RawValue::Text(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// CSV loader
// ---------------------------------------------------------------------------

/// CSV layout: header row with column names, one record per row.
fn load_csv(path: &Path, name: String) -> Result<RawTable> {
    let mut reader = csv::Reader::from_path(path).context("opening CSV")?;
    let columns: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let mut rows = Vec::new();
    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;
        rows.push(record.iter().map(guess_value_type).collect());
    }

    Ok(RawTable::new(name, columns, rows))
}

fn guess_value_type(s: &str) -> RawValue {
    if s.is_empty() {
        return RawValue::Null;
    }
    if let Ok(i) = s.parse::<i64>() {
        return RawValue::Integer(i);
    }
    if let Ok(f) = s.parse::<f64>() {
        return RawValue::Float(f);
    }
    if s == "true" || s == "false" {
        return RawValue::Bool(s == "true");
    }
    RawValue::Text(s.to_string())
}

// ---------------------------------------------------------------------------
// Parquet loader
// ---------------------------------------------------------------------------

/// Load a flat Parquet file as one table, columns in schema order.
///
/// Works with files written by both **Pandas** (`df.to_parquet()`) and
/// **Polars** (`df.write_parquet()`).
fn load_parquet(path: &Path, name: String) -> Result<RawTable> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .context("reading parquet metadata")?;
    let columns: Vec<String> = builder
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();
    let reader = builder.build().context("building parquet reader")?;

    let mut rows = Vec::new();
    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        for row in 0..batch.num_rows() {
            rows.push(
                batch
                    .columns()
                    .iter()
                    .map(|col| extract_value(col, row))
                    .collect(),
            );
        }
    }

    Ok(RawTable::new(name, columns, rows))
}

/// Extract a single cell from an Arrow column at a given row.
fn extract_value(col: &Arc<dyn Array>, row: usize) -> RawValue {
    if col.is_null(row) {
        return RawValue::Null;
    }
    let timestamp = |t: Option<chrono::NaiveDateTime>| {
        t.map(RawValue::Timestamp).unwrap_or(RawValue::Null)
    };
    match col.data_type() {
        DataType::Utf8 => RawValue::Text(col.as_string::<i32>().value(row).to_string()),
        DataType::LargeUtf8 => RawValue::Text(col.as_string::<i64>().value(row).to_string()),
        DataType::Int32 => RawValue::Integer(col.as_primitive::<Int32Type>().value(row) as i64),
        DataType::Int64 => RawValue::Integer(col.as_primitive::<Int64Type>().value(row)),
        DataType::Float32 => RawValue::Float(col.as_primitive::<Float32Type>().value(row) as f64),
        DataType::Float64 => RawValue::Float(col.as_primitive::<Float64Type>().value(row)),
        DataType::Boolean => RawValue::Bool(col.as_boolean().value(row)),
        DataType::Date32 => timestamp(col.as_primitive::<Date32Type>().value_as_datetime(row)),
        DataType::Date64 => timestamp(col.as_primitive::<Date64Type>().value_as_datetime(row)),
        DataType::Timestamp(unit, _) => timestamp(match unit {
            TimeUnit::Second => col.as_primitive::<TimestampSecondType>().value_as_datetime(row),
            TimeUnit::Millisecond => {
                col.as_primitive::<TimestampMillisecondType>().value_as_datetime(row)
            }
            TimeUnit::Microsecond => {
                col.as_primitive::<TimestampMicrosecondType>().value_as_datetime(row)
            }
            TimeUnit::Nanosecond => {
                col.as_primitive::<TimestampNanosecondType>().value_as_datetime(row)
            }
        }),
        other => RawValue::Text(format!("{other:?}")),
    }
}
