use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use log::{debug, info};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, params};

use super::loader;
use super::model::{RawTable, RawValue};
use crate::error::SourceError;

const SQLITE_MAGIC: &[u8] = b"SQLite format 3\0";

// ---------------------------------------------------------------------------
// TableSource – the catalog capability
// ---------------------------------------------------------------------------

/// A read-only source of named tables.
///
/// Implementations are shared across worker threads, so any handle that is
/// not `Sync` itself has to be serialized internally.
pub trait TableSource: Send + Sync {
    fn list_tables(&self) -> Result<Vec<String>, SourceError>;
    fn read_table(&self, name: &str) -> Result<RawTable, SourceError>;
}

// ---------------------------------------------------------------------------
// SQLite
// ---------------------------------------------------------------------------

/// Every user table in an SQLite database file.
pub struct SqliteSource {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl SqliteSource {
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self, SourceError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(busy_timeout)?;
        debug!("opened sqlite dataset {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            conn: Mutex::new(conn),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TableSource for SqliteSource {
    fn list_tables(&self) -> Result<Vec<String>, SourceError> {
        let conn = self.conn.lock().map_err(|_| SourceError::Poisoned)?;
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names)
    }

    fn read_table(&self, name: &str) -> Result<RawTable, SourceError> {
        let conn = self.conn.lock().map_err(|_| SourceError::Poisoned)?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            params![name],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(SourceError::NoSuchTable(name.to_string()));
        }

        let mut stmt = conn.prepare(&format!("SELECT * FROM {}", quote_ident(name)))?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let width = columns.len();

        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut cells = Vec::with_capacity(width);
            for i in 0..width {
                cells.push(sql_to_value(row.get_ref(i)?));
            }
            out.push(cells);
        }

        Ok(RawTable::new(name, columns, out))
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn sql_to_value(v: ValueRef<'_>) -> RawValue {
    match v {
        ValueRef::Null => RawValue::Null,
        ValueRef::Integer(i) => RawValue::Integer(i),
        ValueRef::Real(f) => RawValue::Float(f),
        ValueRef::Text(t) | ValueRef::Blob(t) => {
            RawValue::Text(String::from_utf8_lossy(t).into_owned())
        }
    }
}

// ---------------------------------------------------------------------------
// Single file (csv / json / parquet)
// ---------------------------------------------------------------------------

/// One table backed by one file, named after the file stem.
pub struct FileSource {
    path: PathBuf,
    name: String,
}

impl FileSource {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            name: loader::table_name_for(path),
        }
    }
}

impl TableSource for FileSource {
    fn list_tables(&self) -> Result<Vec<String>, SourceError> {
        Ok(vec![self.name.clone()])
    }

    fn read_table(&self, name: &str) -> Result<RawTable, SourceError> {
        if name != self.name {
            return Err(SourceError::NoSuchTable(name.to_string()));
        }
        loader::load_file(&self.path).map_err(SourceError::Load)
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Tables held in memory, listed in insertion order.
#[derive(Debug, Default, Clone)]
pub struct MemorySource {
    tables: Vec<RawTable>,
}

impl MemorySource {
    pub fn new(tables: Vec<RawTable>) -> Self {
        Self { tables }
    }

    pub fn insert(&mut self, table: RawTable) {
        self.tables.retain(|t| t.name != table.name);
        self.tables.push(table);
    }
}

impl TableSource for MemorySource {
    fn list_tables(&self) -> Result<Vec<String>, SourceError> {
        Ok(self.tables.iter().map(|t| t.name.clone()).collect())
    }

    fn read_table(&self, name: &str) -> Result<RawTable, SourceError> {
        self.tables
            .iter()
            .find(|t| t.name == name)
            .cloned()
            .ok_or_else(|| SourceError::NoSuchTable(name.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Dataset materialization
// ---------------------------------------------------------------------------

/// Write a fetched dataset blob into `work_dir` and open it.
///
/// SQLite files are recognized by their header; anything else must carry a
/// supported file extension in its location.
pub fn open_dataset(
    bytes: &[u8],
    location: &str,
    work_dir: &Path,
    busy_timeout: Duration,
) -> Result<Box<dyn TableSource>> {
    std::fs::create_dir_all(work_dir)
        .with_context(|| format!("creating work dir {}", work_dir.display()))?;
    let local = work_dir.join(file_name_of(location));
    std::fs::write(&local, bytes)
        .with_context(|| format!("materializing dataset to {}", local.display()))?;
    info!("dataset {location} → {} ({} bytes)", local.display(), bytes.len());

    if bytes.starts_with(SQLITE_MAGIC) {
        let source = SqliteSource::open(&local, busy_timeout)
            .with_context(|| format!("opening sqlite dataset {}", local.display()))?;
        return Ok(Box::new(source));
    }
    if loader::is_supported(&local) {
        return Ok(Box::new(FileSource::new(&local)));
    }
    bail!("{location}: not an SQLite database and not a csv/json/parquet file")
}

/// Last path segment of a URL or filesystem path, without query string.
fn file_name_of(location: &str) -> String {
    let trimmed = location.split(['?', '#']).next().unwrap_or(location);
    trimmed
        .rsplit(['/', '\\'])
        .find(|s| !s.is_empty())
        .unwrap_or("dataset")
        .to_string()
}
