//! SQLite implementation of the backend adapter.
//!
//! A single `rusqlite::Connection` behind a mutex: SQLite is a
//! single-writer engine and the log store's statements are short, so one
//! serialized connection is both correct and sufficient.

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use common::{StoreError, StoreResult};
use rusqlite::types::ValueRef;
use rusqlite::Connection;

use crate::{RowHandler, SqlBackend};

pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Open (or create) a database file.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| StoreError::Backend(format!("open {}: {e}", path.as_ref().display())))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open a private in-memory database. Useful in tests; the data does
    /// not survive the backend.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::Backend(format!("open in-memory: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn run_write(&self, stmt: &str) -> StoreResult<usize> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute(stmt, [])
            .map_err(|e| StoreError::Backend(format!("exec: {e}")))
    }
}

impl SqlBackend for SqliteBackend {
    fn exec_write(&self, stmt: &str) -> StoreResult<usize> {
        self.run_write(stmt)
    }

    fn exec_local_write(&self, stmt: &str) -> StoreResult<usize> {
        // SQLite has no replication hook to bypass; the distinction is kept
        // so callers stay honest about which writes are log-visible.
        self.run_write(stmt)
    }

    fn exec_read(&self, stmt: &str, row: RowHandler<'_>) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let mut prepared = conn
            .prepare(stmt)
            .map_err(|e| StoreError::Backend(format!("prepare: {e}")))?;
        let columns = prepared.column_count();
        let mut rows = prepared
            .query([])
            .map_err(|e| StoreError::Backend(format!("query: {e}")))?;

        while let Some(r) = rows
            .next()
            .map_err(|e| StoreError::Backend(format!("scan: {e}")))?
        {
            let mut values = Vec::with_capacity(columns);
            for i in 0..columns {
                let value = r
                    .get_ref(i)
                    .map_err(|e| StoreError::Backend(format!("column {i}: {e}")))?;
                values.push(render(value));
            }
            row(&values)?;
        }
        Ok(())
    }

    fn escape(&self, raw: &str) -> String {
        raw.replace('\'', "''")
    }
}

/// Render a SQLite value the way the C callback API would: text, or `None`
/// for NULL.
fn render(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(n) => Some(n.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(t) => Some(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Some(String::from_utf8_lossy(b).into_owned()),
    }
}
