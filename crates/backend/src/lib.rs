//! SQL backend adapter for the replicated log store.
//!
//! The log store composes SQL statements as strings (log payloads are
//! themselves statements to be executed against the state machine), so the
//! adapter exposes a deliberately narrow, string-oriented surface:
//!
//! - `exec_write`: run a mutating statement, return rows affected
//! - `exec_local_write`: same execution, but flagged as a local/bootstrap
//!   write that must never be routed through replication
//! - `exec_read`: run a query, invoking a callback once per result row
//!   with text-rendered columns
//! - `escape`: make a string safe for embedding in a single-quoted literal
//!
//! The adapter serializes concurrent writers internally. The log store also
//! holds its own mutex around multi-statement operations (truncate,
//! replicate), so this is a second line of defense, not the only one.

mod sqlite;

pub use sqlite::SqliteBackend;

use common::StoreResult;

/// Per-row callback for `exec_read`. Columns arrive rendered as text,
/// `None` for SQL NULL. Returning an error aborts the scan.
pub type RowHandler<'a> = &'a mut dyn FnMut(&[Option<String>]) -> StoreResult<()>;

/// Typed wrapper over the SQL store consumed by the log store.
pub trait SqlBackend: Send + Sync {
    /// Execute a mutating statement. Returns the number of rows affected.
    fn exec_write(&self, stmt: &str) -> StoreResult<usize>;

    /// Execute a mutating statement on this node only, outside replication.
    /// Used at bootstrap (schema creation) and for maintenance writes.
    fn exec_local_write(&self, stmt: &str) -> StoreResult<usize>;

    /// Execute a query, calling `row` once per result row.
    fn exec_read(&self, stmt: &str, row: RowHandler<'_>) -> StoreResult<()>;

    /// Escape `raw` for embedding inside a single-quoted SQL literal.
    fn escape(&self, raw: &str) -> String;
}
