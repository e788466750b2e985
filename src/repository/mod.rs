//! SQLite persistence for product identities and their observation history.
//!
//! The store owns one connection for its whole lifetime. Every write runs in
//! autocommit mode, so it is durable once the call returns.

mod helpers;
mod observations;
mod products;
mod schema;

pub use observations::ObservationQuery;

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::functions::FunctionFlags;
use rusqlite::{Connection, ErrorCode};
use thiserror::Error;
use tracing::debug;

use crate::models::ProductId;

/// Errors raised by the store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database unavailable: {0}")]
    Unavailable(#[from] rusqlite::Error),

    #[error("Failed to prepare database location: {0}")]
    Io(#[from] std::io::Error),

    #[error("Integrity violation: {0}")]
    Integrity(String),

    #[error("Observation references unknown product {0}")]
    Referential(ProductId),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Handle to the observation database.
pub struct Store {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Store {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        debug!("Opening store at {}", path.display());
        let conn = Connection::open(path)?;
        Self::init(conn, Some(path.to_path_buf()))
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = FULL;
            "#,
        )?;
        register_functions(&conn)?;
        schema::init_schema(&conn)?;
        Ok(Self { conn, path })
    }

    /// Database file, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Close the connection, surfacing any error SQLite reports on close.
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| StoreError::Unavailable(e))
    }
}

/// SQLite's own `lower()` and `LIKE` only fold ASCII.
fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "fold_case",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let text: Option<String> = ctx.get(0)?;
            Ok(text.map(|t| t.to_lowercase()))
        },
    )
}

/// Map a failed write: constraint and trigger violations are integrity
/// errors, anything else means the database is unusable.
pub(crate) fn classify_write_error(e: rusqlite::Error) -> StoreError {
    match e {
        rusqlite::Error::SqliteFailure(ref err, ref message)
            if err.code == ErrorCode::ConstraintViolation =>
        {
            StoreError::Integrity(message.clone().unwrap_or_else(|| err.to_string()))
        }
        other => StoreError::Unavailable(other),
    }
}

/// Convert a single-row query result, mapping "no rows" to `None`.
pub(crate) fn to_option<T>(result: rusqlite::Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Timestamps are stored as second-resolution RFC 3339 UTC text, which
/// sorts chronologically.
pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub(crate) fn parse_timestamp(s: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}
