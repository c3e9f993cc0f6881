use chrono::{DateTime, Utc};
use factorlab_core::{Error, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

pub(crate) type SharedConnection = Arc<Mutex<Connection>>;

/// Open (creating parent dirs) a SQLite file in WAL mode.
pub(crate) fn open_connection(db_path: &Path, what: &str) -> Result<SharedConnection> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::Storage(format!("Failed to create db directory: {}", e)))?;
    }

    let conn = Connection::open(db_path)
        .map_err(|e| Error::Storage(format!("Failed to open {} db: {}", what, e)))?;

    // Several stores share one file
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;").ok();

    Ok(Arc::new(Mutex::new(conn)))
}

pub(crate) fn lock(conn: &SharedConnection) -> Result<MutexGuard<'_, Connection>> {
    conn.lock().map_err(|e| Error::Storage(format!("Lock error: {}", e)))
}

pub(crate) fn storage_err(context: &str) -> impl Fn(rusqlite::Error) -> Error + '_ {
    move |e| Error::Storage(format!("{}: {}", context, e))
}

/// Decode a JSON text column, reporting failures against column `col`.
pub(crate) fn from_json<T: serde::de::DeserializeOwned>(raw: &str, col: usize) -> rusqlite::Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, Box::new(e)))
}

pub(crate) fn parse_ts(raw: &str, col: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, Box::new(e)))
}
