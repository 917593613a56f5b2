//! SQLite relational store for complaints, evidence, clusters and departments
//!
//! ## Tables
//!
//! - `complaints` - Complaint facts, triage results, analysis status, anchor reference
//! - `evidence` - Attached files (content hash unique across the system) and verification results
//! - `case_clusters` - Detected hotspots with running average severity and member count
//! - `departments` - Classification targets
//!
//! Every operation is a free function over `&Connection` so the same code
//! runs inside and outside a transaction; `Database` owns the connection.

pub mod clusters;
pub mod complaints;
pub mod departments;
pub mod evidence;
pub mod schema;

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::TriageError;

/// SQLite database for the triage pipeline
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create the database file
    pub fn open(path: &Path) -> Result<Self, TriageError> {
        info!("Opening SQLite database at {:?}", path);

        let conn = Connection::open(path)
            .map_err(|e| TriageError::Database(format!("Failed to open SQLite: {}", e)))?;

        // Enable WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA busy_timeout=5000;")
            .map_err(|e| TriageError::Database(format!("Failed to set PRAGMA: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, TriageError> {
        debug!("Opening in-memory SQLite database");

        let conn = Connection::open_in_memory()
            .map_err(|e| TriageError::Database(format!("Failed to open in-memory SQLite: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<(), TriageError> {
        self.with_conn(schema::init_schema)
    }

    /// Run a read or single-statement write
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, TriageError>
    where
        F: FnOnce(&Connection) -> Result<T, TriageError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| TriageError::Database(format!("Lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Execute a write operation with exclusive access (for transactions)
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T, TriageError>
    where
        F: FnOnce(&mut Connection) -> Result<T, TriageError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| TriageError::Database(format!("Lock poisoned: {}", e)))?;
        f(&mut conn)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats, TriageError> {
        self.with_conn(|conn| {
            let count = |sql: &str| -> Result<u64, TriageError> {
                conn.query_row(sql, [], |row| row.get::<_, i64>(0))
                    .map(|n| n as u64)
                    .map_err(|e| TriageError::Database(format!("Query failed: {}", e)))
            };

            Ok(DbStats {
                complaint_count: count("SELECT COUNT(*) FROM complaints")?,
                evidence_count: count("SELECT COUNT(*) FROM evidence")?,
                cluster_count: count("SELECT COUNT(*) FROM case_clusters")?,
                department_count: count("SELECT COUNT(*) FROM departments")?,
                pending_analysis: count(
                    "SELECT COUNT(*) FROM complaints WHERE analysis_status IN ('pending', 'processing')",
                )?,
            })
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub complaint_count: u64,
    pub evidence_count: u64,
    pub cluster_count: u64,
    pub department_count: u64,
    pub pending_analysis: u64,
}

/// Map a rusqlite error into the crate error with context.
pub(crate) fn db_err(context: &'static str) -> impl Fn(rusqlite::Error) -> TriageError {
    move |e| TriageError::Database(format!("{} failed: {}", context, e))
}

/// Read a TEXT column holding one of our closed enums.
pub(crate) fn parse_column<T>(row: &rusqlite::Row, column: &str) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: String = row.get(column)?;
    raw.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, e.into())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_on_disk_and_stats() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("triage.db")).unwrap();
        let stats = db.stats().unwrap();
        assert_eq!(stats.complaint_count, 0);
        assert_eq!(stats.department_count, 0);
    }
}
