//! Database schema definitions

use rusqlite::Connection;
use tracing::info;

use crate::error::TriageError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<(), TriageError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new database schema v{}", SCHEMA_VERSION);
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!("Migrating schema from v{} to v{}", current_version, SCHEMA_VERSION);
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else {
        info!("Database schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &Connection) -> Result<i32, TriageError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )
    .map_err(|e| TriageError::Database(format!("Failed to create schema_version table: {}", e)))?;

    let version: i32 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .unwrap_or(0);

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<(), TriageError> {
    conn.execute("DELETE FROM schema_version", [])
        .map_err(|e| TriageError::Database(format!("Failed to clear schema_version: {}", e)))?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])
        .map_err(|e| TriageError::Database(format!("Failed to set schema_version: {}", e)))?;
    Ok(())
}

fn create_tables(conn: &Connection) -> Result<(), TriageError> {
    conn.execute_batch(REFERENCE_SCHEMA)
        .map_err(|e| TriageError::Database(format!("Failed to create reference tables: {}", e)))?;

    conn.execute_batch(COMPLAINTS_SCHEMA)
        .map_err(|e| TriageError::Database(format!("Failed to create complaint tables: {}", e)))?;

    conn.execute_batch(INDEXES_SCHEMA)
        .map_err(|e| TriageError::Database(format!("Failed to create indexes: {}", e)))?;

    Ok(())
}

/// Departments and clusters
const REFERENCE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS departments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    description TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS case_clusters (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    category TEXT,
    location_zone TEXT NOT NULL,
    avg_severity REAL NOT NULL,
    complaint_count INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);
"#;

/// Complaints and their evidence
const COMPLAINTS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS complaints (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    title TEXT NOT NULL,
    description TEXT NOT NULL,
    title_en TEXT,
    summary_en TEXT,
    detected_language TEXT,
    category TEXT,
    status TEXT NOT NULL DEFAULT 'SUBMITTED',
    severity_score INTEGER NOT NULL DEFAULT 1 CHECK (severity_score BETWEEN 1 AND 10),
    location TEXT NOT NULL,
    filed_at INTEGER NOT NULL,
    department_id INTEGER REFERENCES departments(id),
    cluster_id INTEGER REFERENCES case_clusters(id),
    analysis_status TEXT NOT NULL DEFAULT 'pending'
        CHECK (analysis_status IN ('pending', 'processing', 'completed', 'failed')),
    triage_json TEXT,
    manifest_digest TEXT,
    anchor_ref TEXT,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS evidence (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    complaint_id INTEGER NOT NULL REFERENCES complaints(id),
    file_type TEXT NOT NULL CHECK (file_type IN ('image', 'audio', 'document', 'video')),
    file_path TEXT NOT NULL,
    file_hash TEXT NOT NULL UNIQUE,
    latitude REAL,
    longitude REAL,
    captured_at INTEGER,
    is_valid INTEGER,
    remarks TEXT,
    detected_text TEXT,
    transcript TEXT,
    score REAL,
    uploaded_at INTEGER NOT NULL
);
"#;

const INDEXES_SCHEMA: &str = r#"
CREATE INDEX IF NOT EXISTS idx_complaints_analysis_status ON complaints(analysis_status);
CREATE INDEX IF NOT EXISTS idx_complaints_cluster ON complaints(cluster_id);
CREATE INDEX IF NOT EXISTS idx_complaints_department ON complaints(department_id);
CREATE INDEX IF NOT EXISTS idx_evidence_complaint ON evidence(complaint_id);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_severity_check_constraint() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let result = conn.execute(
            "INSERT INTO complaints (user_id, title, description, severity_score, location, filed_at, updated_at)
             VALUES (1, 't', 'd', 11, 'x', 0, 0)",
            [],
        );
        assert!(result.is_err());
    }
}
