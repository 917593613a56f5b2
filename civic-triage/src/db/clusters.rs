//! Case cluster operations

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::db_err;
use crate::error::TriageError;
use crate::models::{from_epoch, CaseCluster};

impl CaseCluster {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            category: row.get("category")?,
            location_zone: row.get("location_zone")?,
            avg_severity: row.get("avg_severity")?,
            complaint_count: row.get("complaint_count")?,
            created_at: from_epoch(row.get("created_at")?),
        })
    }
}

pub fn insert_cluster(
    conn: &Connection,
    name: &str,
    category: Option<&str>,
    location_zone: &str,
    avg_severity: f64,
    complaint_count: i64,
) -> Result<i64, TriageError> {
    conn.execute(
        r#"
        INSERT INTO case_clusters (name, category, location_zone, avg_severity, complaint_count, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
        params![name, category, location_zone, avg_severity, complaint_count, Utc::now().timestamp()],
    )
    .map_err(db_err("Insert cluster"))?;
    Ok(conn.last_insert_rowid())
}

pub fn get_cluster(conn: &Connection, id: i64) -> Result<Option<CaseCluster>, TriageError> {
    conn.query_row("SELECT * FROM case_clusters WHERE id = ?", params![id], CaseCluster::from_row)
        .optional()
        .map_err(db_err("Get cluster"))
}

pub fn list_clusters(conn: &Connection) -> Result<Vec<CaseCluster>, TriageError> {
    let mut stmt = conn
        .prepare("SELECT * FROM case_clusters ORDER BY id")
        .map_err(db_err("Prepare cluster list"))?;
    let rows = stmt.query_map([], CaseCluster::from_row).map_err(db_err("Cluster list"))?;
    rows.collect::<Result<Vec<_>, _>>().map_err(db_err("Cluster row parse"))
}

/// True member count: complaints referencing the cluster, optionally excluding one.
pub fn count_members(conn: &Connection, cluster_id: i64, excluding: Option<i64>) -> Result<i64, TriageError> {
    conn.query_row(
        "SELECT COUNT(*) FROM complaints WHERE cluster_id = ?1 AND (?2 IS NULL OR id != ?2)",
        params![cluster_id, excluding],
        |row| row.get(0),
    )
    .map_err(db_err("Count cluster members"))
}

/// Member count and severity sum, optionally excluding one complaint.
pub fn member_stats(conn: &Connection, cluster_id: i64, excluding: Option<i64>) -> Result<(i64, f64), TriageError> {
    conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(severity_score), 0) FROM complaints
         WHERE cluster_id = ?1 AND (?2 IS NULL OR id != ?2)",
        params![cluster_id, excluding],
        |row| Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?)),
    )
    .map_err(db_err("Cluster member stats"))
}

pub fn update_stats(conn: &Connection, cluster_id: i64, complaint_count: i64, avg_severity: f64) -> Result<(), TriageError> {
    conn.execute(
        "UPDATE case_clusters SET complaint_count = ?, avg_severity = ? WHERE id = ?",
        params![complaint_count, avg_severity, cluster_id],
    )
    .map_err(db_err("Update cluster stats"))?;
    Ok(())
}
