//! Complaint CRUD operations

use std::collections::BTreeSet;

use chrono::Utc;
use civic_oracle::TextTriage;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, warn};

use super::{db_err, parse_column};
use crate::error::TriageError;
use crate::models::{from_epoch, AnalysisStatus, Complaint, ComplaintStatus, NewComplaint};

impl Complaint {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        let id: i64 = row.get("id")?;
        let triage_json: Option<String> = row.get("triage_json")?;
        let severity: i64 = row.get("severity_score")?;
        Ok(Self {
            id,
            user_id: row.get("user_id")?,
            title: row.get("title")?,
            description: row.get("description")?,
            title_en: row.get("title_en")?,
            summary_en: row.get("summary_en")?,
            detected_language: row.get("detected_language")?,
            category: row.get("category")?,
            status: parse_column(row, "status")?,
            severity_score: severity.clamp(1, 10) as u8,
            location: row.get("location")?,
            filed_at: from_epoch(row.get("filed_at")?),
            department_id: row.get("department_id")?,
            cluster_id: row.get("cluster_id")?,
            analysis_status: parse_column(row, "analysis_status")?,
            cached_triage: triage_json.and_then(|json| decode_cached_triage(id, &json)),
            manifest_digest: row.get("manifest_digest")?,
            anchor_ref: row.get("anchor_ref")?,
            is_deleted: row.get("is_deleted")?,
        })
    }
}

/// Decode a cached triage. A corrupt cache is logged and treated as absent so
/// the next run re-queries the oracle.
fn decode_cached_triage(complaint_id: i64, json: &str) -> Option<TextTriage> {
    match serde_json::from_str(json) {
        Ok(triage) => Some(triage),
        Err(e) => {
            warn!(complaint_id, error = %e, "Cached triage is corrupt, ignoring");
            None
        }
    }
}

/// Insert a complaint, returning its id
pub fn insert_complaint(conn: &Connection, input: &NewComplaint) -> Result<i64, TriageError> {
    let now = Utc::now().timestamp();
    let filed_at = input.filed_at.map(|t| t.timestamp()).unwrap_or(now);

    conn.execute(
        r#"
        INSERT INTO complaints (user_id, title, description, severity_score, location,
                                filed_at, department_id, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            input.user_id,
            input.title,
            input.description,
            input.severity_score.clamp(1, 10),
            input.location,
            filed_at,
            input.department_id,
            now,
        ],
    )
    .map_err(db_err("Insert complaint"))?;

    let id = conn.last_insert_rowid();
    debug!(complaint_id = id, "Complaint filed");
    Ok(id)
}

/// Get a complaint by id, including soft-deleted ones
pub fn get_complaint(conn: &Connection, id: i64) -> Result<Option<Complaint>, TriageError> {
    conn.query_row("SELECT * FROM complaints WHERE id = ?", params![id], Complaint::from_row)
        .optional()
        .map_err(db_err("Get complaint"))
}

/// Get a complaint or fail with `NotFound`
pub fn require_complaint(conn: &Connection, id: i64) -> Result<Complaint, TriageError> {
    get_complaint(conn, id)?.ok_or(TriageError::NotFound(id))
}

pub fn set_analysis_status(conn: &Connection, id: i64, status: AnalysisStatus) -> Result<(), TriageError> {
    let changed = conn
        .execute(
            "UPDATE complaints SET analysis_status = ?, updated_at = ? WHERE id = ?",
            params![status.as_str(), Utc::now().timestamp(), id],
        )
        .map_err(db_err("Set analysis status"))?;
    if changed == 0 {
        return Err(TriageError::NotFound(id));
    }
    Ok(())
}

/// Move to `processing`. A forced re-analysis also drops the cached triage.
pub fn begin_analysis(conn: &Connection, id: i64, discard_cached_triage: bool) -> Result<(), TriageError> {
    let sql = if discard_cached_triage {
        "UPDATE complaints SET analysis_status = 'processing', triage_json = NULL, updated_at = ? WHERE id = ?"
    } else {
        "UPDATE complaints SET analysis_status = 'processing', updated_at = ? WHERE id = ?"
    };
    let changed = conn
        .execute(sql, params![Utc::now().timestamp(), id])
        .map_err(db_err("Begin analysis"))?;
    if changed == 0 {
        return Err(TriageError::NotFound(id));
    }
    Ok(())
}

/// Persist the text-oracle result as soon as it arrives.
pub fn save_triage(conn: &Connection, id: i64, triage: &TextTriage) -> Result<(), TriageError> {
    let json = serde_json::to_string(triage)?;
    conn.execute(
        r#"
        UPDATE complaints
        SET title_en = ?, summary_en = ?, detected_language = ?, category = ?,
            triage_json = ?, updated_at = ?
        WHERE id = ?
        "#,
        params![
            triage.translated_title_en,
            triage.summary_en,
            triage.detected_language,
            triage.category,
            json,
            Utc::now().timestamp(),
            id,
        ],
    )
    .map_err(db_err("Save triage"))?;
    Ok(())
}

/// Assign a department unless one is already set. Returns whether it was set.
pub fn set_department_if_unassigned(conn: &Connection, id: i64, department_id: i64) -> Result<bool, TriageError> {
    let changed = conn
        .execute(
            "UPDATE complaints SET department_id = ?, updated_at = ? WHERE id = ? AND department_id IS NULL",
            params![department_id, Utc::now().timestamp(), id],
        )
        .map_err(db_err("Set department"))?;
    Ok(changed > 0)
}

pub fn set_cluster(conn: &Connection, id: i64, cluster_id: i64) -> Result<(), TriageError> {
    conn.execute(
        "UPDATE complaints SET cluster_id = ?, updated_at = ? WHERE id = ?",
        params![cluster_id, Utc::now().timestamp(), id],
    )
    .map_err(db_err("Set cluster"))?;
    Ok(())
}

/// Cluster ids currently held by the given complaints, in input order.
pub fn cluster_ids_of(conn: &Connection, ids: &[i64]) -> Result<Vec<(i64, Option<i64>)>, TriageError> {
    let mut stmt = conn
        .prepare("SELECT cluster_id FROM complaints WHERE id = ?")
        .map_err(db_err("Prepare cluster lookup"))?;
    let mut result = Vec::with_capacity(ids.len());
    for id in ids {
        let cluster: Option<Option<i64>> = stmt
            .query_row(params![id], |row| row.get(0))
            .optional()
            .map_err(db_err("Cluster lookup"))?;
        if let Some(cluster) = cluster {
            result.push((*id, cluster));
        }
    }
    Ok(result)
}

/// Write the final score and complete the analysis.
///
/// Leaves `cluster_id` alone; the cluster step owns it. Clears any anchor
/// reference from a previous run since the digest changed.
pub fn finalize(conn: &Connection, id: i64, severity: u8, manifest_digest: &str) -> Result<(), TriageError> {
    conn.execute(
        r#"
        UPDATE complaints
        SET severity_score = ?, analysis_status = 'completed', manifest_digest = ?,
            anchor_ref = NULL, updated_at = ?
        WHERE id = ?
        "#,
        params![severity.clamp(1, 10), manifest_digest, Utc::now().timestamp(), id],
    )
    .map_err(db_err("Finalize complaint"))?;
    Ok(())
}

/// Replace the stored digest after an edit to anchored facts; the old anchor no longer applies.
pub fn set_manifest_digest(conn: &Connection, id: i64, manifest_digest: &str) -> Result<(), TriageError> {
    conn.execute(
        "UPDATE complaints SET manifest_digest = ?, anchor_ref = NULL, updated_at = ? WHERE id = ?",
        params![manifest_digest, Utc::now().timestamp(), id],
    )
    .map_err(db_err("Set manifest digest"))?;
    Ok(())
}

pub fn record_anchor(conn: &Connection, id: i64, tx_ref: &str) -> Result<(), TriageError> {
    conn.execute(
        "UPDATE complaints SET anchor_ref = ?, updated_at = ? WHERE id = ?",
        params![tx_ref, Utc::now().timestamp(), id],
    )
    .map_err(db_err("Record anchor"))?;
    Ok(())
}

/// Apply whitelisted official edits. `None` fields are left untouched.
pub fn update_official_fields(
    conn: &Connection,
    id: i64,
    status: Option<ComplaintStatus>,
    severity: Option<u8>,
) -> Result<(), TriageError> {
    conn.execute(
        r#"
        UPDATE complaints
        SET status = COALESCE(?, status),
            severity_score = COALESCE(?, severity_score),
            updated_at = ?
        WHERE id = ?
        "#,
        params![
            status.map(|s| s.as_str()),
            severity,
            Utc::now().timestamp(),
            id
        ],
    )
    .map_err(db_err("Update complaint"))?;
    Ok(())
}

/// Policy-compliant deletion: the row stays, flagged.
pub fn soft_delete(conn: &Connection, id: i64) -> Result<(), TriageError> {
    let changed = conn
        .execute(
            "UPDATE complaints SET is_deleted = 1, updated_at = ? WHERE id = ?",
            params![Utc::now().timestamp(), id],
        )
        .map_err(db_err("Soft delete"))?;
    if changed == 0 {
        return Err(TriageError::NotFound(id));
    }
    Ok(())
}

/// Remove the row entirely. Administrative only; the audit flags anchored ids removed this way.
pub fn hard_delete(conn: &Connection, id: i64) -> Result<(), TriageError> {
    conn.execute("DELETE FROM evidence WHERE complaint_id = ?", params![id])
        .map_err(db_err("Delete evidence"))?;
    conn.execute("DELETE FROM complaints WHERE id = ?", params![id])
        .map_err(db_err("Delete complaint"))?;
    Ok(())
}

fn first_id(row: &Row) -> rusqlite::Result<i64> {
    row.get(0)
}

fn query_ids(conn: &Connection, sql: &str, param: Option<&str>) -> Result<Vec<i64>, TriageError> {
    let mut stmt = conn.prepare(sql).map_err(db_err("Prepare id query"))?;
    let rows = match param {
        Some(p) => stmt.query_map(params![p], first_id),
        None => stmt.query_map([], first_id),
    }
    .map_err(db_err("Id query"))?;
    rows.collect::<Result<Vec<_>, _>>().map_err(db_err("Id row parse"))
}

/// Every complaint id, soft-deleted included
pub fn list_all_ids(conn: &Connection) -> Result<BTreeSet<i64>, TriageError> {
    Ok(query_ids(conn, "SELECT id FROM complaints", None)?.into_iter().collect())
}

pub fn list_archived_ids(conn: &Connection) -> Result<Vec<i64>, TriageError> {
    query_ids(conn, "SELECT id FROM complaints WHERE is_deleted = 1 ORDER BY id", None)
}

pub fn list_ids_by_analysis_status(conn: &Connection, status: AnalysisStatus) -> Result<Vec<i64>, TriageError> {
    query_ids(
        conn,
        "SELECT id FROM complaints WHERE analysis_status = ? ORDER BY id",
        Some(status.as_str()),
    )
}

/// Completed complaints with a digest but no anchor reference.
pub fn list_unanchored(conn: &Connection) -> Result<Vec<(i64, String)>, TriageError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, manifest_digest FROM complaints
             WHERE analysis_status = 'completed' AND anchor_ref IS NULL AND manifest_digest IS NOT NULL
             ORDER BY id",
        )
        .map_err(db_err("Prepare unanchored query"))?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))
        .map_err(db_err("Unanchored query"))?;
    rows.collect::<Result<Vec<_>, _>>().map_err(db_err("Unanchored row parse"))
}
