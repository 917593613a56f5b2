//! Evidence CRUD operations

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, warn};

use super::{db_err, parse_column};
use crate::error::TriageError;
use crate::models::{from_epoch, Evidence, NewEvidence};

impl Evidence {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        let captured_at: Option<i64> = row.get("captured_at")?;
        Ok(Self {
            id: row.get("id")?,
            complaint_id: row.get("complaint_id")?,
            file_type: parse_column(row, "file_type")?,
            file_path: row.get("file_path")?,
            file_hash: row.get("file_hash")?,
            latitude: row.get("latitude")?,
            longitude: row.get("longitude")?,
            captured_at: captured_at.map(from_epoch),
            is_valid: row.get("is_valid")?,
            remarks: row.get("remarks")?,
            detected_text: row.get("detected_text")?,
            transcript: row.get("transcript")?,
            score: row.get("score")?,
            uploaded_at: from_epoch(row.get("uploaded_at")?),
        })
    }
}

/// What the evidence verifier learned about one item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvidenceVerification {
    pub is_valid: Option<bool>,
    pub remarks: Option<String>,
    pub detected_text: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub captured_at: Option<DateTime<Utc>>,
    pub score: Option<f64>,
}

/// Whether a content hash is already stored anywhere in the system
pub fn hash_exists(conn: &Connection, file_hash: &str) -> Result<bool, TriageError> {
    conn.query_row(
        "SELECT 1 FROM evidence WHERE file_hash = ?",
        params![file_hash],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
    .map_err(db_err("Hash lookup"))
}

/// Attach evidence, rejecting a content hash seen before.
pub fn insert_evidence(conn: &Connection, input: &NewEvidence) -> Result<i64, TriageError> {
    let file_hash = input.file_hash.trim().to_ascii_lowercase();
    if hash_exists(conn, &file_hash)? {
        warn!(complaint_id = input.complaint_id, file_hash = %file_hash, "Duplicate evidence rejected");
        return Err(TriageError::DuplicateEvidence(file_hash));
    }

    conn.execute(
        r#"
        INSERT INTO evidence (complaint_id, file_type, file_path, file_hash, uploaded_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
        params![
            input.complaint_id,
            input.file_type.as_str(),
            input.file_path,
            file_hash,
            Utc::now().timestamp(),
        ],
    )
    .map_err(|e| match e {
        // Lost a race with a concurrent upload of the same file
        rusqlite::Error::SqliteFailure(err, _) if err.code == rusqlite::ErrorCode::ConstraintViolation => {
            TriageError::DuplicateEvidence(file_hash.clone())
        }
        other => TriageError::Database(format!("Insert evidence failed: {}", other)),
    })?;

    let id = conn.last_insert_rowid();
    debug!(complaint_id = input.complaint_id, evidence_id = id, "Evidence attached");
    Ok(id)
}

pub fn list_for_complaint(conn: &Connection, complaint_id: i64) -> Result<Vec<Evidence>, TriageError> {
    let mut stmt = conn
        .prepare("SELECT * FROM evidence WHERE complaint_id = ? ORDER BY id")
        .map_err(db_err("Prepare evidence list"))?;
    let rows = stmt
        .query_map(params![complaint_id], Evidence::from_row)
        .map_err(db_err("Evidence list"))?;
    rows.collect::<Result<Vec<_>, _>>().map_err(db_err("Evidence row parse"))
}

/// Content hashes of a complaint's evidence (the manifest inventory).
pub fn hashes_for_complaint(conn: &Connection, complaint_id: i64) -> Result<Vec<String>, TriageError> {
    let mut stmt = conn
        .prepare("SELECT file_hash FROM evidence WHERE complaint_id = ?")
        .map_err(db_err("Prepare hash list"))?;
    let rows = stmt
        .query_map(params![complaint_id], |row| row.get::<_, String>(0))
        .map_err(db_err("Hash list"))?;
    rows.collect::<Result<Vec<_>, _>>().map_err(db_err("Hash row parse"))
}

pub fn record_verification(conn: &Connection, evidence_id: i64, result: &EvidenceVerification) -> Result<(), TriageError> {
    conn.execute(
        r#"
        UPDATE evidence
        SET is_valid = ?, remarks = ?, detected_text = ?,
            latitude = COALESCE(?, latitude), longitude = COALESCE(?, longitude),
            captured_at = COALESCE(?, captured_at), score = ?
        WHERE id = ?
        "#,
        params![
            result.is_valid,
            result.remarks,
            result.detected_text,
            result.latitude,
            result.longitude,
            result.captured_at.map(|t| t.timestamp()),
            result.score,
            evidence_id,
        ],
    )
    .map_err(db_err("Record verification"))?;
    Ok(())
}

pub fn record_transcript(conn: &Connection, evidence_id: i64, transcript: &str) -> Result<(), TriageError> {
    conn.execute(
        "UPDATE evidence SET transcript = ? WHERE id = ?",
        params![transcript, evidence_id],
    )
    .map_err(db_err("Record transcript"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{complaints, Database};
    use crate::models::{FileType, NewComplaint};

    fn setup() -> (Database, i64) {
        let db = Database::open_in_memory().unwrap();
        let id = db
            .with_conn(|conn| complaints::insert_complaint(conn, &NewComplaint::new(1, "t", "d", "Ward 1")))
            .unwrap();
        (db, id)
    }

    fn evidence(complaint_id: i64, hash: &str) -> NewEvidence {
        NewEvidence {
            complaint_id,
            file_type: FileType::Image,
            file_path: format!("uploads/{}.jpg", hash),
            file_hash: hash.to_string(),
        }
    }

    #[test]
    fn test_duplicate_hash_rejected_across_complaints() {
        let (db, first) = setup();
        let second = db
            .with_conn(|conn| complaints::insert_complaint(conn, &NewComplaint::new(2, "t2", "d2", "Ward 2")))
            .unwrap();

        db.with_conn(|conn| insert_evidence(conn, &evidence(first, "abc123"))).unwrap();
        let result = db.with_conn(|conn| insert_evidence(conn, &evidence(second, "ABC123")));
        assert!(matches!(result, Err(TriageError::DuplicateEvidence(h)) if h == "abc123"));
    }

    #[test]
    fn test_record_verification_and_list() {
        let (db, id) = setup();
        let evidence_id = db.with_conn(|conn| insert_evidence(conn, &evidence(id, "ff00"))).unwrap();

        let verification = EvidenceVerification {
            is_valid: Some(true),
            remarks: Some("Pothole visible".into()),
            detected_text: Some("MG ROAD".into()),
            score: Some(8.0),
            ..Default::default()
        };
        db.with_conn(|conn| record_verification(conn, evidence_id, &verification)).unwrap();

        let items = db.with_conn(|conn| list_for_complaint(conn, id)).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].is_valid, Some(true));
        assert_eq!(items[0].detected_text.as_deref(), Some("MG ROAD"));
        assert_eq!(items[0].score, Some(8.0));
        assert_eq!(db.with_conn(|conn| hashes_for_complaint(conn, id)).unwrap(), vec!["ff00"]);
    }
}
