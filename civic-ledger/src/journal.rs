//! Local append-only journal ledger.
//!
//! Backs the `LedgerAdapter` trait with a SQLite table that refuses updates
//! and deletes. Each event's transaction reference chains the previous one,
//! so rewriting history also changes every later reference. Used for
//! development deployments without a ledger gateway and in tests.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::adapter::{checked_digest, AnchorEvent, LedgerAdapter, LedgerError};
use crate::manifest::sha256_hex;

const JOURNAL_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS anchor_events (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    complaint_id INTEGER NOT NULL,
    digest TEXT NOT NULL,
    tx_ref TEXT NOT NULL UNIQUE,
    anchored_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_anchor_events_complaint ON anchor_events(complaint_id);

CREATE TRIGGER IF NOT EXISTS anchor_events_no_update
BEFORE UPDATE ON anchor_events
BEGIN
    SELECT RAISE(ABORT, 'anchor events are append-only');
END;

CREATE TRIGGER IF NOT EXISTS anchor_events_no_delete
BEFORE DELETE ON anchor_events
BEGIN
    SELECT RAISE(ABORT, 'anchor events are append-only');
END;
"#;

/// Genesis value chained into the first transaction reference.
const GENESIS: &str = "civic-ledger-genesis";

/// Append-only SQLite journal implementing `LedgerAdapter`.
pub struct JournalLedger {
    id: String,
    conn: Mutex<Connection>,
}

impl JournalLedger {
    /// Open or create a journal file.
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        info!("Opening ledger journal at {:?}", path);
        let conn = Connection::open(path)
            .map_err(|e| LedgerError::Storage(format!("Failed to open journal: {}", e)))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL;")
            .map_err(|e| LedgerError::Storage(format!("Failed to set PRAGMA: {}", e)))?;
        Self::init(path.display().to_string(), conn)
    }

    /// Open an in-memory journal (for testing).
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        debug!("Opening in-memory ledger journal");
        let conn = Connection::open_in_memory()
            .map_err(|e| LedgerError::Storage(format!("Failed to open in-memory journal: {}", e)))?;
        Self::init("memory".to_string(), conn)
    }

    fn init(id: String, conn: Connection) -> Result<Self, LedgerError> {
        conn.execute_batch(JOURNAL_SCHEMA)
            .map_err(|e| LedgerError::Storage(format!("Failed to create journal schema: {}", e)))?;
        Ok(Self {
            id: format!("journal:{}", id),
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&Connection) -> Result<T, LedgerError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| LedgerError::Storage(format!("Lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Every event in append order.
    pub fn events(&self) -> Result<Vec<AnchorEvent>, LedgerError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT complaint_id, digest, tx_ref, anchored_at FROM anchor_events ORDER BY seq")
                .map_err(|e| LedgerError::Storage(format!("Prepare failed: {}", e)))?;
            let rows = stmt
                .query_map([], |row| {
                    let anchored_at: i64 = row.get(3)?;
                    Ok(AnchorEvent {
                        complaint_id: row.get(0)?,
                        digest: row.get(1)?,
                        tx_ref: row.get(2)?,
                        anchored_at: Utc
                            .timestamp_opt(anchored_at, 0)
                            .single()
                            .unwrap_or_default(),
                    })
                })
                .map_err(|e| LedgerError::Storage(format!("Query failed: {}", e)))?;

            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| LedgerError::Storage(format!("Row parse failed: {}", e)))
        })
    }

    /// Recompute the reference chain and confirm no event was rewritten.
    pub fn verify_chain(&self) -> Result<bool, LedgerError> {
        let mut previous = GENESIS.to_string();
        for event in self.events()? {
            let expected = chain_ref(&previous, event.complaint_id, &event.digest, event.anchored_at.timestamp());
            if expected != event.tx_ref {
                return Ok(false);
            }
            previous = event.tx_ref;
        }
        Ok(true)
    }
}

fn chain_ref(previous: &str, complaint_id: i64, digest: &str, anchored_at: i64) -> String {
    let material = format!("{}|{}|{}|{}", previous, complaint_id, digest, anchored_at);
    format!("0x{}", sha256_hex(material.as_bytes()))
}

#[async_trait]
impl LedgerAdapter for JournalLedger {
    fn id(&self) -> &str {
        &self.id
    }

    async fn anchor(&self, complaint_id: i64, digest: &str) -> Result<String, LedgerError> {
        let digest = checked_digest(digest)?;
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| LedgerError::Storage(format!("Lock poisoned: {}", e)))?;

        let tx = conn
            .transaction()
            .map_err(|e| LedgerError::Storage(format!("Transaction failed: {}", e)))?;

        let previous: String = tx
            .query_row(
                "SELECT tx_ref FROM anchor_events ORDER BY seq DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| LedgerError::Storage(format!("Query failed: {}", e)))?
            .unwrap_or_else(|| GENESIS.to_string());

        let anchored_at = Utc::now().timestamp();
        let tx_ref = chain_ref(&previous, complaint_id, &digest, anchored_at);

        tx.execute(
            "INSERT INTO anchor_events (complaint_id, digest, tx_ref, anchored_at) VALUES (?, ?, ?, ?)",
            params![complaint_id, digest, tx_ref, anchored_at],
        )
        .map_err(|e| LedgerError::Storage(format!("Insert failed: {}", e)))?;

        tx.commit()
            .map_err(|e| LedgerError::Storage(format!("Commit failed: {}", e)))?;

        debug!(complaint_id, tx_ref = %tx_ref, "Manifest anchored in journal");
        Ok(tx_ref)
    }

    async fn verify(&self, complaint_id: i64) -> Result<String, LedgerError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT digest FROM anchor_events WHERE complaint_id = ? ORDER BY seq DESC LIMIT 1",
                params![complaint_id],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(|e| LedgerError::Storage(format!("Query failed: {}", e)))?
            .ok_or(LedgerError::NotAnchored(complaint_id))
        })
    }

    async fn enumerate_anchored_ids(&self) -> Result<BTreeSet<i64>, LedgerError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT DISTINCT complaint_id FROM anchor_events")
                .map_err(|e| LedgerError::Storage(format!("Prepare failed: {}", e)))?;
            let ids = stmt
                .query_map([], |row| row.get::<_, i64>(0))
                .map_err(|e| LedgerError::Storage(format!("Query failed: {}", e)))?
                .collect::<Result<BTreeSet<_>, _>>()
                .map_err(|e| LedgerError::Storage(format!("Row parse failed: {}", e)))?;
            Ok(ids)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(byte: &str) -> String {
        byte.repeat(32)
    }

    #[tokio::test]
    async fn test_anchor_then_verify() {
        let ledger = JournalLedger::open_in_memory().unwrap();
        let tx_ref = ledger.anchor(7, &digest("ab")).await.unwrap();
        assert!(tx_ref.starts_with("0x"));
        assert_eq!(ledger.verify(7).await.unwrap(), digest("ab"));
    }

    #[tokio::test]
    async fn test_verify_unknown_is_not_anchored() {
        let ledger = JournalLedger::open_in_memory().unwrap();
        assert!(matches!(ledger.verify(99).await, Err(LedgerError::NotAnchored(99))));
    }

    #[tokio::test]
    async fn test_reanchor_returns_latest_digest() {
        let ledger = JournalLedger::open_in_memory().unwrap();
        ledger.anchor(1, &digest("aa")).await.unwrap();
        ledger.anchor(1, &format!("0x{}", digest("BB"))).await.unwrap();
        assert_eq!(ledger.verify(1).await.unwrap(), digest("bb"));
        assert_eq!(ledger.events().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_enumerate_distinct_ids() {
        let ledger = JournalLedger::open_in_memory().unwrap();
        for id in [3, 1, 3, 2] {
            ledger.anchor(id, &digest("cd")).await.unwrap();
        }
        let ids: Vec<i64> = ledger.enumerate_anchored_ids().await.unwrap().into_iter().collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_rejects_malformed_digest() {
        let ledger = JournalLedger::open_in_memory().unwrap();
        assert!(matches!(
            ledger.anchor(1, "not-a-digest").await,
            Err(LedgerError::InvalidDigest(_))
        ));
    }

    #[tokio::test]
    async fn test_events_are_append_only() {
        let ledger = JournalLedger::open_in_memory().unwrap();
        ledger.anchor(1, &digest("aa")).await.unwrap();
        let result = ledger.with_conn(|conn| {
            conn.execute("DELETE FROM anchor_events", [])
                .map_err(|e| LedgerError::Storage(e.to_string()))
        });
        assert!(result.is_err());
        assert!(ledger.verify_chain().unwrap());
    }

    #[tokio::test]
    async fn test_compare_normalizes_case_and_prefix() {
        let ledger = JournalLedger::open_in_memory().unwrap();
        ledger.anchor(5, &digest("ef")).await.unwrap();
        let comparison = ledger.compare(5, &format!("0x{}", digest("EF"))).await.unwrap();
        assert!(comparison.matches);
        let comparison = ledger.compare(5, &digest("ee")).await.unwrap();
        assert!(!comparison.matches);
    }
}
