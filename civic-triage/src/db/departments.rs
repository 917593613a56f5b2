//! Department reference data

use rusqlite::{params, Connection, Row};

use super::db_err;
use crate::error::TriageError;
use crate::models::Department;

impl Department {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            description: row.get("description")?,
        })
    }
}

/// Insert a department, or return the id of an existing one with the same name.
pub fn upsert_department(conn: &Connection, name: &str, description: &str) -> Result<i64, TriageError> {
    conn.execute(
        r#"
        INSERT INTO departments (name, description) VALUES (?, ?)
        ON CONFLICT(name) DO UPDATE SET description = excluded.description
        "#,
        params![name, description],
    )
    .map_err(db_err("Upsert department"))?;

    conn.query_row("SELECT id FROM departments WHERE name = ?", params![name], |row| row.get(0))
        .map_err(db_err("Department lookup"))
}

pub fn list_departments(conn: &Connection) -> Result<Vec<Department>, TriageError> {
    let mut stmt = conn
        .prepare("SELECT * FROM departments ORDER BY id")
        .map_err(db_err("Prepare department list"))?;
    let rows = stmt.query_map([], Department::from_row).map_err(db_err("Department list"))?;
    rows.collect::<Result<Vec<_>, _>>().map_err(db_err("Department row parse"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[test]
    fn test_upsert_is_idempotent_by_name() {
        let db = Database::open_in_memory().unwrap();
        let first = db.with_conn(|conn| upsert_department(conn, "Water Supply", "Leaks")).unwrap();
        let again = db
            .with_conn(|conn| upsert_department(conn, "Water Supply", "Leaks and pipelines"))
            .unwrap();
        assert_eq!(first, again);

        let all = db.with_conn(list_departments).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].description, "Leaks and pipelines");
    }
}
