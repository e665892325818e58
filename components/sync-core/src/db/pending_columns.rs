/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Pending-column quarantine (C7 support, §3 "Pending column", §4.7 "Pending-column catch-up").
//!
//! A `(tableName, columnName)` is recorded whenever an incoming change names something the local
//! schema doesn't yet know about, so cross-version schema drift never silently drops data: it is
//! recoverable the moment the schema catches up.

use rusqlite::Connection;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingColumn {
    pub table_name: String,
    pub column_name: String,
}

/// Quarantine `(table, column)`, idempotently (§4.7 step 1/2).
pub fn quarantine(conn: &Connection, table: &str, column: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO pending_columns (table_name, column_name) VALUES (?1, ?2)
         ON CONFLICT(table_name, column_name) DO NOTHING",
        rusqlite::params![table, column],
    )?;
    Ok(())
}

/// Every currently-quarantined column, in a stable order.
pub fn list_pending(conn: &Connection) -> Result<Vec<PendingColumn>> {
    let mut stmt = conn.prepare(
        "SELECT table_name, column_name FROM pending_columns ORDER BY table_name, column_name",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(PendingColumn {
            table_name: row.get(0)?,
            column_name: row.get(1)?,
        })
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Clear a quarantine entry after its catch-up pull has applied (§4.7 "clears the quarantine row").
pub fn clear(conn: &Connection, table: &str, column: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM pending_columns WHERE table_name = ?1 AND column_name = ?2",
        rusqlite::params![table, column],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::migration_logic;
    use sql_support::open_database::test_utils::open_memory_database;

    fn test_conn() -> Connection {
        open_memory_database(migration_logic()).unwrap()
    }

    #[test]
    fn quarantine_is_idempotent() {
        let conn = test_conn();
        quarantine(&conn, "notes", "color").unwrap();
        quarantine(&conn, "notes", "color").unwrap();
        assert_eq!(list_pending(&conn).unwrap().len(), 1);
    }

    #[test]
    fn clear_removes_the_entry() {
        let conn = test_conn();
        quarantine(&conn, "notes", "color").unwrap();
        clear(&conn, "notes", "color").unwrap();
        assert!(list_pending(&conn).unwrap().is_empty());
    }

    #[test]
    fn distinct_columns_are_tracked_separately() {
        let conn = test_conn();
        quarantine(&conn, "notes", "color").unwrap();
        quarantine(&conn, "notes", "weight").unwrap();
        let pending = list_pending(&conn).unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].column_name, "color");
        assert_eq!(pending[1].column_name, "weight");
    }
}
