/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Dirty-table tracker (C2, §4.2).
//!
//! Database triggers installed on every CRDT table (by the migration coordinator, §4.10 step 3)
//! upsert into `dirty_tables` on insert/update/delete. This module is the read/clear side; trigger
//! installation lives in `migration_coordinator`.

use crate::error::Result;
use rusqlite::Connection;
use sql_support::ConnExt;

/// Mark `table` dirty as of `now_unix_ms`, idempotently (§4.2 "idempotent upsert").
pub fn mark_dirty(conn: &Connection, table: &str, now_unix_ms: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO dirty_tables (table_name, first_dirty_at) VALUES (?1, ?2)
         ON CONFLICT(table_name) DO NOTHING",
        rusqlite::params![table, now_unix_ms],
    )?;
    Ok(())
}

/// The set of tables with pending local writes, in a stable order for scan iteration.
pub fn list_dirty_tables(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT table_name FROM dirty_tables ORDER BY table_name")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Compare-and-delete: clear `table` only if no newer trigger fired after `push_started_at`
/// (§4.2 "compare-and-delete on firstDirtyAt"). Returns whether the row was actually cleared.
pub fn clear_dirty_if_unchanged_since(
    conn: &Connection,
    table: &str,
    push_started_at: i64,
) -> Result<bool> {
    let affected = conn.execute(
        "DELETE FROM dirty_tables WHERE table_name = ?1 AND first_dirty_at <= ?2",
        rusqlite::params![table, push_started_at],
    )?;
    Ok(affected > 0)
}

/// Unconditionally clear every dirty row (§4.8 "clears dirty tables twice" during `startAll`).
pub fn clear_all(conn: &Connection) -> Result<()> {
    conn.execute("DELETE FROM dirty_tables", [])?;
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
    fn mark_dirty_is_idempotent() {
        let conn = test_conn();
        mark_dirty(&conn, "notes", 10).unwrap();
        mark_dirty(&conn, "notes", 20).unwrap();
        assert_eq!(list_dirty_tables(&conn).unwrap(), vec!["notes".to_string()]);
    }

    #[test]
    fn compare_and_delete_preserves_rows_dirtied_after_push_started() {
        let conn = test_conn();
        mark_dirty(&conn, "notes", 10).unwrap();
        // A newer local write lands mid-push: the later row keeps the table dirty.
        conn.execute("DELETE FROM dirty_tables WHERE table_name = 'notes'", [])
            .unwrap();
        mark_dirty(&conn, "notes", 999).unwrap();
        assert!(!clear_dirty_if_unchanged_since(&conn, "notes", 10).unwrap());
        assert_eq!(list_dirty_tables(&conn).unwrap(), vec!["notes".to_string()]);
    }

    #[test]
    fn compare_and_delete_clears_unchanged_rows() {
        let conn = test_conn();
        mark_dirty(&conn, "notes", 10).unwrap();
        assert!(clear_dirty_if_unchanged_since(&conn, "notes", 100).unwrap());
        assert!(list_dirty_tables(&conn).unwrap().is_empty());
    }

    #[test]
    fn clear_all_empties_the_table() {
        let conn = test_conn();
        mark_dirty(&conn, "notes", 1).unwrap();
        mark_dirty(&conn, "tags", 1).unwrap();
        clear_all(&conn).unwrap();
        assert!(list_dirty_tables(&conn).unwrap().is_empty());
    }
}
