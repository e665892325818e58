/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Installs the database triggers that back the dirty-table tracker (C2, §4.2).
//!
//! Triggers are (re)installed by the migration coordinator (§4.10 step 3) whenever a new CRDT
//! table appears, so extension-created tables pick up dirty tracking without any code change here.

use rusqlite::Connection;

use crate::db::catalog::CrdtTableSchema;
use crate::error::Result;

fn trigger_name(table: &str, event: &str) -> String {
    format!("sync_core_dirty_{table}_{event}")
}

/// Install (or reinstall) the insert/update/delete dirty-marking triggers for one CRDT table.
/// Idempotent: existing triggers of the same name are dropped and recreated, so this is safe to
/// call repeatedly as the schema evolves.
pub fn install_table_triggers(conn: &Connection, schema: &CrdtTableSchema) -> Result<()> {
    let table = &schema.table_name;
    for event in ["insert", "update", "delete"] {
        conn.execute(&format!("DROP TRIGGER IF EXISTS {}", trigger_name(table, event)), [])?;
    }
    let upsert = "INSERT INTO dirty_tables (table_name, first_dirty_at) \
                  VALUES ('TABLE_PLACEHOLDER', CAST(strftime('%s','now') AS INTEGER) * 1000) \
                  ON CONFLICT(table_name) DO NOTHING;"
        .replace("TABLE_PLACEHOLDER", table);
    for event in ["INSERT", "UPDATE", "DELETE"] {
        let sql = format!(
            "CREATE TRIGGER {name} AFTER {event} ON {table}
             BEGIN
                {upsert}
             END;",
            name = trigger_name(table, &event.to_lowercase()),
        );
        conn.execute(&sql, [])?;
    }
    Ok(())
}

/// Reinstall triggers across every known CRDT table. Cheap and idempotent, so the migration
/// coordinator calls this unconditionally after running migrations rather than diffing the schema.
pub fn install_all_crdt_triggers(conn: &Connection) -> Result<()> {
    for schema in crate::db::catalog::list_crdt_tables(conn)? {
        install_table_triggers(conn, &schema)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::catalog;

    fn notes_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE dirty_tables (table_name TEXT PRIMARY KEY, first_dirty_at INTEGER NOT NULL);
             CREATE TABLE notes (
                id TEXT PRIMARY KEY,
                title TEXT, title__hlc TEXT,
                __tombstone__hlc TEXT
             );",
        )
        .unwrap();
        conn
    }

    #[test]
    fn insert_on_a_triggered_table_marks_it_dirty() {
        let conn = notes_conn();
        let schema = catalog::load_table_schema(&conn, "notes").unwrap().unwrap();
        install_table_triggers(&conn, &schema).unwrap();
        conn.execute("INSERT INTO notes (id, title) VALUES ('k1', 'a')", [])
            .unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT count(*) FROM dirty_tables WHERE table_name = 'notes'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn reinstalling_triggers_keeps_updates_marking_dirty() {
        let conn = notes_conn();
        let schema = catalog::load_table_schema(&conn, "notes").unwrap().unwrap();
        install_table_triggers(&conn, &schema).unwrap();
        conn.execute("INSERT INTO notes (id, title) VALUES ('k1', 'a')", [])
            .unwrap();
        conn.execute("DELETE FROM dirty_tables", []).unwrap();
        install_table_triggers(&conn, &schema).unwrap();
        conn.execute("UPDATE notes SET title = 'b' WHERE id = 'k1'", [])
            .unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT count(*) FROM dirty_tables WHERE table_name = 'notes'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }
}
