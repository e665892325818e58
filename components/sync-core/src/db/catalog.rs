/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Runtime introspection of CRDT tables (§3 "Row").
//!
//! The local SQL engine and the host application's own schema are out of scope (§1 non-goals); this
//! module only reads what is already there. A table is a CRDT table if it carries a
//! `__tombstone__hlc` column; every other `<c>__hlc` column names a synced user column `c`.

use crate::error::Result;
use rusqlite::Connection;

pub const TOMBSTONE_SHADOW_COLUMN: &str = "__tombstone__hlc";
const HLC_SUFFIX: &str = "__hlc";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrdtTableSchema {
    pub table_name: String,
    /// Columns making up the row's primary key, in schema order (§3 "Row").
    pub pk_columns: Vec<String>,
    /// User columns that carry a `c__hlc` shadow column, excluding the PK columns themselves.
    pub user_columns: Vec<String>,
}

impl CrdtTableSchema {
    pub fn shadow_column(column: &str) -> String {
        format!("{column}{HLC_SUFFIX}")
    }
}

struct ColumnInfo {
    name: String,
    pk: bool,
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<ColumnInfo>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let rows = stmt.query_map([], |row| {
        Ok(ColumnInfo {
            name: row.get::<_, String>(1)?,
            pk: row.get::<_, i64>(5)? != 0,
        })
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Load the CRDT schema for one table, or `None` if the table is not a CRDT table (does not carry
/// `__tombstone__hlc`), which is how the apply engine (§4.7 step 1) detects an unknown table.
pub fn load_table_schema(conn: &Connection, table: &str) -> Result<Option<CrdtTableSchema>> {
    let columns = table_columns(conn, table)?;
    if columns.is_empty() {
        return Ok(None);
    }
    if !columns.iter().any(|c| c.name == TOMBSTONE_SHADOW_COLUMN) {
        return Ok(None);
    }
    let names: std::collections::HashSet<&str> =
        columns.iter().map(|c| c.name.as_str()).collect();
    let pk_columns: Vec<String> = columns
        .iter()
        .filter(|c| c.pk)
        .map(|c| c.name.clone())
        .collect();
    let mut user_columns = Vec::new();
    for c in &columns {
        if let Some(base) = c.name.strip_suffix(HLC_SUFFIX) {
            if base.is_empty() || base == "__tombstone" {
                continue;
            }
            if names.contains(base) {
                user_columns.push(base.to_string());
            }
        }
    }
    user_columns.sort();
    Ok(Some(CrdtTableSchema {
        table_name: table.to_string(),
        pk_columns,
        user_columns,
    }))
}

/// List every CRDT table known to the local schema, sorted by name for deterministic iteration.
pub fn list_crdt_tables(conn: &Connection) -> Result<Vec<CrdtTableSchema>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
    )?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let mut tables = Vec::new();
    for name in names {
        if let Some(schema) = load_table_schema(conn, &name)? {
            tables.push(schema);
        }
    }
    tables.sort_by(|a, b| a.table_name.cmp(&b.table_name));
    Ok(tables)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_conn() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn non_crdt_table_has_no_schema() {
        let conn = memory_conn();
        conn.execute_batch("CREATE TABLE plain (id TEXT PRIMARY KEY, name TEXT);")
            .unwrap();
        assert_eq!(load_table_schema(&conn, "plain").unwrap(), None);
    }

    #[test]
    fn missing_table_has_no_schema() {
        let conn = memory_conn();
        assert_eq!(load_table_schema(&conn, "nope").unwrap(), None);
    }

    #[test]
    fn crdt_table_reports_pk_and_user_columns() {
        let conn = memory_conn();
        conn.execute_batch(
            "CREATE TABLE notes (
                id TEXT PRIMARY KEY,
                title TEXT, title__hlc TEXT,
                body TEXT, body__hlc TEXT,
                __tombstone__hlc TEXT
            );",
        )
        .unwrap();
        let schema = load_table_schema(&conn, "notes").unwrap().unwrap();
        assert_eq!(schema.pk_columns, vec!["id".to_string()]);
        assert_eq!(
            schema.user_columns,
            vec!["body".to_string(), "title".to_string()]
        );
    }

    #[test]
    fn list_crdt_tables_skips_non_crdt_tables() {
        let conn = memory_conn();
        conn.execute_batch(
            "CREATE TABLE plain (id TEXT PRIMARY KEY);
             CREATE TABLE notes (id TEXT PRIMARY KEY, title TEXT, title__hlc TEXT, __tombstone__hlc TEXT);",
        )
        .unwrap();
        let tables = list_crdt_tables(&conn).unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].table_name, "notes");
    }
}
