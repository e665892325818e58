/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Tombstone bookkeeping (§3 "Tombstone", §4.7 step 4, §10.6 retention cleanup).
//!
//! Retention is measured against the tombstone HLC's wall-clock component (nanoseconds since the
//! Unix epoch), not the row's insertion time into this table — see the Open Questions resolution
//! recorded in `DESIGN.md` for why wall-clock-in-the-HLC was chosen over a separately stored
//! wall-clock column.

use rusqlite::Connection;
use sql_support::ConnExt;

use crate::error::Result;
use crate::hlc::Hlc;

/// Record (or refresh) the tombstone for `(table, row_pks)` at `deleted_at` (§4.7 step 4).
pub fn record_tombstone(
    conn: &Connection,
    table: &str,
    row_pks: &str,
    deleted_at: Hlc,
) -> Result<()> {
    conn.execute(
        "INSERT INTO tombstones (table_name, row_pks, deleted_at_hlc) VALUES (?1, ?2, ?3)
         ON CONFLICT(table_name, row_pks) DO UPDATE SET deleted_at_hlc = excluded.deleted_at_hlc
         WHERE excluded.deleted_at_hlc > tombstones.deleted_at_hlc",
        rusqlite::params![table, row_pks, deleted_at.to_string()],
    )?;
    Ok(())
}

/// The tombstone HLC for `(table, row_pks)`, if the row is currently tombstoned (§4.7 step 3
/// special-cases the `__tombstone` column; this is what the apply engine consults for suppression,
/// P8).
pub fn tombstone_hlc(conn: &Connection, table: &str, row_pks: &str) -> Result<Option<Hlc>> {
    let raw: Option<String> = conn.try_query_row(
        "SELECT deleted_at_hlc FROM tombstones WHERE table_name = ?1 AND row_pks = ?2",
        rusqlite::params![table, row_pks],
        |row| Ok(row.get(0)?),
    )?;
    Ok(raw.map(|s| s.parse()).transpose()?)
}

/// Delete tombstones whose HLC wall-clock component predates `retention_days` before `now_unix_ns`,
/// returning how many were removed (§10.6).
pub fn cleanup_expired(conn: &Connection, now_unix_ns: u64, retention_days: u32) -> Result<usize> {
    let retention_ns = (retention_days as u64) * 24 * 60 * 60 * 1_000_000_000;
    let cutoff = now_unix_ns.saturating_sub(retention_ns);
    let mut stmt =
        conn.prepare("SELECT table_name, row_pks, deleted_at_hlc FROM tombstones")?;
    let mut to_delete = Vec::new();
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let table: String = row.get(0)?;
        let pks: String = row.get(1)?;
        let hlc: String = row.get(2)?;
        let hlc: Hlc = hlc.parse()?;
        if hlc.wall_ns() < cutoff {
            to_delete.push((table, pks));
        }
    }
    drop(rows);
    drop(stmt);
    for (table, pks) in &to_delete {
        conn.execute(
            "DELETE FROM tombstones WHERE table_name = ?1 AND row_pks = ?2",
            rusqlite::params![table, pks],
        )?;
    }
    Ok(to_delete.len())
}

/// Reclaim space freed by cleanup (§10.6). Must run outside any open transaction.
pub fn vacuum(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA optimize; VACUUM;")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::migration_logic;
    use crate::hlc::{Clock, TestClock};
    use crate::ids::DeviceId;
    use sql_support::open_database::test_utils::open_memory_database;

    fn test_conn() -> Connection {
        open_memory_database(migration_logic()).unwrap()
    }

    #[test]
    fn records_and_reads_a_tombstone() {
        let conn = test_conn();
        let clock = TestClock::new(DeviceId::new(), 1_000);
        let hlc = clock.now();
        record_tombstone(&conn, "notes", r#"{"id":"k1"}"#, hlc).unwrap();
        assert_eq!(
            tombstone_hlc(&conn, "notes", r#"{"id":"k1"}"#).unwrap(),
            Some(hlc)
        );
    }

    #[test]
    fn later_tombstone_overwrites_earlier_one() {
        let conn = test_conn();
        let clock = TestClock::new(DeviceId::new(), 1_000);
        let hlc1 = clock.now();
        let hlc2 = clock.now();
        record_tombstone(&conn, "notes", r#"{"id":"k1"}"#, hlc1).unwrap();
        record_tombstone(&conn, "notes", r#"{"id":"k1"}"#, hlc2).unwrap();
        assert_eq!(
            tombstone_hlc(&conn, "notes", r#"{"id":"k1"}"#).unwrap(),
            Some(hlc2)
        );
    }

    #[test]
    fn earlier_tombstone_does_not_overwrite_later_one() {
        let conn = test_conn();
        let clock = TestClock::new(DeviceId::new(), 1_000);
        let hlc1 = clock.now();
        let hlc2 = clock.now();
        record_tombstone(&conn, "notes", r#"{"id":"k1"}"#, hlc2).unwrap();
        record_tombstone(&conn, "notes", r#"{"id":"k1"}"#, hlc1).unwrap();
        assert_eq!(
            tombstone_hlc(&conn, "notes", r#"{"id":"k1"}"#).unwrap(),
            Some(hlc2)
        );
    }

    #[test]
    fn cleanup_removes_only_expired_tombstones() {
        let conn = test_conn();
        let device = DeviceId::new();
        let old_hlc = Hlc::new(1_000, 0, device);
        let fresh_hlc = Hlc::new(100 * 24 * 60 * 60 * 1_000_000_000, 0, device);
        record_tombstone(&conn, "notes", r#"{"id":"old"}"#, old_hlc).unwrap();
        record_tombstone(&conn, "notes", r#"{"id":"fresh"}"#, fresh_hlc).unwrap();
        let now = 100 * 24 * 60 * 60 * 1_000_000_000 + 1_000;
        let removed = cleanup_expired(&conn, now, 30).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(tombstone_hlc(&conn, "notes", r#"{"id":"old"}"#).unwrap(), None);
        assert!(tombstone_hlc(&conn, "notes", r#"{"id":"fresh"}"#)
            .unwrap()
            .is_some());
    }
}
