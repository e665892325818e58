/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The `vault_settings` key/value table (§6.2), notably `initial_sync_complete` (§4.8): the
//! single gate that must be true before any push is allowed to leave the device (§4.5 step 7,
//! §5 "`initial_sync_complete=true` happens-before any successful push").
//!
//! Shared by `orchestrator` (which flips the flag once `startAll` has pulled every backend) and
//! `push` (which reads it to refuse pushing before that point), so the two never drift out of
//! sync on the key name or the truthy encoding.

use rusqlite::Connection;
use sql_support::ConnExt;

use crate::error::Result;

const INITIAL_SYNC_COMPLETE_KEY: &str = "initial_sync_complete";

pub fn set_initial_sync_complete(conn: &Connection) -> Result<()> {
    conn.execute(
        "INSERT INTO vault_settings (key, value) VALUES (?1, 'true')
         ON CONFLICT(key) DO UPDATE SET value = 'true'",
        rusqlite::params![INITIAL_SYNC_COMPLETE_KEY],
    )?;
    Ok(())
}

pub fn initial_sync_complete(conn: &Connection) -> Result<bool> {
    let value: Option<String> = conn.try_query_row(
        "SELECT value FROM vault_settings WHERE key = ?1",
        rusqlite::params![INITIAL_SYNC_COMPLETE_KEY],
        |row| Ok(row.get(0)?),
    )?;
    Ok(value.as_deref() == Some("true"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[test]
    fn starts_false_and_flips_true_once_set() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            assert!(!initial_sync_complete(conn)?);
            set_initial_sync_complete(conn)?;
            assert!(initial_sync_complete(conn)?);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn setting_it_twice_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            set_initial_sync_complete(conn)?;
            set_initial_sync_complete(conn)?;
            assert!(initial_sync_complete(conn)?);
            Ok(())
        })
        .unwrap();
    }
}
