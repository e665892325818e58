/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Backend rows (§3 "Backend", §6.2): a configured relay endpoint plus its cursors.
//!
//! `last_pull_server_ts` bootstrapping is scoped per backend, not per vault: each backend gets its
//! own first-push bootstrap (see the Open Questions resolution in `DESIGN.md`), since a vault can
//! be synced to more than one relay and each has an independent view of what it has already sent.

use rusqlite::{Connection, OptionalExtension};
use sql_support::ConnExt;

use crate::error::Result;
use crate::hlc::Hlc;
use crate::ids::{BackendId, VaultId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    pub id: BackendId,
    pub server_url: String,
    pub vault_id: VaultId,
    pub email: String,
    pub enabled: bool,
    pub last_push_hlc: Option<Hlc>,
    pub last_pull_server_ts: Option<i64>,
}

fn row_to_backend(row: &rusqlite::Row<'_>) -> rusqlite::Result<Backend> {
    let last_push_hlc: Option<String> = row.get(5)?;
    Ok(Backend {
        id: row.get(0)?,
        server_url: row.get(1)?,
        vault_id: row.get(2)?,
        email: row.get(3)?,
        enabled: row.get::<_, i64>(4)? != 0,
        last_push_hlc: last_push_hlc
            .map(|s| s.parse())
            .transpose()
            .map_err(|e: crate::hlc::HlcParseError| {
                rusqlite::Error::FromSqlConversionFailure(
                    5,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?,
        last_pull_server_ts: row.get(6)?,
    })
}

const SELECT_COLUMNS: &str =
    "id, server_url, vault_id, email, enabled, last_push_hlc, last_pull_server_ts";

/// Insert a new backend row. Fails with a unique-constraint violation if `(serverUrl, email,
/// vaultId)` is already registered (§3 "Backend" invariant).
pub fn insert(conn: &Connection, backend: &Backend) -> Result<()> {
    conn.execute(
        "INSERT INTO backends (id, server_url, vault_id, email, enabled, last_push_hlc, last_pull_server_ts)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            backend.id,
            backend.server_url,
            backend.vault_id,
            backend.email,
            backend.enabled as i64,
            backend.last_push_hlc.map(|h| h.to_string()),
            backend.last_pull_server_ts,
        ],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, id: BackendId) -> Result<Option<Backend>> {
    let sql = format!("SELECT {SELECT_COLUMNS} FROM backends WHERE id = ?1");
    Ok(conn
        .query_row(&sql, rusqlite::params![id], row_to_backend)
        .optional()?)
}

pub fn list_enabled_for_vault(conn: &Connection, vault_id: VaultId) -> Result<Vec<Backend>> {
    let sql =
        format!("SELECT {SELECT_COLUMNS} FROM backends WHERE vault_id = ?1 AND enabled = 1 ORDER BY id");
    Ok(conn.query_rows_and_then(&sql, rusqlite::params![vault_id], row_to_backend)?)
}

pub fn remove(conn: &Connection, id: BackendId) -> Result<()> {
    conn.execute("DELETE FROM backends WHERE id = ?1", rusqlite::params![id])?;
    Ok(())
}

pub fn set_enabled(conn: &Connection, id: BackendId, enabled: bool) -> Result<()> {
    conn.execute(
        "UPDATE backends SET enabled = ?2 WHERE id = ?1",
        rusqlite::params![id, enabled as i64],
    )?;
    Ok(())
}

/// Advance the push cursor (§4.5 step 6). Callers must only call this after a successful push.
pub fn set_last_push_hlc(conn: &Connection, id: BackendId, hlc: Hlc) -> Result<()> {
    conn.execute(
        "UPDATE backends SET last_push_hlc = ?2 WHERE id = ?1",
        rusqlite::params![id, hlc.to_string()],
    )?;
    Ok(())
}

/// Set `last_pull_server_ts` unconditionally (pull pipeline, full re-upload).
pub fn set_last_pull_server_ts(conn: &Connection, id: BackendId, server_ts: i64) -> Result<()> {
    conn.execute(
        "UPDATE backends SET last_pull_server_ts = ?2 WHERE id = ?1",
        rusqlite::params![id, server_ts],
    )?;
    Ok(())
}

/// Set `last_pull_server_ts` only if it is currently unset (§4.5 step 6, first-push bootstrap).
pub fn set_last_pull_server_ts_if_unset(
    conn: &Connection,
    id: BackendId,
    server_ts: i64,
) -> Result<()> {
    conn.execute(
        "UPDATE backends SET last_pull_server_ts = ?2 WHERE id = ?1 AND last_pull_server_ts IS NULL",
        rusqlite::params![id, server_ts],
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

    fn sample(id: BackendId, vault: VaultId) -> Backend {
        Backend {
            id,
            server_url: "https://relay.example".to_string(),
            vault_id: vault,
            email: "a@example.com".to_string(),
            enabled: true,
            last_push_hlc: None,
            last_pull_server_ts: None,
        }
    }

    #[test]
    fn insert_and_get_roundtrips() {
        let conn = test_conn();
        let id = BackendId::new();
        let vault = VaultId::new();
        insert(&conn, &sample(id, vault)).unwrap();
        let fetched = get(&conn, id).unwrap().unwrap();
        assert_eq!(fetched.vault_id, vault);
        assert!(fetched.enabled);
        assert_eq!(fetched.last_push_hlc, None);
    }

    #[test]
    fn set_last_pull_server_ts_if_unset_only_sets_once() {
        let conn = test_conn();
        let id = BackendId::new();
        insert(&conn, &sample(id, VaultId::new())).unwrap();
        set_last_pull_server_ts_if_unset(&conn, id, 100).unwrap();
        set_last_pull_server_ts_if_unset(&conn, id, 200).unwrap();
        assert_eq!(get(&conn, id).unwrap().unwrap().last_pull_server_ts, Some(100));
    }

    #[test]
    fn disabling_preserves_cursors() {
        let conn = test_conn();
        let id = BackendId::new();
        let mut backend = sample(id, VaultId::new());
        backend.last_pull_server_ts = Some(42);
        insert(&conn, &backend).unwrap();
        set_enabled(&conn, id, false).unwrap();
        let fetched = get(&conn, id).unwrap().unwrap();
        assert!(!fetched.enabled);
        assert_eq!(fetched.last_pull_server_ts, Some(42));
    }

    #[test]
    fn list_enabled_for_vault_excludes_disabled_backends() {
        let conn = test_conn();
        let vault = VaultId::new();
        let enabled_id = BackendId::new();
        let disabled_id = BackendId::new();
        insert(&conn, &sample(enabled_id, vault)).unwrap();
        let mut disabled = sample(disabled_id, vault);
        disabled.enabled = false;
        insert(&conn, &disabled).unwrap();
        let backends = list_enabled_for_vault(&conn, vault).unwrap();
        assert_eq!(backends.len(), 1);
        assert_eq!(backends[0].id, enabled_id);
    }
}
