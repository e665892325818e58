/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The local store: the engine's own bookkeeping tables (§6.2) plus introspection of the host
//! application's CRDT tables. Opened through `sql_support::open_database`, the same versioned
//! migration framework the rest of this crate family uses.

pub mod backends;
pub mod catalog;
pub mod convert;
pub mod dirty;
pub mod pending_columns;
pub mod scanner;
pub mod schema;
pub mod tombstones;
pub mod triggers;
pub mod vault_settings;

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use sql_support::open_database;

use crate::error::Result;

/// Owns the single SQLite connection the engine operates against.
///
/// A plain `Mutex<Connection>` rather than a connection pool: per §5, at most one push and one
/// pull are ever in flight per backend, and every write-bearing operation already runs inside the
/// per-backend mutex (C11) before it reaches the database, so the only contention this guards
/// against is the UI thread reading concurrently with the engine's own writes.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = open_database::open_database(path.to_path_buf(), schema::migration_logic())?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = sql_support::open_database::test_utils::open_memory_database(
            schema::migration_logic(),
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` with exclusive access to the connection, outside any transaction.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock().unwrap();
        f(&conn)
    }

    /// Run `f` inside a single transaction, committing on success and rolling back on error or
    /// panic (§4.7 "Runs inside one database transaction per call").
    pub fn with_transaction<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        use sql_support::ConnExt;
        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }
}
