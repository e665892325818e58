/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Bookkeeping schema for the engine's own tables (§6.2), opened through
//! `sql_support::open_database`'s versioned `MigrationLogic`, the same framework the rest of this
//! crate family uses for its local stores.
//!
//! CRDT user tables themselves (their `c__hlc` shadow columns and `__tombstone__hlc`) are owned by
//! the host application's own schema migrations, not by this engine; `db::catalog` only introspects
//! them at runtime.

use rusqlite::Connection;
use sql_support::open_database::{self, ErrorHandling, MigrationLogic};

pub const CURRENT_VERSION: u32 = 1;

fn init(conn: &Connection) -> open_database::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE dirty_tables (
            table_name TEXT PRIMARY KEY,
            first_dirty_at INTEGER NOT NULL
        );

        CREATE TABLE pending_columns (
            table_name TEXT NOT NULL,
            column_name TEXT NOT NULL,
            PRIMARY KEY (table_name, column_name)
        );

        CREATE TABLE backends (
            id TEXT PRIMARY KEY,
            server_url TEXT NOT NULL,
            vault_id TEXT NOT NULL,
            email TEXT NOT NULL,
            enabled INTEGER NOT NULL DEFAULT 1,
            last_push_hlc TEXT,
            last_pull_server_ts INTEGER,
            UNIQUE (server_url, email, vault_id)
        );

        CREATE TABLE tombstones (
            table_name TEXT NOT NULL,
            row_pks TEXT NOT NULL,
            deleted_at_hlc TEXT NOT NULL,
            PRIMARY KEY (table_name, row_pks)
        );

        CREATE TABLE extension_migrations_applied (
            extension_id TEXT NOT NULL,
            version INTEGER NOT NULL,
            PRIMARY KEY (extension_id, version)
        );

        CREATE TABLE vault_settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        -- The two CRDT tables the migration coordinator orders ahead of everything else
        -- (§4.10): extension registrations, and the migration statements they ship.
        CREATE TABLE haex_extensions (
            id TEXT PRIMARY KEY,
            name TEXT, name__hlc TEXT,
            enabled TEXT, enabled__hlc TEXT,
            __tombstone__hlc TEXT
        );

        CREATE TABLE haex_extension_migrations (
            extension_id TEXT NOT NULL,
            version INTEGER NOT NULL,
            sql TEXT, sql__hlc TEXT,
            __tombstone__hlc TEXT,
            PRIMARY KEY (extension_id, version)
        );
        ",
    )?;
    Ok(())
}

pub fn migration_logic() -> MigrationLogic {
    MigrationLogic {
        name: "sync-core".to_string(),
        start_version: CURRENT_VERSION,
        end_version: CURRENT_VERSION,
        prepare: None,
        init,
        upgrades: Vec::new(),
        finish: None,
        error_handling: ErrorHandling::ReturnError,
    }
}
