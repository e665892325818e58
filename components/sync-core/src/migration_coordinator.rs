/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Migration coordinator (C10, §4.10): orders a pull batch into four phases so extension tables
//! exist, and their migrations have run, before any payload destined for them is applied.
//!
//! Enforced on every pull, even an empty-looking one for phases 1-3, because an earlier pull may
//! have delivered registrations this one's phase-4 changes depend on (§4.10, P6).

use rusqlite::Connection;

use crate::apply::{self, ApplyOutcome};
use crate::crypto::VaultKey;
use crate::db::{triggers, Database};
use crate::error::Result;
use crate::hlc::Clock;
use crate::wire::ColumnChange;

pub const EXTENSIONS_TABLE: &str = "haex_extensions";
pub const MIGRATIONS_TABLE: &str = "haex_extension_migrations";

/// Apply one pull batch through the four ordered phases, in a single transaction.
pub fn apply_pull_batch(
    db: &Database,
    clock: &dyn Clock,
    vault_key: &VaultKey,
    changes: &[ColumnChange],
) -> Result<ApplyOutcome> {
    db.with_transaction(|conn| apply_pull_batch_in_tx(conn, clock, vault_key, changes))
}

fn apply_pull_batch_in_tx(
    conn: &Connection,
    clock: &dyn Clock,
    vault_key: &VaultKey,
    changes: &[ColumnChange],
) -> Result<ApplyOutcome> {
    let mut outcome = ApplyOutcome::default();

    // Phase 1: extension registrations.
    let phase1: Vec<&ColumnChange> = changes
        .iter()
        .filter(|c| c.table_name == EXTENSIONS_TABLE)
        .collect();
    merge(&mut outcome, apply::apply_changes_in_tx(conn, clock, vault_key, &sorted(phase1))?);

    // Phase 2: migration definitions.
    let phase2: Vec<&ColumnChange> = changes
        .iter()
        .filter(|c| c.table_name == MIGRATIONS_TABLE)
        .collect();
    merge(&mut outcome, apply::apply_changes_in_tx(conn, clock, vault_key, &sorted(phase2))?);

    // Phase 3: run any migration not yet applied, ascending version per extension, then
    // (re)install CRDT triggers on whatever tables now exist.
    run_pending_migrations(conn)?;
    triggers::install_all_crdt_triggers(conn)?;

    // Phase 4: everything else.
    let phase4: Vec<&ColumnChange> = changes
        .iter()
        .filter(|c| c.table_name != EXTENSIONS_TABLE && c.table_name != MIGRATIONS_TABLE)
        .collect();
    merge(&mut outcome, apply::apply_changes_in_tx(conn, clock, vault_key, &sorted(phase4))?);

    Ok(outcome)
}

fn sorted(mut changes: Vec<&ColumnChange>) -> Vec<&ColumnChange> {
    changes.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    changes
}

fn merge(into: &mut ApplyOutcome, from: ApplyOutcome) {
    if let Some(hlc) = from.max_hlc {
        into.max_hlc = Some(into.max_hlc.map_or(hlc, |m| m.max(hlc)));
    }
    into.affected_tables.extend(from.affected_tables);
}

struct PendingMigration {
    extension_id: String,
    version: i64,
    sql: String,
}

fn run_pending_migrations(conn: &Connection) -> Result<()> {
    let mut stmt = conn.prepare(
        "SELECT extension_id, version, sql FROM haex_extension_migrations
         WHERE __tombstone__hlc IS NULL AND sql IS NOT NULL
         ORDER BY extension_id ASC, version ASC",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(PendingMigration {
                extension_id: row.get(0)?,
                version: row.get(1)?,
                sql: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    drop(stmt);

    for migration in rows {
        let already_applied: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM extension_migrations_applied WHERE extension_id = ?1 AND version = ?2)",
            rusqlite::params![migration.extension_id, migration.version],
            |row| row.get(0),
        )?;
        if already_applied {
            continue;
        }
        conn.execute_batch(&migration.sql)?;
        conn.execute(
            "INSERT INTO extension_migrations_applied (extension_id, version) VALUES (?1, ?2)",
            rusqlite::params![migration.extension_id, migration.version],
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{seal_column, VaultKey};
    use crate::hlc::{Hlc, TestClock};
    use crate::ids::DeviceId;
    use serde_json::{json, Value};
    use uuid::Uuid;

    fn change(table: &str, pks: &str, col: &str, hlc: Hlc, value: &Value, key: &VaultKey) -> ColumnChange {
        ColumnChange {
            table_name: table.to_string(),
            row_pks: pks.to_string(),
            column_name: col.to_string(),
            hlc_timestamp: hlc,
            batch_id: Uuid::nil(),
            batch_seq: 1,
            batch_total: 1,
            device_id: hlc.node_id(),
            envelope: Some(seal_column(key, table, col, value).unwrap()),
        }
    }

    #[test]
    fn a_migration_creates_its_table_and_installs_triggers_before_phase_four() {
        let db = Database::open_in_memory().unwrap();
        let key = VaultKey::from_bytes([7u8; 32]);
        let device = DeviceId::new();
        let clock = TestClock::new(device, 1_000);

        let create_sql = "CREATE TABLE widgets (
            id TEXT PRIMARY KEY,
            label TEXT, label__hlc TEXT,
            __tombstone__hlc TEXT
        );";
        let reg = change(
            EXTENSIONS_TABLE,
            r#"{"id":"ext1"}"#,
            "name",
            clock.now(),
            &json!("Widgets"),
            &key,
        );
        let mig = change(
            MIGRATIONS_TABLE,
            r#"{"extension_id":"ext1","version":1}"#,
            "sql",
            clock.now(),
            &json!(create_sql),
            &key,
        );
        let data = change(
            "widgets",
            r#"{"id":"w1"}"#,
            "label",
            clock.now(),
            &json!("A Widget"),
            &key,
        );

        let outcome = apply_pull_batch(&db, &clock, &key, &[data, mig, reg]).unwrap();
        assert!(outcome.affected_tables.contains("widgets"));

        db.with_conn(|conn| {
            let label: String = conn
                .query_row("SELECT label FROM widgets WHERE id = 'w1'", [], |r| r.get(0))
                .unwrap();
            assert_eq!(label, "A Widget");
            Ok(())
        })
        .unwrap();

        // Triggers must be live: a local write marks widgets dirty.
        db.with_conn(|conn| {
            conn.execute("INSERT INTO widgets (id, label) VALUES ('w2', 'b')", [])?;
            let dirty = crate::db::dirty::list_dirty_tables(conn)?;
            assert!(dirty.contains(&"widgets".to_string()));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn a_migration_is_never_run_twice() {
        let db = Database::open_in_memory().unwrap();
        let key = VaultKey::from_bytes([7u8; 32]);
        let device = DeviceId::new();
        let clock = TestClock::new(device, 1_000);

        let create_sql = "CREATE TABLE widgets (id TEXT PRIMARY KEY, __tombstone__hlc TEXT);";
        let mig = change(
            MIGRATIONS_TABLE,
            r#"{"extension_id":"ext1","version":1}"#,
            "sql",
            clock.now(),
            &json!(create_sql),
            &key,
        );
        apply_pull_batch(&db, &clock, &key, &[mig.clone()]).unwrap();
        // A second pull repeats the same migration row; running CREATE TABLE again would error.
        apply_pull_batch(&db, &clock, &key, &[mig]).unwrap();
    }
}
