/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Apply engine (C7, §4.7): transactional write-back with per-column HLC dominance, tombstones,
//! and pending-column quarantine.
//!
//! A decryption failure anywhere in a batch aborts the whole transaction (§4.4, P5) — the `?`
//! propagation out of `apply_one` does this for free, since the caller's transaction is rolled
//! back on any `Err` (see `db::Database::with_transaction`).

use std::collections::BTreeSet;

use rusqlite::Connection;
use serde_json::Value;

use crate::db::catalog::{self, CrdtTableSchema};
use crate::db::convert::json_to_sql_value;
use crate::db::scanner::TOMBSTONE_COLUMN_NAME;
use crate::db::tombstones;
use crate::db::{pending_columns, Database};
use crate::error::{Error, Result};
use crate::hlc::{Clock, Hlc};
use crate::wire::ColumnChange;

#[derive(Debug, Default)]
pub struct ApplyOutcome {
    pub max_hlc: Option<Hlc>,
    pub affected_tables: BTreeSet<String>,
}

impl ApplyOutcome {
    fn record(&mut self, table: &str, hlc: Hlc) {
        self.max_hlc = Some(self.max_hlc.map_or(hlc, |m| m.max(hlc)));
        self.affected_tables.insert(table.to_string());
    }
}

/// Apply `changes` in one fresh transaction, sorting them into the deterministic order required
/// by §5 ("Ordering guarantees") first. For pulls that must respect C10's phase ordering, use
/// `apply_changes_in_tx` directly inside a transaction the migration coordinator already owns.
pub fn apply(
    db: &Database,
    clock: &dyn Clock,
    vault_key: &crate::crypto::VaultKey,
    changes: &[ColumnChange],
) -> Result<ApplyOutcome> {
    let mut sorted: Vec<&ColumnChange> = changes.iter().collect();
    sorted.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    db.with_transaction(|conn| apply_changes_in_tx(conn, clock, vault_key, &sorted))
}

/// Apply `changes` (already in the caller's desired order) against an open connection/transaction.
pub fn apply_changes_in_tx(
    conn: &Connection,
    clock: &dyn Clock,
    vault_key: &crate::crypto::VaultKey,
    changes: &[&ColumnChange],
) -> Result<ApplyOutcome> {
    let mut outcome = ApplyOutcome::default();
    for change in changes {
        apply_one(conn, clock, vault_key, change, &mut outcome)?;
    }
    Ok(outcome)
}

fn pk_values_from_row_pks(schema: &CrdtTableSchema, row_pks: &str) -> Result<Vec<Value>> {
    let parsed: Value = serde_json::from_str(row_pks)?;
    let obj = parsed.as_object();
    schema
        .pk_columns
        .iter()
        .map(|c| {
            Ok(obj
                .and_then(|o| o.get(c))
                .cloned()
                .unwrap_or(Value::Null))
        })
        .collect()
}

fn apply_one(
    conn: &Connection,
    clock: &dyn Clock,
    vault_key: &crate::crypto::VaultKey,
    change: &ColumnChange,
    outcome: &mut ApplyOutcome,
) -> Result<()> {
    let schema = match catalog::load_table_schema(conn, &change.table_name)? {
        Some(schema) => schema,
        None => {
            pending_columns::quarantine(conn, &change.table_name, &change.column_name)?;
            return Ok(());
        }
    };

    if change.column_name == TOMBSTONE_COLUMN_NAME {
        apply_tombstone(conn, clock, &schema, change, outcome)
    } else if schema.user_columns.iter().any(|c| c == &change.column_name) {
        apply_column(conn, clock, vault_key, &schema, change, outcome)
    } else {
        pending_columns::quarantine(conn, &change.table_name, &change.column_name)?;
        Ok(())
    }
}

fn apply_tombstone(
    conn: &Connection,
    clock: &dyn Clock,
    schema: &CrdtTableSchema,
    change: &ColumnChange,
    outcome: &mut ApplyOutcome,
) -> Result<()> {
    if let Some(existing) = tombstones::tombstone_hlc(conn, &schema.table_name, &change.row_pks)? {
        if change.hlc_timestamp <= existing {
            return Ok(()); // ConflictResolved: HLC-dominated drop, silent (§7).
        }
    }
    tombstones::record_tombstone(conn, &schema.table_name, &change.row_pks, change.hlc_timestamp)?;

    let pk_values = pk_values_from_row_pks(schema, &change.row_pks)?;
    let pk_cols = schema.pk_columns.join(", ");
    let pk_placeholders: Vec<String> = (1..=pk_values.len()).map(|i| format!("?{i}")).collect();
    let tombstone_idx = pk_values.len() + 1;
    let null_user_cols = schema
        .user_columns
        .iter()
        .map(|c| format!("{c} = NULL"))
        .collect::<Vec<_>>()
        .join(", ");
    let set_clause = if null_user_cols.is_empty() {
        format!("{} = excluded.{}", catalog::TOMBSTONE_SHADOW_COLUMN, catalog::TOMBSTONE_SHADOW_COLUMN)
    } else {
        format!(
            "{} = excluded.{}, {}",
            catalog::TOMBSTONE_SHADOW_COLUMN,
            catalog::TOMBSTONE_SHADOW_COLUMN,
            null_user_cols
        )
    };
    let sql = format!(
        "INSERT INTO {table} ({pk_cols}, {tombstone_col}) VALUES ({pk_placeholders}, ?{tombstone_idx})
         ON CONFLICT({pk_cols}) DO UPDATE SET {set_clause}",
        table = schema.table_name,
        tombstone_col = catalog::TOMBSTONE_SHADOW_COLUMN,
        pk_placeholders = pk_placeholders.join(", "),
    );
    let mut params: Vec<rusqlite::types::Value> =
        pk_values.iter().map(json_to_sql_value).collect();
    params.push(rusqlite::types::Value::Text(change.hlc_timestamp.to_string()));
    conn.execute(&sql, rusqlite::params_from_iter(params))?;

    clock.observe(change.hlc_timestamp);
    outcome.record(&schema.table_name, change.hlc_timestamp);
    Ok(())
}

fn apply_column(
    conn: &Connection,
    clock: &dyn Clock,
    vault_key: &crate::crypto::VaultKey,
    schema: &CrdtTableSchema,
    change: &ColumnChange,
    outcome: &mut ApplyOutcome,
) -> Result<()> {
    if let Some(tombstone_hlc) =
        tombstones::tombstone_hlc(conn, &schema.table_name, &change.row_pks)?
    {
        if change.hlc_timestamp <= tombstone_hlc {
            return Ok(()); // P8: suppressed, a dead row stays dead.
        }
    }

    let raw = match &change.envelope {
        Some(envelope) => {
            crate::crypto::open_column(vault_key, &schema.table_name, &change.column_name, envelope)
                .map_err(|_| Error::CryptoFailed {
                    table: schema.table_name.clone(),
                    column: change.column_name.clone(),
                })?
        }
        None => Value::Null,
    };

    let pk_values = pk_values_from_row_pks(schema, &change.row_pks)?;
    let pk_cols = schema.pk_columns.join(", ");
    let pk_placeholders: Vec<String> = (1..=pk_values.len()).map(|i| format!("?{i}")).collect();
    let value_idx = pk_values.len() + 1;
    let hlc_idx = value_idx + 1;
    let shadow_col = CrdtTableSchema::shadow_column(&change.column_name);
    let sql = format!(
        "INSERT INTO {table} ({pk_cols}, {col}, {shadow_col}) VALUES ({pk_placeholders}, ?{value_idx}, ?{hlc_idx})
         ON CONFLICT({pk_cols}) DO UPDATE SET {col} = excluded.{col}, {shadow_col} = excluded.{shadow_col}
         WHERE {shadow_col} IS NULL OR {shadow_col} < excluded.{shadow_col}",
        table = schema.table_name,
        col = change.column_name,
        pk_placeholders = pk_placeholders.join(", "),
    );
    let mut params: Vec<rusqlite::types::Value> =
        pk_values.iter().map(json_to_sql_value).collect();
    params.push(json_to_sql_value(&raw));
    params.push(rusqlite::types::Value::Text(change.hlc_timestamp.to_string()));
    let affected = conn.execute(&sql, rusqlite::params_from_iter(params))?;

    if affected > 0 {
        clock.observe(change.hlc_timestamp);
        outcome.record(&schema.table_name, change.hlc_timestamp);
    }
    Ok(())
}
