/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Table scanner (C3, §4.3): derives column-level changes newer than a cursor and encrypts them.

use rusqlite::Connection;
use serde_json::Value;
use uuid::Uuid;

use crate::canonical_json::canonical_row_pks;
use crate::crypto::VaultKey;
use crate::db::catalog::{self, CrdtTableSchema};
use crate::db::convert::value_ref_to_json;
use crate::error::Result;
use crate::hlc::Hlc;
use crate::ids::DeviceId;
use crate::wire::ColumnChange;

/// The synthetic column name carrying tombstone markers over the wire (§4.7 step 4).
pub const TOMBSTONE_COLUMN_NAME: &str = "__tombstone";

/// Scan one CRDT table for column changes newer than `since`, sealing each non-null value under
/// `vault_key` and tagging every change with `batch_id` and `device_id` (§4.3).
///
/// Ordering and `batchSeq`/`batchTotal` assignment (§4.3 step 4) are the caller's job once changes
/// from every dirty table have been collected into one batch (§4.5 step 2) — see `push::collect_changes`.
pub fn scan(
    conn: &Connection,
    schema: &CrdtTableSchema,
    since: Option<Hlc>,
    batch_id: Uuid,
    device_id: DeviceId,
    vault_key: &VaultKey,
) -> Result<Vec<ColumnChange>> {
    let mut select_cols: Vec<String> = schema.pk_columns.clone();
    for user_col in &schema.user_columns {
        select_cols.push(user_col.clone());
        select_cols.push(CrdtTableSchema::shadow_column(user_col));
    }
    let tombstone_idx = select_cols.len();
    select_cols.push(catalog::TOMBSTONE_SHADOW_COLUMN.to_string());
    let sql = format!(
        "SELECT {} FROM {}",
        select_cols.join(", "),
        schema.table_name
    );
    let mut stmt = conn.prepare(&sql)?;
    let pk_count = schema.pk_columns.len();

    let mut changes = Vec::new();
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let mut pk_values = Vec::with_capacity(pk_count);
        for i in 0..pk_count {
            pk_values.push(value_ref_to_json(row.get_ref(i)?));
        }
        let pk_pairs: Vec<(&str, &Value)> = schema
            .pk_columns
            .iter()
            .map(|s| s.as_str())
            .zip(pk_values.iter())
            .collect();
        let row_pks = canonical_row_pks(&pk_pairs);

        for (idx, user_col) in schema.user_columns.iter().enumerate() {
            let value_idx = pk_count + idx * 2;
            let hlc_idx = value_idx + 1;
            let shadow: Option<String> = row.get(hlc_idx)?;
            let Some(shadow) = shadow else { continue };
            let hlc: Hlc = shadow.parse()?;
            let newer = match since {
                Some(since) => hlc > since,
                None => true,
            };
            if !newer {
                continue;
            }
            let raw = value_ref_to_json(row.get_ref(value_idx)?);
            let envelope = if raw.is_null() {
                None
            } else {
                Some(crate::crypto::seal_column(
                    vault_key,
                    &schema.table_name,
                    user_col,
                    &raw,
                )?)
            };
            changes.push(ColumnChange {
                table_name: schema.table_name.clone(),
                row_pks: row_pks.clone(),
                column_name: user_col.clone(),
                hlc_timestamp: hlc,
                batch_id,
                batch_seq: 0,
                batch_total: 0,
                device_id,
                envelope,
            });
        }

        let tombstone: Option<String> = row.get(tombstone_idx)?;
        if let Some(tombstone) = tombstone {
            let hlc: Hlc = tombstone.parse()?;
            let newer = match since {
                Some(since) => hlc > since,
                None => true,
            };
            if newer {
                changes.push(ColumnChange {
                    table_name: schema.table_name.clone(),
                    row_pks: row_pks.clone(),
                    column_name: TOMBSTONE_COLUMN_NAME.to_string(),
                    hlc_timestamp: hlc,
                    batch_id,
                    batch_seq: 0,
                    batch_total: 0,
                    device_id,
                    envelope: None,
                });
            }
        }
    }
    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hlc::{Clock, TestClock};
    use rusqlite::Connection;

    fn setup() -> (Connection, CrdtTableSchema, VaultKey, DeviceId) {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE notes (
                id TEXT PRIMARY KEY,
                title TEXT, title__hlc TEXT,
                body TEXT, body__hlc TEXT,
                __tombstone__hlc TEXT
            );",
        )
        .unwrap();
        let schema = catalog::load_table_schema(&conn, "notes").unwrap().unwrap();
        let key = VaultKey::from_bytes([3u8; 32]);
        let device = DeviceId::new();
        (conn, schema, key, device)
    }

    #[test]
    fn scan_emits_one_change_per_dirty_column() {
        let (conn, schema, key, device) = setup();
        let clock = TestClock::new(device, 1_000);
        let hlc1 = clock.now();
        conn.execute(
            "INSERT INTO notes (id, title, title__hlc, body, body__hlc) VALUES ('k1', 'a', ?1, NULL, NULL)",
            rusqlite::params![hlc1.to_string()],
        )
        .unwrap();
        let changes = scan(&conn, &schema, None, Uuid::nil(), device, &key).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].column_name, "title");
        assert_eq!(changes[0].row_pks, r#"{"id":"k1"}"#);
        assert!(changes[0].envelope.is_some());
    }

    #[test]
    fn scan_respects_since_cursor() {
        let (conn, schema, key, device) = setup();
        let clock = TestClock::new(device, 1_000);
        let hlc1 = clock.now();
        let hlc2 = clock.now();
        conn.execute(
            "INSERT INTO notes (id, title, title__hlc, body, body__hlc) VALUES ('k1', 'a', ?1, 'b', ?2)",
            rusqlite::params![hlc1.to_string(), hlc2.to_string()],
        )
        .unwrap();
        let changes = scan(&conn, &schema, Some(hlc1), Uuid::nil(), device, &key).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].column_name, "body");
    }

    #[test]
    fn scan_emits_null_values_without_an_envelope() {
        let (conn, schema, key, device) = setup();
        let clock = TestClock::new(device, 1_000);
        let hlc1 = clock.now();
        conn.execute(
            "INSERT INTO notes (id, title, title__hlc, body, body__hlc) VALUES ('k1', NULL, ?1, NULL, NULL)",
            rusqlite::params![hlc1.to_string()],
        )
        .unwrap();
        let changes = scan(&conn, &schema, None, Uuid::nil(), device, &key).unwrap();
        assert_eq!(changes.len(), 1);
        assert!(changes[0].envelope.is_none());
    }
}
