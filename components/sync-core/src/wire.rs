/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Wire-level DTOs exchanged with the relay server (§6.1).

use crate::crypto::ColumnEnvelope;
use crate::hlc::Hlc;
use crate::ids::{DeviceId, VaultId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single column change, as it appears on the wire (§3 "Column Change").
///
/// Absence of `envelope` denotes a deliberately-null value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnChange {
    pub table_name: String,
    pub row_pks: String,
    pub column_name: String,
    pub hlc_timestamp: Hlc,
    pub batch_id: Uuid,
    pub batch_seq: u32,
    pub batch_total: u32,
    pub device_id: DeviceId,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub envelope: Option<ColumnEnvelope>,
}

impl ColumnChange {
    /// The deterministic ordering key used for scan output and apply processing
    /// (§4.3 step 4, §5 "Ordering guarantees"): `(tableName, rowPks, columnName, hlcTimestamp)`.
    pub fn sort_key(&self) -> (&str, &str, &str, &Hlc) {
        (&self.table_name, &self.row_pks, &self.column_name, &self.hlc_timestamp)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    pub vault_id: VaultId,
    pub changes: Vec<ColumnChange>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    pub server_timestamp: i64,
    pub accepted: u32,
}

#[derive(Debug, Clone)]
pub struct PullRequest {
    pub vault_id: VaultId,
    pub after_updated_at: Option<i64>,
    pub after_table_name: Option<String>,
    pub after_row_pks: Option<String>,
    pub limit: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    pub changes: Vec<ColumnChange>,
    pub has_more: bool,
    pub server_timestamp: i64,
    pub last_table_name: Option<String>,
    pub last_row_pks: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PullColumnsColumnSpec {
    pub table_name: String,
    pub column_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PullColumnsRequest {
    pub vault_id: VaultId,
    pub columns: Vec<PullColumnsColumnSpec>,
    pub limit: u32,
    pub after_table_name: Option<String>,
    pub after_row_pks: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultListingEntry {
    pub vault_id: VaultId,
    pub encrypted_vault_name: String,
    pub vault_name_nonce: String,
    pub vault_name_salt: String,
    pub created_at: i64,
}

/// An event delivered over the per-vault realtime channel (§4.9).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeEvent {
    pub vault_id: VaultId,
    pub device_id: DeviceId,
    pub kind: RealtimeEventKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RealtimeEventKind {
    Insert,
    Update,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_change_sort_key_orders_by_table_row_column_hlc() {
        let node = DeviceId::new();
        let make = |table: &str, pks: &str, col: &str, wall: u64| ColumnChange {
            table_name: table.to_string(),
            row_pks: pks.to_string(),
            column_name: col.to_string(),
            hlc_timestamp: Hlc::new(wall, 0, node),
            batch_id: Uuid::nil(),
            batch_seq: 1,
            batch_total: 1,
            device_id: node,
            envelope: None,
        };
        let mut changes = vec![
            make("notes", "k2", "body", 10),
            make("notes", "k1", "title", 10),
            make("notes", "k1", "body", 10),
        ];
        changes.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        let order: Vec<_> = changes
            .iter()
            .map(|c| (c.row_pks.as_str(), c.column_name.as_str()))
            .collect();
        assert_eq!(order, vec![("k1", "body"), ("k1", "title"), ("k2", "body")]);
    }
}
