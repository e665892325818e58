/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Push pipeline (C5, §4.5): batching, ordering, server upload, cursor advancement.

use uuid::Uuid;

use crate::crypto::VaultKey;
use crate::db::{backends, catalog, dirty, scanner, vault_settings, Database};
use crate::error::{Error, Result};
use crate::hlc::Clock;
use crate::ids::{BackendId, DeviceId};
use crate::transport::Transport;
use crate::wire::{ColumnChange, PushRequest};

/// Collect every dirty table's changes since `since`, assign `batchId`/`batchSeq`/`batchTotal`,
/// and order them deterministically (§4.3 step 4, §4.5 steps 2-4).
fn collect_changes(
    db: &Database,
    since: Option<crate::hlc::Hlc>,
    device_id: DeviceId,
    vault_key: &VaultKey,
    dirty_tables_only: bool,
) -> Result<Vec<ColumnChange>> {
    let batch_id = Uuid::new_v4();
    let mut changes = db.with_conn(|conn| {
        let tables = if dirty_tables_only {
            dirty::list_dirty_tables(conn)?
        } else {
            catalog::list_crdt_tables(conn)?
                .into_iter()
                .map(|t| t.table_name)
                .collect()
        };
        let mut all = Vec::new();
        for table in tables {
            if let Some(schema) = catalog::load_table_schema(conn, &table)? {
                all.extend(scanner::scan(
                    conn, &schema, since, batch_id, device_id, vault_key,
                )?);
            }
        }
        Ok(all)
    })?;
    changes.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    let total = changes.len() as u32;
    for (i, change) in changes.iter_mut().enumerate() {
        change.batch_seq = i as u32 + 1;
        change.batch_total = total;
    }
    Ok(changes)
}

/// `push(backend)` (§4.5). The caller must already hold the backend's mutex (C11); this function
/// does not acquire it itself so that `pushAll` and the orchestrator's debounced push share one
/// acquisition around retries.
pub async fn push(
    db: &Database,
    clock: &dyn Clock,
    transport: &dyn Transport,
    vault_key: &VaultKey,
    backend_id: BackendId,
) -> Result<()> {
    let backend = db
        .with_conn(|conn| backends::get(conn, backend_id))?
        .ok_or(Error::BackendUnknown(backend_id))?;
    if !backend.enabled {
        return Err(Error::BackendDisabled(backend_id));
    }
    if !db.with_conn(|conn| vault_settings::initial_sync_complete(conn))? {
        // §4.5 step 7 / §5: nothing may leave the device until the initial pull across every
        // backend has landed. Leave the dirty rows queued; `startAll` pushes once it flips the
        // flag.
        return Ok(());
    }

    let changes = collect_changes(
        db,
        backend.last_push_hlc,
        clock.node_id(),
        vault_key,
        true,
    )?;
    if changes.is_empty() {
        db.with_conn(|conn| dirty::clear_all(conn))?;
        return Ok(());
    }

    let max_hlc = changes
        .iter()
        .map(|c| c.hlc_timestamp)
        .max()
        .expect("non-empty changes has a max");
    let push_started_at = now_unix_ms();

    let response = transport
        .push(
            backend_id,
            PushRequest {
                vault_id: backend.vault_id,
                changes,
            },
        )
        .await?;

    db.with_conn(|conn| {
        backends::set_last_push_hlc(conn, backend_id, max_hlc)?;
        backends::set_last_pull_server_ts_if_unset(conn, backend_id, response.server_timestamp)?;
        for table in catalog::list_crdt_tables(conn)?
            .into_iter()
            .map(|t| t.table_name)
        {
            dirty::clear_dirty_if_unchanged_since(conn, &table, push_started_at)?;
        }
        Ok(())
    })?;
    Ok(())
}

/// Full re-upload recovery path (§4.8 "Full re-upload path", scenario 6): scans every CRDT table
/// ignoring `last_push_hlc`, pushes everything, then sets cursors to the server's response so the
/// data is not immediately echoed back on the next pull.
pub async fn push_all(
    db: &Database,
    clock: &dyn Clock,
    transport: &dyn Transport,
    vault_key: &VaultKey,
    backend_id: BackendId,
) -> Result<()> {
    let backend = db
        .with_conn(|conn| backends::get(conn, backend_id))?
        .ok_or(Error::BackendUnknown(backend_id))?;
    if !backend.enabled {
        return Err(Error::BackendDisabled(backend_id));
    }
    if !db.with_conn(|conn| vault_settings::initial_sync_complete(conn))? {
        return Ok(());
    }

    let changes = collect_changes(db, None, clock.node_id(), vault_key, false)?;
    if changes.is_empty() {
        return Ok(());
    }
    let max_hlc = changes
        .iter()
        .map(|c| c.hlc_timestamp)
        .max()
        .expect("non-empty changes has a max");

    let response = transport
        .push(
            backend_id,
            PushRequest {
                vault_id: backend.vault_id,
                changes,
            },
        )
        .await?;

    db.with_conn(|conn| {
        backends::set_last_push_hlc(conn, backend_id, max_hlc)?;
        backends::set_last_pull_server_ts(conn, backend_id, response.server_timestamp)?;
        dirty::clear_all(conn)
    })?;
    Ok(())
}

fn now_unix_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as i64
}
