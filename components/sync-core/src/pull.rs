/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Pull pipeline (C6, §4.6): paginated download, decryption, ordered apply, cursor advancement.

use std::collections::BTreeSet;

use crate::crypto::VaultKey;
use crate::db::{backends, pending_columns, Database};
use crate::error::{Error, Result};
use crate::hlc::Clock;
use crate::ids::{BackendId, VaultId};
use crate::migration_coordinator;
use crate::transport::Transport;
use crate::wire::{ColumnChange, PullColumnsColumnSpec, PullColumnsRequest, PullRequest};

const MAX_PAGE_RETRIES: u32 = 3;

/// The result of downloading and applying one pull's worth of pages, before any cursor has been
/// written back to the `backends` table. Kept separate from cursor persistence so the initial-pull
/// path (§4.8 "Initial pull path") can run the whole download/apply sequence against a backend
/// that is not in the database yet.
struct DownloadedPull {
    affected: BTreeSet<String>,
    last_server_ts: i64,
    ran_apply: bool,
}

/// `pull(backend)` (§4.6). Like `push`, the caller already holds the backend mutex.
pub async fn pull(
    db: &Database,
    clock: &dyn Clock,
    transport: &dyn Transport,
    vault_key: &VaultKey,
    backend_id: BackendId,
    page_limit: u32,
) -> Result<BTreeSet<String>> {
    let backend = db
        .with_conn(|conn| backends::get(conn, backend_id))?
        .ok_or(Error::BackendUnknown(backend_id))?;
    if !backend.enabled {
        return Err(Error::BackendDisabled(backend_id));
    }

    let downloaded = download_and_apply(
        db,
        clock,
        transport,
        vault_key,
        backend_id,
        backend.vault_id,
        backend.last_pull_server_ts.unwrap_or(0),
        page_limit,
    )
    .await?;
    db.with_conn(|conn| backends::set_last_pull_server_ts(conn, backend_id, downloaded.last_server_ts))?;

    let mut affected = downloaded.affected;
    if downloaded.ran_apply {
        let reconciled =
            pull_pending_columns(db, clock, transport, vault_key, backend_id, backend.vault_id, page_limit)
                .await?;
        affected.extend(reconciled);
    }
    Ok(affected)
}

/// Outcome of `pull_for_new_backend`: everything the caller needs to persist the backend row once,
/// fully populated, after the download has already succeeded.
pub struct InitialPullOutcome {
    pub affected_tables: BTreeSet<String>,
    pub last_pull_server_ts: i64,
}

/// `performInitialPull`'s download step (§4.8 "Initial pull path"): pulls everything for a backend
/// that has not been persisted yet. Touches no row in the `backends` table — the caller inserts it,
/// with `last_pull_server_ts` already set from the returned outcome, only once this succeeds.
pub async fn pull_for_new_backend(
    db: &Database,
    clock: &dyn Clock,
    transport: &dyn Transport,
    vault_key: &VaultKey,
    backend_id: BackendId,
    vault_id: VaultId,
    page_limit: u32,
) -> Result<InitialPullOutcome> {
    let downloaded =
        download_and_apply(db, clock, transport, vault_key, backend_id, vault_id, 0, page_limit).await?;
    let mut affected = downloaded.affected;
    if downloaded.ran_apply {
        let reconciled =
            pull_pending_columns(db, clock, transport, vault_key, backend_id, vault_id, page_limit).await?;
        affected.extend(reconciled);
    }
    Ok(InitialPullOutcome {
        affected_tables: affected,
        last_pull_server_ts: downloaded.last_server_ts,
    })
}

async fn download_and_apply(
    db: &Database,
    clock: &dyn Clock,
    transport: &dyn Transport,
    vault_key: &VaultKey,
    backend_id: BackendId,
    vault_id: VaultId,
    starting_server_ts: i64,
    page_limit: u32,
) -> Result<DownloadedPull> {
    let mut all_changes: Vec<ColumnChange> = Vec::new();
    let mut after_table_name = None;
    let mut after_row_pks = None;
    let mut last_server_ts = starting_server_ts;

    loop {
        let request = PullRequest {
            vault_id,
            after_updated_at: Some(last_server_ts),
            after_table_name: after_table_name.clone(),
            after_row_pks: after_row_pks.clone(),
            limit: page_limit,
        };
        let page = fetch_page_with_retry(transport, backend_id, request).await?;
        last_server_ts = page.server_timestamp;
        after_table_name = page.last_table_name.clone();
        after_row_pks = page.last_row_pks.clone();
        let has_more = page.has_more;
        all_changes.extend(page.changes);
        if !has_more {
            break;
        }
    }

    if all_changes.is_empty() {
        return Ok(DownloadedPull {
            affected: BTreeSet::new(),
            last_server_ts,
            ran_apply: false,
        });
    }

    let outcome = migration_coordinator::apply_pull_batch(db, clock, vault_key, &all_changes)?;
    Ok(DownloadedPull {
        affected: outcome.affected_tables,
        last_server_ts,
        ran_apply: true,
    })
}

async fn fetch_page_with_retry(
    transport: &dyn Transport,
    backend_id: BackendId,
    request: PullRequest,
) -> Result<crate::wire::PullResponse> {
    let mut attempt = 0;
    loop {
        match transport.pull(backend_id, request.clone()).await {
            Ok(page) => return Ok(page),
            Err(e) => {
                attempt += 1;
                let retryable = matches!(e, crate::transport::TransportError::Network { retryable: true });
                if !retryable || attempt > MAX_PAGE_RETRIES {
                    return Err(e.into());
                }
            }
        }
    }
}

/// Catch-up for quarantined columns (§4.7 "Pending-column catch-up", P9): for every pending
/// `(table, column)`, fetch its entire history and apply it, then clear the quarantine entry.
async fn pull_pending_columns(
    db: &Database,
    clock: &dyn Clock,
    transport: &dyn Transport,
    vault_key: &VaultKey,
    backend_id: BackendId,
    vault_id: VaultId,
    page_limit: u32,
) -> Result<BTreeSet<String>> {
    let pending = db.with_conn(pending_columns::list_pending)?;
    let mut affected = BTreeSet::new();
    for column in pending {
        let mut after_table_name = None;
        let mut after_row_pks = None;
        let mut changes = Vec::new();
        loop {
            let request = PullColumnsRequest {
                vault_id,
                columns: vec![PullColumnsColumnSpec {
                    table_name: column.table_name.clone(),
                    column_name: column.column_name.clone(),
                }],
                limit: page_limit,
                after_table_name: after_table_name.clone(),
                after_row_pks: after_row_pks.clone(),
            };
            let page = transport.pull_columns(backend_id, request).await?;
            after_table_name = page.last_table_name.clone();
            after_row_pks = page.last_row_pks.clone();
            let has_more = page.has_more;
            changes.extend(page.changes);
            if !has_more {
                break;
            }
        }
        if !changes.is_empty() {
            let outcome = crate::apply::apply(db, clock, vault_key, &changes)?;
            affected.extend(outcome.affected_tables);
        }
        db.with_conn(|conn| pending_columns::clear(conn, &column.table_name, &column.column_name))?;
    }
    Ok(affected)
}
