/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! `Vault`: the public facade over the engine (§2, §4). Host applications construct one per
//! unlocked vault and drive it exclusively through this type; everything underneath (`Database`,
//! `Clock`, `Transport`, `VaultKey`, `Orchestrator`) is injected at construction rather than
//! reached for as a singleton, per this crate's dependency-injected engine shape.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use crate::config::SyncConfig;
use crate::crypto::VaultKey;
use crate::db::{backends, tombstones, Database};
use crate::error::{ApiResult, Result};
use crate::events::EventBus;
use crate::hlc::{Clock, SystemClock};
use crate::ids::{BackendId, DeviceId, VaultId};
use crate::orchestrator::Orchestrator;
use crate::transport::Transport;

/// A freshly opened, unlocked vault with sync not yet started. Call `start_sync` to begin pulling
/// and pushing; until then the engine only answers read/administrative calls.
pub struct Vault {
    orchestrator: Arc<Orchestrator>,
}

impl Vault {
    /// Open the local store at `path`, unlocking it with `vault_key`. `device_id` identifies this
    /// install for HLC tie-breaking and self-origin filtering on the realtime channel.
    pub fn open(
        path: &Path,
        vault_key: VaultKey,
        device_id: DeviceId,
        transport: Arc<dyn Transport>,
        config: SyncConfig,
    ) -> Result<Self> {
        let db = Arc::new(Database::open(path)?);
        let clock = Arc::new(SystemClock::new(device_id));
        let events = Arc::new(EventBus::new());
        let orchestrator = Arc::new(Orchestrator::new(db, clock, transport, vault_key, config, events));
        Ok(Self { orchestrator })
    }

    pub fn open_in_memory(
        vault_key: VaultKey,
        device_id: DeviceId,
        transport: Arc<dyn Transport>,
        config: SyncConfig,
    ) -> Result<Self> {
        let db = Arc::new(Database::open_in_memory()?);
        let clock = Arc::new(SystemClock::new(device_id));
        let events = Arc::new(EventBus::new());
        let orchestrator = Arc::new(Orchestrator::new(db, clock, transport, vault_key, config, events));
        Ok(Self { orchestrator })
    }

    /// `startSync()` (§4.8 `startAll`): initializes every enabled backend and flips
    /// `initial_sync_complete`. Pushes are refused before this completes (§4.5 step 7).
    pub async fn start_sync(&self) -> Result<()> {
        self.orchestrator.start_all().await
    }

    /// `stopSync()` (§4.8 `stopAll`): tears down subscriptions, timers, and backend locks.
    pub fn stop_sync(&self) {
        self.orchestrator.stop_all();
    }

    /// Registers a new backend and runs its initial pull before the row is ever persisted
    /// (§4.8 "Initial pull path"), so a crash mid-pull never leaves a half-populated backend.
    pub async fn add_backend(
        &self,
        server_url: String,
        vault_id: VaultId,
        email: String,
    ) -> Result<BackendId> {
        let transient = backends::Backend {
            id: BackendId::new(),
            server_url,
            vault_id,
            email,
            enabled: true,
            last_push_hlc: None,
            last_pull_server_ts: None,
        };
        let id = transient.id;
        self.orchestrator.perform_initial_pull(transient).await?;
        Ok(id)
    }

    pub fn remove_backend(&self, backend: BackendId) -> Result<()> {
        self.orchestrator
            .db()
            .with_conn(|conn| backends::remove(conn, backend))
    }

    pub fn enable_backend(&self, backend: BackendId) -> Result<()> {
        self.orchestrator
            .db()
            .with_conn(|conn| backends::set_enabled(conn, backend, true))
    }

    pub fn disable_backend(&self, backend: BackendId) -> Result<()> {
        self.orchestrator
            .db()
            .with_conn(|conn| backends::set_enabled(conn, backend, false))
    }

    /// `pushAll(backend)` (§4.8 "Full re-upload path"): recovery when the server lost data.
    pub async fn push_all(&self, backend: BackendId) -> Result<()> {
        self.orchestrator.push_all(backend).await
    }

    /// Tombstone cleanup (§4.2 retention): purges tombstones older than the configured retention
    /// window, measured against the tombstone's own HLC wall-clock component.
    pub fn cleanup_tombstones(&self) -> Result<usize> {
        let retention_days = self.orchestrator.config().tombstone_retention_days;
        let now_ns = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_nanos() as u64;
        self.orchestrator
            .db()
            .with_conn(|conn| tombstones::cleanup_expired(conn, now_ns, retention_days))
    }

    pub fn vacuum(&self) -> Result<()> {
        self.orchestrator.db().with_conn(|conn| tombstones::vacuum(conn))
    }

    /// Called by the host application after it executes any local write, so the adaptive debounce
    /// (§4.8) can schedule a coalesced push.
    pub fn notify_local_write(&self) {
        self.orchestrator.notify_local_write();
    }

    pub fn register_table_reload(
        &self,
        watched: BTreeSet<String>,
        reload: impl Fn(&BTreeSet<String>) + Send + Sync + 'static,
    ) {
        self.orchestrator.events().register_table_reload(watched, reload);
    }

    pub fn on_tables_updated(
        &self,
        readable: BTreeSet<String>,
        notify: impl Fn(&BTreeSet<String>) + Send + Sync + 'static,
    ) {
        self.orchestrator.events().subscribe_extension(readable, notify);
    }

    pub fn initial_sync_complete(&self) -> Result<bool> {
        self.orchestrator.initial_sync_complete()
    }
}

/// Converts an internal error to the public FFI-facing error, logging/reporting as appropriate
/// (§7). Host bindings call this at the boundary rather than matching on `Error` directly.
pub fn to_api_result<T>(result: Result<T>) -> ApiResult<T> {
    result.map_err(crate::error::to_api_error)
}
