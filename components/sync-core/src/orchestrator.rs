/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Orchestrator (C8, §4.8): per-backend lifecycle, adaptive push debounce, periodic fallback
//! pull, and the initial-pull / full-reupload recovery paths.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::SyncConfig;
use crate::crypto::VaultKey;
use crate::db::{self, backends, dirty, Database};
use crate::error::Result;
use crate::events::EventBus;
use crate::hlc::Clock;
use crate::ids::BackendId;
use crate::mutex::BackendRegistry;
use crate::transport::Transport;
use crate::{pull, push, realtime};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Idle,
    Initializing,
    Running,
    Stopped,
}

struct BackendTasks {
    lifecycle: Lifecycle,
    periodic: Option<JoinHandle<()>>,
    realtime: Option<JoinHandle<()>>,
}

impl Default for BackendTasks {
    fn default() -> Self {
        Self {
            lifecycle: Lifecycle::Idle,
            periodic: None,
            realtime: None,
        }
    }
}

/// Computes the debounce delay for the next scheduled push given how many local-write signals
/// landed in the trailing 1 s window (§4.8 "Adaptive push debounce"). Pulled out as a pure
/// function so the escalation/reversion behavior is deterministically testable.
fn adaptive_debounce(recent_events: usize, config: &SyncConfig) -> Duration {
    if recent_events as u32 >= config.debounce_burst_threshold {
        Duration::from_millis(config.debounce_ceiling_ms)
    } else {
        Duration::from_millis(config.continuous_debounce_ms)
    }
}

pub struct Orchestrator {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
    transport: Arc<dyn Transport>,
    vault_key: VaultKey,
    config: SyncConfig,
    mutex: Arc<BackendRegistry>,
    events: Arc<EventBus>,
    tasks: StdMutex<HashMap<BackendId, BackendTasks>>,
    write_window: StdMutex<VecDeque<Instant>>,
    push_generation: Arc<AtomicU64>,
}

impl Orchestrator {
    pub fn new(
        db: Arc<Database>,
        clock: Arc<dyn Clock>,
        transport: Arc<dyn Transport>,
        vault_key: VaultKey,
        config: SyncConfig,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            db,
            clock,
            transport,
            vault_key,
            config,
            mutex: Arc::new(BackendRegistry::new()),
            events,
            tasks: StdMutex::new(HashMap::new()),
            write_window: StdMutex::new(VecDeque::new()),
            push_generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    fn set_lifecycle(&self, backend: BackendId, lifecycle: Lifecycle) {
        self.tasks
            .lock()
            .unwrap()
            .entry(backend)
            .or_default()
            .lifecycle = lifecycle;
    }

    pub fn lifecycle(&self, backend: BackendId) -> Lifecycle {
        self.tasks
            .lock()
            .unwrap()
            .get(&backend)
            .map(|t| t.lifecycle)
            .unwrap_or(Lifecycle::Idle)
    }

    async fn run_pull(&self, backend: BackendId) -> Result<()> {
        let _guard = self.mutex.acquire(backend).await;
        let affected = pull::pull(
            &self.db,
            self.clock.as_ref(),
            self.transport.as_ref(),
            &self.vault_key,
            backend,
            self.config.pull_page_limit,
        )
        .await?;
        self.events.publish_tables_updated(&affected);
        Ok(())
    }

    async fn run_push(&self, backend: BackendId) -> Result<()> {
        let _guard = self.mutex.acquire(backend).await;
        push::push(
            &self.db,
            self.clock.as_ref(),
            self.transport.as_ref(),
            &self.vault_key,
            backend,
        )
        .await
    }

    /// `init(backend)` (§4.8): pull, push, subscribe to realtime, start the periodic fallback.
    pub async fn init(self: &Arc<Self>, backend: BackendId) -> Result<()> {
        if self.lifecycle(backend) != Lifecycle::Idle {
            return Ok(());
        }
        self.set_lifecycle(backend, Lifecycle::Initializing);
        self.run_pull(backend).await?;
        self.run_push(backend).await?;

        let record = self
            .db
            .with_conn(|conn| backends::get(conn, backend))?
            .ok_or(crate::error::Error::BackendUnknown(backend))?;

        let (pull_tx, pull_rx) = mpsc::channel(16);
        let realtime_handle = tokio::spawn({
            let transport = self.transport.clone();
            let self_device = self.clock.node_id();
            realtime::run(transport, backend, record.vault_id, self_device, pull_tx)
        });
        let periodic_handle = tokio::spawn(self.clone().periodic_loop(backend));
        tokio::spawn(self.clone().drain_pull_requests(pull_rx));

        let mut tasks = self.tasks.lock().unwrap();
        let entry = tasks.entry(backend).or_default();
        entry.realtime = Some(realtime_handle);
        entry.periodic = Some(periodic_handle);
        entry.lifecycle = Lifecycle::Running;
        Ok(())
    }

    async fn drain_pull_requests(self: Arc<Self>, mut rx: mpsc::Receiver<BackendId>) {
        while let Some(backend) = rx.recv().await {
            let _ = self.run_pull(backend).await;
        }
    }

    async fn periodic_loop(self: Arc<Self>, backend: BackendId) {
        let interval = Duration::from_millis(self.config.periodic_interval_ms);
        loop {
            tokio::time::sleep(interval).await;
            let _ = self.run_pull(backend).await;
        }
    }

    /// `startAll()` (§4.8): initializes every enabled backend, then clears dirty tables twice —
    /// once after the inits, once after setting `initial_sync_complete`, since that flag write is
    /// itself a local write that would otherwise mark the vault dirty before the flag takes
    /// effect. Only after the second clear may pushes run.
    pub async fn start_all(self: &Arc<Self>) -> Result<()> {
        let enabled: Vec<BackendId> = self
            .db
            .with_conn(|conn| {
                let mut stmt = conn.prepare("SELECT id FROM backends WHERE enabled = 1")?;
                let ids = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<BackendId>, _>>()?;
                Ok(ids)
            })?;

        for backend in enabled {
            self.init(backend).await?;
        }
        self.db.with_conn(|conn| dirty::clear_all(conn))?;

        self.set_initial_sync_complete()?;
        self.db.with_conn(|conn| dirty::clear_all(conn))?;
        Ok(())
    }

    fn set_initial_sync_complete(&self) -> Result<()> {
        self.db
            .with_conn(|conn| db::vault_settings::set_initial_sync_complete(conn))
    }

    pub fn initial_sync_complete(&self) -> Result<bool> {
        self.db
            .with_conn(|conn| db::vault_settings::initial_sync_complete(conn))
    }

    /// `stopAll()` (§4.8): tears down subscriptions and timers, drops all backend locks.
    pub fn stop_all(&self) {
        let mut tasks = self.tasks.lock().unwrap();
        for (_, mut state) in tasks.drain() {
            if let Some(handle) = state.periodic.take() {
                handle.abort();
            }
            if let Some(handle) = state.realtime.take() {
                handle.abort();
            }
        }
        self.mutex.reset();
    }

    /// Called by the host application after any local write. Feeds the adaptive debounce window
    /// and schedules a coalesced push across every running backend.
    pub fn notify_local_write(self: &Arc<Self>) {
        let now = Instant::now();
        let count = {
            let mut window = self.write_window.lock().unwrap();
            window.push_back(now);
            while let Some(front) = window.front() {
                if now.duration_since(*front) > Duration::from_secs(1) {
                    window.pop_front();
                } else {
                    break;
                }
            }
            window.len()
        };
        let delay = adaptive_debounce(count, &self.config);
        let my_generation = self.push_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if this.push_generation.load(Ordering::SeqCst) != my_generation {
                return;
            }
            let backends: Vec<BackendId> = this
                .tasks
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, t)| t.lifecycle == Lifecycle::Running)
                .map(|(id, _)| *id)
                .collect();
            for backend in backends {
                let _ = this.run_push(backend).await;
            }
        });
    }

    /// `performInitialPull` (§4.8 "Initial pull path"): downloads everything for a transient
    /// backend record, applies it, and only then persists the backend row, so a crash mid-pull
    /// never leaves a half-populated backend registered. `pull::pull_for_new_backend` never
    /// touches the `backends` table itself; the insert below is the only write, and it only
    /// happens once the download has fully succeeded.
    pub async fn perform_initial_pull(
        self: &Arc<Self>,
        mut transient: backends::Backend,
    ) -> Result<()> {
        let _guard = self.mutex.acquire(transient.id).await;
        let outcome = pull::pull_for_new_backend(
            &self.db,
            self.clock.as_ref(),
            self.transport.as_ref(),
            &self.vault_key,
            transient.id,
            transient.vault_id,
            self.config.pull_page_limit,
        )
        .await?;

        transient.last_pull_server_ts = Some(outcome.last_pull_server_ts);
        self.db
            .with_conn(|conn| backends::insert(conn, &transient))?;
        self.events.publish_tables_updated(&outcome.affected_tables);
        Ok(())
    }

    /// `pushAll(backend)` (§4.8 "Full re-upload path"): recovery when the server lost data.
    pub async fn push_all(&self, backend: BackendId) -> Result<()> {
        let _guard = self.mutex.acquire(backend).await;
        push::push_all(
            &self.db,
            self.clock.as_ref(),
            self.transport.as_ref(),
            &self.vault_key,
            backend,
        )
        .await
    }
}
