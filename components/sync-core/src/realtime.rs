/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Realtime listener (C9, §4.9): a liveness hint, never a source of truth. It schedules a
//! debounced pull on non-self-originated events and never applies payloads itself.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;

use crate::ids::{BackendId, DeviceId, VaultId};
use crate::transport::Transport;
use crate::wire::RealtimeEventKind;

const DEBOUNCE: Duration = Duration::from_millis(500);
const BACKOFF_BASE: Duration = Duration::from_secs(5);
const BACKOFF_MULTIPLIER: u32 = 2;
const MAX_RETRIES: u32 = 3;

/// Runs until the channel subscription permanently fails (after `MAX_RETRIES` backed-off
/// reconnect attempts), at which point the caller is expected to already be relying on the
/// periodic fallback pull (§4.8) for convergence.
///
/// `pull_requested` carries a liveness hint, not a command queue: the orchestrator debounces and
/// coalesces on its own side (§4.8's adaptive debounce), so this function only needs to notify it
/// promptly, not deduplicate.
pub async fn run(
    transport: Arc<dyn Transport>,
    backend: BackendId,
    vault_id: VaultId,
    self_device: DeviceId,
    pull_requested: mpsc::Sender<BackendId>,
) {
    let mut retries = 0u32;
    let mut backoff = BACKOFF_BASE;
    let generation = Arc::new(AtomicU64::new(0));

    loop {
        let mut stream = match transport.subscribe_realtime(backend, vault_id).await {
            Ok(stream) => stream,
            Err(_) => {
                if !sleep_before_retry(&mut retries, &mut backoff).await {
                    return;
                }
                continue;
            }
        };

        let mut saw_channel_error = false;
        while let Some(item) = stream.next().await {
            match item {
                Ok(event) => {
                    retries = 0;
                    backoff = BACKOFF_BASE;
                    if event.device_id == self_device {
                        continue; // self-originated: dropped (§4.9).
                    }
                    if !matches!(
                        event.kind,
                        RealtimeEventKind::Insert | RealtimeEventKind::Update
                    ) {
                        continue;
                    }
                    schedule_debounced_pull(
                        backend,
                        pull_requested.clone(),
                        generation.clone(),
                    );
                }
                Err(_) => {
                    saw_channel_error = true;
                    break;
                }
            }
        }

        if !saw_channel_error {
            // Stream ended cleanly (server closed it); treat the same as a channel error for
            // reconnect purposes, since §4.9 doesn't distinguish the two.
        }
        if !sleep_before_retry(&mut retries, &mut backoff).await {
            return;
        }
    }
}

/// Returns `false` once retries are exhausted, meaning the caller should fall back permanently to
/// the periodic timer (§4.9).
async fn sleep_before_retry(retries: &mut u32, backoff: &mut Duration) -> bool {
    *retries += 1;
    if *retries > MAX_RETRIES {
        return false;
    }
    tokio::time::sleep(*backoff).await;
    *backoff *= BACKOFF_MULTIPLIER;
    true
}

fn schedule_debounced_pull(
    backend: BackendId,
    pull_requested: mpsc::Sender<BackendId>,
    generation: Arc<AtomicU64>,
) {
    let my_generation = generation.fetch_add(1, Ordering::SeqCst) + 1;
    tokio::spawn(async move {
        tokio::time::sleep(DEBOUNCE).await;
        if generation.load(Ordering::SeqCst) == my_generation {
            let _ = pull_requested.send(backend).await;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeTransport;
    use crate::wire::RealtimeEvent;
    use futures::stream;
    use std::sync::Mutex as StdMutex;

    /// A transport whose `subscribe_realtime` yields a fixed, pre-scripted sequence of events and
    /// then ends the stream, so the listener's reconnect/backoff path is exercised deterministically.
    struct ScriptedTransport {
        inner: FakeTransport,
        events: StdMutex<Option<Vec<Result<RealtimeEvent, crate::transport::TransportError>>>>,
    }

    #[async_trait::async_trait]
    impl Transport for ScriptedTransport {
        async fn push(
            &self,
            backend: BackendId,
            request: crate::wire::PushRequest,
        ) -> Result<crate::wire::PushResponse, crate::transport::TransportError> {
            self.inner.push(backend, request).await
        }
        async fn pull(
            &self,
            backend: BackendId,
            request: crate::wire::PullRequest,
        ) -> Result<crate::wire::PullResponse, crate::transport::TransportError> {
            self.inner.pull(backend, request).await
        }
        async fn pull_columns(
            &self,
            backend: BackendId,
            request: crate::wire::PullColumnsRequest,
        ) -> Result<crate::wire::PullResponse, crate::transport::TransportError> {
            self.inner.pull_columns(backend, request).await
        }
        async fn list_vaults(
            &self,
            backend: BackendId,
        ) -> Result<Vec<crate::wire::VaultListingEntry>, crate::transport::TransportError> {
            self.inner.list_vaults(backend).await
        }
        async fn subscribe_realtime(
            &self,
            _backend: BackendId,
            _vault_id: VaultId,
        ) -> Result<crate::transport::RealtimeStream, crate::transport::TransportError> {
            let events = self.events.lock().unwrap().take().unwrap_or_default();
            Ok(Box::pin(stream::iter(events)))
        }
    }

    #[tokio::test]
    async fn a_non_self_event_schedules_a_pull_after_debounce() {
        let device = DeviceId::new();
        let other = DeviceId::new();
        let backend = BackendId::new();
        let vault = VaultId::new();
        let transport = Arc::new(ScriptedTransport {
            inner: FakeTransport::new(),
            events: StdMutex::new(Some(vec![Ok(RealtimeEvent {
                vault_id: vault,
                device_id: other,
                kind: RealtimeEventKind::Insert,
            })])),
        });
        let (tx, mut rx) = mpsc::channel(4);
        tokio::time::pause();
        let handle = tokio::spawn(run(transport, backend, vault, device, tx));
        tokio::time::advance(Duration::from_millis(600)).await;
        let requested = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap();
        assert_eq!(requested, Some(backend));
        handle.abort();
    }

    #[tokio::test]
    async fn a_self_originated_event_never_schedules_a_pull() {
        let device = DeviceId::new();
        let backend = BackendId::new();
        let vault = VaultId::new();
        let transport = Arc::new(ScriptedTransport {
            inner: FakeTransport::new(),
            events: StdMutex::new(Some(vec![Ok(RealtimeEvent {
                vault_id: vault,
                device_id: device,
                kind: RealtimeEventKind::Update,
            })])),
        });
        let (tx, mut rx) = mpsc::channel(4);
        tokio::time::pause();
        let handle = tokio::spawn(run(transport, backend, vault, device, tx));
        tokio::time::advance(Duration::from_millis(600)).await;
        assert!(rx.try_recv().is_err());
        handle.abort();
    }
}
