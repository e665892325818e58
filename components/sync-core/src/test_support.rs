/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! A fake in-memory `Transport`, the way this crate family keeps its component tests free of real
//! network I/O (§10.5). Not built into non-test artifacts.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream;

use crate::ids::{BackendId, VaultId};
use crate::transport::{RealtimeStream, Transport, TransportError};
use crate::wire::{
    PullColumnsRequest, PullRequest, PullResponse, PushRequest, PushResponse, VaultListingEntry,
};

/// An in-memory stand-in relay server: accepts pushes into a log, answers pulls against it.
#[derive(Default)]
pub struct FakeTransport {
    pushed: Mutex<Vec<PushRequest>>,
    push_calls: AtomicUsize,
    pull_calls: AtomicUsize,
    server_clock: AtomicI64,
    vaults: Mutex<Vec<VaultListingEntry>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_call_count(&self) -> usize {
        self.push_calls.load(Ordering::SeqCst)
    }

    pub fn pull_call_count(&self) -> usize {
        self.pull_calls.load(Ordering::SeqCst)
    }

    pub fn pushed_requests(&self) -> Vec<PushRequest> {
        self.pushed.lock().unwrap().clone()
    }

    pub fn set_vaults(&self, vaults: Vec<VaultListingEntry>) {
        *self.vaults.lock().unwrap() = vaults;
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn push(
        &self,
        _backend: BackendId,
        request: PushRequest,
    ) -> Result<PushResponse, TransportError> {
        self.push_calls.fetch_add(1, Ordering::SeqCst);
        let accepted = request.changes.len() as u32;
        self.pushed.lock().unwrap().push(request);
        let server_timestamp = self.server_clock.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(PushResponse {
            server_timestamp,
            accepted,
        })
    }

    async fn pull(
        &self,
        _backend: BackendId,
        _request: PullRequest,
    ) -> Result<PullResponse, TransportError> {
        self.pull_calls.fetch_add(1, Ordering::SeqCst);
        Ok(PullResponse {
            changes: Vec::new(),
            has_more: false,
            server_timestamp: self.server_clock.load(Ordering::SeqCst),
            last_table_name: None,
            last_row_pks: None,
        })
    }

    async fn pull_columns(
        &self,
        _backend: BackendId,
        _request: PullColumnsRequest,
    ) -> Result<PullResponse, TransportError> {
        Ok(PullResponse {
            changes: Vec::new(),
            has_more: false,
            server_timestamp: self.server_clock.load(Ordering::SeqCst),
            last_table_name: None,
            last_row_pks: None,
        })
    }

    async fn list_vaults(
        &self,
        _backend: BackendId,
    ) -> Result<Vec<VaultListingEntry>, TransportError> {
        Ok(self.vaults.lock().unwrap().clone())
    }

    async fn subscribe_realtime(
        &self,
        _backend: BackendId,
        _vault_id: VaultId,
    ) -> Result<RealtimeStream, TransportError> {
        Ok(Box::pin(stream::empty()))
    }
}
