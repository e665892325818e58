/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The `Transport` trait (§6.1): the engine's only window onto the network.
//!
//! Modeled as an async `#[async_trait]` trait rather than a synchronous callback interface, since
//! every public engine operation is async and cancel-safe (§5). A sibling crate
//! (`transport-reqwest`) supplies the concrete implementation; `sync-core` itself never depends on
//! an HTTP client, which keeps its tests free of real network I/O.

use crate::ids::{BackendId, VaultId};
use crate::wire::{
    PullColumnsRequest, PullRequest, PullResponse, PushRequest, PushResponse, RealtimeEvent,
    VaultListingEntry,
};
use futures::stream::BoxStream;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("not authenticated")]
    Unauthorized,
    #[error("network error (retryable={retryable})")]
    Network { retryable: bool },
    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },
}

/// A stream of realtime events for one vault's subscription. Ends (yields `None`) when the
/// channel is closed locally or by the server; the realtime listener (C9) interprets a stream end
/// the same way it interprets a channel error.
pub type RealtimeStream = BoxStream<'static, Result<RealtimeEvent, TransportError>>;

#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn push(&self, backend: BackendId, request: PushRequest) -> Result<PushResponse, TransportError>;

    async fn pull(&self, backend: BackendId, request: PullRequest) -> Result<PullResponse, TransportError>;

    async fn pull_columns(
        &self,
        backend: BackendId,
        request: PullColumnsRequest,
    ) -> Result<PullResponse, TransportError>;

    async fn list_vaults(&self, backend: BackendId) -> Result<Vec<VaultListingEntry>, TransportError>;

    /// Open the realtime channel for `vault_id`. The returned stream yields one item per
    /// server-pushed event; a stream error (rather than ending the stream with `None`) means the
    /// channel itself failed and the caller should apply the backoff policy of §4.9.
    async fn subscribe_realtime(
        &self,
        backend: BackendId,
        vault_id: VaultId,
    ) -> Result<RealtimeStream, TransportError>;
}
