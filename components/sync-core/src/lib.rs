/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The encrypted, local-first sync engine. See each module for the component of the design it
//! implements; `vault::Vault` is the entry point host applications construct and drive.

pub mod apply;
pub mod canonical_json;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod events;
pub mod hlc;
pub mod ids;
pub mod migration_coordinator;
pub mod mutex;
pub mod orchestrator;
pub mod pull;
pub mod push;
pub mod realtime;
pub mod transport;
pub mod vault;
pub mod wire;

#[cfg(test)]
pub(crate) mod test_support;

pub use crypto::VaultKey;
pub use error::{ApiResult, SyncApiError};
pub use ids::{BackendId, DeviceId, VaultId};
pub use vault::Vault;
