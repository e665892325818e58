/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Engine tunables (§4.8 debounce/backoff constants, §4.6 pull paging, §4.2 retention).
//!
//! A plain value type injected at construction alongside `Database`/`Clock`/`Transport`/`Crypto`,
//! rather than a global or a singleton-store field, matching the dependency-injected engine shape
//! this crate uses in place of this crate family's usual pseudo-classical singleton stores.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Debounce delay (ms) applied after a single local write before triggering a push (§4.8).
    pub continuous_debounce_ms: u64,
    /// Number of writes within a debounce window that escalates to the "burst" ceiling (§4.8).
    pub debounce_burst_threshold: u32,
    /// Debounce ceiling (ms) applied once burst writes are detected (§4.8).
    pub debounce_ceiling_ms: u64,
    /// Fallback periodic full-reconcile interval (ms), used when realtime is unavailable (§4.8).
    pub periodic_interval_ms: u64,
    /// Max rows requested per page in a pull request (§4.6).
    pub pull_page_limit: u32,
    /// Tombstones older than this are eligible for cleanup (§4.2).
    pub tombstone_retention_days: u32,
    /// Per-request timeout applied by the transport layer (§6.1).
    pub request_timeout_secs: u64,
    /// Base delay for the realtime channel's exponential backoff (§4.9).
    pub realtime_backoff_base_secs: u64,
    /// Number of backoff attempts before falling back to the periodic path (§4.9).
    pub realtime_backoff_max_retries: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            continuous_debounce_ms: 500,
            debounce_burst_threshold: 5,
            debounce_ceiling_ms: 5_000,
            periodic_interval_ms: 5 * 60 * 1000,
            pull_page_limit: 1_000,
            tombstone_retention_days: 30,
            request_timeout_secs: 30,
            realtime_backoff_base_secs: 5,
            realtime_backoff_max_retries: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = SyncConfig::default();
        assert_eq!(config.continuous_debounce_ms, 500);
        assert_eq!(config.debounce_ceiling_ms, 5_000);
        assert_eq!(config.periodic_interval_ms, 300_000);
        assert_eq!(config.pull_page_limit, 1_000);
        assert_eq!(config.tombstone_retention_days, 30);
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.realtime_backoff_max_retries, 3);
    }
}
