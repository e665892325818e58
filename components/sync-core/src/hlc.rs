/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Hybrid Logical Clock (C1): monotonic per-process timestamps with a node-id tiebreak.
//!
//! An [`Hlc`] encodes as `"<wall_ns padded to 20 digits>-<logical padded to 10 digits>-<node_id>"`
//! so that byte-lexicographic ordering of the encoded string always agrees with the
//! `(wall, logical, node_id)` tuple ordering used internally.

use crate::ids::DeviceId;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hlc {
    wall_ns: u64,
    logical: u32,
    node_id: DeviceId,
}

impl Hlc {
    pub fn new(wall_ns: u64, logical: u32, node_id: DeviceId) -> Self {
        Self {
            wall_ns,
            logical,
            node_id,
        }
    }

    pub fn wall_ns(&self) -> u64 {
        self.wall_ns
    }

    pub fn logical(&self) -> u32 {
        self.logical
    }

    pub fn node_id(&self) -> DeviceId {
        self.node_id
    }

    /// Componentwise max of two clocks: the larger (wall, logical) pair wins; the node_id of
    /// whichever pair won is kept (the logical component alone decides the winner, never the
    /// node_id, which is only an encoding tiebreaker for otherwise-identical pairs).
    fn componentwise_max(a: Hlc, b: Hlc) -> Hlc {
        if (a.wall_ns, a.logical) >= (b.wall_ns, b.logical) {
            a
        } else {
            b
        }
    }
}

impl fmt::Display for Hlc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:020}-{:010}-{}", self.wall_ns, self.logical, self.node_id)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("malformed HLC timestamp: {0:?}")]
pub struct HlcParseError(String);

impl std::str::FromStr for Hlc {
    type Err = HlcParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '-');
        let wall = parts.next().ok_or_else(|| HlcParseError(s.to_string()))?;
        let logical = parts.next().ok_or_else(|| HlcParseError(s.to_string()))?;
        let node = parts.next().ok_or_else(|| HlcParseError(s.to_string()))?;
        let wall_ns: u64 = wall.parse().map_err(|_| HlcParseError(s.to_string()))?;
        let logical: u32 = logical.parse().map_err(|_| HlcParseError(s.to_string()))?;
        let node_id: DeviceId = node.parse().map_err(|_| HlcParseError(s.to_string()))?;
        Ok(Hlc {
            wall_ns,
            logical,
            node_id,
        })
    }
}

impl serde::Serialize for Hlc {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for Hlc {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl ToSql for Hlc {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.to_string()))
    }
}

impl FromSql for Hlc {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        s.parse().map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// Something that can produce and advance Hybrid Logical Clock values.
///
/// Implementations must be cheap and non-blocking: callers invoke `now()`/`observe()` from async
/// code without wanting to `.await` a lock across suspension points.
pub trait Clock: Send + Sync {
    /// Return a fresh HLC, strictly greater than any previously returned or observed value.
    fn now(&self) -> Hlc;

    /// Fold a remote HLC into the local clock, returning the clock's new value.
    fn observe(&self, remote: Hlc) -> Hlc;

    fn node_id(&self) -> DeviceId;
}

struct HlcState {
    last_wall: u64,
    last_logical: u32,
}

/// The production clock, backed by the system wall clock.
pub struct SystemClock {
    node_id: DeviceId,
    state: Mutex<HlcState>,
}

impl SystemClock {
    pub fn new(node_id: DeviceId) -> Self {
        Self {
            node_id,
            state: Mutex::new(HlcState {
                last_wall: 0,
                last_logical: 0,
            }),
        }
    }

    fn wall_now_ns() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_nanos() as u64
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Hlc {
        let w = Self::wall_now_ns();
        let mut state = self.state.lock().unwrap();
        let (wall, logical) = if w >= state.last_wall {
            (w, 0)
        } else {
            (state.last_wall, state.last_logical + 1)
        };
        state.last_wall = wall;
        state.last_logical = logical;
        Hlc::new(wall, logical, self.node_id)
    }

    fn observe(&self, remote: Hlc) -> Hlc {
        let local_now = Hlc::new(
            self.state.lock().unwrap().last_wall,
            self.state.lock().unwrap().last_logical,
            self.node_id,
        );
        let merged = Hlc::componentwise_max(local_now, remote);
        let mut state = self.state.lock().unwrap();
        state.last_wall = merged.wall_ns();
        state.last_logical = merged.logical().saturating_add(1);
        Hlc::new(state.last_wall, state.last_logical, self.node_id)
    }

    fn node_id(&self) -> DeviceId {
        self.node_id
    }
}

/// A deterministic clock for tests: wall time is an injected counter, never `SystemTime::now()`.
pub struct TestClock {
    node_id: DeviceId,
    wall: AtomicU64,
    logical: Mutex<u32>,
}

impl TestClock {
    pub fn new(node_id: DeviceId, start_wall_ns: u64) -> Self {
        Self {
            node_id,
            wall: AtomicU64::new(start_wall_ns),
            logical: Mutex::new(0),
        }
    }

    /// Advance the injected wall clock; subsequent `now()` calls observe the new value.
    pub fn advance(&self, delta_ns: u64) {
        self.wall.fetch_add(delta_ns, Ordering::SeqCst);
    }
}

impl Clock for TestClock {
    fn now(&self) -> Hlc {
        let w = self.wall.load(Ordering::SeqCst);
        let mut logical = self.logical.lock().unwrap();
        *logical += 1;
        Hlc::new(w, *logical, self.node_id)
    }

    fn observe(&self, remote: Hlc) -> Hlc {
        let w = self.wall.load(Ordering::SeqCst);
        let mut logical = self.logical.lock().unwrap();
        let local = Hlc::new(w, *logical, self.node_id);
        let merged = Hlc::componentwise_max(local, remote);
        *logical = merged.logical().saturating_add(1);
        if merged.wall_ns() > w {
            self.wall.store(merged.wall_ns(), Ordering::SeqCst);
        }
        Hlc::new(self.wall.load(Ordering::SeqCst), *logical, self.node_id)
    }

    fn node_id(&self) -> DeviceId {
        self.node_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_order_matches_logical_order() {
        let node = DeviceId::new();
        let a = Hlc::new(100, 0, node);
        let b = Hlc::new(100, 1, node);
        let c = Hlc::new(101, 0, node);
        assert!(a < b);
        assert!(b < c);
        assert!(a.to_string() < b.to_string());
        assert!(b.to_string() < c.to_string());
    }

    #[test]
    fn roundtrips_through_display_and_fromstr() {
        let node = DeviceId::new();
        let hlc = Hlc::new(123456789, 42, node);
        let s = hlc.to_string();
        let parsed: Hlc = s.parse().unwrap();
        assert_eq!(hlc, parsed);
    }

    #[test]
    fn system_clock_is_monotonic_even_when_wall_time_does_not_advance() {
        let clock = SystemClock::new(DeviceId::new());
        let mut last = clock.now();
        for _ in 0..1000 {
            let next = clock.now();
            assert!(next > last, "clock must be strictly increasing");
            last = next;
        }
    }

    #[test]
    fn observe_advances_past_a_greater_remote_value() {
        let node = DeviceId::new();
        let other = DeviceId::new();
        let clock = TestClock::new(node, 100);
        let local_first = clock.now();
        let remote = Hlc::new(500, 3, other);
        let observed = clock.observe(remote);
        assert!(observed > local_first);
        assert!(observed > remote);
    }

    #[test]
    fn observe_still_advances_when_remote_is_behind() {
        let node = DeviceId::new();
        let other = DeviceId::new();
        let clock = TestClock::new(node, 1000);
        let local_first = clock.now();
        let remote = Hlc::new(1, 0, other);
        let observed = clock.observe(remote);
        assert!(observed > local_first);
    }
}
