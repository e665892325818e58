/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Event bus (C12, §4.12): broadcasts `tablesUpdated` to the UI's store-reload registry and, in
//! filtered form, to per-extension subscribers.

use std::collections::BTreeSet;
use std::sync::Mutex;

/// A `(watched tables, reload callback)` registration for the internal store-reload channel.
struct Registration {
    watched: BTreeSet<String>,
    reload: Box<dyn Fn(&BTreeSet<String>) + Send + Sync>,
}

/// One extension's read-permission filter for the external channel.
struct Subscriber {
    readable: BTreeSet<String>,
    notify: Box<dyn Fn(&BTreeSet<String>) + Send + Sync>,
}

/// Fans out `tablesUpdated(affected)` to both channels described in §4.12. Registrations and
/// subscribers are plain callbacks rather than an async channel, matching how this crate family's
/// embedding layers already bridge Rust events out to host-language observers.
#[derive(Default)]
pub struct EventBus {
    registrations: Mutex<Vec<Registration>>,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a store-reload callback, invoked whenever `affected` intersects `watched`.
    pub fn register_table_reload(
        &self,
        watched: BTreeSet<String>,
        reload: impl Fn(&BTreeSet<String>) + Send + Sync + 'static,
    ) {
        self.registrations.lock().unwrap().push(Registration {
            watched,
            reload: Box::new(reload),
        });
    }

    /// Subscribe an extension to the filtered external channel, readable to only `readable`.
    pub fn subscribe_extension(
        &self,
        readable: BTreeSet<String>,
        notify: impl Fn(&BTreeSet<String>) + Send + Sync + 'static,
    ) {
        self.subscribers.lock().unwrap().push(Subscriber { readable, notify });
    }

    /// Publish `tablesUpdated(affected)` after a successful pull.
    pub fn publish_tables_updated(&self, affected: &BTreeSet<String>) {
        if affected.is_empty() {
            return;
        }
        for registration in self.registrations.lock().unwrap().iter() {
            if !registration.watched.is_disjoint(affected) {
                (registration.reload)(affected);
            }
        }
        for subscriber in self.subscribers.lock().unwrap().iter() {
            let visible: BTreeSet<String> = affected
                .intersection(&subscriber.readable)
                .cloned()
                .collect();
            if !visible.is_empty() {
                (subscriber.notify)(&visible);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn a_registration_fires_only_when_its_watched_set_intersects() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        bus.register_table_reload(["notes".to_string()].into_iter().collect(), move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish_tables_updated(&["tags".to_string()].into_iter().collect());
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        bus.publish_tables_updated(&["notes".to_string(), "tags".to_string()].into_iter().collect());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn an_extension_subscriber_only_sees_its_readable_tables() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(BTreeSet::new()));
        let seen2 = seen.clone();
        bus.subscribe_extension(["notes".to_string()].into_iter().collect(), move |visible| {
            *seen2.lock().unwrap() = visible.clone();
        });

        bus.publish_tables_updated(
            &["notes".to_string(), "secret_table".to_string()].into_iter().collect(),
        );
        assert_eq!(*seen.lock().unwrap(), ["notes".to_string()].into_iter().collect());
    }

    #[test]
    fn publishing_an_empty_set_notifies_nobody() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        bus.register_table_reload(["notes".to_string()].into_iter().collect(), move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
        });
        bus.publish_tables_updated(&BTreeSet::new());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
