//! Minimal pub-sub (`on`/`emit`) plus prefix-scoped `watch`/`unwatch`.

use parking_lot::RwLock;
use serde_json::Value;

/// Events emitted by the engine over the course of its operations.
#[derive(Clone, Debug, PartialEq)]
pub enum DbEvent {
    /// A `get` resolved, either from cache or freshly loaded.
    Cache {
        /// The URI that was read.
        uri: String,
        /// Whether the read was satisfied from cache.
        hit: bool,
    },
    /// A `set` wrote a value into the cache.
    Set {
        /// The URI that was written.
        uri: String,
        /// The value written.
        value: Value,
    },
    /// A document was persisted to the driver.
    Save {
        /// The URI that was saved.
        uri: String,
    },
    /// A document was deleted.
    Drop {
        /// The URI that was dropped.
        uri: String,
    },
    /// Emitted alongside every other mutation event.
    Change {
        /// The URI the mutation affected.
        uri: String,
    },
    /// A `fetch` was satisfied by an attached fallback DB rather than the
    /// primary store.
    Fallback {
        /// The URI that was requested.
        uri: String,
        /// A label identifying the DB the request fell back from.
        from: String,
        /// A label identifying the DB the request was satisfied by.
        to: String,
    },
}

impl DbEvent {
    /// The event name used as the `on`/`watch` registration key.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cache { .. } => "cache",
            Self::Set { .. } => "set",
            Self::Save { .. } => "save",
            Self::Drop { .. } => "drop",
            Self::Change { .. } => "change",
            Self::Fallback { .. } => "fallback",
        }
    }

    /// The URI this event concerns, used to match `watch` prefixes.
    #[must_use]
    pub fn uri(&self) -> &str {
        match self {
            Self::Cache { uri, .. }
            | Self::Set { uri, .. }
            | Self::Save { uri }
            | Self::Drop { uri }
            | Self::Change { uri }
            | Self::Fallback { uri, .. } => uri,
        }
    }
}

type Listener = Box<dyn Fn(&DbEvent) + Send + Sync>;

struct WatchEntry {
    prefix: String,
    listener: Listener,
}

/// Holds `on`-registered listeners (keyed by event name) and
/// `watch`-registered listeners (keyed by URI-segment prefix, invoked for
/// every event whose URI starts with that prefix).
#[derive(Default)]
pub struct EventHub {
    listeners: RwLock<Vec<(String, Listener)>>,
    watchers: RwLock<Vec<WatchEntry>>,
}

/// Reports whether `prefix` is a URI-segment prefix of `uri`: either an
/// exact match, or followed immediately by `/`.
fn is_segment_prefix(prefix: &str, uri: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    uri == prefix || uri.strip_prefix(prefix).is_some_and(|rest| rest.starts_with('/'))
}

impl EventHub {
    /// Builds an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener` for events named `event`.
    pub fn on(&self, event: impl Into<String>, listener: Listener) {
        self.listeners.write().push((event.into(), listener));
    }

    /// Registers `listener` for every event whose URI has `prefix` as a
    /// URI-segment prefix. Returns a token that [`EventHub::unwatch`]
    /// accepts to remove it.
    pub fn watch(&self, prefix: impl Into<String>, listener: Listener) -> usize {
        let mut watchers = self.watchers.write();
        watchers.push(WatchEntry {
            prefix: prefix.into(),
            listener,
        });
        watchers.len() - 1
    }

    /// Removes the watcher previously returned by [`EventHub::watch`], if
    /// still present.
    pub fn unwatch(&self, token: usize) {
        let mut watchers = self.watchers.write();
        if token < watchers.len() {
            watchers.remove(token);
        }
    }

    /// Invokes every matching `on` and `watch` listener, in registration
    /// order, synchronously.
    pub fn emit(&self, event: &DbEvent) {
        for (name, listener) in self.listeners.read().iter() {
            if name == event.name() {
                listener(event);
            }
        }
        for watcher in self.watchers.read().iter() {
            if is_segment_prefix(&watcher.prefix, event.uri()) {
                (watcher.listener)(event);
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
    fn on_invokes_only_matching_event_name() {
        let hub = EventHub::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        hub.on(
            "save",
            Box::new(move |_event| {
                count_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        hub.emit(&DbEvent::Cache {
            uri: "/a".to_owned(),
            hit: true,
        });
        assert_eq!(count.load(Ordering::SeqCst), 0);
        hub.emit(&DbEvent::Save {
            uri: "/a".to_owned(),
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn watch_matches_uri_segment_prefix_only() {
        let hub = EventHub::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        hub.watch(
            "/a",
            Box::new(move |_event| {
                count_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        hub.emit(&DbEvent::Change {
            uri: "/a/b".to_owned(),
        });
        hub.emit(&DbEvent::Change {
            uri: "/ab".to_owned(),
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unwatch_removes_listener() {
        let hub = EventHub::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let token = hub.watch(
            "/a",
            Box::new(move |_event| {
                count_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        hub.unwatch(token);
        hub.emit(&DbEvent::Change {
            uri: "/a".to_owned(),
        });
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
