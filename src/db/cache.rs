//! The `data`/`meta` cache maps shared by every [`crate::db::Db`], wrapped
//! in an optional TTL window.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;

/// A cached value: either a resolved hit, or an explicit "confirmed absent"
/// marker. Distinguishing the two is what lets `get` skip re-probing a
/// driver for a document that is known not to exist, the same way the
/// source specification's `false` cache sentinel does.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Cached<T> {
    /// The value is present and known.
    Hit(T),
    /// The value was looked up and confirmed absent.
    Absent,
}

impl<T> Cached<T> {
    /// Converts a hit into `Some`, discarding the absent/hit distinction.
    #[must_use]
    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Hit(value) => Some(value),
            Self::Absent => None,
        }
    }
}

struct Entry<T> {
    value: Cached<T>,
    set_at_ms: u64,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis())
        .unwrap_or(0)
        .try_into()
        .unwrap_or(u64::MAX)
}

/// A `parking_lot`-guarded map from URI to cached value, with an optional
/// TTL: entries older than `ttl_ms` are treated as misses on read and
/// lazily evicted.
pub struct CacheMap<T: Clone> {
    entries: RwLock<HashMap<String, Entry<T>>>,
    ttl_ms: u64,
}

impl<T: Clone> CacheMap<T> {
    /// Builds an empty map. `ttl_ms == 0` disables expiry.
    #[must_use]
    pub fn new(ttl_ms: u64) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl_ms,
        }
    }

    fn is_expired(&self, entry: &Entry<T>, now: u64) -> bool {
        self.ttl_ms > 0 && now.saturating_sub(entry.set_at_ms) > self.ttl_ms
    }

    /// Reads the cached value at `uri`, if any and not expired. An expired
    /// entry is evicted as a side effect.
    pub fn get(&self, uri: &str) -> Option<Cached<T>> {
        let now = now_ms();
        {
            let entries = self.entries.read();
            match entries.get(uri) {
                Some(entry) if !self.is_expired(entry, now) => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        self.entries.write().remove(uri);
        None
    }

    /// Stores `value` at `uri`, stamped with the current time.
    pub fn set(&self, uri: impl Into<String>, value: Cached<T>) {
        self.entries.write().insert(
            uri.into(),
            Entry {
                value,
                set_at_ms: now_ms(),
            },
        );
    }

    /// Removes the cached entry at `uri`, if any.
    pub fn remove(&self, uri: &str) {
        self.entries.write().remove(uri);
    }

    /// Returns the set-at timestamp of the cached entry at `uri`, if
    /// present (regardless of expiry), used by `push` to compare cached
    /// mtimes against driver-reported mtimes.
    #[must_use]
    pub fn set_at_ms(&self, uri: &str) -> Option<u64> {
        self.entries.read().get(uri).map(|entry| entry.set_at_ms)
    }

    /// Returns every currently-cached key whose entry is a [`Cached::Hit`]
    /// and not expired.
    #[must_use]
    pub fn hit_keys(&self) -> Vec<String> {
        let now = now_ms();
        self.entries
            .read()
            .iter()
            .filter(|(_, entry)| !self.is_expired(entry, now) && matches!(entry.value, Cached::Hit(_)))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Returns every currently-cached `(key, value)` pair whose entry is a
    /// [`Cached::Hit`] and not expired.
    #[must_use]
    pub fn hit_entries(&self) -> Vec<(String, T)> {
        let now = now_ms();
        self.entries
            .read()
            .iter()
            .filter_map(|(key, entry)| {
                if self.is_expired(entry, now) {
                    return None;
                }
                match &entry.value {
                    Cached::Hit(value) => Some((key.clone(), value.clone())),
                    Cached::Absent => None,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn get_returns_none_for_unset_key() {
        let cache: CacheMap<i32> = CacheMap::new(0);
        assert_eq!(cache.get("a"), None);
    }

    #[test]
    fn set_then_get_round_trips() {
        let cache: CacheMap<i32> = CacheMap::new(0);
        cache.set("a", Cached::Hit(1));
        assert_eq!(cache.get("a"), Some(Cached::Hit(1)));
    }

    #[test]
    fn absent_is_distinguishable_from_unset() {
        let cache: CacheMap<i32> = CacheMap::new(0);
        cache.set("a", Cached::Absent);
        assert_eq!(cache.get("a"), Some(Cached::Absent));
        assert_eq!(cache.get("b"), None);
    }

    #[test]
    fn ttl_expires_entries() {
        let cache: CacheMap<i32> = CacheMap::new(1);
        cache.set("a", Cached::Hit(1));
        sleep(Duration::from_millis(20));
        assert_eq!(cache.get("a"), None);
    }
}
