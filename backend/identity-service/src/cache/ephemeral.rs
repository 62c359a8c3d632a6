//! Short-lived in-memory key/value store
//!
//! Binds a verification challenge (subject + purpose) to the envelope
//! most recently issued for it. Reads check expiry themselves; the
//! background sweep only reclaims memory.
//!
//! # Example
//!
//! ```
//! use identity_service::cache::{challenge_key, EphemeralStore};
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let store: EphemeralStore = EphemeralStore::new();
//! let key = challenge_key("user-1", "verify-email");
//! store.set_item(&key, "envelope".to_string(), Duration::from_secs(600)).unwrap();
//!
//! assert_eq!(store.pop_item(&key).as_deref(), Some("envelope"));
//! assert_eq!(store.pop_item(&key), None);
//! # }
//! ```

use crate::error::{IdentityError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Key under which the pending envelope of a verification flow is kept
pub fn challenge_key(subject: &str, purpose: &str) -> String {
    format!("{subject}|{purpose}")
}

struct Entry<V> {
    value: V,
    /// `None` never expires
    expires_at: Option<Instant>,
}

impl<V> Entry<V> {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

type Entries<V> = RwLock<HashMap<String, Entry<V>>>;

pub struct EphemeralStore<V = String> {
    entries: Arc<Entries<V>>,
    sweeper: Option<JoinHandle<()>>,
}

impl<V> EphemeralStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::with_sweep_interval(DEFAULT_SWEEP_INTERVAL)
    }

    /// A zero interval disables the sweep, as does one too large to schedule.
    /// Outside a tokio runtime there is no sweep either; expired entries are
    /// then dropped when touched or on [`purge_expired`](Self::purge_expired).
    pub fn with_sweep_interval(interval: Duration) -> Self {
        let entries: Arc<Entries<V>> = Arc::new(RwLock::new(HashMap::new()));

        let first_tick = Instant::now().checked_add(interval);
        let sweeper = match (Handle::try_current(), first_tick) {
            (Ok(handle), Some(start)) if !interval.is_zero() => {
                Some(handle.spawn(sweep(Arc::downgrade(&entries), start, interval)))
            }
            _ => None,
        };

        Self { entries, sweeper }
    }

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// A zero `ttl` keeps the entry until it is removed. A `ttl` past the
    /// clock's range is refused and leaves any previous value in place.
    pub fn set_item(&self, key: &str, value: V, ttl: Duration) -> Result<()> {
        let expires_at = if ttl.is_zero() {
            None
        } else {
            let at = Instant::now().checked_add(ttl).ok_or_else(|| {
                IdentityError::Validation("ttl exceeds the representable time range".to_string())
            })?;
            Some(at)
        };
        self.entries
            .write()
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    pub fn peek_item(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        self.entries
            .read()
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone())
    }

    /// Remove and return the value. Only one caller ever receives it.
    pub fn pop_item(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        self.entries
            .write()
            .remove(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value)
    }

    pub fn has_key(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .read()
            .get(key)
            .is_some_and(|entry| entry.is_live(now))
    }

    /// Returns whether a live entry was removed
    pub fn remove_item(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .write()
            .remove(key)
            .is_some_and(|entry| entry.is_live(now))
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Number of unexpired entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .values()
            .filter(|entry| entry.is_live(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired entries; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        purge(&self.entries)
    }

    pub fn is_sweeping(&self) -> bool {
        self.sweeper.is_some()
    }
}

impl<V> Default for EphemeralStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Drop for EphemeralStore<V> {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.take() {
            handle.abort();
        }
    }
}

impl<V> fmt::Debug for EphemeralStore<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralStore")
            .field("entries", &self.entries.read().len())
            .field("sweeping", &self.sweeper.is_some())
            .finish()
    }
}

fn purge<V>(entries: &Entries<V>) -> usize {
    let now = Instant::now();
    let mut map = entries.write();
    let before = map.len();
    map.retain(|_, entry| entry.is_live(now));
    before - map.len()
}

async fn sweep<V>(entries: Weak<Entries<V>>, start: Instant, interval: Duration)
where
    V: Send + Sync + 'static,
{
    let mut timer = tokio::time::interval_at(start, interval);
    loop {
        timer.tick().await;

        // The store is gone once the last strong reference drops.
        let Some(live) = entries.upgrade() else {
            break;
        };
        let purged = purge(&live);
        if purged > 0 {
            debug!(purged, "swept expired ephemeral entries");
        }
    }
}
