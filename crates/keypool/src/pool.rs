//! Pool state machine and cursor-based key rotation
//!
//! The pool holds an ordered, fixed list of keys, a rotation cursor, and a
//! failure registry mapping key → time of last reported failure. A key in the
//! registry is quarantined; once its entry outlives the cooldown it is purged
//! lazily on the next read and the key is healthy again.
//!
//! Per-key transitions:
//! - healthy → quarantined (failure reported)
//! - quarantined → quarantined (repeat report, timestamp overwritten)
//! - quarantined → healthy (cooldown elapsed, observed at next cleanup)
//!
//! A single mutex guards the whole pool so every public operation is observed
//! as one atomic unit; no operation blocks on anything but the lock.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use common::mask;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Cooldown applied to a key after a reported failure.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(3600);

/// Snapshot of pool health for the diagnostics surface.
///
/// Key material is masked (`abcd...5678`) — this struct is safe to serialize
/// into a status endpoint or log line as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    /// Number of keys in the pool (quarantined keys still count)
    pub total: usize,
    /// Keys currently selectable by `acquire`
    pub available: usize,
    /// Masked rendering of every entry in the failure registry, sorted for
    /// stable output
    pub failed: Vec<String>,
    /// Masked key under the rotation cursor, `None` for an empty pool
    pub current: Option<String>,
}

/// Rotation pool over a fixed set of API keys.
///
/// Construction never fails: malformed configuration degrades to an empty or
/// single-key pool with a log line. The pool is built once per process and
/// shared by reference (`Arc`) with whatever dispatch layer consumes it.
pub struct KeyPool {
    inner: Mutex<Inner>,
    cooldown: Duration,
}

struct Inner {
    keys: Vec<String>,
    cursor: usize,
    failures: HashMap<String, Instant>,
}

impl KeyPool {
    /// Create a pool from an already-parsed key list.
    pub fn new(keys: Vec<String>, cooldown: Duration) -> Self {
        info!(
            keys = keys.len(),
            cooldown_secs = cooldown.as_secs(),
            "key pool initialized"
        );
        Self {
            inner: Mutex::new(Inner {
                keys,
                cursor: 0,
                failures: HashMap::new(),
            }),
            cooldown,
        }
    }

    /// Create a pool from raw configuration values.
    ///
    /// `pool` is a JSON-serialized list of keys, tolerating one surrounding
    /// quote character (`'` or `"`) on either end — shells and .env files
    /// often leave those behind. An unparseable list is logged and treated as
    /// absent. When the list yields no keys, `single` (if present and
    /// non-empty) becomes a one-key pool.
    pub fn from_config(pool: Option<&str>, single: Option<&str>, cooldown: Duration) -> Self {
        let mut keys = pool.map(parse_key_list).unwrap_or_default();
        if keys.is_empty() {
            if let Some(key) = single.filter(|k| !k.is_empty()) {
                debug!("no key list configured, falling back to single-key mode");
                keys.push(key.to_string());
            }
        }
        Self::new(keys, cooldown)
    }

    /// Select a healthy key, rotating past quarantined ones.
    ///
    /// Purges expired quarantine entries, then scans at most `total` keys
    /// starting at the cursor. The cursor is left pointing at the returned
    /// key — it does not advance on success, so repeated acquisitions reuse
    /// the same key until a failure is reported. Returns `None` when the pool
    /// is empty or every key is quarantined.
    pub fn acquire(&self) -> Option<String> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let now = Instant::now();
        expire_failures(inner, now, self.cooldown);

        let n = inner.keys.len();
        if n == 0 {
            return None;
        }

        for _ in 0..n {
            let idx = inner.cursor;
            if !inner.failures.contains_key(&inner.keys[idx]) {
                return Some(inner.keys[idx].clone());
            }
            inner.cursor = (idx + 1) % n;
        }

        debug!(total = n, "every key is quarantined");
        None
    }

    /// Record a failure for `key` and advance the rotation cursor.
    ///
    /// The registry is keyed by value, not pool membership — reporting a key
    /// that is not in the pool is accepted and recorded. The cursor advances
    /// unconditionally, even when the failed key is not the one under the
    /// cursor; with out-of-order reports this can skip a healthy key. Any
    /// failure is taken as a signal to rotate, wherever it came from.
    pub fn report_failure(&self, key: &str) {
        let mut guard = self.lock();
        let inner = &mut *guard;
        warn!(
            key = %mask(key),
            cooldown_secs = self.cooldown.as_secs(),
            "key reported failed, entering quarantine"
        );
        inner.failures.insert(key.to_owned(), Instant::now());
        // Guard the modulo: an empty pool has no cursor to advance.
        if !inner.keys.is_empty() {
            inner.cursor = (inner.cursor + 1) % inner.keys.len();
        }
    }

    /// Purge quarantine entries whose age exceeds the cooldown.
    ///
    /// Runs implicitly at the top of `acquire` and `status`; exposed for
    /// callers that want to force expiry without reading.
    pub fn cleanup(&self) {
        let mut guard = self.lock();
        expire_failures(&mut guard, Instant::now(), self.cooldown);
    }

    /// Report pool health after purging expired quarantine entries.
    pub fn status(&self) -> PoolStatus {
        let mut guard = self.lock();
        let inner = &mut *guard;
        expire_failures(inner, Instant::now(), self.cooldown);

        let total = inner.keys.len();
        let available = inner
            .keys
            .iter()
            .filter(|k| !inner.failures.contains_key(*k))
            .count();
        let mut failed: Vec<String> = inner.failures.keys().map(|k| mask(k)).collect();
        failed.sort();
        let current = (total > 0).then(|| mask(&inner.keys[inner.cursor]));

        PoolStatus {
            total,
            available,
            failed,
            current,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panic while holding the lock leaves the pool in a consistent
        // state (every operation writes whole entries), so recover the guard.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Drop registry entries strictly older than the cooldown.
fn expire_failures(inner: &mut Inner, now: Instant, cooldown: Duration) {
    inner.failures.retain(|key, failed_at| {
        let expired = now.duration_since(*failed_at) > cooldown;
        if expired {
            info!(key = %mask(key), "cooldown elapsed, key healthy again");
        }
        !expired
    });
}

/// Parse a JSON-serialized key list, tolerating one surrounding quote.
fn parse_key_list(raw: &str) -> Vec<String> {
    let s = raw.trim();
    let s = s.strip_prefix(['\'', '"']).unwrap_or(s);
    let s = s.strip_suffix(['\'', '"']).unwrap_or(s);
    match serde_json::from_str::<Vec<String>>(s) {
        Ok(keys) => keys,
        Err(e) => {
            warn!(error = %e, "key list is not a valid JSON array, ignoring it");
            Vec::new()
        }
    }
}
