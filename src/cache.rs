//! Expiring audio cache keyed by (text, speed)
//!
//! Each entry owns its synthesized payload and a one-shot expiry task.
//! Writing a key again cancels the old task and starts a fresh TTL window;
//! reads never extend the lifetime of an entry.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Default lifetime of a cached payload (10 minutes)
pub const DEFAULT_TTL: Duration = Duration::from_secs(10 * 60);

/// Reasons a cache write was skipped
///
/// Never surfaced to `speak` callers: a skipped write only means the next
/// request for the same text is a miss.
#[derive(Debug, thiserror::Error)]
pub enum CacheWriteSkipped {
    /// Speed cannot be fingerprinted
    #[error("speed {0} is not a finite number")]
    NonFiniteSpeed(f32),

    /// No tokio runtime to schedule the expiry on
    #[error("no async runtime available to schedule expiry")]
    NoRuntime,
}

/// Fingerprint of a (text, speed) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Hex digest backing this key
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compute the cache fingerprint for a (text, speed) pair
///
/// Surrounding whitespace is not significant. The speed is hashed by its
/// exact bit pattern, so any two distinct speeds produce distinct keys.
///
/// # Errors
///
/// Returns [`CacheWriteSkipped::NonFiniteSpeed`] for NaN or infinite speeds
pub fn fingerprint(text: &str, speed: f32) -> Result<CacheKey, CacheWriteSkipped> {
    if !speed.is_finite() {
        return Err(CacheWriteSkipped::NonFiniteSpeed(speed));
    }

    let mut hasher = Sha256::new();
    hasher.update(text.trim().as_bytes());
    hasher.update([0u8]);
    hasher.update(speed.to_bits().to_le_bytes());

    Ok(CacheKey(hex::encode(hasher.finalize())))
}

struct Entry {
    payload: Bytes,
    created_at: Instant,
    generation: u64,
    expiry: JoinHandle<()>,
}

struct Inner {
    entries: Mutex<HashMap<CacheKey, Entry>>,
    generation: AtomicU64,
    ttl: Duration,
}

impl Drop for Inner {
    fn drop(&mut self) {
        for (_, entry) in self.entries.get_mut().drain() {
            entry.expiry.abort();
        }
    }
}

/// Snapshot of a single cache entry
#[derive(Debug, Clone)]
pub struct EntryStats {
    /// Entry fingerprint
    pub key: CacheKey,
    /// Payload size in bytes
    pub size: usize,
    /// Time since the entry was written
    pub age: Duration,
}

/// Snapshot of the whole cache
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Number of live entries
    pub size: usize,
    /// Per-entry details
    pub entries: Vec<EntryStats>,
}

impl CacheStats {
    /// Sum of all payload sizes in bytes
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.entries.iter().map(|e| e.size).sum()
    }
}

/// In-memory audio cache with per-entry expiry
///
/// Cloning is cheap and clones share the same store, so several players
/// can reuse each other's synthesized audio.
#[derive(Clone)]
pub struct AudioCache {
    inner: Arc<Inner>,
}

impl Default for AudioCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl fmt::Debug for AudioCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioCache")
            .field("ttl", &self.inner.ttl)
            .field("len", &self.len())
            .finish()
    }
}

impl AudioCache {
    /// Create an empty cache whose entries live for `ttl`
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
                ttl,
            }),
        }
    }

    /// Entry lifetime
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// Store a payload, replacing any live entry for the same key
    ///
    /// Failures are logged and otherwise ignored.
    pub fn set(&self, text: &str, speed: f32, payload: Bytes) {
        if let Err(e) = self.try_set(text, speed, payload) {
            tracing::warn!(error = %e, "audio cache write skipped");
        }
    }

    /// Store a payload and report why the write was skipped, if it was
    ///
    /// # Errors
    ///
    /// Returns [`CacheWriteSkipped`] when the key cannot be computed or no
    /// runtime is available for the expiry timer
    pub fn try_set(&self, text: &str, speed: f32, payload: Bytes) -> Result<(), CacheWriteSkipped> {
        let key = fingerprint(text, speed)?;
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| CacheWriteSkipped::NoRuntime)?;

        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        let size = payload.len();

        // Hold the lock across spawn so the timer can never observe the
        // map before this entry is in it
        let previous = {
            let mut entries = self.inner.entries.lock();
            let expiry = runtime.spawn(expire(
                Arc::downgrade(&self.inner),
                key.clone(),
                generation,
                self.inner.ttl,
            ));
            entries.insert(
                key.clone(),
                Entry {
                    payload,
                    created_at: Instant::now(),
                    generation,
                    expiry,
                },
            )
        };

        let replaced = previous.is_some();
        if let Some(previous) = previous {
            previous.expiry.abort();
        }

        tracing::debug!(key = %key, size, replaced, "cached synthesized audio");
        Ok(())
    }

    /// Look up a live payload
    ///
    /// Does not extend the entry's lifetime.
    #[must_use]
    pub fn get(&self, text: &str, speed: f32) -> Option<Bytes> {
        let key = fingerprint(text, speed).ok()?;
        let entries = self.inner.entries.lock();
        entries
            .get(&key)
            .filter(|entry| entry.created_at.elapsed() < self.inner.ttl)
            .map(|entry| entry.payload.clone())
    }

    /// Cancel all expiry timers and drop every entry
    pub fn clear(&self) {
        let drained: Vec<Entry> = self.inner.entries.lock().drain().map(|(_, e)| e).collect();
        for entry in &drained {
            entry.expiry.abort();
        }
        tracing::debug!(count = drained.len(), "audio cache cleared");
    }

    /// Number of stored entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    /// Whether the cache holds no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size and age of every stored entry
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let entries = self.inner.entries.lock();
        CacheStats {
            size: entries.len(),
            entries: entries
                .iter()
                .map(|(key, entry)| EntryStats {
                    key: key.clone(),
                    size: entry.payload.len(),
                    age: entry.created_at.elapsed(),
                })
                .collect(),
        }
    }
}

/// One-shot expiry for a single write
async fn expire(inner: Weak<Inner>, key: CacheKey, generation: u64, ttl: Duration) {
    tokio::time::sleep(ttl).await;

    let Some(inner) = inner.upgrade() else {
        return;
    };

    let removed = {
        let mut entries = inner.entries.lock();
        if entries.get(&key).is_some_and(|e| e.generation == generation) {
            entries.remove(&key)
        } else {
            None
        }
    };

    if removed.is_some() {
        tracing::debug!(key = %key, "cached audio expired");
    }
}
