//! Forensic report cache.
//!
//! [`CacheStore`] is the storage seam: an in-memory TTL map by default,
//! swappable for a networked cache. [`ForensicCache`] layers single-flight
//! on top so concurrent submissions of identical bytes share one analysis.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::DocVerifyError;
use crate::fingerprint::ContentFingerprint;
use crate::scoring::ForensicReport;

/// Cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Live entries.
    pub entries: usize,
    /// Lookups that found a fresh entry.
    pub hits: u64,
    /// Lookups that found nothing or an expired entry.
    pub misses: u64,
    /// `hits / (hits + misses)`, zero before any lookup.
    pub hit_rate: f64,
    /// When the oldest live entry was cached.
    pub oldest_entry: Option<DateTime<Utc>>,
    /// When the newest live entry was cached.
    pub newest_entry: Option<DateTime<Utc>>,
}

/// Storage for forensic reports keyed by content fingerprint.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get a fresh report.
    async fn get(&self, key: &ContentFingerprint) -> Option<Arc<ForensicReport>>;

    /// Insert or replace the report for its fingerprint.
    async fn put(&self, report: Arc<ForensicReport>);

    /// Drop one entry. Returns whether it existed.
    async fn invalidate(&self, key: &ContentFingerprint) -> bool;

    /// Drop every entry. Returns how many were dropped.
    async fn clear(&self) -> usize;

    /// Drop entries cached before `cutoff`.
    async fn clear_older_than(&self, cutoff: DateTime<Utc>) -> usize;

    /// Current statistics.
    async fn stats(&self) -> CacheStats;
}

/// A cached report entry.
#[derive(Debug, Clone)]
struct CacheEntry {
    report: Arc<ForensicReport>,
    cached_at: DateTime<Utc>,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_fresh(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// In-memory [`CacheStore`] with TTL expiry and a capacity bound.
///
/// When full, expired entries are dropped first, then the oldest.
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<ContentFingerprint, CacheEntry>>,
    ttl: Duration,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryCacheStore {
    /// Create a store.
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            capacity: capacity.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn evict_for_insert(&self, entries: &mut HashMap<ContentFingerprint, CacheEntry>) {
        if entries.len() < self.capacity {
            return;
        }
        let before = entries.len();
        entries.retain(|_, e| e.is_fresh());
        while entries.len() >= self.capacity {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.expires_at)
                .map(|(k, _)| *k);
            match oldest {
                Some(key) => {
                    entries.remove(&key);
                },
                None => break,
            }
        }
        debug!(
            evicted = before - entries.len(),
            capacity = self.capacity,
            "Cache: evicted entries under pressure"
        );
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &ContentFingerprint) -> Option<Arc<ForensicReport>> {
        let found = {
            let entries = self.entries.read().ok()?;
            entries.get(key).cloned()
        };
        match found {
            Some(entry) if entry.is_fresh() => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                trace!(fingerprint = %key, "Cache: hit");
                Some(entry.report)
            },
            Some(_) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                if let Ok(mut entries) = self.entries.write() {
                    if entries.get(key).is_some_and(|e| !e.is_fresh()) {
                        entries.remove(key);
                    }
                }
                trace!(fingerprint = %key, "Cache: expired");
                None
            },
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            },
        }
    }

    async fn put(&self, report: Arc<ForensicReport>) {
        let key = report.fingerprint;
        let entry = CacheEntry {
            report,
            cached_at: Utc::now(),
            expires_at: Instant::now() + self.ttl,
        };
        if let Ok(mut entries) = self.entries.write() {
            if !entries.contains_key(&key) {
                self.evict_for_insert(&mut entries);
            }
            entries.insert(key, entry);
        }
    }

    async fn invalidate(&self, key: &ContentFingerprint) -> bool {
        self.entries
            .write()
            .map(|mut entries| entries.remove(key).is_some())
            .unwrap_or(false)
    }

    async fn clear(&self) -> usize {
        self.entries
            .write()
            .map(|mut entries| {
                let n = entries.len();
                entries.clear();
                n
            })
            .unwrap_or(0)
    }

    async fn clear_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        self.entries
            .write()
            .map(|mut entries| {
                let before = entries.len();
                entries.retain(|_, e| e.cached_at >= cutoff);
                before - entries.len()
            })
            .unwrap_or(0)
    }

    async fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        let (entries, oldest_entry, newest_entry) = match self.entries.read() {
            Ok(entries) => {
                let live: Vec<_> = entries.values().filter(|e| e.is_fresh()).collect();
                (
                    live.len(),
                    live.iter().map(|e| e.cached_at).min(),
                    live.iter().map(|e| e.cached_at).max(),
                )
            },
            Err(_) => (0, None, None),
        };
        CacheStats {
            entries,
            hits,
            misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            oldest_entry,
            newest_entry,
        }
    }
}

/// How a report was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheOutcome {
    /// Found in the store.
    Hit,
    /// This caller ran the analysis.
    Analyzed,
    /// Another caller's in-flight analysis was awaited.
    Joined,
}

type InFlight = Arc<OnceCell<Arc<ForensicReport>>>;

/// Single-flight front for a [`CacheStore`].
///
/// At most one analysis runs per fingerprint at a time; late arrivals
/// await the first caller's result. The in-flight map lock is never held
/// across an await.
pub struct ForensicCache {
    store: Arc<dyn CacheStore>,
    in_flight: Mutex<HashMap<ContentFingerprint, InFlight>>,
}

impl ForensicCache {
    /// Wrap a store.
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Return the cached report for `key`, or run `analyze` exactly once
    /// across concurrent callers and cache its result.
    pub async fn get_or_analyze<F, Fut>(
        &self,
        key: ContentFingerprint,
        analyze: F,
    ) -> Result<(Arc<ForensicReport>, CacheOutcome), DocVerifyError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<ForensicReport>, DocVerifyError>>,
    {
        if let Some(report) = self.store.get(&key).await {
            return Ok((report, CacheOutcome::Hit));
        }

        let cell = {
            let mut in_flight = self
                .in_flight
                .lock()
                .map_err(|_| DocVerifyError::poisoned("forensic cache"))?;
            in_flight.entry(key).or_default().clone()
        };

        let ran = AtomicBool::new(false);
        let result = cell
            .get_or_try_init(|| async {
                // A finished flight may have filled the store since our miss.
                if let Some(report) = self.store.get(&key).await {
                    return Ok(report);
                }
                ran.store(true, Ordering::SeqCst);
                let report = analyze().await?;
                self.store.put(report.clone()).await;
                Ok::<_, DocVerifyError>(report)
            })
            .await
            .cloned();

        if let Ok(mut in_flight) = self.in_flight.lock() {
            if in_flight.get(&key).is_some_and(|c| Arc::ptr_eq(c, &cell)) {
                in_flight.remove(&key);
            }
        }

        let outcome = if ran.load(Ordering::SeqCst) {
            CacheOutcome::Analyzed
        } else {
            CacheOutcome::Joined
        };
        debug!(fingerprint = %key, ?outcome, "Cache: resolved report");
        result.map(|r| (r, outcome))
    }

    /// Replace the cached report for its fingerprint.
    pub async fn replace(&self, report: Arc<ForensicReport>) {
        self.store.put(report).await;
    }
}
