//! Client-side cache of pre-issued signed ids.
//!
//! Submitting a message must not block on an id round-trip, so each view
//! keeps a small FIFO of ids fetched ahead of need and tops it back up in
//! the background after every take. Replenishment is coalesced: at most one
//! fetch is in flight, and a caller arriving during a fetch waits for it
//! rather than issuing its own.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use braid_ids::{SignedId, MAX_BATCH};

pub const DEFAULT_TARGET: usize = 4;

#[derive(Debug, Error)]
pub enum IdCacheError {
    #[error("id fetch failed: {0}")]
    Fetch(String),

    #[error("requested {requested} ids but only {available} available after fetch")]
    Insufficient { requested: usize, available: usize },
}

/// The network round-trip to the signed-id endpoint.
#[async_trait]
pub trait SignedIdFetcher: Send + Sync {
    async fn fetch(&self, count: usize) -> Result<Vec<SignedId>, IdCacheError>;
}

struct Inner {
    fetcher: Arc<dyn SignedIdFetcher>,
    target: usize,
    cache: Mutex<VecDeque<SignedId>>,
    // Held across the whole fetch; the second caller blocks here, re-checks
    // the cache, and finds the first caller's fetch already filled it.
    fetch_lock: Mutex<()>,
}

#[derive(Clone)]
pub struct IdCache {
    inner: Arc<Inner>,
}

impl IdCache {
    pub fn new(fetcher: Arc<dyn SignedIdFetcher>) -> Self {
        Self::with_target(fetcher, DEFAULT_TARGET)
    }

    pub fn with_target(fetcher: Arc<dyn SignedIdFetcher>, target: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                fetcher,
                target,
                cache: Mutex::new(VecDeque::new()),
                fetch_lock: Mutex::new(()),
            }),
        }
    }

    /// Take `count` ids, oldest-issued first.
    ///
    /// Fast path: the cache covers the request, ids are popped immediately
    /// and a background top-up refills toward the target without blocking.
    /// Slow path: the caller awaits one (possibly shared) fetch; if the
    /// cache still cannot satisfy the request afterwards, the shortfall is
    /// an error, never a silently smaller batch.
    pub async fn take(&self, count: usize) -> Result<Vec<SignedId>, IdCacheError> {
        {
            let mut cache = self.inner.cache.lock().await;
            if cache.len() >= count {
                let taken = cache.drain(..count).collect();
                drop(cache);
                self.spawn_top_up();
                return Ok(taken);
            }
        }

        let _guard = self.inner.fetch_lock.lock().await;
        // Re-check: a fetch that was in flight while we waited may have
        // refilled the cache enough already.
        {
            let mut cache = self.inner.cache.lock().await;
            if cache.len() >= count {
                let taken = cache.drain(..count).collect();
                drop(cache);
                drop(_guard);
                self.spawn_top_up();
                return Ok(taken);
            }
        }

        // Fetch toward the target but never past the server's batch
        // ceiling, so a caller coalesced behind us finds enough in the
        // re-check instead of fetching again.
        let deficit = {
            let cache = self.inner.cache.lock().await;
            self.inner
                .target
                .max(count)
                .saturating_sub(cache.len())
                .min(MAX_BATCH)
        };
        let fetched = self.inner.fetcher.fetch(deficit).await?;

        let taken = {
            let mut cache = self.inner.cache.lock().await;
            cache.extend(fetched);
            if cache.len() < count {
                return Err(IdCacheError::Insufficient {
                    requested: count,
                    available: cache.len(),
                });
            }
            cache.drain(..count).collect()
        };
        drop(_guard);
        self.spawn_top_up();
        Ok(taken)
    }

    /// Number of ids currently cached.
    pub async fn available(&self) -> usize {
        self.inner.cache.lock().await.len()
    }

    fn spawn_top_up(&self) {
        let cache = self.clone();
        tokio::spawn(async move {
            if let Err(e) = cache.top_up().await {
                tracing::debug!(error = %e, "background id top-up failed");
            }
        });
    }

    async fn top_up(&self) -> Result<(), IdCacheError> {
        let _guard = self.inner.fetch_lock.lock().await;
        loop {
            let deficit = {
                let cache = self.inner.cache.lock().await;
                self.inner.target.saturating_sub(cache.len()).min(MAX_BATCH)
            };
            if deficit == 0 {
                return Ok(());
            }
            let fetched = self.inner.fetcher.fetch(deficit).await?;
            if fetched.is_empty() {
                return Ok(());
            }
            let mut cache = self.inner.cache.lock().await;
            cache.extend(fetched);
        }
    }
}
