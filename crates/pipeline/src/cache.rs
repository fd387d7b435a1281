//! Ephemeral token-addressed blob store.
//!
//! Hands short-lived binary outputs to external providers that can only
//! consume a fetchable URL. Entries are immutable and expire at an absolute
//! time; a lookup past that time reports [`CacheMiss::Expired`] whether or
//! not the background sweeper has removed the entry yet.
//!
//! The table lives in process memory, so the URLs it backs are only valid
//! for single-instance deployments.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rand::Rng;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Length of generated tokens (alphanumeric, ~190 bits of entropy).
const TOKEN_LENGTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CacheMiss {
    #[error("artifact expired")]
    Expired,
    #[error("artifact not found")]
    NotFound,
}

struct Entry {
    blob: Bytes,
    expires_at: Instant,
}

/// Concurrency-safe token -> blob table with per-entry expiry.
pub struct ArtifactCache {
    entries: RwLock<HashMap<String, Entry>>,
    default_ttl: Duration,
}

fn generate_token() -> String {
    rand::rng()
        .sample_iter(&rand::distr::Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

impl ArtifactCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            default_ttl,
        }
    }

    /// Store a blob under a fresh token using the default TTL.
    pub async fn store(&self, blob: Bytes) -> String {
        self.store_with_ttl(blob, self.default_ttl).await
    }

    pub async fn store_with_ttl(&self, blob: Bytes, ttl: Duration) -> String {
        let expires_at = Instant::now() + ttl;
        let mut entries = self.entries.write().await;
        let token = loop {
            let candidate = generate_token();
            if !entries.contains_key(&candidate) {
                break candidate;
            }
        };
        entries.insert(token.clone(), Entry { blob, expires_at });
        token
    }

    pub async fn fetch(&self, token: &str) -> Result<Bytes, CacheMiss> {
        let entries = self.entries.read().await;
        let entry = entries.get(token).ok_or(CacheMiss::NotFound)?;
        if Instant::now() >= entry.expires_at {
            return Err(CacheMiss::Expired);
        }
        Ok(entry.blob.clone())
    }

    /// Remove every expired entry. Returns how many were dropped.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Run [`sweep`](Self::sweep) every `interval` until `cancel` fires.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!("Artifact cache sweeper stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        let removed = self.sweep().await;
                        if removed > 0 {
                            tracing::debug!(removed, "Swept expired artifacts");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::collections::HashSet;

    #[tokio::test]
    async fn store_then_fetch_returns_same_bytes() {
        let cache = ArtifactCache::new(Duration::from_secs(60));
        let token = cache.store(Bytes::from_static(b"segment")).await;
        assert_eq!(token.len(), TOKEN_LENGTH);
        assert_eq!(cache.fetch(&token).await.unwrap(), Bytes::from_static(b"segment"));
    }

    #[tokio::test]
    async fn unknown_token_is_not_found() {
        let cache = ArtifactCache::new(Duration::from_secs(60));
        assert_matches!(cache.fetch("nope").await, Err(CacheMiss::NotFound));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_reports_expired_before_sweep() {
        let cache = ArtifactCache::new(Duration::from_secs(30));
        let token = cache.store(Bytes::from_static(b"x")).await;

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(cache.fetch(&token).await.is_ok());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_matches!(cache.fetch(&token).await, Err(CacheMiss::Expired));
        assert_eq!(cache.len().await, 1);

        assert_eq!(cache.sweep().await, 1);
        assert_matches!(cache.fetch(&token).await, Err(CacheMiss::NotFound));
    }

    #[tokio::test(start_paused = true)]
    async fn per_entry_ttl_overrides_default() {
        let cache = ArtifactCache::new(Duration::from_secs(1800));
        let short = cache
            .store_with_ttl(Bytes::from_static(b"a"), Duration::from_secs(5))
            .await;
        let long = cache.store(Bytes::from_static(b"b")).await;

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(cache.sweep().await, 1);
        assert_matches!(cache.fetch(&short).await, Err(CacheMiss::NotFound));
        assert!(cache.fetch(&long).await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_stores_never_collide() {
        let cache = Arc::new(ArtifactCache::new(Duration::from_secs(60)));
        let handles: Vec<_> = (0..64)
            .map(|i| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.store(Bytes::from(vec![i as u8])).await })
            })
            .collect();

        let mut tokens = HashSet::new();
        for handle in handles {
            tokens.insert(handle.await.unwrap());
        }
        assert_eq!(tokens.len(), 64);
        assert_eq!(cache.len().await, 64);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_removes_expired_entries_and_stops_on_cancel() {
        let cache = Arc::new(ArtifactCache::new(Duration::from_secs(5)));
        cache.store(Bytes::from_static(b"x")).await;

        let cancel = CancellationToken::new();
        let handle = Arc::clone(&cache).spawn_sweeper(Duration::from_secs(10), cancel.clone());

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(cache.is_empty().await);

        cancel.cancel();
        handle.await.unwrap();
    }
}
