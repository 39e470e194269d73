use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::clock::Clock;
use crate::model::Ms;

#[derive(Debug)]
pub enum CacheError {
    Unavailable(String),
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::Unavailable(e) => write!(f, "cache unavailable: {e}"),
        }
    }
}

impl std::error::Error for CacheError {}

/// Volatile key/value store with optional per-key expiry.
///
/// Losing its contents is always safe: the worst case is one extra notification.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Set unconditionally. `ttl = None` never expires.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError>;

    /// Set only if the key is absent or expired. Returns whether this call won.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Option<Ms>,
}

impl CacheEntry {
    fn is_live(&self, now: Ms) -> bool {
        self.expires_at.is_none_or(|t| now < t)
    }
}

/// In-process [`Cache`] on a `DashMap`. Expired entries are invisible to reads
/// and are physically dropped by [`MemoryCache::purge_expired`].
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
    clock: Arc<dyn Clock>,
}

impl MemoryCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    fn expiry(&self, ttl: Option<Duration>) -> Option<Ms> {
        ttl.map(|d| self.clock.now_ms() + d.as_millis() as Ms)
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = self.clock.now_ms();
        Ok(self
            .entries
            .get(key)
            .filter(|e| e.value().is_live(now))
            .map(|e| e.value().value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        let entry = CacheEntry {
            value: value.to_string(),
            expires_at: self.expiry(ttl),
        };
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError> {
        let now = self.clock.now_ms();
        let entry = CacheEntry {
            value: value.to_string(),
            expires_at: self.expiry(ttl),
        };
        // The shard lock held by `entry()` makes check-and-set a single step.
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    return Ok(false);
                }
                occupied.insert(entry);
                Ok(true)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
                Ok(true)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn cache() -> (Arc<ManualClock>, MemoryCache) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let cache = MemoryCache::new(clock.clone());
        (clock, cache)
    }

    #[tokio::test]
    async fn entries_expire() {
        let (clock, cache) = cache();
        cache
            .set("urge_1", "1", Some(Duration::from_secs(60)))
            .await
            .unwrap();
        assert_eq!(cache.get("urge_1").await.unwrap().as_deref(), Some("1"));

        clock.advance(Duration::from_secs(59));
        assert!(cache.get("urge_1").await.unwrap().is_some());

        clock.advance(Duration::from_secs(1));
        assert!(cache.get("urge_1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn no_ttl_never_expires() {
        let (clock, cache) = cache();
        cache.set("admin_email", "a@b.c", None).await.unwrap();
        clock.advance(Duration::from_secs(365 * 24 * 3600));
        assert_eq!(cache.get("admin_email").await.unwrap().as_deref(), Some("a@b.c"));
    }

    #[tokio::test]
    async fn set_if_absent_single_winner() {
        let (clock, cache) = cache();
        let ttl = Some(Duration::from_secs(10));
        assert!(cache.set_if_absent("k", "1", ttl).await.unwrap());
        assert!(!cache.set_if_absent("k", "2", ttl).await.unwrap());
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("1"));

        // An expired entry no longer blocks.
        clock.advance(Duration::from_secs(10));
        assert!(cache.set_if_absent("k", "3", ttl).await.unwrap());
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn concurrent_set_if_absent_has_one_winner() {
        let (_clock, cache) = cache();
        let cache = Arc::new(cache);
        let mut handles = Vec::new();
        for i in 0..32 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .set_if_absent("urge_9", &i.to_string(), Some(Duration::from_secs(60)))
                    .await
                    .unwrap()
            }));
        }
        let mut winners = 0;
        for h in handles {
            if h.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn purge_drops_only_expired() {
        let (clock, cache) = cache();
        cache.set("short", "x", Some(Duration::from_secs(1))).await.unwrap();
        cache.set("long", "x", Some(Duration::from_secs(100))).await.unwrap();
        cache.set("forever", "x", None).await.unwrap();
        clock.advance(Duration::from_secs(5));
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn delete_removes_key() {
        let (_clock, cache) = cache();
        cache.set("k", "v", None).await.unwrap();
        cache.delete("k").await.unwrap();
        assert!(cache.get("k").await.unwrap().is_none());
        assert!(cache.is_empty());
    }
}
