use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::cache::MemoryCache;
use crate::engine::Engine;

const REAP_INTERVAL: Duration = Duration::from_secs(60);
const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that drops expired cache entries (urge cooldowns).
pub async fn run_reaper(cache: Arc<MemoryCache>) {
    let mut interval = tokio::time::interval(REAP_INTERVAL);
    loop {
        interval.tick().await;
        reap_once(&cache);
    }
}

fn reap_once(cache: &MemoryCache) -> usize {
    let evicted = cache.purge_expired();
    if evicted > 0 {
        metrics::counter!(crate::observability::CACHE_EVICTIONS_TOTAL).increment(evicted as u64);
        debug!("reaped {evicted} expired cache entries");
    }
    evicted
}

/// Background task that compacts the WAL once enough appends have piled up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_due(&engine, threshold).await;
    }
}

async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => {
            info!("compacted WAL after {appends} appends");
            true
        }
        Err(e) => {
            tracing::error!("WAL compaction failed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Cache;
    use crate::clock::ManualClock;
    use crate::engine::OverlapPolicy;
    use crate::model::*;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("roombook_test_reaper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn reaper_evicts_expired_cooldowns() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = MemoryCache::new(clock.clone());
        cache
            .set("urge_1", "1", Some(Duration::from_secs(1800)))
            .await
            .unwrap();
        cache.set("admin_email", "a@example.com", None).await.unwrap();

        assert_eq!(reap_once(&cache), 0);
        clock.advance(Duration::from_secs(1800));
        assert_eq!(reap_once(&cache), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn compactor_respects_threshold() {
        let engine = Engine::new(
            test_wal_path("compactor.wal"),
            Arc::new(ManualClock::new(0)),
            OverlapPolicy::General,
        )
        .unwrap();
        engine
            .register_room(Room {
                id: 1,
                name: "Jupiter".into(),
                capacity: 4,
                location: "1F".into(),
                equipment: String::new(),
                description: String::new(),
            })
            .await
            .unwrap();
        for i in 0..4 {
            engine
                .create_booking(1, 1, i * HOUR_MS, (i + 1) * HOUR_MS)
                .await
                .unwrap();
        }

        assert!(!compact_if_due(&engine, 10).await);
        assert_eq!(engine.wal_appends_since_compact().await, 5);
        assert!(compact_if_due(&engine, 5).await);
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        assert_eq!(engine.booking_count(), 4);
    }
}
