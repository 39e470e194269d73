use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::cache::MemoryCache;
use crate::clock::{Clock, SystemClock};
use crate::directory::Seed;
use crate::engine::{Engine, OverlapPolicy};
use crate::limits::*;
use crate::notify::Notifier;
use crate::reaper;
use crate::service::{BookingService, UrgeThrottle, DEFAULT_URGE_COOLDOWN};

/// Settings shared by every organization.
#[derive(Clone)]
pub struct TenantConfig {
    pub data_dir: PathBuf,
    pub compact_threshold: u64,
    pub policy: OverlapPolicy,
    pub urge_cooldown: Duration,
    /// Applied to organizations whose store starts out empty.
    pub seed: Option<Arc<Seed>>,
}

impl TenantConfig {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            compact_threshold: 1000,
            policy: OverlapPolicy::General,
            urge_cooldown: DEFAULT_URGE_COOLDOWN,
            seed: None,
        }
    }
}

/// Manages per-organization services. Each organization gets its own store,
/// WAL, cache, reaper and compactor.
/// Organization = database name from the pgwire connection, sanitized. Names
/// that sanitize alike (`acme`, `ac.me`) are the same organization.
pub struct TenantManager {
    /// Keyed by sanitized name, which is also the WAL file stem.
    services: DashMap<String, Arc<BookingService>>,
    config: TenantConfig,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    /// Serializes creation so one WAL file never gets two writers.
    creating: Mutex<()>,
}

impl TenantManager {
    pub fn new(config: TenantConfig, notifier: Arc<dyn Notifier>) -> Self {
        Self::with_clock(config, notifier, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: TenantConfig,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            services: DashMap::new(),
            config,
            notifier,
            clock,
            creating: Mutex::new(()),
        }
    }

    /// Get or lazily create the service for the given organization.
    pub async fn get_or_create(&self, tenant: &str) -> std::io::Result<Arc<BookingService>> {
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "tenant name too long",
            ));
        }

        // Sanitize tenant name to prevent path traversal
        let safe_name: String = tenant
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty tenant name",
            ));
        }

        if let Some(service) = self.services.get(&safe_name) {
            return Ok(service.value().clone());
        }

        let _creating = self.creating.lock().await;
        if let Some(service) = self.services.get(&safe_name) {
            return Ok(service.value().clone());
        }
        if self.services.len() >= MAX_TENANTS {
            return Err(std::io::Error::other("too many tenants"));
        }

        let wal_path = self.config.data_dir.join(format!("{safe_name}.wal"));
        let engine = Arc::new(Engine::new(wal_path, self.clock.clone(), self.config.policy)?);

        if let Some(seed) = &self.config.seed {
            if engine.list_rooms().is_empty() && engine.list_users().is_empty() {
                seed.apply(&engine)
                    .await
                    .map_err(|e| std::io::Error::other(format!("seeding {tenant}: {e}")))?;
                tracing::info!(
                    "seeded {tenant} with {} rooms and {} users",
                    seed.rooms.len(),
                    seed.users.len()
                );
            }
        }

        let cache = Arc::new(MemoryCache::new(self.clock.clone()));
        let throttle = UrgeThrottle::new(
            cache.clone(),
            engine.clone(),
            self.notifier.clone(),
            self.config.urge_cooldown,
        );
        let service = Arc::new(BookingService::new(
            engine.clone(),
            engine.clone(),
            engine.clone(),
            throttle,
        ));

        // Spawn reaper + compactor for this organization
        tokio::spawn(async move {
            reaper::run_reaper(cache).await;
        });
        let threshold = self.config.compact_threshold;
        tokio::spawn(async move {
            reaper::run_compactor(engine, threshold).await;
        });

        self.services.insert(safe_name.clone(), service.clone());
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.services.len() as f64);
        tracing::info!("organization {safe_name} loaded");
        Ok(service)
    }
}
