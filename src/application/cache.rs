use crate::application::registry::ProviderRegistry;
use crate::domain::ports::SharedConfigStore;
use crate::domain::provider::{Operation, PaymentProvider, ProviderContext};
use crate::domain::tenant::{
    ConfigFingerprint, Environment, ProviderConfig, TenantId, normalize_provider_name,
};
use crate::error::{GatewayError, Result};
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// A live, initialized plugin instance. Shared by every in-flight call for its key.
pub type SharedProvider = Arc<dyn PaymentProvider>;

/// Identifies one cached instance: a tenant's provider in one environment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub tenant: TenantId,
    pub provider: String,
    pub environment: Environment,
}

impl CacheKey {
    pub fn new(tenant: TenantId, provider: &str, environment: Environment) -> Self {
        Self {
            tenant,
            provider: normalize_provider_name(provider),
            environment,
        }
    }

    /// `TENANT_provider`, the label plugin-held state is keyed by.
    pub fn qualified_name(&self) -> String {
        format!("{}_{}", self.tenant, self.provider)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.qualified_name(), self.environment)
    }
}

struct CacheEntry {
    instance: SharedProvider,
    fingerprint: ConfigFingerprint,
    last_used: Instant,
}

/// What a lookup hands back.
#[derive(Clone)]
pub struct ProviderHandle {
    pub key: CacheKey,
    pub fingerprint: ConfigFingerprint,
    instance: SharedProvider,
}

impl ProviderHandle {
    pub fn instance(&self) -> SharedProvider {
        Arc::clone(&self.instance)
    }
}

impl fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderHandle")
            .field("key", &self.key)
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

type Slot = Arc<Mutex<Option<CacheEntry>>>;

/// Lazily built, tenant-qualified plugin instances.
///
/// Each key owns a slot behind its own async mutex: concurrent first requests for
/// the same key build exactly one instance, while different keys never wait on
/// each other. There is no cache-wide lock.
///
/// Every lookup re-reads the configuration and compares fingerprints, so an
/// instance is never served with credentials older than the store's.
pub struct TenantProviderCache {
    registry: Arc<ProviderRegistry>,
    store: SharedConfigStore,
    slots: DashMap<CacheKey, Slot>,
    idle_ttl: Option<Duration>,
    constructions: AtomicU64,
}

impl TenantProviderCache {
    pub fn new(registry: Arc<ProviderRegistry>, store: SharedConfigStore) -> Self {
        Self {
            registry,
            store,
            slots: DashMap::new(),
            idle_ttl: None,
            constructions: AtomicU64::new(0),
        }
    }

    /// Entries unused for at least `ttl` are rebuilt on next use and dropped by
    /// [`Self::evict_idle`].
    pub fn with_idle_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.idle_ttl = ttl;
        self
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Number of instances built since startup.
    pub fn construction_count(&self) -> u64 {
        self.constructions.load(Ordering::Relaxed)
    }

    fn slot(&self, key: &CacheKey) -> Slot {
        // The map guard is released before any await.
        Arc::clone(&self.slots.entry(key.clone()).or_default())
    }

    fn is_idle(&self, entry: &CacheEntry, now: Instant) -> bool {
        self.idle_ttl
            .is_some_and(|ttl| now.saturating_duration_since(entry.last_used) >= ttl)
    }

    /// Removes the map entry for `key` when it still holds `slot`, the slot is
    /// empty and nobody else holds a reference to it.
    fn release_if_unused(&self, key: &CacheKey, slot: &Slot) {
        // Two references: the map's and the caller's.
        self.slots.remove_if(key, |_, current| {
            Arc::ptr_eq(current, slot)
                && Arc::strong_count(current) == 2
                && current.try_lock().is_ok_and(|entry| entry.is_none())
        });
    }

    /// Returns the instance for `key`, building it when missing, stale, or idle-expired.
    pub async fn get(&self, key: &CacheKey) -> Result<ProviderHandle> {
        let slot = self.slot(key);
        let result = {
            let mut guard = slot.lock().await;
            self.fill(key, &mut guard).await
        };
        if result.is_err() {
            self.release_if_unused(key, &slot);
        }
        result
    }

    async fn fill(&self, key: &CacheKey, guard: &mut Option<CacheEntry>) -> Result<ProviderHandle> {
        let config = self
            .store
            .get(&key.tenant, &key.provider, key.environment)
            .await?
            .ok_or_else(|| {
                GatewayError::configuration(
                    &key.provider,
                    format!(
                        "tenant '{}' has no {} configuration",
                        key.tenant, key.environment
                    ),
                )
            })?;
        let fingerprint = config.fingerprint();
        let now = Instant::now();

        if let Some(entry) = guard.as_mut()
            && entry.fingerprint == fingerprint
            && !self.is_idle(entry, now)
        {
            entry.last_used = now;
            return Ok(ProviderHandle {
                key: key.clone(),
                fingerprint,
                instance: Arc::clone(&entry.instance),
            });
        }

        if let Some(stale) = guard.take() {
            debug!(key = %key, old = %stale.fingerprint, new = %fingerprint, "replacing cached provider instance");
        }
        let instance = self.construct(key, &config).await?;
        *guard = Some(CacheEntry {
            instance: Arc::clone(&instance),
            fingerprint: fingerprint.clone(),
            last_used: now,
        });
        Ok(ProviderHandle {
            key: key.clone(),
            fingerprint,
            instance,
        })
    }

    async fn construct(&self, key: &CacheKey, config: &ProviderConfig) -> Result<SharedProvider> {
        let wrap = |e| GatewayError::from_provider(&key.provider, Operation::Initialize, e);

        let mut instance = self.registry.create(&key.provider)?;
        instance.validate_config(&config.credentials).map_err(wrap)?;
        let context = ProviderContext {
            qualified_name: key.qualified_name(),
            environment: key.environment,
        };
        instance
            .initialize(&context, &config.credentials)
            .await
            .map_err(wrap)?;

        self.constructions.fetch_add(1, Ordering::Relaxed);
        info!(key = %key, fingerprint = %config.fingerprint(), "provider instance initialized");
        Ok(Arc::from(instance))
    }

    /// Drops the instance for `key`. Waits for an in-flight construction on the
    /// same key to finish first, so nothing built from old credentials survives.
    pub async fn delete(&self, key: &CacheKey) -> bool {
        let Some(slot) = self.slots.get(key).map(|s| Arc::clone(s.value())) else {
            return false;
        };
        let removed = slot.lock().await.take().is_some();
        self.release_if_unused(key, &slot);
        if removed {
            debug!(key = %key, "provider instance invalidated");
        }
        removed
    }

    /// Drops the instances for every environment of `(tenant, provider)`.
    pub async fn delete_by_tenant_and_provider(&self, tenant: &TenantId, provider: &str) -> usize {
        let mut removed = 0;
        for environment in Environment::ALL {
            if self
                .delete(&CacheKey::new(tenant.clone(), provider, environment))
                .await
            {
                removed += 1;
            }
        }
        removed
    }

    /// Drops idle instances and the slots left empty. Slots busy with a call or
    /// a construction are skipped.
    pub fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let mut evicted = 0;
        self.slots.retain(|_, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            let Ok(mut guard) = slot.try_lock() else {
                return true;
            };
            if guard.as_ref().is_some_and(|entry| self.is_idle(entry, now)) {
                guard.take();
                evicted += 1;
            }
            guard.is_some()
        });
        if evicted > 0 {
            debug!(evicted, "idle provider instances evicted");
        }
        evicted
    }

    /// Number of keys with a slot, live or empty.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Number of live instances.
    pub async fn len(&self) -> usize {
        let slots: Vec<Slot> = self.slots.iter().map(|s| Arc::clone(s.value())).collect();
        let mut live = 0;
        for slot in slots {
            if slot.lock().await.is_some() {
                live += 1;
            }
        }
        live
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
