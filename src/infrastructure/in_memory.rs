use crate::domain::ports::{
    CallbackStateLedger, ConfigStore, EffectOutcome, PaymentEventSink, TerminalEffect,
};
use crate::domain::status::PaymentStatus;
use crate::domain::tenant::{Environment, ProviderConfig, TenantId, normalize_provider_name};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

type ConfigKey = (TenantId, String, Environment);
type EffectKey = (TenantId, String, String, PaymentStatus);

#[derive(Default)]
struct ConfigTables {
    configs: HashMap<ConfigKey, ProviderConfig>,
    provider_ids: HashMap<String, u64>,
}

/// A thread-safe in-memory configuration store.
///
/// Uses `Arc<RwLock<..>>` so clones share the same tables. Suitable for tests
/// and single-process deployments where credentials are seeded at startup.
#[derive(Default, Clone)]
pub struct InMemoryConfigStore {
    tables: Arc<RwLock<ConfigTables>>,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigStore for InMemoryConfigStore {
    async fn get(
        &self,
        tenant: &TenantId,
        provider: &str,
        environment: Environment,
    ) -> Result<Option<ProviderConfig>> {
        let tables = self.tables.read().await;
        let key = (tenant.clone(), normalize_provider_name(provider), environment);
        Ok(tables.configs.get(&key).cloned())
    }

    async fn set(&self, config: ProviderConfig) -> Result<()> {
        let mut tables = self.tables.write().await;
        let next_id = tables.provider_ids.len() as u64 + 1;
        tables
            .provider_ids
            .entry(config.provider.clone())
            .or_insert(next_id);
        let key = (
            config.tenant_id.clone(),
            config.provider.clone(),
            config.environment,
        );
        tables.configs.insert(key, config);
        Ok(())
    }

    async fn delete(
        &self,
        tenant: &TenantId,
        provider: &str,
        environment: Option<Environment>,
    ) -> Result<usize> {
        let mut tables = self.tables.write().await;
        let provider = normalize_provider_name(provider);
        let before = tables.configs.len();
        tables.configs.retain(|(t, p, env), _| {
            !(t == tenant && *p == provider && environment.is_none_or(|e| e == *env))
        });
        Ok(before - tables.configs.len())
    }

    async fn list(&self, tenant: &TenantId) -> Result<Vec<ProviderConfig>> {
        let tables = self.tables.read().await;
        let mut configs: Vec<ProviderConfig> = tables
            .configs
            .values()
            .filter(|c| &c.tenant_id == tenant)
            .cloned()
            .collect();
        configs.sort_by(|a, b| (&a.provider, a.environment).cmp(&(&b.provider, b.environment)));
        Ok(configs)
    }

    async fn provider_id(&self, provider: &str) -> Result<Option<u64>> {
        let tables = self.tables.read().await;
        Ok(tables
            .provider_ids
            .get(&normalize_provider_name(provider))
            .copied())
    }
}

/// A thread-safe in-memory ledger of terminal payment effects.
///
/// Keyed by `(tenant, provider, payment_id, status)`, so re-applying an effect is a no-op.
#[derive(Default, Clone)]
pub struct InMemoryPaymentLedger {
    effects: Arc<RwLock<HashMap<EffectKey, TerminalEffect>>>,
}

impl InMemoryPaymentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.effects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.effects.read().await.is_empty()
    }
}

#[async_trait]
impl PaymentEventSink for InMemoryPaymentLedger {
    async fn apply(&self, effect: TerminalEffect) -> Result<EffectOutcome> {
        let mut effects = self.effects.write().await;
        let key = (
            effect.tenant_id.clone(),
            effect.provider.clone(),
            effect.payment_id.clone(),
            effect.status,
        );
        if effects.contains_key(&key) {
            return Ok(EffectOutcome::AlreadyApplied);
        }
        effects.insert(key, effect);
        Ok(EffectOutcome::Applied)
    }

    async fn effects_for(&self, tenant: &TenantId, payment_id: &str) -> Result<Vec<TerminalEffect>> {
        let effects = self.effects.read().await;
        let mut found: Vec<TerminalEffect> = effects
            .values()
            .filter(|e| &e.tenant_id == tenant && e.payment_id == payment_id)
            .cloned()
            .collect();
        found.sort_by_key(|e| e.recorded_at);
        Ok(found)
    }
}

/// Redeemed callback states, held until they expire.
#[derive(Default, Clone)]
pub struct InMemoryStateLedger {
    redeemed: Arc<RwLock<HashMap<String, i64>>>,
}

impl InMemoryStateLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.redeemed.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.redeemed.read().await.is_empty()
    }
}

#[async_trait]
impl CallbackStateLedger for InMemoryStateLedger {
    async fn consume(&self, key: &str, expires_at: i64, now: i64) -> Result<bool> {
        let mut redeemed = self.redeemed.write().await;
        redeemed.retain(|_, expiry| *expiry >= now);
        if redeemed.contains_key(key) {
            return Ok(false);
        }
        redeemed.insert(key.to_string(), expires_at);
        Ok(true)
    }
}
