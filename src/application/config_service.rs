use crate::application::cache::{CacheKey, TenantProviderCache};
use crate::application::registry::ProviderRegistry;
use crate::domain::ports::SharedConfigStore;
use crate::domain::provider::{ConfigField, Operation, validate_required_fields};
use crate::domain::tenant::{
    CredentialMap, Environment, ProviderConfig, TenantId, normalize_provider_name,
};
use crate::error::{GatewayError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

const MASK: &str = "********";
const SECRET_HINTS: [&str; 5] = ["secret", "password", "token", "private", "salt"];

/// A stored configuration safe to show back to the tenant.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaskedProviderConfig {
    pub tenant_id: TenantId,
    pub provider: String,
    pub environment: Environment,
    pub credentials: CredentialMap,
    pub updated_at: DateTime<Utc>,
}

/// `****` plus the last four characters; short values are hidden entirely.
pub fn mask_value(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 8 {
        return MASK.to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{}", tail)
}

/// Writes go through here so that the cache never outlives the credentials it was built from.
pub struct ProviderConfigService {
    registry: Arc<ProviderRegistry>,
    store: SharedConfigStore,
    cache: Arc<TenantProviderCache>,
}

impl ProviderConfigService {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        store: SharedConfigStore,
        cache: Arc<TenantProviderCache>,
    ) -> Self {
        Self {
            registry,
            store,
            cache,
        }
    }

    /// Validates, persists, then invalidates the cached instance. Only returns
    /// once the next lookup is guaranteed to see the new credentials.
    pub async fn set_config(
        &self,
        tenant: &TenantId,
        provider: &str,
        environment: Environment,
        credentials: CredentialMap,
    ) -> Result<()> {
        let provider = normalize_provider_name(provider);
        let plugin = self.registry.create(&provider)?;
        let wrap = |e| GatewayError::from_provider(&provider, Operation::Initialize, e);
        validate_required_fields(&plugin.required_config(environment), &credentials)
            .map_err(wrap)?;
        plugin.validate_config(&credentials).map_err(wrap)?;

        let config = ProviderConfig::new(tenant.clone(), &provider, environment, credentials);
        let fingerprint = config.fingerprint();
        self.store.set(config).await?;
        self.cache
            .delete(&CacheKey::new(tenant.clone(), &provider, environment))
            .await;
        info!(%tenant, %provider, %environment, %fingerprint, "provider configuration saved");
        Ok(())
    }

    /// Removes one environment, or every environment when `environment` is `None`.
    pub async fn delete_config(
        &self,
        tenant: &TenantId,
        provider: &str,
        environment: Option<Environment>,
    ) -> Result<usize> {
        let removed = self.store.delete(tenant, provider, environment).await?;
        match environment {
            Some(env) => {
                self.cache
                    .delete(&CacheKey::new(tenant.clone(), provider, env))
                    .await;
            }
            None => {
                self.cache
                    .delete_by_tenant_and_provider(tenant, provider)
                    .await;
            }
        }
        info!(%tenant, provider = %normalize_provider_name(provider), removed, "provider configuration deleted");
        Ok(removed)
    }

    pub async fn get_config(
        &self,
        tenant: &TenantId,
        provider: &str,
        environment: Environment,
    ) -> Result<Option<MaskedProviderConfig>> {
        let Some(config) = self.store.get(tenant, provider, environment).await? else {
            return Ok(None);
        };
        Ok(Some(self.mask(config)))
    }

    pub async fn list_configs(&self, tenant: &TenantId) -> Result<Vec<MaskedProviderConfig>> {
        let configs = self.store.list(tenant).await?;
        Ok(configs.into_iter().map(|c| self.mask(c)).collect())
    }

    pub fn required_config(&self, provider: &str, environment: Environment) -> Result<Vec<ConfigField>> {
        Ok(self.registry.create(provider)?.required_config(environment))
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.registry.names()
    }

    fn mask(&self, config: ProviderConfig) -> MaskedProviderConfig {
        let described: Option<Vec<ConfigField>> = self
            .registry
            .create(&config.provider)
            .ok()
            .map(|plugin| plugin.required_config(config.environment));
        let sensitive: HashSet<String> = described
            .iter()
            .flatten()
            .filter(|f| f.sensitive)
            .map(|f| f.key.clone())
            .collect();
        let is_described = |key: &str| described.iter().flatten().any(|f| f.key == key);

        let credentials = config
            .credentials
            .into_iter()
            .map(|(key, value)| {
                let lowered = key.to_ascii_lowercase();
                let hidden = sensitive.contains(&key)
                    || (!is_described(&key) && SECRET_HINTS.iter().any(|h| lowered.contains(h)));
                let value = if hidden { mask_value(&value) } else { value };
                (key, value)
            })
            .collect();

        MaskedProviderConfig {
            tenant_id: config.tenant_id,
            provider: config.provider,
            environment: config.environment,
            credentials,
            updated_at: config.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::in_memory::InMemoryConfigStore;
    use crate::providers::simulator::SimulatorProvider;

    fn service() -> (ProviderConfigService, Arc<TenantProviderCache>) {
        let mut registry = ProviderRegistry::new();
        registry.register("simulator", Box::new(SimulatorProvider::boxed));
        let registry = Arc::new(registry);
        let store: SharedConfigStore = Arc::new(InMemoryConfigStore::new());
        let cache = Arc::new(TenantProviderCache::new(
            Arc::clone(&registry),
            Arc::clone(&store),
        ));
        (
            ProviderConfigService::new(registry, store, Arc::clone(&cache)),
            cache,
        )
    }

    fn credentials() -> CredentialMap {
        CredentialMap::from([
            ("api_key".to_string(), "pk_test_12345678".to_string()),
            ("secret_key".to_string(), "sk_test_abcdefghijklmnop".to_string()),
            ("webhook_token".to_string(), "whk_0123456789".to_string()),
        ])
    }

    #[test]
    fn test_mask_value() {
        assert_eq!(mask_value("sk_test_abcdefghijklmnop"), "****mnop");
        assert_eq!(mask_value("12345678"), "********");
        assert_eq!(mask_value(""), "********");
    }

    #[tokio::test]
    async fn test_read_back_masks_sensitive_fields() {
        let (service, _) = service();
        let tenant = TenantId::new("ABC");
        service
            .set_config(&tenant, "Simulator", Environment::Sandbox, credentials())
            .await
            .unwrap();

        let masked = service
            .get_config(&tenant, "simulator", Environment::Sandbox)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(masked.credentials["secret_key"], "****mnop");
        assert_eq!(masked.credentials["webhook_token"], "****6789");
        assert_eq!(masked.credentials["api_key"], "pk_test_12345678");
    }

    #[tokio::test]
    async fn test_invalid_config_is_not_persisted() {
        let (service, _) = service();
        let tenant = TenantId::new("ABC");
        let mut bad = credentials();
        bad.remove("secret_key");

        let err = service
            .set_config(&tenant, "simulator", Environment::Sandbox, bad)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Configuration { .. }));
        assert!(
            service
                .get_config(&tenant, "simulator", Environment::Sandbox)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_production_requires_merchant_id_at_write_time() {
        let (service, _) = service();
        let err = service
            .set_config(
                &TenantId::new("ABC"),
                "simulator",
                Environment::Production,
                credentials(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_unknown_provider_is_rejected() {
        let (service, _) = service();
        assert!(matches!(
            service
                .set_config(&TenantId::new("ABC"), "nope", Environment::Sandbox, credentials())
                .await,
            Err(GatewayError::ProviderNotRegistered(_))
        ));
    }

    #[tokio::test]
    async fn test_write_invalidates_cached_instance() {
        let (service, cache) = service();
        let tenant = TenantId::new("ABC");
        service
            .set_config(&tenant, "simulator", Environment::Sandbox, credentials())
            .await
            .unwrap();
        let key = CacheKey::new(tenant.clone(), "simulator", Environment::Sandbox);
        cache.get(&key).await.unwrap();
        assert_eq!(cache.len().await, 1);

        let mut rotated = credentials();
        rotated.insert("secret_key".to_string(), "sk_test_rotated_value_0001".to_string());
        service
            .set_config(&tenant, "simulator", Environment::Sandbox, rotated)
            .await
            .unwrap();
        assert!(cache.is_empty().await);

        service.delete_config(&tenant, "simulator", None).await.unwrap();
        assert!(matches!(
            cache.get(&key).await,
            Err(GatewayError::Configuration { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_and_discovery() {
        let (service, _) = service();
        let tenant = TenantId::new("ABC");
        service
            .set_config(&tenant, "simulator", Environment::Sandbox, credentials())
            .await
            .unwrap();
        assert_eq!(service.list_configs(&tenant).await.unwrap().len(), 1);
        assert_eq!(service.provider_names(), vec!["simulator"]);
        assert!(
            service
                .required_config("simulator", Environment::Production)
                .unwrap()
                .iter()
                .any(|f| f.key == "merchant_id" && f.required)
        );
    }
}
