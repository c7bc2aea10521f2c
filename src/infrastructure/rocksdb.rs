use crate::domain::ports::{
    CallbackStateLedger, ConfigStore, EffectOutcome, PaymentEventSink, TerminalEffect,
};
use crate::domain::tenant::{Environment, ProviderConfig, TenantId, normalize_provider_name};
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for tenant provider configurations.
pub const CF_PROVIDER_CONFIGS: &str = "provider_configs";
/// Column Family for terminal payment effects recorded by the webhook stage.
pub const CF_PAYMENT_EFFECTS: &str = "payment_effects";
/// Column Family mapping provider names to their numeric ids.
pub const CF_PROVIDER_IDS: &str = "provider_ids";
/// Column Family of redeemed callback states, ordered by expiry.
pub const CF_CALLBACK_STATES: &str = "callback_states";

const SEPARATOR: char = '\u{1f}';

/// A persistent store implementation using RocksDB.
///
/// Implements the configuration store, the payment ledger and the callback state
/// ledger, each in its own Column Family. `Clone` shares the underlying `Arc<DB>`.
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    /// Serializes read-modify-write sequences (id assignment, effect upserts, state redemption).
    write_lock: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at `path`, creating missing column families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let families = [
            CF_PROVIDER_CONFIGS,
            CF_PAYMENT_EFFECTS,
            CF_PROVIDER_IDS,
            CF_CALLBACK_STATES,
        ]
        .into_iter()
        .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
        .collect::<Vec<_>>();
        let db = DB::open_cf_descriptors(&opts, path, families)?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| GatewayError::Storage(format!("column family '{}' not found", name)))
    }

    fn config_key(tenant: &TenantId, provider: &str, environment: Environment) -> String {
        format!(
            "{}{sep}{}{sep}{}",
            tenant,
            normalize_provider_name(provider),
            environment,
            sep = SEPARATOR
        )
    }

    fn effect_prefix(tenant: &TenantId, payment_id: &str) -> String {
        format!("{}{sep}{}{sep}", tenant, payment_id, sep = SEPARATOR)
    }

    fn effect_key(effect: &TerminalEffect) -> String {
        format!(
            "{}{}{}{}",
            Self::effect_prefix(&effect.tenant_id, &effect.payment_id),
            effect.provider,
            SEPARATOR,
            effect.status
        )
    }

    /// Zero-padded expiry first, so a forward scan meets expired states first.
    fn state_key(key: &str, expires_at: i64) -> String {
        format!("{:020}{}{}", expires_at.max(0), SEPARATOR, key)
    }

    fn prune_states(&self, now: i64) -> Result<usize> {
        let cf = self.cf(CF_CALLBACK_STATES)?;
        let mut expired = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item?;
            let expiry = std::str::from_utf8(key.get(..20).unwrap_or_default())
                .ok()
                .and_then(|digits| digits.parse::<i64>().ok());
            match expiry {
                Some(expiry) if expiry < now => expired.push(key),
                _ => break,
            }
        }
        for key in &expired {
            self.db.delete_cf(cf, key)?;
        }
        Ok(expired.len())
    }

    /// Decodes every value whose key starts with `prefix`.
    fn scan_prefix<T: serde::de::DeserializeOwned>(&self, cf_name: &str, prefix: &str) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let mut values = Vec::new();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix.as_bytes(), Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            values.push(serde_json::from_slice(&value)?);
        }
        Ok(values)
    }
}

#[async_trait]
impl ConfigStore for RocksDBStore {
    async fn get(
        &self,
        tenant: &TenantId,
        provider: &str,
        environment: Environment,
    ) -> Result<Option<ProviderConfig>> {
        let cf = self.cf(CF_PROVIDER_CONFIGS)?;
        let key = Self::config_key(tenant, provider, environment);
        match self.db.get_cf(cf, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, config: ProviderConfig) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let ids = self.cf(CF_PROVIDER_IDS)?;
        if self.db.get_pinned_cf(ids, &config.provider)?.is_none() {
            let next_id = self.db.iterator_cf(ids, IteratorMode::Start).count() as u64 + 1;
            self.db.put_cf(ids, &config.provider, next_id.to_be_bytes())?;
        }

        let cf = self.cf(CF_PROVIDER_CONFIGS)?;
        let key = Self::config_key(&config.tenant_id, &config.provider, config.environment);
        self.db.put_cf(cf, key, serde_json::to_vec(&config)?)?;
        Ok(())
    }

    async fn delete(
        &self,
        tenant: &TenantId,
        provider: &str,
        environment: Option<Environment>,
    ) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let cf = self.cf(CF_PROVIDER_CONFIGS)?;
        let environments = match environment {
            Some(env) => vec![env],
            None => Environment::ALL.to_vec(),
        };
        let mut removed = 0;
        for env in environments {
            let key = Self::config_key(tenant, provider, env);
            if self.db.get_pinned_cf(cf, &key)?.is_some() {
                self.db.delete_cf(cf, &key)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn list(&self, tenant: &TenantId) -> Result<Vec<ProviderConfig>> {
        let prefix = format!("{}{}", tenant, SEPARATOR);
        self.scan_prefix(CF_PROVIDER_CONFIGS, &prefix)
    }

    async fn provider_id(&self, provider: &str) -> Result<Option<u64>> {
        let ids = self.cf(CF_PROVIDER_IDS)?;
        let Some(bytes) = self.db.get_pinned_cf(ids, normalize_provider_name(provider))? else {
            return Ok(None);
        };
        let raw: [u8; 8] = bytes.as_ref().try_into().map_err(|_| {
            GatewayError::Storage(format!("corrupt provider id for '{}'", provider))
        })?;
        Ok(Some(u64::from_be_bytes(raw)))
    }
}

#[async_trait]
impl PaymentEventSink for RocksDBStore {
    async fn apply(&self, effect: TerminalEffect) -> Result<EffectOutcome> {
        let _guard = self.write_lock.lock().await;
        let cf = self.cf(CF_PAYMENT_EFFECTS)?;
        let key = Self::effect_key(&effect);
        if self.db.get_pinned_cf(cf, &key)?.is_some() {
            return Ok(EffectOutcome::AlreadyApplied);
        }
        self.db.put_cf(cf, key, serde_json::to_vec(&effect)?)?;
        Ok(EffectOutcome::Applied)
    }

    async fn effects_for(&self, tenant: &TenantId, payment_id: &str) -> Result<Vec<TerminalEffect>> {
        let prefix = Self::effect_prefix(tenant, payment_id);
        let mut effects: Vec<TerminalEffect> = self.scan_prefix(CF_PAYMENT_EFFECTS, &prefix)?;
        effects.sort_by_key(|e| e.recorded_at);
        Ok(effects)
    }
}

#[async_trait]
impl CallbackStateLedger for RocksDBStore {
    async fn consume(&self, key: &str, expires_at: i64, now: i64) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        self.prune_states(now)?;
        let cf = self.cf(CF_CALLBACK_STATES)?;
        let key = Self::state_key(key, expires_at);
        if self.db.get_pinned_cf(cf, &key)?.is_some() {
            return Ok(false);
        }
        self.db.put_cf(cf, key, b"")?;
        Ok(true)
    }
}
