use super::status::PaymentStatus;
use super::tenant::{Environment, ProviderConfig, TenantId};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Persistence for tenant provider configurations.
///
/// Implemented outside the core; the gateway only depends on this shape.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get(
        &self,
        tenant: &TenantId,
        provider: &str,
        environment: Environment,
    ) -> Result<Option<ProviderConfig>>;

    async fn set(&self, config: ProviderConfig) -> Result<()>;

    /// Deletes one environment, or all of them when `environment` is `None`.
    /// Returns how many configurations were removed.
    async fn delete(
        &self,
        tenant: &TenantId,
        provider: &str,
        environment: Option<Environment>,
    ) -> Result<usize>;

    async fn list(&self, tenant: &TenantId) -> Result<Vec<ProviderConfig>>;

    /// Stable numeric id for a provider name, assigned on first save.
    async fn provider_id(&self, provider: &str) -> Result<Option<u64>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffectKind {
    Success,
    Failure,
    Refund,
}

impl EffectKind {
    /// Which terminal branch a verified status lands in. Transient statuses have none.
    pub fn for_status(status: PaymentStatus) -> Option<Self> {
        match status {
            PaymentStatus::Successful => Some(Self::Success),
            PaymentStatus::Failed | PaymentStatus::Cancelled => Some(Self::Failure),
            PaymentStatus::Refunded => Some(Self::Refund),
            PaymentStatus::Pending | PaymentStatus::Processing => None,
        }
    }
}

/// A terminal side effect derived from a re-verified payment status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalEffect {
    pub kind: EffectKind,
    pub payment_id: String,
    pub status: PaymentStatus,
    pub tenant_id: TenantId,
    pub provider: String,
    pub amount: Decimal,
    pub currency: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectOutcome {
    Applied,
    AlreadyApplied,
}

/// Destination of webhook-driven terminal effects.
///
/// `apply` must be an upsert keyed by `(tenant, provider, payment_id, status)` so
/// that duplicate webhook deliveries leave the same state as a single one, and
/// two tenants reusing a payment id never collide.
#[async_trait]
pub trait PaymentEventSink: Send + Sync {
    async fn apply(&self, effect: TerminalEffect) -> Result<EffectOutcome>;

    async fn effects_for(&self, tenant: &TenantId, payment_id: &str) -> Result<Vec<TerminalEffect>>;
}

/// Remembers which callback states have been redeemed.
///
/// Shared by every gateway instance so a state replayed against another node is
/// still refused. Entries are only needed until the state expires.
#[async_trait]
pub trait CallbackStateLedger: Send + Sync {
    /// Records `key` as used. Returns `false` when it was already recorded and has
    /// not expired by `now`. Both timestamps are Unix seconds.
    async fn consume(&self, key: &str, expires_at: i64, now: i64) -> Result<bool>;
}

pub type SharedConfigStore = Arc<dyn ConfigStore>;
pub type SharedEventSink = Arc<dyn PaymentEventSink>;
pub type SharedStateLedger = Arc<dyn CallbackStateLedger>;
