use crate::application::cache::{CacheKey, TenantProviderCache};
use crate::application::callback::{CallbackHandler, CallbackOutcome, CallbackStateCodec};
use crate::application::config_service::{MaskedProviderConfig, ProviderConfigService};
use crate::application::orchestrator::{PaymentOrchestrator, Route};
use crate::application::rate_limit::{
    ActionClass, Clock, RateLimitIdentity, SystemClock, TenantRateLimiter,
};
use crate::application::registry::ProviderRegistry;
use crate::application::webhook::{
    ENVIRONMENT_PARAM, InboundWebhook, TENANT_PARAM, WebhookAck, WebhookDispatcher,
    WebhookPipeline,
};
use crate::config::Settings;
use crate::domain::payment::{
    CancelRequest, CommissionRequest, CommissionResponse, Complete3DRequest, InstallmentRequest,
    InstallmentResponse, PaymentRequest, PaymentResponse, RefundRequest, RefundResponse,
    StatusRequest,
};
use crate::domain::ports::{SharedConfigStore, SharedEventSink, SharedStateLedger, TerminalEffect};
use crate::domain::provider::ConfigField;
use crate::domain::tenant::{CredentialMap, Environment, TenantId, normalize_provider_name};
use crate::error::{GatewayError, Result};
use crate::infrastructure::in_memory::{
    InMemoryConfigStore, InMemoryPaymentLedger, InMemoryStateLedger,
};
use crate::interfaces::payload::RequestPayload;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Who is calling, as resolved by the identity collaborator in front of the gateway.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Caller {
    pub tenant: Option<TenantId>,
    pub ip: Option<String>,
    pub deadline: Option<Instant>,
}

impl Caller {
    pub fn tenant(tenant: impl Into<String>) -> Self {
        Self {
            tenant: Some(TenantId::new(tenant)),
            ..Self::default()
        }
    }

    pub fn anonymous(ip: impl Into<String>) -> Self {
        Self {
            ip: Some(ip.into()),
            ..Self::default()
        }
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    fn identity(&self) -> RateLimitIdentity {
        match &self.tenant {
            Some(tenant) => RateLimitIdentity::Tenant(tenant.clone()),
            None => RateLimitIdentity::Ip(self.ip.clone().unwrap_or_else(|| "unknown".to_string())),
        }
    }

    fn require_tenant(&self) -> Result<&TenantId> {
        self.tenant.as_ref().ok_or_else(|| {
            GatewayError::ValidationError("A resolved tenant is required".to_string())
        })
    }
}

fn require_id(value: &str, what: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(GatewayError::ValidationError(format!("{} is required", what)));
    }
    Ok(())
}

/// The single entry surface.
///
/// Every operation passes the rate limiter first, then boundary validation,
/// then goes to the service that owns it.
pub struct Gateway {
    registry: Arc<ProviderRegistry>,
    cache: Arc<TenantProviderCache>,
    orchestrator: Arc<PaymentOrchestrator>,
    configs: ProviderConfigService,
    callbacks: CallbackHandler,
    webhooks: WebhookPipeline,
    limiter: TenantRateLimiter,
    sink: SharedEventSink,
}

impl Gateway {
    pub fn builder(settings: Settings) -> GatewayBuilder {
        GatewayBuilder::new(settings)
    }

    fn admit(&self, caller: &Caller, action: ActionClass) -> Result<()> {
        self.limiter.admit(&caller.identity(), action)
    }

    fn route(&self, caller: &Caller, provider: &str, environment: Environment) -> Result<Route> {
        let tenant = caller.require_tenant()?;
        if !self.registry.is_registered(provider) {
            return Err(GatewayError::ProviderNotRegistered(normalize_provider_name(provider)));
        }
        let route = Route::new(CacheKey::new(tenant.clone(), provider, environment));
        Ok(match caller.deadline {
            Some(deadline) => route.with_deadline(deadline),
            None => route,
        })
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.configs.provider_names()
    }

    /// Address a tenant registers with the processor for webhooks.
    pub fn webhook_url(&self, caller: &Caller, provider: &str, environment: Environment) -> Result<String> {
        let tenant = caller.require_tenant()?;
        let mut url = url::Url::parse(&self.orchestrator.webhook_url(provider)?)
            .map_err(|e| GatewayError::ValidationError(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair(TENANT_PARAM, tenant.as_str())
            .append_pair(ENVIRONMENT_PARAM, environment.as_str());
        Ok(url.into())
    }

    pub fn required_config(
        &self,
        caller: &Caller,
        provider: &str,
        environment: Environment,
    ) -> Result<Vec<ConfigField>> {
        self.admit(caller, ActionClass::Config)?;
        self.configs.required_config(provider, environment)
    }

    pub async fn set_config(
        &self,
        caller: &Caller,
        provider: &str,
        environment: Environment,
        credentials: CredentialMap,
    ) -> Result<()> {
        self.admit(caller, ActionClass::Config)?;
        let tenant = caller.require_tenant()?;
        self.configs
            .set_config(tenant, provider, environment, credentials)
            .await
    }

    pub async fn get_config(
        &self,
        caller: &Caller,
        provider: &str,
        environment: Environment,
    ) -> Result<Option<MaskedProviderConfig>> {
        self.admit(caller, ActionClass::Config)?;
        let tenant = caller.require_tenant()?;
        self.configs.get_config(tenant, provider, environment).await
    }

    pub async fn list_configs(&self, caller: &Caller) -> Result<Vec<MaskedProviderConfig>> {
        self.admit(caller, ActionClass::Config)?;
        self.configs.list_configs(caller.require_tenant()?).await
    }

    pub async fn delete_config(
        &self,
        caller: &Caller,
        provider: &str,
        environment: Option<Environment>,
    ) -> Result<usize> {
        self.admit(caller, ActionClass::Config)?;
        let tenant = caller.require_tenant()?;
        self.configs
            .delete_config(tenant, provider, environment)
            .await
    }

    pub async fn create_payment(
        &self,
        caller: &Caller,
        provider: &str,
        environment: Environment,
        mut request: PaymentRequest,
    ) -> Result<PaymentResponse> {
        self.admit(caller, ActionClass::Payment)?;
        request.validate()?;
        if request.client_ip.is_none() {
            request.client_ip = caller.ip.clone();
        }
        let route = self.route(caller, provider, environment)?;
        self.orchestrator.create_payment(&route, request).await
    }

    pub async fn complete_3d_payment(
        &self,
        caller: &Caller,
        provider: &str,
        environment: Environment,
        request: Complete3DRequest,
    ) -> Result<PaymentResponse> {
        self.admit(caller, ActionClass::Payment)?;
        require_id(&request.payment_id, "paymentId")?;
        let route = self.route(caller, provider, environment)?;
        self.orchestrator.complete_3d_payment(&route, request).await
    }

    pub async fn get_payment_status(
        &self,
        caller: &Caller,
        provider: &str,
        environment: Environment,
        request: StatusRequest,
    ) -> Result<PaymentResponse> {
        self.admit(caller, ActionClass::Status)?;
        require_id(&request.payment_id, "paymentId")?;
        let route = self.route(caller, provider, environment)?;
        self.orchestrator.get_payment_status(&route, request).await
    }

    pub async fn cancel_payment(
        &self,
        caller: &Caller,
        provider: &str,
        environment: Environment,
        request: CancelRequest,
    ) -> Result<PaymentResponse> {
        self.admit(caller, ActionClass::Refund)?;
        require_id(&request.payment_id, "paymentId")?;
        let route = self.route(caller, provider, environment)?;
        self.orchestrator.cancel_payment(&route, request).await
    }

    pub async fn refund_payment(
        &self,
        caller: &Caller,
        provider: &str,
        environment: Environment,
        request: RefundRequest,
    ) -> Result<RefundResponse> {
        self.admit(caller, ActionClass::Refund)?;
        require_id(&request.payment_id, "paymentId")?;
        let route = self.route(caller, provider, environment)?;
        self.orchestrator.refund_payment(&route, request).await
    }

    pub async fn get_installment_count(
        &self,
        caller: &Caller,
        provider: &str,
        environment: Environment,
        request: InstallmentRequest,
    ) -> Result<InstallmentResponse> {
        self.admit(caller, ActionClass::Status)?;
        let route = self.route(caller, provider, environment)?;
        self.orchestrator
            .get_installment_count(&route, request)
            .await
    }

    pub async fn get_commission(
        &self,
        caller: &Caller,
        provider: &str,
        environment: Environment,
        request: CommissionRequest,
    ) -> Result<CommissionResponse> {
        self.admit(caller, ActionClass::Status)?;
        if request.installment_count == 0 {
            return Err(GatewayError::ValidationError(
                "Installment count must be at least 1".to_string(),
            ));
        }
        let route = self.route(caller, provider, environment)?;
        self.orchestrator.get_commission(&route, request).await
    }

    /// `/callback/{provider}`. The tenant comes from the signed state, not the caller.
    pub async fn handle_callback(
        &self,
        caller: &Caller,
        provider: &str,
        payload: &RequestPayload,
    ) -> Result<CallbackOutcome> {
        self.admit(caller, ActionClass::Payment)?;
        Ok(self.callbacks.handle(provider, payload).await)
    }

    /// `/webhooks/{provider}`. The tenant comes from the `tenantId` query parameter.
    pub async fn handle_webhook(
        &self,
        caller: &Caller,
        provider: &str,
        webhook: InboundWebhook,
    ) -> Result<WebhookAck> {
        self.admit(caller, ActionClass::Webhook)?;
        self.webhooks.ingest(provider, webhook).await
    }

    /// Terminal effects the webhook stage recorded for one of the caller's payments.
    pub async fn payment_effects(
        &self,
        caller: &Caller,
        payment_id: &str,
    ) -> Result<Vec<TerminalEffect>> {
        self.admit(caller, ActionClass::Status)?;
        let tenant = caller.require_tenant()?;
        require_id(payment_id, "paymentId")?;
        self.sink.effects_for(tenant, payment_id).await
    }

    /// Waits for every webhook job submitted so far.
    pub async fn drain_webhooks(&self) {
        self.webhooks.dispatcher().wait_idle().await;
    }

    pub fn evict_idle_providers(&self) -> usize {
        self.cache.evict_idle()
    }

    pub async fn shutdown(&self, grace: Duration) {
        self.webhooks.dispatcher().shutdown(grace).await;
    }
}

/// Wires the services together. Anything not supplied gets an in-memory default.
pub struct GatewayBuilder {
    settings: Settings,
    registry: Option<ProviderRegistry>,
    store: Option<SharedConfigStore>,
    sink: Option<SharedEventSink>,
    states: Option<SharedStateLedger>,
    clock: Option<Arc<dyn Clock>>,
}

impl GatewayBuilder {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            registry: None,
            store: None,
            sink: None,
            states: None,
            clock: None,
        }
    }

    pub fn registry(mut self, registry: ProviderRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn config_store(mut self, store: SharedConfigStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn event_sink(mut self, sink: SharedEventSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn state_ledger(mut self, states: SharedStateLedger) -> Self {
        self.states = Some(states);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Gateway {
        let settings = self.settings;
        let registry = Arc::new(
            self.registry
                .unwrap_or_else(ProviderRegistry::with_builtin_providers),
        );
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryConfigStore::new()));
        let sink = self
            .sink
            .unwrap_or_else(|| Arc::new(InMemoryPaymentLedger::new()));
        let states = self
            .states
            .unwrap_or_else(|| Arc::new(InMemoryStateLedger::new()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let cache = Arc::new(
            TenantProviderCache::new(Arc::clone(&registry), Arc::clone(&store))
                .with_idle_ttl(settings.cache_idle_ttl()),
        );
        let codec = Arc::new(CallbackStateCodec::new(
            settings.callback_secret(),
            settings.state_ttl(),
        ));
        let orchestrator = Arc::new(PaymentOrchestrator::new(
            Arc::clone(&cache),
            Arc::clone(&codec),
            settings.orchestrator_settings(),
        ));
        let dispatcher = Arc::new(WebhookDispatcher::new(settings.webhook_task_timeout()));

        Gateway {
            configs: ProviderConfigService::new(Arc::clone(&registry), store, Arc::clone(&cache)),
            callbacks: CallbackHandler::new(Arc::clone(&orchestrator), codec, states),
            webhooks: WebhookPipeline::new(Arc::clone(&orchestrator), Arc::clone(&sink), dispatcher),
            limiter: TenantRateLimiter::with_clock(settings.rate_limit.clone(), clock),
            registry,
            cache,
            orchestrator,
            sink,
        }
    }
}
