use crate::application::cache::{CacheKey, SharedProvider, TenantProviderCache};
use crate::application::callback::CallbackStateCodec;
use crate::domain::payment::{
    CancelRequest, CommissionRequest, CommissionResponse, Complete3DRequest, InstallmentRequest,
    InstallmentResponse, PaymentRequest, PaymentResponse, RefundRequest, RefundResponse,
    StatusRequest,
};
use crate::domain::provider::{Operation, ProviderError, ProviderResult, WebhookRequest, WebhookVerdict};
use crate::error::{GatewayError, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, timeout};
use tracing::{debug, info, instrument, warn};
use url::Url;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorSettings {
    /// Public base URL the callback and webhook paths are composed under.
    pub gateway_base_url: String,
    /// Budget for anything that can move money.
    pub payment_timeout: Duration,
    /// Budget for status, installment, commission, and webhook validation calls.
    pub inquiry_timeout: Duration,
    /// Extra attempts for idempotent reads after a transport failure or timeout.
    pub read_retries: u32,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            gateway_base_url: "http://localhost:8080".to_string(),
            payment_timeout: Duration::from_secs(30),
            inquiry_timeout: Duration::from_secs(10),
            read_retries: 2,
        }
    }
}

/// Where a call goes, and by when the caller needs an answer.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub key: CacheKey,
    pub deadline: Option<Instant>,
}

impl Route {
    pub fn new(key: CacheKey) -> Self {
        Self {
            key,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Logs when the caller stops waiting before the processor answered.
struct InFlight<'a> {
    route: &'a Route,
    operation: Operation,
    finished: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!(
                key = %self.route.key,
                operation = %self.operation,
                "caller went away mid-call; the processor may still complete the operation"
            );
        }
    }
}

/// Routes canonical operations to the tenant's plugin instance.
///
/// Responses come back exactly as the plugin produced them. Failures are
/// wrapped with provider and operation, and only idempotent reads are retried.
pub struct PaymentOrchestrator {
    cache: Arc<TenantProviderCache>,
    codec: Arc<CallbackStateCodec>,
    settings: OrchestratorSettings,
}

impl PaymentOrchestrator {
    pub fn new(
        cache: Arc<TenantProviderCache>,
        codec: Arc<CallbackStateCodec>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            cache,
            codec,
            settings,
        }
    }

    pub fn cache(&self) -> &Arc<TenantProviderCache> {
        &self.cache
    }

    /// `{base}/callback/{provider}?state={token}`
    pub fn callback_url(&self, provider: &str, state_token: &str) -> Result<String> {
        let mut url = self.endpoint("callback", provider)?;
        url.query_pairs_mut().append_pair("state", state_token);
        Ok(url.into())
    }

    /// `{base}/webhooks/{provider}`, the address tenants register with their processor.
    pub fn webhook_url(&self, provider: &str) -> Result<String> {
        Ok(self.endpoint("webhooks", provider)?.into())
    }

    fn endpoint(&self, kind: &str, provider: &str) -> Result<Url> {
        let raw = format!(
            "{}/{}/{}",
            self.settings.gateway_base_url.trim_end_matches('/'),
            kind,
            provider
        );
        Url::parse(&raw)
            .map_err(|e| GatewayError::ValidationError(format!("Invalid gateway base URL: {}", e)))
    }

    fn budget(&self, operation: Operation, deadline: Option<Instant>) -> Duration {
        let limit = if operation.is_inquiry() {
            self.settings.inquiry_timeout
        } else {
            self.settings.payment_timeout
        };
        match deadline {
            Some(deadline) => limit.min(deadline.saturating_duration_since(Instant::now())),
            None => limit,
        }
    }

    async fn invoke<T, F, Fut>(&self, route: &Route, operation: Operation, call: F) -> Result<T>
    where
        F: Fn(SharedProvider) -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let handle = self.cache.get(&route.key).await?;
        let attempts = if operation.is_idempotent_read() {
            self.settings.read_retries + 1
        } else {
            1
        };

        let mut guard = InFlight {
            route,
            operation,
            finished: false,
        };
        let mut attempt = 0;
        let result = loop {
            attempt += 1;
            let budget = self.budget(operation, route.deadline);
            let outcome = if budget.is_zero() {
                Err(ProviderError::Timeout(budget))
            } else {
                timeout(budget, call(handle.instance()))
                    .await
                    .unwrap_or(Err(ProviderError::Timeout(budget)))
            };
            match outcome {
                Ok(value) => break Ok(value),
                Err(source) => {
                    let err = GatewayError::from_provider(&route.key.provider, operation, source);
                    if attempt < attempts && err.is_retryable() && !budget.is_zero() {
                        warn!(key = %route.key, %operation, attempt, error = %err, "retrying idempotent read");
                        continue;
                    }
                    warn!(key = %route.key, %operation, error = %err, "provider call failed");
                    break Err(err);
                }
            }
        };
        guard.finished = true;
        result
    }

    /// Creates a payment. 3D requests get a gateway reference, a signed callback
    /// state, and a callback URL that points back at this gateway.
    #[instrument(skip(self, request), fields(key = %route.key, use_3d = request.use_3d))]
    pub async fn create_payment(
        &self,
        route: &Route,
        mut request: PaymentRequest,
    ) -> Result<PaymentResponse> {
        request.tenant_id = Some(route.key.tenant.to_string());

        if !request.use_3d {
            let response = self
                .invoke(route, Operation::CreatePayment, |provider| {
                    let request = request.clone();
                    async move { provider.create_payment(&request).await }
                })
                .await?;
            info!(payment_id = %response.payment_id, status = %response.status, "payment created");
            return Ok(response);
        }

        let reference = request
            .reference_id
            .get_or_insert_with(|| Uuid::new_v4().to_string())
            .clone();
        let state = self.codec.issue(&route.key, &reference, &request)?;
        let token = self.codec.encode(&state)?;
        request.callback_url = Some(self.callback_url(&route.key.provider, &token)?);
        debug!(payment_id = %reference, expires_at = state.expires_at, "callback state issued");

        let response = self
            .invoke(route, Operation::Create3DPayment, |provider| {
                let request = request.clone();
                async move { provider.create_3d_payment(&request).await }
            })
            .await?;
        info!(payment_id = %response.payment_id, status = %response.status, "3D payment initiated");
        Ok(response)
    }

    #[instrument(skip(self, request), fields(key = %route.key, payment_id = %request.payment_id))]
    pub async fn complete_3d_payment(
        &self,
        route: &Route,
        request: Complete3DRequest,
    ) -> Result<PaymentResponse> {
        let response = self
            .invoke(route, Operation::Complete3DPayment, |provider| {
                let request = request.clone();
                async move { provider.complete_3d_payment(&request).await }
            })
            .await?;
        info!(status = %response.status, "3D payment completed");
        Ok(response)
    }

    #[instrument(skip(self, request), fields(key = %route.key, payment_id = %request.payment_id))]
    pub async fn get_payment_status(
        &self,
        route: &Route,
        request: StatusRequest,
    ) -> Result<PaymentResponse> {
        self.invoke(route, Operation::GetPaymentStatus, |provider| {
            let request = request.clone();
            async move { provider.get_payment_status(&request).await }
        })
        .await
    }

    #[instrument(skip(self, request), fields(key = %route.key, payment_id = %request.payment_id))]
    pub async fn cancel_payment(
        &self,
        route: &Route,
        request: CancelRequest,
    ) -> Result<PaymentResponse> {
        let response = self
            .invoke(route, Operation::CancelPayment, |provider| {
                let request = request.clone();
                async move { provider.cancel_payment(&request).await }
            })
            .await?;
        info!(status = %response.status, "payment cancelled");
        Ok(response)
    }

    #[instrument(skip(self, request), fields(key = %route.key, payment_id = %request.payment_id))]
    pub async fn refund_payment(
        &self,
        route: &Route,
        request: RefundRequest,
    ) -> Result<RefundResponse> {
        let response = self
            .invoke(route, Operation::RefundPayment, |provider| {
                let request = request.clone();
                async move { provider.refund_payment(&request).await }
            })
            .await?;
        info!(refund_id = %response.refund_id, amount = %response.amount, "payment refunded");
        Ok(response)
    }

    #[instrument(skip(self, request), fields(key = %route.key))]
    pub async fn get_installment_count(
        &self,
        route: &Route,
        request: InstallmentRequest,
    ) -> Result<InstallmentResponse> {
        self.invoke(route, Operation::GetInstallmentCount, |provider| {
            let request = request.clone();
            async move { provider.get_installment_count(&request).await }
        })
        .await
    }

    #[instrument(skip(self, request), fields(key = %route.key))]
    pub async fn get_commission(
        &self,
        route: &Route,
        request: CommissionRequest,
    ) -> Result<CommissionResponse> {
        self.invoke(route, Operation::GetCommission, |provider| {
            let request = request.clone();
            async move { provider.get_commission(&request).await }
        })
        .await
    }

    #[instrument(skip(self, request), fields(key = %route.key))]
    pub async fn validate_webhook(
        &self,
        route: &Route,
        request: WebhookRequest,
    ) -> Result<WebhookVerdict> {
        self.invoke(route, Operation::ValidateWebhook, |provider| {
            let request = request.clone();
            async move { provider.validate_webhook(&request).await }
        })
        .await
    }
}
