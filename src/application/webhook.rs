//! Webhook ingestion.
//!
//! The synchronous part only decides 200 or 400. Everything with side effects
//! runs afterwards on a supervised task that re-queries the processor, because
//! a webhook body is a hint and never the source of truth.

use crate::application::cache::CacheKey;
use crate::application::orchestrator::{PaymentOrchestrator, Route};
use crate::domain::payment::StatusRequest;
use crate::domain::ports::{EffectKind, EffectOutcome, SharedEventSink, TerminalEffect};
use crate::domain::provider::{WebhookRequest, WebhookVerdict};
use crate::domain::status::PaymentStatus;
use crate::domain::tenant::{Environment, TenantId};
use crate::error::{GatewayError, Result};
use crate::interfaces::payload::RequestPayload;
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, error, info, info_span, warn};

pub const TENANT_PARAM: &str = "tenantId";
pub const ENVIRONMENT_PARAM: &str = "environment";

/// Runs detached webhook jobs with a per-job timeout and a shared cancellation scope.
pub struct WebhookDispatcher {
    tracker: TaskTracker,
    cancel: CancellationToken,
    task_timeout: Duration,
}

impl WebhookDispatcher {
    pub fn new(task_timeout: Duration) -> Self {
        Self {
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
            task_timeout,
        }
    }

    pub fn submit<F>(&self, label: String, job: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let cancel = self.cancel.clone();
        let limit = self.task_timeout;
        let span = info_span!("webhook_job", job = %label);
        self.tracker.spawn(
            async move {
                tokio::select! {
                    _ = cancel.cancelled() => warn!("webhook job cancelled"),
                    outcome = timeout(limit, job) => match outcome {
                        Ok(Ok(())) => debug!("webhook job finished"),
                        Ok(Err(e)) => error!(error = %e, "webhook job failed"),
                        Err(_) => error!(timeout_secs = limit.as_secs(), "webhook job timed out"),
                    },
                }
            }
            .instrument(span),
        );
    }

    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Waits until every job submitted so far has finished.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Gives running jobs `grace` to finish, then cancels the rest.
    pub async fn shutdown(&self, grace: Duration) {
        self.tracker.close();
        if timeout(grace, self.tracker.wait()).await.is_err() {
            warn!(in_flight = self.tracker.len(), "cancelling unfinished webhook jobs");
            self.cancel.cancel();
            self.tracker.wait().await;
        }
    }
}

/// A webhook as it arrived on `/webhooks/{provider}`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InboundWebhook {
    pub query: String,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl InboundWebhook {
    fn content_type(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
            .map(|(_, value)| value.as_str())
    }
}

/// The synchronous answer to the processor.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum WebhookAck {
    Accepted {
        #[serde(rename = "paymentId")]
        payment_id: String,
    },
    Rejected {
        reason: String,
    },
}

impl WebhookAck {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Accepted { .. } => 200,
            Self::Rejected { .. } => 400,
        }
    }

    fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }
}

pub struct WebhookPipeline {
    orchestrator: Arc<PaymentOrchestrator>,
    sink: SharedEventSink,
    dispatcher: Arc<WebhookDispatcher>,
}

impl WebhookPipeline {
    pub fn new(
        orchestrator: Arc<PaymentOrchestrator>,
        sink: SharedEventSink,
        dispatcher: Arc<WebhookDispatcher>,
    ) -> Self {
        Self {
            orchestrator,
            sink,
            dispatcher,
        }
    }

    pub fn dispatcher(&self) -> &Arc<WebhookDispatcher> {
        &self.dispatcher
    }

    /// Validates the webhook and, when it is authentic, schedules reconciliation.
    ///
    /// Bad input answers `Rejected`. Errors are returned only when the gateway
    /// itself cannot serve the tenant (no configuration, unknown provider).
    pub async fn ingest(&self, provider: &str, webhook: InboundWebhook) -> Result<WebhookAck> {
        let payload =
            match RequestPayload::from_parts(&webhook.query, webhook.content_type(), &webhook.body) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(provider, error = %e, "unreadable webhook");
                    return Ok(WebhookAck::rejected("unreadable payload"));
                }
            };

        let Some(tenant) = payload.query.get(TENANT_PARAM).filter(|t| !t.is_empty()) else {
            return Ok(WebhookAck::rejected("missing tenantId"));
        };
        let environment = match payload.query.get(ENVIRONMENT_PARAM) {
            Some(raw) => match raw.parse::<Environment>() {
                Ok(env) => env,
                Err(_) => return Ok(WebhookAck::rejected("unknown environment")),
            },
            None => Environment::Production,
        };
        let route = Route::new(CacheKey::new(TenantId::new(tenant.as_str()), provider, environment));

        let mut data = payload.merged();
        data.remove(TENANT_PARAM);
        data.remove(ENVIRONMENT_PARAM);
        let request = WebhookRequest {
            headers: webhook
                .headers
                .iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
                .collect(),
            data,
            raw_body: webhook.body,
        };

        let verdict = match self.orchestrator.validate_webhook(&route, request).await {
            Ok(verdict) => verdict,
            Err(e @ (GatewayError::Configuration { .. } | GatewayError::ProviderNotRegistered(_))) => {
                return Err(e);
            }
            Err(e) => {
                warn!(key = %route.key, error = %e, "webhook validation failed");
                return Ok(WebhookAck::rejected("validation failed"));
            }
        };

        match verdict {
            WebhookVerdict::Invalid { reason } => {
                warn!(key = %route.key, %reason, "webhook rejected");
                Ok(WebhookAck::rejected(reason))
            }
            WebhookVerdict::Valid {
                payment_id,
                reported_status,
                event_id,
            } => {
                info!(key = %route.key, %payment_id, event_id = event_id.as_deref().unwrap_or("-"), "webhook accepted");
                let job = Self::reconcile(
                    Arc::clone(&self.orchestrator),
                    Arc::clone(&self.sink),
                    route,
                    payment_id.clone(),
                    reported_status,
                );
                self.dispatcher.submit(payment_id.clone(), async move {
                    job.await.map(|_| ())
                });
                Ok(WebhookAck::Accepted { payment_id })
            }
        }
    }

    /// Re-queries the processor and records the terminal effect, if any.
    pub async fn reconcile(
        orchestrator: Arc<PaymentOrchestrator>,
        sink: SharedEventSink,
        route: Route,
        payment_id: String,
        reported: Option<PaymentStatus>,
    ) -> Result<Option<EffectOutcome>> {
        let verified = orchestrator
            .get_payment_status(
                &route,
                StatusRequest {
                    payment_id,
                    conversation_id: None,
                },
            )
            .await?;
        if let Some(reported) = reported
            && reported != verified.status
        {
            info!(%reported, verified = %verified.status, "webhook status disagrees with processor, using processor");
        }

        let Some(kind) = EffectKind::for_status(verified.status) else {
            debug!(status = %verified.status, "payment still in flight, nothing to record");
            return Ok(None);
        };
        let effect = TerminalEffect {
            kind,
            payment_id: verified.payment_id,
            status: verified.status,
            tenant_id: route.key.tenant.clone(),
            provider: route.key.provider.clone(),
            amount: verified.amount,
            currency: verified.currency.to_string(),
            recorded_at: Utc::now(),
        };
        let outcome = sink.apply(effect).await?;
        match outcome {
            EffectOutcome::Applied => info!(?kind, "terminal effect recorded"),
            EffectOutcome::AlreadyApplied => debug!(?kind, "duplicate delivery, effect already recorded"),
        }
        Ok(Some(outcome))
    }
}
