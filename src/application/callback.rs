use crate::application::cache::CacheKey;
use crate::application::orchestrator::{PaymentOrchestrator, Route};
use crate::domain::callback::CallbackState;
use crate::domain::payment::{Complete3DRequest, PaymentRequest, PaymentResponse};
use crate::domain::ports::SharedStateLedger;
use crate::domain::status::PaymentStatus;
use crate::domain::tenant::normalize_provider_name;
use crate::error::{GatewayError, Result};
use crate::interfaces::payload::RequestPayload;
use crate::interfaces::redirect_form::{RedirectForm, error_page};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

type HmacSha256 = Hmac<Sha256>;

/// Signs and verifies callback state tokens.
///
/// Token layout: `base64url(json) "." base64url(hmac_sha256(secret, json))`.
pub struct CallbackStateCodec {
    secret: Vec<u8>,
    ttl: Duration,
}

impl CallbackStateCodec {
    pub fn new(secret: impl AsRef<[u8]>, ttl: Duration) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn ttl_secs(&self) -> i64 {
        i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX)
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| GatewayError::InternalError(Box::new(std::io::Error::other(e.to_string()))))
    }

    /// Builds the state for a 3D payment about to be started.
    pub fn issue(
        &self,
        key: &CacheKey,
        payment_id: &str,
        request: &PaymentRequest,
    ) -> Result<CallbackState> {
        self.issue_at(key, payment_id, request, Utc::now().timestamp())
    }

    pub fn issue_at(
        &self,
        key: &CacheKey,
        payment_id: &str,
        request: &PaymentRequest,
        now: i64,
    ) -> Result<CallbackState> {
        let original = request
            .callback_url
            .clone()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| {
                GatewayError::ValidationError(
                    "A callback URL is required for 3D payments".to_string(),
                )
            })?;
        Ok(CallbackState {
            payment_id: payment_id.to_string(),
            tenant_id: key.tenant.clone(),
            provider_name: key.provider.clone(),
            environment: key.environment,
            conversation_id: request.conversation_id.clone(),
            success_url: request.success_target().unwrap_or(&original).to_string(),
            error_url: request.error_target().unwrap_or(&original).to_string(),
            original_callback_url: original,
            issued_at: now,
            expires_at: now.saturating_add(self.ttl_secs()),
        })
    }

    pub fn encode(&self, state: &CallbackState) -> Result<String> {
        let json = serde_json::to_vec(state)?;
        let mut mac = self.mac()?;
        mac.update(&json);
        let signature = mac.finalize().into_bytes();
        Ok(format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&json),
            URL_SAFE_NO_PAD.encode(signature)
        ))
    }

    pub fn decode(&self, token: &str) -> Result<CallbackState> {
        self.decode_at(token, Utc::now().timestamp())
    }

    /// Verifies the signature before looking at the payload, then the age.
    pub fn decode_at(&self, token: &str, now: i64) -> Result<CallbackState> {
        let rejected = |reason: &str| GatewayError::StateExpired(reason.to_string());

        let (payload, signature) = token.trim().split_once('.').ok_or_else(|| rejected("malformed token"))?;
        let json = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| rejected("malformed token"))?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| rejected("malformed token"))?;

        let mut mac = self.mac()?;
        mac.update(&json);
        mac.verify_slice(&signature)
            .map_err(|_| rejected("signature mismatch"))?;

        let state: CallbackState =
            serde_json::from_slice(&json).map_err(|_| rejected("unreadable state"))?;
        if state.is_expired_at(now, self.ttl_secs()) {
            return Err(rejected("state expired"));
        }
        Ok(state)
    }
}

/// What the callback endpoint answers. Always an HTML page.
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackOutcome {
    /// The processor answered; the browser is forwarded to the success or error URL.
    Completed {
        response: PaymentResponse,
        target: String,
        html: String,
    },
    /// Orchestration failed after the state was verified; forwarded to the error URL.
    Failed {
        payment_id: String,
        target: String,
        html: String,
    },
    /// The state could not be trusted. No orchestration happened.
    Rejected { reason: String, html: String },
}

impl CallbackOutcome {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Rejected { .. } => 400,
            _ => 200,
        }
    }

    pub fn html(&self) -> &str {
        match self {
            Self::Completed { html, .. } | Self::Failed { html, .. } | Self::Rejected { html, .. } => {
                html
            }
        }
    }
}

/// Completes 3D payments coming back from the issuer's challenge page.
///
/// A state is redeemed at most once; the ledger is consulted only after the
/// signature, the provider path and the payment binding all check out.
pub struct CallbackHandler {
    orchestrator: Arc<PaymentOrchestrator>,
    codec: Arc<CallbackStateCodec>,
    states: SharedStateLedger,
}

impl CallbackHandler {
    pub fn new(
        orchestrator: Arc<PaymentOrchestrator>,
        codec: Arc<CallbackStateCodec>,
        states: SharedStateLedger,
    ) -> Self {
        Self {
            orchestrator,
            codec,
            states,
        }
    }

    pub async fn handle(&self, provider: &str, payload: &RequestPayload) -> CallbackOutcome {
        let mut data = payload.merged();
        let Some(token) = data.remove("state") else {
            return Self::reject("missing state");
        };
        let state = match self.codec.decode(&token) {
            Ok(state) => state,
            Err(e) => {
                warn!(provider, error = %e, "callback state rejected");
                return Self::reject("invalid or expired state");
            }
        };
        if normalize_provider_name(provider) != state.provider_name {
            warn!(provider, expected = %state.provider_name, "callback arrived on the wrong provider path");
            return Self::reject("provider mismatch");
        }
        if data
            .get("paymentId")
            .is_some_and(|echoed| *echoed != state.payment_id)
        {
            warn!(tenant = %state.tenant_id, payment_id = %state.payment_id, "callback echoes a different payment");
            return Self::reject("payment mismatch");
        }
        match self
            .states
            .consume(&state.redemption_key(), state.expires_at, Utc::now().timestamp())
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                warn!(tenant = %state.tenant_id, payment_id = %state.payment_id, "callback state replayed");
                return Self::reject("state already used");
            }
            Err(e) => {
                warn!(tenant = %state.tenant_id, payment_id = %state.payment_id, error = %e, "callback state ledger unavailable");
                return Self::reject("state could not be redeemed");
            }
        }

        let route = Route::new(CacheKey::new(
            state.tenant_id.clone(),
            &state.provider_name,
            state.environment,
        ));
        let request = Complete3DRequest {
            payment_id: state.payment_id.clone(),
            conversation_id: state.conversation_id.clone(),
            data,
        };

        match self.orchestrator.complete_3d_payment(&route, request).await {
            Ok(response) => {
                let target = if response.status == PaymentStatus::Successful {
                    &state.success_url
                } else {
                    &state.error_url
                };
                let form = RedirectForm::new(target)
                    .field("paymentId", &response.payment_id)
                    .field("status", response.status.as_str())
                    .optional_field("conversationId", state.conversation_id.as_deref())
                    .optional_field("errorCode", response.error_code.as_deref())
                    .optional_field("message", response.message.as_deref());
                info!(tenant = %state.tenant_id, payment_id = %response.payment_id, status = %response.status, "callback completed");
                CallbackOutcome::Completed {
                    target: form.target(),
                    html: form.render(),
                    response,
                }
            }
            Err(e) => {
                warn!(tenant = %state.tenant_id, payment_id = %state.payment_id, error = %e, "3D completion failed");
                let form = RedirectForm::new(&state.error_url)
                    .field("paymentId", &state.payment_id)
                    .field("status", PaymentStatus::Failed.as_str())
                    .optional_field("conversationId", state.conversation_id.as_deref())
                    .field("errorCode", "processing_error")
                    .field("message", "The payment could not be completed");
                CallbackOutcome::Failed {
                    payment_id: state.payment_id,
                    target: form.target(),
                    html: form.render(),
                }
            }
        }
    }

    fn reject(reason: &str) -> CallbackOutcome {
        CallbackOutcome::Rejected {
            reason: reason.to_string(),
            html: error_page("This payment link is invalid or has expired."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::payment::{Amount, Currency, Customer};
    use crate::domain::tenant::{Environment, TenantId};
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    fn codec() -> CallbackStateCodec {
        CallbackStateCodec::new(b"0123456789abcdef0123456789abcdef", Duration::from_secs(900))
    }

    fn key() -> CacheKey {
        CacheKey::new(TenantId::new("ABC"), "simulator", Environment::Sandbox)
    }

    fn request() -> PaymentRequest {
        PaymentRequest {
            amount: Amount::new(dec!(10)).unwrap(),
            currency: Currency::new("TRY").unwrap(),
            customer: Customer {
                name: "Ada".to_string(),
                surname: None,
                email: "ada@example.com".to_string(),
                phone: None,
                identity_number: None,
                address: None,
            },
            card: None,
            items: vec![],
            description: None,
            callback_url: Some("https://shop.test/return".to_string()),
            success_url: Some("https://shop.test/ok".to_string()),
            error_url: None,
            use_3d: true,
            installment_count: 1,
            tenant_id: None,
            conversation_id: Some("conv-9".to_string()),
            reference_id: None,
            client_ip: None,
            user_agent: None,
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn test_issue_fills_targets() {
        let state = codec().issue_at(&key(), "pay-1", &request(), 1_000).unwrap();
        assert_eq!(state.success_url, "https://shop.test/ok");
        assert_eq!(state.error_url, "https://shop.test/return");
        assert_eq!(state.expires_at, 1_900);
    }

    #[test]
    fn test_issue_requires_callback_url() {
        let mut request = request();
        request.callback_url = None;
        assert!(matches!(
            codec().issue_at(&key(), "pay-1", &request, 0),
            Err(GatewayError::ValidationError(_))
        ));
    }

    #[test]
    fn test_decode_returns_what_was_encoded() {
        let codec = codec();
        let state = codec.issue_at(&key(), "pay-1", &request(), 1_000).unwrap();
        let token = codec.encode(&state).unwrap();
        assert_eq!(codec.decode_at(&token, 1_100).unwrap(), state);
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let codec = codec();
        let state = codec.issue_at(&key(), "pay-1", &request(), 1_000).unwrap();
        let token = codec.encode(&state).unwrap();
        assert!(matches!(
            codec.decode_at(&token, 1_901),
            Err(GatewayError::StateExpired(_))
        ));
    }

    #[test]
    fn test_tampered_token_is_rejected() {
        let codec = codec();
        let state = codec.issue_at(&key(), "pay-1", &request(), 1_000).unwrap();
        let token = codec.encode(&state).unwrap();

        let (payload, signature) = token.split_once('.').unwrap();
        let mut json = URL_SAFE_NO_PAD.decode(payload).unwrap();
        let text = String::from_utf8(json.clone()).unwrap().replace("ABC", "XYZ");
        json = text.into_bytes();
        let forged = format!("{}.{}", URL_SAFE_NO_PAD.encode(json), signature);

        assert!(matches!(
            codec.decode_at(&forged, 1_100),
            Err(GatewayError::StateExpired(_))
        ));
        assert!(codec.decode_at("not-a-token", 1_100).is_err());
    }

    #[test]
    fn test_other_secret_cannot_decode() {
        let state = codec().issue_at(&key(), "pay-1", &request(), 1_000).unwrap();
        let token = codec().encode(&state).unwrap();
        let other = CallbackStateCodec::new(b"another-secret", Duration::from_secs(900));
        assert!(other.decode_at(&token, 1_100).is_err());
    }

    #[test]
    fn test_outcome_status_codes() {
        let rejected = CallbackHandler::reject("missing state");
        assert_eq!(rejected.http_status(), 400);
        assert!(rejected.html().contains("invalid or has expired"));
    }
}
