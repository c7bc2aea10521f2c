//! Deterministic in-process processor.
//!
//! Behaves like a small card processor with its own credentials, base URLs,
//! 3D challenge pages, and HMAC-signed webhooks, without leaving the process.
//! Test cards: [`DECLINED_CARD`] is declined, [`UNREACHABLE_CARD`] fails at the
//! transport level, anything else is approved.

use super::ProviderRegistration;
use crate::domain::payment::{
    CancelRequest, CommissionRequest, CommissionResponse, Complete3DRequest, Currency,
    InstallmentOption, InstallmentRequest, InstallmentResponse, PaymentRequest, PaymentResponse,
    RawResponse, RefundRequest, RefundResponse, StatusRequest,
};
use crate::domain::provider::{
    ConfigField, PaymentProvider, ProviderBox, ProviderContext, ProviderError, ProviderResult,
    WebhookRequest, WebhookVerdict, validate_required_fields,
};
use crate::domain::status::PaymentStatus;
use crate::domain::tenant::{CredentialMap, Environment};
use crate::interfaces::redirect_form::RedirectForm;
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

pub const NAME: &str = "simulator";
pub const SIGNATURE_HEADER: &str = "x-simulator-signature";
pub const DECLINED_CARD: &str = "4000000000000002";
pub const UNREACHABLE_CARD: &str = "4000000000000119";

const SANDBOX_BASE_URL: &str = "https://sandbox.simulator.test";
const PRODUCTION_BASE_URL: &str = "https://api.simulator.test";
const INSTALLMENT_PLANS: [(u32, Decimal); 4] = [
    (1, dec!(0)),
    (3, dec!(0.03)),
    (6, dec!(0.06)),
    (9, dec!(0.09)),
];

inventory::submit! {
    ProviderRegistration {
        name: NAME,
        constructor: SimulatorProvider::boxed,
    }
}

/// Typed credentials, built right after the open map passes validation.
#[derive(Debug, Clone)]
struct SimulatorCredentials {
    secret_key: String,
    base_url: String,
}

impl SimulatorCredentials {
    fn from_config(config: &CredentialMap, environment: Environment) -> ProviderResult<Self> {
        let get = |key: &str| config.get(key).map(|v| v.trim().to_string());
        if environment == Environment::Production && get("merchant_id").is_none() {
            return Err(ProviderError::InvalidConfig(
                "missing required key 'merchant_id'".to_string(),
            ));
        }
        let base_url = get("base_url").unwrap_or_else(|| match environment {
            Environment::Sandbox => SANDBOX_BASE_URL.to_string(),
            Environment::Production => PRODUCTION_BASE_URL.to_string(),
        });
        Ok(Self {
            secret_key: get("secret_key").unwrap_or_default(),
            base_url,
        })
    }
}

#[derive(Debug, Clone)]
struct SimulatedPayment {
    id: String,
    conversation_id: Option<String>,
    amount: Decimal,
    refunded: Decimal,
    currency: Currency,
    status: PaymentStatus,
    error_code: Option<String>,
}

pub struct SimulatorProvider {
    credentials: Option<SimulatorCredentials>,
    label: String,
    payments: Arc<RwLock<HashMap<String, SimulatedPayment>>>,
}

impl Default for SimulatorProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatorProvider {
    pub fn new() -> Self {
        Self {
            credentials: None,
            label: NAME.to_string(),
            payments: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn boxed() -> ProviderBox {
        Box::new(Self::new())
    }

    /// Signature the simulator puts in [`SIGNATURE_HEADER`]: hex HMAC-SHA256 of the body.
    pub fn sign_webhook(secret_key: &str, body: &[u8]) -> ProviderResult<String> {
        let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
            .map_err(|e| ProviderError::InvalidConfig(format!("unusable secret_key: {}", e)))?;
        mac.update(body);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn credentials(&self) -> ProviderResult<&SimulatorCredentials> {
        self.credentials.as_ref().ok_or(ProviderError::NotInitialized)
    }

    fn payment_id(request: &PaymentRequest) -> String {
        request
            .reference_id
            .clone()
            .unwrap_or_else(|| format!("sim_{}", Uuid::new_v4().simple()))
    }

    /// Applies the test-card rules. `Ok(None)` means approved.
    fn screen_card(request: &PaymentRequest) -> ProviderResult<Option<&'static str>> {
        let card = request.card.as_ref().ok_or_else(|| ProviderError::Rejected {
            code: "invalid_request".to_string(),
            message: "card data is required".to_string(),
        })?;
        match card.number.trim() {
            UNREACHABLE_CARD => Err(ProviderError::Transport(
                "simulated connection reset".to_string(),
            )),
            DECLINED_CARD => Ok(Some("card_declined")),
            _ => Ok(None),
        }
    }

    fn response(&self, payment: &SimulatedPayment) -> PaymentResponse {
        PaymentResponse {
            success: !matches!(
                payment.status,
                PaymentStatus::Failed | PaymentStatus::Cancelled
            ),
            status: payment.status,
            payment_id: payment.id.clone(),
            transaction_id: Some(format!("{}-tx", payment.id)),
            amount: payment.amount,
            currency: payment.currency.clone(),
            redirect_url: None,
            html: None,
            error_code: payment.error_code.clone(),
            message: payment
                .error_code
                .as_ref()
                .map(|code| format!("simulator: {}", code)),
            system_time: Utc::now(),
            raw: Some(RawResponse::Json(json!({
                "processor": self.label,
                "paymentId": payment.id,
                "conversationId": payment.conversation_id,
                "status": payment.status.as_str(),
                "refunded": payment.refunded.to_string(),
            }))),
        }
    }

    async fn existing(&self, payment_id: &str) -> Option<SimulatedPayment> {
        self.payments.read().await.get(payment_id).cloned()
    }

    async fn find(&self, payment_id: &str) -> ProviderResult<SimulatedPayment> {
        self.existing(payment_id)
            .await
            .ok_or_else(|| ProviderError::NotFound(format!("payment '{}'", payment_id)))
    }
}

#[async_trait]
impl PaymentProvider for SimulatorProvider {
    async fn initialize(
        &mut self,
        context: &ProviderContext,
        config: &CredentialMap,
    ) -> ProviderResult<()> {
        self.validate_config(config)?;
        self.credentials = Some(SimulatorCredentials::from_config(config, context.environment)?);
        self.label = context.qualified_name.clone();
        debug!(instance = %self.label, environment = %context.environment, "simulator initialized");
        Ok(())
    }

    fn validate_config(&self, config: &CredentialMap) -> ProviderResult<()> {
        validate_required_fields(&self.required_config(Environment::Sandbox), config)?;
        if let Some(merchant_id) = config.get("merchant_id")
            && !merchant_id.trim().chars().all(|c| c.is_ascii_digit())
        {
            return Err(ProviderError::InvalidConfig(
                "'merchant_id' must be numeric".to_string(),
            ));
        }
        if let Some(base_url) = config.get("base_url") {
            url::Url::parse(base_url.trim()).map_err(|e| {
                ProviderError::InvalidConfig(format!("'base_url' is not a valid URL: {}", e))
            })?;
        }
        Ok(())
    }

    fn required_config(&self, environment: Environment) -> Vec<ConfigField> {
        let merchant_id = ConfigField::required("merchant_id", "Numeric merchant number")
            .example("100200300");
        vec![
            ConfigField::required("api_key", "Public API key")
                .example("pk_test_51abc")
                .min_length(8),
            ConfigField::required("secret_key", "Secret used to sign requests and webhooks")
                .sensitive()
                .min_length(16),
            match environment {
                Environment::Production => merchant_id,
                Environment::Sandbox => ConfigField {
                    required: false,
                    ..merchant_id
                },
            },
            ConfigField::optional("base_url", "Override for the API base URL"),
        ]
    }

    async fn create_payment(&self, request: &PaymentRequest) -> ProviderResult<PaymentResponse> {
        self.credentials()?;
        let payment_id = Self::payment_id(request);
        if let Some(existing) = self.existing(&payment_id).await {
            return Ok(self.response(&existing));
        }

        let declined = Self::screen_card(request)?;
        let payment = SimulatedPayment {
            id: payment_id.clone(),
            conversation_id: request.conversation_id.clone(),
            amount: request.amount.value(),
            refunded: Decimal::ZERO,
            currency: request.currency.clone(),
            status: if declined.is_some() {
                PaymentStatus::Failed
            } else {
                PaymentStatus::Successful
            },
            error_code: declined.map(str::to_string),
        };
        self.payments
            .write()
            .await
            .insert(payment_id, payment.clone());
        Ok(self.response(&payment))
    }

    async fn create_3d_payment(
        &self,
        request: &PaymentRequest,
    ) -> ProviderResult<PaymentResponse> {
        let credentials = self.credentials()?;
        let callback_url = request.callback_url.as_deref().ok_or_else(|| {
            ProviderError::Rejected {
                code: "invalid_request".to_string(),
                message: "callback url is required for 3D payments".to_string(),
            }
        })?;
        let payment_id = Self::payment_id(request);
        if let Some(existing) = self.existing(&payment_id).await {
            return Ok(self.response(&existing));
        }

        let declined = Self::screen_card(request)?;
        let mut payment = SimulatedPayment {
            id: payment_id.clone(),
            conversation_id: request.conversation_id.clone(),
            amount: request.amount.value(),
            refunded: Decimal::ZERO,
            currency: request.currency.clone(),
            status: PaymentStatus::Pending,
            error_code: None,
        };
        if let Some(code) = declined {
            payment.status = PaymentStatus::Failed;
            payment.error_code = Some(code.to_string());
            self.payments
                .write()
                .await
                .insert(payment_id, payment.clone());
            return Ok(self.response(&payment));
        }

        let mut challenge = url::Url::parse(&credentials.base_url)
            .and_then(|base| base.join(&format!("3ds/challenge/{}", payment_id)))
            .map_err(|e| ProviderError::InvalidConfig(format!("bad base url: {}", e)))?;
        challenge
            .query_pairs_mut()
            .append_pair("paymentId", &payment_id)
            .append_pair("returnUrl", callback_url);

        self.payments
            .write()
            .await
            .insert(payment_id.clone(), payment.clone());

        let mut response = self.response(&payment);
        response.html = Some(
            RedirectForm::new(challenge.as_str())
                .field("paymentId", &payment_id)
                .render(),
        );
        response.redirect_url = Some(challenge.into());
        Ok(response)
    }

    async fn complete_3d_payment(
        &self,
        request: &Complete3DRequest,
    ) -> ProviderResult<PaymentResponse> {
        self.credentials()?;
        let payment_id = &request.payment_id;
        if let Some(echoed) = request.data.get("paymentId")
            && echoed != payment_id
        {
            return Err(ProviderError::Rejected {
                code: "payment_mismatch".to_string(),
                message: format!("callback is for '{}', not '{}'", echoed, payment_id),
            });
        }

        let mut payments = self.payments.write().await;
        let payment = payments
            .get_mut(payment_id)
            .ok_or_else(|| ProviderError::NotFound(format!("payment '{}'", payment_id)))?;
        if payment.status == PaymentStatus::Pending {
            if request.data.get("mdStatus").map(String::as_str) == Some("1") {
                payment.status = PaymentStatus::Successful;
            } else {
                payment.status = PaymentStatus::Failed;
                payment.error_code = Some("3ds_authentication_failed".to_string());
            }
        }
        let snapshot = payment.clone();
        drop(payments);
        Ok(self.response(&snapshot))
    }

    async fn get_payment_status(
        &self,
        request: &StatusRequest,
    ) -> ProviderResult<PaymentResponse> {
        self.credentials()?;
        let payment = self.find(&request.payment_id).await?;
        Ok(self.response(&payment))
    }

    async fn cancel_payment(&self, request: &CancelRequest) -> ProviderResult<PaymentResponse> {
        self.credentials()?;
        let mut payments = self.payments.write().await;
        let payment = payments.get_mut(&request.payment_id).ok_or_else(|| {
            ProviderError::NotFound(format!("payment '{}'", request.payment_id))
        })?;
        match payment.status {
            PaymentStatus::Pending | PaymentStatus::Processing | PaymentStatus::Successful => {
                payment.status = PaymentStatus::Cancelled;
            }
            PaymentStatus::Cancelled => {}
            status => {
                return Err(ProviderError::Rejected {
                    code: "not_cancellable".to_string(),
                    message: format!("payment is {}", status),
                });
            }
        }
        let snapshot = payment.clone();
        drop(payments);
        Ok(self.response(&snapshot))
    }

    async fn refund_payment(&self, request: &RefundRequest) -> ProviderResult<RefundResponse> {
        self.credentials()?;
        let mut payments = self.payments.write().await;
        let payment = payments.get_mut(&request.payment_id).ok_or_else(|| {
            ProviderError::NotFound(format!("payment '{}'", request.payment_id))
        })?;
        if payment.status != PaymentStatus::Successful {
            return Err(ProviderError::Rejected {
                code: "not_refundable".to_string(),
                message: format!("payment is {}", payment.status),
            });
        }
        if let Some(currency) = &request.currency
            && currency != &payment.currency
        {
            return Err(ProviderError::Rejected {
                code: "currency_mismatch".to_string(),
                message: format!("payment was made in {}", payment.currency),
            });
        }

        let remaining = payment.amount - payment.refunded;
        let amount = request.amount.map(|a| a.value()).unwrap_or(remaining);
        if amount > remaining {
            return Err(ProviderError::Rejected {
                code: "refund_exceeds_amount".to_string(),
                message: format!("only {} {} left to refund", remaining, payment.currency),
            });
        }
        payment.refunded += amount;
        if payment.refunded == payment.amount {
            payment.status = PaymentStatus::Refunded;
        }

        let refund_id = format!("rf_{}", Uuid::new_v4().simple());
        Ok(RefundResponse {
            success: true,
            refund_id: refund_id.clone(),
            payment_id: payment.id.clone(),
            amount,
            status: PaymentStatus::Refunded,
            error_code: None,
            message: None,
            system_time: Utc::now(),
            raw: Some(RawResponse::Json(json!({
                "refundId": refund_id,
                "paymentStatus": payment.status.as_str(),
                "refundedTotal": payment.refunded.to_string(),
            }))),
        })
    }

    async fn get_installment_count(
        &self,
        request: &InstallmentRequest,
    ) -> ProviderResult<InstallmentResponse> {
        self.credentials()?;
        let amount = request.amount.value();
        let options = INSTALLMENT_PLANS
            .iter()
            .map(|&(count, rate)| {
                let total = (amount * (Decimal::ONE + rate)).round_dp(2);
                InstallmentOption {
                    count,
                    installment_amount: (total / Decimal::from(count)).round_dp(2),
                    total_amount: total,
                    rate,
                }
            })
            .collect();
        Ok(InstallmentResponse {
            currency: request.currency.clone(),
            options,
        })
    }

    async fn get_commission(
        &self,
        request: &CommissionRequest,
    ) -> ProviderResult<CommissionResponse> {
        self.credentials()?;
        let steps = Decimal::from(request.installment_count.saturating_sub(1));
        let rate = dec!(0.025) + dec!(0.01) * steps;
        let amount = request.amount.value();
        let commission = (amount * rate).round_dp(2);
        Ok(CommissionResponse {
            amount,
            currency: request.currency.clone(),
            rate,
            commission,
            total: amount + commission,
        })
    }

    async fn validate_webhook(&self, request: &WebhookRequest) -> ProviderResult<WebhookVerdict> {
        let credentials = self.credentials()?;
        let Some(provided) = request.header(SIGNATURE_HEADER) else {
            return Ok(WebhookVerdict::Invalid {
                reason: format!("missing {} header", SIGNATURE_HEADER),
            });
        };
        let expected = Self::sign_webhook(&credentials.secret_key, &request.raw_body)?;
        let provided = provided.trim().to_ascii_lowercase();
        if !bool::from(expected.as_bytes().ct_eq(provided.as_bytes())) {
            return Ok(WebhookVerdict::Invalid {
                reason: "signature mismatch".to_string(),
            });
        }

        let Some(payment_id) = request.data.get("paymentId").filter(|id| !id.is_empty()) else {
            return Ok(WebhookVerdict::Invalid {
                reason: "paymentId missing from payload".to_string(),
            });
        };
        Ok(WebhookVerdict::Valid {
            payment_id: payment_id.clone(),
            reported_status: request.data.get("status").and_then(|s| s.parse().ok()),
            event_id: request.data.get("eventId").cloned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::payment::{Amount, CardData, Customer};
    use std::collections::BTreeMap;

    fn credentials() -> CredentialMap {
        CredentialMap::from([
            ("api_key".to_string(), "pk_test_12345678".to_string()),
            ("secret_key".to_string(), "sk_test_abcdefghijklmnop".to_string()),
        ])
    }

    async fn provider() -> SimulatorProvider {
        let mut provider = SimulatorProvider::new();
        let context = ProviderContext {
            qualified_name: "ABC_simulator".to_string(),
            environment: Environment::Sandbox,
        };
        provider.initialize(&context, &credentials()).await.unwrap();
        provider
    }

    fn request(card: &str) -> PaymentRequest {
        PaymentRequest {
            amount: Amount::new(dec!(150.00)).unwrap(),
            currency: Currency::new("TRY").unwrap(),
            customer: Customer {
                name: "Ada".to_string(),
                surname: None,
                email: "ada@example.com".to_string(),
                phone: None,
                identity_number: None,
                address: None,
            },
            card: Some(CardData {
                holder_name: "Ada Lovelace".to_string(),
                number: card.to_string(),
                expire_month: "12".to_string(),
                expire_year: "2030".to_string(),
                cvv: "123".to_string(),
            }),
            items: vec![],
            description: None,
            callback_url: None,
            success_url: None,
            error_url: None,
            use_3d: false,
            installment_count: 1,
            tenant_id: None,
            conversation_id: None,
            reference_id: None,
            client_ip: None,
            user_agent: None,
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn test_validate_config_rejects_short_secret() {
        let provider = SimulatorProvider::new();
        let mut config = credentials();
        config.insert("secret_key".to_string(), "short".to_string());
        assert!(matches!(
            provider.validate_config(&config),
            Err(ProviderError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validate_config_rejects_non_numeric_merchant() {
        let provider = SimulatorProvider::new();
        let mut config = credentials();
        config.insert("merchant_id".to_string(), "M-1".to_string());
        assert!(provider.validate_config(&config).is_err());
    }

    #[test]
    fn test_merchant_id_required_only_in_production() {
        let provider = SimulatorProvider::new();
        let required = |env| {
            provider
                .required_config(env)
                .into_iter()
                .find(|f| f.key == "merchant_id")
                .unwrap()
                .required
        };
        assert!(!required(Environment::Sandbox));
        assert!(required(Environment::Production));
    }

    #[tokio::test]
    async fn test_production_initialize_requires_merchant_id() {
        let mut provider = SimulatorProvider::new();
        let context = ProviderContext {
            qualified_name: "ABC_simulator".to_string(),
            environment: Environment::Production,
        };
        assert!(matches!(
            provider.initialize(&context, &credentials()).await,
            Err(ProviderError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_uninitialized_provider_refuses_calls() {
        let provider = SimulatorProvider::new();
        assert_eq!(
            provider.create_payment(&request("4111111111111111")).await,
            Err(ProviderError::NotInitialized)
        );
    }

    #[tokio::test]
    async fn test_non_3d_payment_is_terminal() {
        let provider = provider().await;
        let approved = provider
            .create_payment(&request("4111111111111111"))
            .await
            .unwrap();
        assert_eq!(approved.status, PaymentStatus::Successful);
        assert!(approved.success);

        let declined = provider.create_payment(&request(DECLINED_CARD)).await.unwrap();
        assert_eq!(declined.status, PaymentStatus::Failed);
        assert_eq!(declined.error_code.as_deref(), Some("card_declined"));
    }

    #[tokio::test]
    async fn test_unreachable_card_is_transport_error() {
        let provider = provider().await;
        assert!(matches!(
            provider.create_payment(&request(UNREACHABLE_CARD)).await,
            Err(ProviderError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_reference_id_makes_creation_idempotent() {
        let provider = provider().await;
        let mut req = request("4111111111111111");
        req.reference_id = Some("ref-1".to_string());
        let first = provider.create_payment(&req).await.unwrap();
        let second = provider.create_payment(&req).await.unwrap();
        assert_eq!(first.payment_id, "ref-1");
        assert_eq!(second.payment_id, first.payment_id);
        assert_eq!(provider.payments.read().await.len(), 1);
    }

    #[tokio::test]
    async fn test_3d_flow_pending_then_completed() {
        let provider = provider().await;
        let mut req = request("4111111111111111");
        req.use_3d = true;
        req.callback_url = Some("https://gateway.test/callback/simulator?state=abc".to_string());

        let started = provider.create_3d_payment(&req).await.unwrap();
        assert_eq!(started.status, PaymentStatus::Pending);
        let redirect = started.redirect_url.unwrap();
        assert!(redirect.starts_with(SANDBOX_BASE_URL));
        assert!(started.html.unwrap().contains("<form"));

        let completion = Complete3DRequest {
            payment_id: started.payment_id.clone(),
            conversation_id: None,
            data: BTreeMap::from([("mdStatus".to_string(), "1".to_string())]),
        };
        let done = provider.complete_3d_payment(&completion).await.unwrap();
        assert_eq!(done.status, PaymentStatus::Successful);
    }

    #[tokio::test]
    async fn test_3d_completion_ignores_echoed_payment_id() {
        let provider = provider().await;
        let mut req = request("4111111111111111");
        req.use_3d = true;
        req.callback_url = Some("https://gateway.test/callback/simulator?state=abc".to_string());
        let signed = provider.create_3d_payment(&req).await.unwrap();
        let other = provider.create_3d_payment(&req).await.unwrap();

        let completion = Complete3DRequest {
            payment_id: signed.payment_id.clone(),
            conversation_id: None,
            data: BTreeMap::from([
                ("mdStatus".to_string(), "1".to_string()),
                ("paymentId".to_string(), other.payment_id.clone()),
            ]),
        };
        let err = provider.complete_3d_payment(&completion).await.unwrap_err();
        assert!(matches!(err, ProviderError::Rejected { ref code, .. } if code == "payment_mismatch"));

        let untouched = provider
            .get_payment_status(&StatusRequest {
                payment_id: other.payment_id,
                conversation_id: None,
            })
            .await
            .unwrap();
        assert_eq!(untouched.status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_partial_then_full_refund() {
        let provider = provider().await;
        let payment = provider
            .create_payment(&request("4111111111111111"))
            .await
            .unwrap();

        let partial = RefundRequest {
            payment_id: payment.payment_id.clone(),
            amount: Some(Amount::new(dec!(50)).unwrap()),
            currency: None,
            reason: None,
            description: None,
            conversation_id: None,
        };
        provider.refund_payment(&partial).await.unwrap();
        let status = provider
            .get_payment_status(&StatusRequest {
                payment_id: payment.payment_id.clone(),
                conversation_id: None,
            })
            .await
            .unwrap();
        assert_eq!(status.status, PaymentStatus::Successful);

        let too_much = RefundRequest {
            amount: Some(Amount::new(dec!(200)).unwrap()),
            ..partial.clone()
        };
        assert!(matches!(
            provider.refund_payment(&too_much).await,
            Err(ProviderError::Rejected { .. })
        ));

        let rest = RefundRequest {
            amount: None,
            ..partial
        };
        let refund = provider.refund_payment(&rest).await.unwrap();
        assert_eq!(refund.amount, dec!(100));
        let status = provider
            .get_payment_status(&StatusRequest {
                payment_id: payment.payment_id,
                conversation_id: None,
            })
            .await
            .unwrap();
        assert_eq!(status.status, PaymentStatus::Refunded);
    }

    #[tokio::test]
    async fn test_installments_and_commission() {
        let provider = provider().await;
        let installments = provider
            .get_installment_count(&InstallmentRequest {
                amount: Amount::new(dec!(100)).unwrap(),
                currency: Currency::new("TRY").unwrap(),
                bin_number: None,
            })
            .await
            .unwrap();
        assert_eq!(installments.options.len(), 4);
        assert_eq!(installments.options[1].total_amount, dec!(103.00));

        let commission = provider
            .get_commission(&CommissionRequest {
                amount: Amount::new(dec!(100)).unwrap(),
                currency: Currency::new("TRY").unwrap(),
                installment_count: 3,
            })
            .await
            .unwrap();
        assert_eq!(commission.rate, dec!(0.045));
        assert_eq!(commission.total, dec!(104.50));
    }

    #[tokio::test]
    async fn test_webhook_signature_checks() {
        let provider = provider().await;
        let body = br#"{"paymentId":"p-1","status":"successful"}"#.to_vec();
        let data = BTreeMap::from([
            ("paymentId".to_string(), "p-1".to_string()),
            ("status".to_string(), "successful".to_string()),
        ]);

        let signed = WebhookRequest {
            headers: BTreeMap::from([(
                SIGNATURE_HEADER.to_string(),
                SimulatorProvider::sign_webhook("sk_test_abcdefghijklmnop", &body).unwrap(),
            )]),
            data: data.clone(),
            raw_body: body.clone(),
        };
        assert_eq!(
            provider.validate_webhook(&signed).await.unwrap(),
            WebhookVerdict::Valid {
                payment_id: "p-1".to_string(),
                reported_status: Some(PaymentStatus::Successful),
                event_id: None,
            }
        );

        let forged = WebhookRequest {
            headers: BTreeMap::from([(SIGNATURE_HEADER.to_string(), "00ff".to_string())]),
            data,
            raw_body: body,
        };
        assert!(matches!(
            provider.validate_webhook(&forged).await.unwrap(),
            WebhookVerdict::Invalid { .. }
        ));
    }
}
