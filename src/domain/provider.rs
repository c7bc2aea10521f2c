//! The capability contract every processor plugin implements.
//!
//! A plugin owns its processor's wire format, signing scheme, and the mapping
//! from processor status codes onto [`PaymentStatus`]. The core only ever talks
//! to it through [`PaymentProvider`].

use crate::domain::payment::{
    CancelRequest, CommissionRequest, CommissionResponse, Complete3DRequest, InstallmentRequest,
    InstallmentResponse, PaymentRequest, PaymentResponse, RefundRequest, RefundResponse,
    StatusRequest,
};
use crate::domain::status::PaymentStatus;
use crate::domain::tenant::{CredentialMap, Environment};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Plugin-level failure. The orchestrator wraps it with provider and operation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// The processor answered and said no.
    #[error("rejected by processor ({code}): {message}")]
    Rejected { code: String, message: String },
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
    #[error("provider used before initialization")]
    NotInitialized,
}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Every operation of the contract, used to label failures, logs, and timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Initialize,
    CreatePayment,
    Create3DPayment,
    Complete3DPayment,
    GetPaymentStatus,
    CancelPayment,
    RefundPayment,
    GetInstallmentCount,
    GetCommission,
    ValidateWebhook,
}

impl Operation {
    /// Reads that can be repeated without any financial side effect.
    pub fn is_idempotent_read(self) -> bool {
        matches!(
            self,
            Self::GetPaymentStatus | Self::GetInstallmentCount | Self::GetCommission
        )
    }

    /// Inquiries get the shorter timeout; everything that can move money the longer one.
    pub fn is_inquiry(self) -> bool {
        self.is_idempotent_read() || matches!(self, Self::ValidateWebhook)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Describes one credential key a plugin expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigField {
    pub key: String,
    pub required: bool,
    /// Masked on read-back.
    pub sensitive: bool,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
}

impl ConfigField {
    pub fn required(key: &str, description: &str) -> Self {
        Self {
            key: key.to_string(),
            required: true,
            sensitive: false,
            description: description.to_string(),
            example: None,
            min_length: None,
        }
    }

    pub fn optional(key: &str, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(key, description)
        }
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn example(mut self, example: &str) -> Self {
        self.example = Some(example.to_string());
        self
    }

    pub fn min_length(mut self, min: usize) -> Self {
        self.min_length = Some(min);
        self
    }
}

/// Generic presence and length checks shared by plugin `validate_config` implementations.
pub fn validate_required_fields(fields: &[ConfigField], config: &CredentialMap) -> ProviderResult<()> {
    for field in fields {
        let value = config.get(&field.key).map(|v| v.trim()).unwrap_or("");
        if value.is_empty() {
            if field.required {
                return Err(ProviderError::InvalidConfig(format!(
                    "missing required key '{}'",
                    field.key
                )));
            }
            continue;
        }
        if let Some(min) = field.min_length
            && value.chars().count() < min
        {
            return Err(ProviderError::InvalidConfig(format!(
                "'{}' must be at least {} characters",
                field.key, min
            )));
        }
    }
    Ok(())
}

/// Identity handed to a plugin at initialization.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderContext {
    /// Tenant-qualified provider name, e.g. `ABC_iyzico`.
    pub qualified_name: String,
    pub environment: Environment,
}

/// An inbound webhook as the plugin sees it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WebhookRequest {
    /// Header names are lower-cased.
    pub headers: BTreeMap<String, String>,
    pub data: BTreeMap<String, String>,
    pub raw_body: Vec<u8>,
}

impl WebhookRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WebhookVerdict {
    Valid {
        payment_id: String,
        /// What the sender claims. Never treated as ground truth.
        reported_status: Option<PaymentStatus>,
        event_id: Option<String>,
    },
    Invalid {
        reason: String,
    },
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Second construction step: parse credentials into typed config, pick base URLs.
    async fn initialize(
        &mut self,
        context: &ProviderContext,
        config: &CredentialMap,
    ) -> ProviderResult<()>;

    /// Rejects missing keys and malformed values without touching the network.
    fn validate_config(&self, config: &CredentialMap) -> ProviderResult<()>;

    /// Keys this plugin needs in the given environment.
    fn required_config(&self, environment: Environment) -> Vec<ConfigField>;

    async fn create_payment(&self, request: &PaymentRequest) -> ProviderResult<PaymentResponse>;

    async fn create_3d_payment(&self, request: &PaymentRequest)
    -> ProviderResult<PaymentResponse>;

    async fn complete_3d_payment(
        &self,
        request: &Complete3DRequest,
    ) -> ProviderResult<PaymentResponse>;

    async fn get_payment_status(&self, request: &StatusRequest)
    -> ProviderResult<PaymentResponse>;

    async fn cancel_payment(&self, request: &CancelRequest) -> ProviderResult<PaymentResponse>;

    async fn refund_payment(&self, request: &RefundRequest) -> ProviderResult<RefundResponse>;

    async fn get_installment_count(
        &self,
        request: &InstallmentRequest,
    ) -> ProviderResult<InstallmentResponse>;

    async fn get_commission(&self, request: &CommissionRequest)
    -> ProviderResult<CommissionResponse>;

    async fn validate_webhook(&self, request: &WebhookRequest) -> ProviderResult<WebhookVerdict>;
}

pub type ProviderBox = Box<dyn PaymentProvider>;
pub type ProviderConstructor = Box<dyn Fn() -> ProviderBox + Send + Sync>;
