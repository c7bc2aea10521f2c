use crate::domain::payment::{
    CancelRequest, CommissionRequest, Complete3DRequest, InstallmentRequest, PaymentRequest,
    RefundRequest, StatusRequest,
};
use crate::domain::tenant::{CredentialMap, Environment};
use crate::error::{GatewayError, Result};
use crate::interfaces::payload::FlatMap;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::BufRead;

fn sandbox() -> Environment {
    Environment::Sandbox
}

/// One gateway operation, tagged by `"command"`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Providers,
    RequiredConfig {
        provider: String,
        #[serde(default = "sandbox")]
        environment: Environment,
    },
    SetConfig {
        provider: String,
        #[serde(default = "sandbox")]
        environment: Environment,
        credentials: CredentialMap,
    },
    GetConfig {
        provider: String,
        #[serde(default = "sandbox")]
        environment: Environment,
    },
    ListConfigs,
    DeleteConfig {
        provider: String,
        /// Every environment when absent.
        #[serde(default)]
        environment: Option<Environment>,
    },
    WebhookUrl {
        provider: String,
        #[serde(default = "sandbox")]
        environment: Environment,
    },
    CreatePayment {
        provider: String,
        #[serde(default = "sandbox")]
        environment: Environment,
        request: PaymentRequest,
    },
    #[serde(rename = "complete_3d_payment")]
    Complete3DPayment {
        provider: String,
        #[serde(default = "sandbox")]
        environment: Environment,
        request: Complete3DRequest,
    },
    PaymentStatus {
        provider: String,
        #[serde(default = "sandbox")]
        environment: Environment,
        request: StatusRequest,
    },
    CancelPayment {
        provider: String,
        #[serde(default = "sandbox")]
        environment: Environment,
        request: CancelRequest,
    },
    Refund {
        provider: String,
        #[serde(default = "sandbox")]
        environment: Environment,
        request: RefundRequest,
    },
    Installments {
        provider: String,
        #[serde(default = "sandbox")]
        environment: Environment,
        request: InstallmentRequest,
    },
    Commission {
        provider: String,
        #[serde(default = "sandbox")]
        environment: Environment,
        request: CommissionRequest,
    },
    /// A browser coming back from a 3D challenge page.
    Callback {
        provider: String,
        #[serde(default)]
        query: String,
        #[serde(default)]
        form: FlatMap,
        #[serde(default)]
        json: FlatMap,
    },
    /// A processor notification; `query` carries `tenantId` and `environment`.
    Webhook {
        provider: String,
        #[serde(default)]
        query: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
        #[serde(default)]
        body: String,
    },
    /// Waits for pending webhook jobs, then lists the recorded effects.
    Effects {
        #[serde(rename = "paymentId")]
        payment_id: String,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Providers => "providers",
            Self::RequiredConfig { .. } => "required_config",
            Self::SetConfig { .. } => "set_config",
            Self::GetConfig { .. } => "get_config",
            Self::ListConfigs => "list_configs",
            Self::DeleteConfig { .. } => "delete_config",
            Self::WebhookUrl { .. } => "webhook_url",
            Self::CreatePayment { .. } => "create_payment",
            Self::Complete3DPayment { .. } => "complete_3d_payment",
            Self::PaymentStatus { .. } => "payment_status",
            Self::CancelPayment { .. } => "cancel_payment",
            Self::Refund { .. } => "refund",
            Self::Installments { .. } => "installments",
            Self::Commission { .. } => "commission",
            Self::Callback { .. } => "callback",
            Self::Webhook { .. } => "webhook",
            Self::Effects { .. } => "effects",
        }
    }
}

/// A command plus the identity it runs as.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CommandLine {
    #[serde(default)]
    pub tenant: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(flatten)]
    pub command: Command,
}

/// Reads one JSON command per line. Blank lines and `#` comments are skipped.
pub struct CommandReader<R: BufRead> {
    source: R,
}

impl<R: BufRead> CommandReader<R> {
    pub fn new(source: R) -> Self {
        Self { source }
    }

    /// Lazily parses commands, paired with their 1-based line number.
    pub fn commands(self) -> impl Iterator<Item = (usize, Result<CommandLine>)> {
        self.source
            .lines()
            .enumerate()
            .filter_map(|(index, line)| {
                let number = index + 1;
                let line = match line {
                    Ok(line) => line,
                    Err(e) => return Some((number, Err(GatewayError::from(e)))),
                };
                let trimmed = line.trim();
                if trimmed.is_empty() || trimmed.starts_with('#') {
                    return None;
                }
                Some((
                    number,
                    serde_json::from_str(trimmed).map_err(GatewayError::from),
                ))
            })
    }
}
