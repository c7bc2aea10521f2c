use crate::application::rate_limit::ActionClass;
use crate::domain::provider::{Operation, ProviderError};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    /// Missing or invalid credentials. Surfaced at config-write time, never defaulted.
    #[error("Configuration error for provider '{provider}': {message}")]
    Configuration { provider: String, message: String },
    #[error("Provider not registered: {0}")]
    ProviderNotRegistered(String),
    /// The third-party call failed or timed out.
    #[error("Provider '{provider}' failed during {operation}: {source}")]
    Upstream {
        provider: String,
        operation: Operation,
        #[source]
        source: ProviderError,
    },
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Signature error: {0}")]
    SignatureError(String),
    #[error("Callback state rejected: {0}")]
    StateExpired(String),
    #[error("Rate limit exceeded for '{action}', retry after {}s", retry_after.as_secs())]
    RateLimited {
        action: ActionClass,
        retry_after: Duration,
    },
    #[error("Invalid settings: {0}")]
    Settings(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[cfg(feature = "storage-rocksdb")]
    #[error("RocksDB error: {0}")]
    RocksDbError(#[from] rocksdb::Error),
    #[error("Internal error: {0}")]
    InternalError(#[from] Box<dyn std::error::Error + Send + Sync>),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    pub fn configuration(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Wraps a plugin failure with the provider and operation it came from.
    ///
    /// Plugin-side configuration complaints stay configuration errors so that
    /// callers can tell "our setup" apart from "processor unavailable".
    pub fn from_provider(provider: &str, operation: Operation, source: ProviderError) -> Self {
        match source {
            ProviderError::InvalidConfig(message) => Self::configuration(provider, message),
            ProviderError::InvalidSignature(message) => Self::SignatureError(message),
            source => Self::Upstream {
                provider: provider.to_string(),
                operation,
                source,
            },
        }
    }

    /// True when retrying the same call could succeed.
    ///
    /// Only upstream transport failures and timeouts qualify. Whether a retry is
    /// actually *safe* depends on the operation; see [`Operation::is_idempotent_read`].
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Upstream {
                source: ProviderError::Transport(_) | ProviderError::Timeout(_),
                ..
            }
        )
    }

    /// HTTP status the transport layer should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::ValidationError(_) | Self::Configuration { .. } => 400,
            Self::SignatureError(_) | Self::StateExpired(_) => 400,
            Self::ProviderNotRegistered(_) => 404,
            Self::Upstream {
                source: ProviderError::NotFound(_),
                ..
            } => 404,
            Self::Upstream {
                source: ProviderError::Rejected { .. },
                ..
            } => 422,
            Self::Upstream {
                source: ProviderError::Timeout(_),
                ..
            } => 504,
            Self::Upstream { .. } => 502,
            Self::RateLimited { .. } => 429,
            _ => 500,
        }
    }
}
