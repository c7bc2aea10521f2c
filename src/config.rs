//! Runtime settings.
//!
//! Every field has a default, so an empty or missing file is a valid
//! configuration. A handful of values can be overridden from the environment.

use crate::application::orchestrator::OrchestratorSettings;
use crate::application::rate_limit::RateLimitSettings;
use crate::error::{GatewayError, Result};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

pub const ENV_CALLBACK_SECRET: &str = "PAYGATE_CALLBACK_SECRET";
pub const ENV_BASE_URL: &str = "PAYGATE_BASE_URL";
pub const ENV_LOG: &str = "PAYGATE_LOG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    pub base_url: String,
    /// HMAC key for callback state tokens. Must be shared by every node that
    /// can receive a callback.
    pub callback_secret: String,
    pub state_ttl_secs: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            callback_secret: String::new(),
            state_ttl_secs: 15 * 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub payment_secs: u64,
    pub inquiry_secs: u64,
    pub webhook_task_secs: u64,
    pub read_retries: u32,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            payment_secs: 30,
            inquiry_secs: 10,
            webhook_task_secs: 120,
            read_retries: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// `None` keeps instances until their configuration changes.
    pub idle_ttl_secs: Option<u64>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            idle_ttl_secs: Some(3600),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub format: LogFormat,
    /// `tracing_subscriber::EnvFilter` directive.
    pub filter: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            filter: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub gateway: GatewaySettings,
    pub timeouts: TimeoutSettings,
    pub cache: CacheSettings,
    pub rate_limit: RateLimitSettings,
    pub log: LogSettings,
}

impl Settings {
    /// Reads `path` when given, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => Self::from_toml_str(&std::fs::read_to_string(path)?)?,
            None => Self::default(),
        };
        settings.apply_overrides(|key| std::env::var(key).ok());
        Ok(settings)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| GatewayError::Settings(e.to_string()))
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(secret) = lookup(ENV_CALLBACK_SECRET) {
            self.gateway.callback_secret = secret;
        }
        if let Some(base_url) = lookup(ENV_BASE_URL) {
            self.gateway.base_url = base_url;
        }
        if let Some(filter) = lookup(ENV_LOG) {
            self.log.filter = filter;
        }
    }

    /// The configured callback secret, or a random per-process key when none is set.
    pub fn callback_secret(&self) -> Vec<u8> {
        if !self.gateway.callback_secret.is_empty() {
            return self.gateway.callback_secret.as_bytes().to_vec();
        }
        warn!(
            "no callback secret configured, using a random key; callbacks will only verify on this process"
        );
        let mut key = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        key
    }

    pub fn state_ttl(&self) -> Duration {
        Duration::from_secs(self.gateway.state_ttl_secs)
    }

    pub fn webhook_task_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.webhook_task_secs)
    }

    pub fn cache_idle_ttl(&self) -> Option<Duration> {
        self.cache.idle_ttl_secs.map(Duration::from_secs)
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            gateway_base_url: self.gateway.base_url.clone(),
            payment_timeout: Duration::from_secs(self.timeouts.payment_secs),
            inquiry_timeout: Duration::from_secs(self.timeouts.inquiry_secs),
            read_retries: self.timeouts.read_retries,
        }
    }
}
