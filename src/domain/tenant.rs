use crate::error::GatewayError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Open credential map as it crosses the configuration boundary.
///
/// Ordered so that fingerprints are deterministic. Plugins convert it into a
/// typed value right after validating it.
pub type CredentialMap = BTreeMap<String, String>;

/// Opaque tenant identifier resolved by the identity collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Sandbox,
    Production,
}

impl Environment {
    pub const ALL: [Environment; 2] = [Environment::Sandbox, Environment::Production];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sandbox => "sandbox",
            Self::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sandbox" | "test" => Ok(Self::Sandbox),
            "production" | "prod" | "live" => Ok(Self::Production),
            other => Err(GatewayError::ValidationError(format!(
                "Unknown environment '{}'",
                other
            ))),
        }
    }
}

/// Normalizes a provider name the way the registry stores it.
pub fn normalize_provider_name(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

/// One tenant's credentials for one processor in one environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    pub tenant_id: TenantId,
    pub provider: String,
    pub environment: Environment,
    pub credentials: CredentialMap,
    pub updated_at: DateTime<Utc>,
}

impl ProviderConfig {
    pub fn new(
        tenant_id: TenantId,
        provider: &str,
        environment: Environment,
        credentials: CredentialMap,
    ) -> Self {
        Self {
            tenant_id,
            provider: normalize_provider_name(provider),
            environment,
            credentials,
            updated_at: Utc::now(),
        }
    }

    /// Digest of everything an instance is built from.
    ///
    /// `updated_at` is excluded, so re-saving identical credentials keeps the
    /// cached instance.
    pub fn fingerprint(&self) -> ConfigFingerprint {
        let mut hasher = Sha256::new();
        hasher.update(self.tenant_id.as_str().as_bytes());
        hasher.update([0x1f]);
        hasher.update(self.provider.as_bytes());
        hasher.update([0x1f]);
        hasher.update(self.environment.as_str().as_bytes());
        for (key, value) in &self.credentials {
            hasher.update([0x1e]);
            hasher.update(key.as_bytes());
            hasher.update([b'=']);
            hasher.update(value.as_bytes());
        }
        ConfigFingerprint(hex::encode(hasher.finalize()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigFingerprint(String);

impl ConfigFingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConfigFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is enough for logs.
        f.write_str(&self.0[..self.0.len().min(12)])
    }
}
