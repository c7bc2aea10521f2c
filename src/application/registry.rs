use crate::domain::provider::{ProviderBox, ProviderConstructor};
use crate::domain::tenant::normalize_provider_name;
use crate::error::{GatewayError, Result};
use crate::providers::ProviderRegistration;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Provider name to zero-argument constructor.
///
/// Populated once at startup, then shared as `Arc<ProviderRegistry>`, which makes
/// it read-only for the rest of the process lifetime.
#[derive(Default)]
pub struct ProviderRegistry {
    constructors: HashMap<String, ProviderConstructor>,
}

impl ProviderRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding every plugin that registered itself with
    /// `inventory::submit!`.
    pub fn with_builtin_providers() -> Self {
        let mut registry = Self::new();
        for registration in inventory::iter::<ProviderRegistration> {
            let constructor = registration.constructor;
            registry.register(registration.name, Box::new(move || constructor()));
        }
        registry
    }

    /// Registers a constructor under `name`. A later registration replaces an earlier one.
    pub fn register(&mut self, name: &str, constructor: ProviderConstructor) {
        let name = normalize_provider_name(name);
        if self.constructors.insert(name.clone(), constructor).is_some() {
            warn!(provider = %name, "provider registered twice, keeping the latest constructor");
        } else {
            debug!(provider = %name, "provider registered");
        }
    }

    /// Builds a fresh, uninitialized instance.
    pub fn create(&self, name: &str) -> Result<ProviderBox> {
        let name = normalize_provider_name(name);
        self.constructors
            .get(&name)
            .map(|constructor| constructor())
            .ok_or(GatewayError::ProviderNotRegistered(name))
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.constructors
            .contains_key(&normalize_provider_name(name))
    }

    /// All registered names, sorted, for health and discovery endpoints.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.constructors.keys().cloned().collect();
        names.sort();
        names
    }
}
