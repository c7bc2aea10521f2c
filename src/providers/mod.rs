//! Processor plugins.
//!
//! Each plugin registers itself with `inventory::submit!`, so adding a processor
//! never means editing a central list. `ProviderRegistry::with_builtin_providers`
//! gathers the submissions into an explicit registry at startup.

use crate::domain::provider::ProviderBox;

pub mod simulator;

/// Self-registration entry submitted by each plugin module.
pub struct ProviderRegistration {
    /// Name the plugin is looked up by, lower case.
    pub name: &'static str,
    pub constructor: fn() -> ProviderBox,
}

inventory::collect!(ProviderRegistration);
