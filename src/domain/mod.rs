//! Domain layer: the canonical payment vocabulary, the plugin contract, and the
//! ports the application layer depends on.

pub mod callback;
pub mod payment;
pub mod ports;
pub mod provider;
pub mod status;
pub mod tenant;
