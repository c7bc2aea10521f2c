//! Application layer containing the gateway's orchestration logic.
//!
//! Everything here is tenant-aware: provider instances are resolved through the
//! tenant cache, and every public entry point on [`gateway::Gateway`] passes the
//! rate limiter first.

pub mod cache;
pub mod callback;
pub mod config_service;
pub mod gateway;
pub mod orchestrator;
pub mod rate_limit;
pub mod registry;
pub mod webhook;
