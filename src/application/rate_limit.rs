//! Per-tenant token buckets.
//!
//! One bucket per (tenant or client IP, action class). Tokens refill
//! continuously at `capacity / window`, so bursts up to the capacity are allowed
//! and the steady state is the configured rate.
//!
//! [`TenantRateLimiter::admit`] is the gate: the caller's `global` bucket first,
//! then the bucket of the action class. Callers without a tenant are held to the
//! lower of the `anonymous` policy and the class policy, except for processor
//! webhooks, which arrive tenant-less from a handful of shared addresses and are
//! metered by the `webhook` policy alone.

use crate::domain::tenant::TenantId;
use crate::error::{GatewayError, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionClass {
    Global,
    Payment,
    Refund,
    Status,
    Auth,
    Config,
    Webhook,
}

impl ActionClass {
    pub const ALL: [ActionClass; 7] = [
        Self::Global,
        Self::Payment,
        Self::Refund,
        Self::Status,
        Self::Auth,
        Self::Config,
        Self::Webhook,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Payment => "payment",
            Self::Refund => "refund",
            Self::Status => "status",
            Self::Auth => "auth",
            Self::Config => "config",
            Self::Webhook => "webhook",
        }
    }
}

impl fmt::Display for ActionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capacity per window. The refill rate follows from the two.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketPolicy {
    pub capacity: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

fn default_window_secs() -> u64 {
    60
}

impl BucketPolicy {
    pub const fn per_minute(capacity: u32) -> Self {
        Self {
            capacity,
            window_secs: 60,
        }
    }

    fn scaled(self, multiplier: f64) -> (f64, f64) {
        let capacity = (f64::from(self.capacity) * multiplier).max(1.0);
        let window = self.window_secs.max(1) as f64;
        (capacity, capacity / window)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub policies: BTreeMap<ActionClass, BucketPolicy>,
    /// Ceiling for callers with no resolved tenant, keyed by client IP.
    pub anonymous: BucketPolicy,
    pub premium_multiplier: f64,
    pub premium_tenants: Vec<String>,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            policies: ActionClass::ALL
                .into_iter()
                .map(|action| (action, Self::default_policy(action)))
                .collect(),
            anonymous: BucketPolicy::per_minute(20),
            premium_multiplier: 2.0,
            premium_tenants: Vec::new(),
        }
    }
}

impl RateLimitSettings {
    pub fn default_policy(action: ActionClass) -> BucketPolicy {
        match action {
            ActionClass::Global => BucketPolicy::per_minute(1000),
            ActionClass::Payment => BucketPolicy::per_minute(50),
            ActionClass::Refund => BucketPolicy::per_minute(20),
            ActionClass::Status => BucketPolicy::per_minute(200),
            ActionClass::Auth => BucketPolicy::per_minute(10),
            ActionClass::Config => BucketPolicy::per_minute(30),
            ActionClass::Webhook => BucketPolicy::per_minute(500),
        }
    }

    /// Configured policy, or the built-in one for classes the file leaves out.
    fn policy(&self, action: ActionClass) -> BucketPolicy {
        self.policies
            .get(&action)
            .copied()
            .unwrap_or_else(|| Self::default_policy(action))
    }
}

/// Time source for refills.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Who is being limited.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RateLimitIdentity {
    Tenant(TenantId),
    Ip(String),
}

impl fmt::Display for RateLimitIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tenant(tenant) => write!(f, "tenant:{}", tenant),
            Self::Ip(ip) => write!(f, "ip:{}", ip),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    capacity: f64,
    refill_per_sec: f64,
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn full(capacity: f64, refill_per_sec: f64, now: Instant) -> Self {
        Self {
            capacity,
            refill_per_sec,
            tokens: capacity,
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Takes one token, or returns how long until one is available.
    fn try_take(&mut self, now: Instant) -> std::result::Result<(), Duration> {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let wait = (1.0 - self.tokens) / self.refill_per_sec;
            Err(Duration::from_secs_f64(wait.max(0.0)))
        }
    }
}

/// Read-only view of one bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketSnapshot {
    pub capacity: f64,
    pub tokens: f64,
}

pub struct TenantRateLimiter {
    settings: RateLimitSettings,
    premium: HashSet<String>,
    buckets: DashMap<(RateLimitIdentity, ActionClass), Bucket>,
    clock: Arc<dyn Clock>,
}

impl TenantRateLimiter {
    pub fn new(settings: RateLimitSettings) -> Self {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    pub fn with_clock(settings: RateLimitSettings, clock: Arc<dyn Clock>) -> Self {
        let premium = settings.premium_tenants.iter().cloned().collect();
        Self {
            settings,
            premium,
            buckets: DashMap::new(),
            clock,
        }
    }

    pub fn is_premium(&self, tenant: &TenantId) -> bool {
        self.premium.contains(tenant.as_str())
    }

    fn limits_for(&self, identity: &RateLimitIdentity, action: ActionClass) -> (f64, f64) {
        match identity {
            RateLimitIdentity::Tenant(tenant) if self.is_premium(tenant) => self
                .settings
                .policy(action)
                .scaled(self.settings.premium_multiplier),
            RateLimitIdentity::Tenant(_) => self.settings.policy(action).scaled(1.0),
            RateLimitIdentity::Ip(_) if action == ActionClass::Webhook => {
                self.settings.policy(action).scaled(1.0)
            }
            RateLimitIdentity::Ip(_) => {
                let (anon_capacity, anon_rate) = self.settings.anonymous.scaled(1.0);
                let (capacity, rate) = self.settings.policy(action).scaled(1.0);
                (anon_capacity.min(capacity), anon_rate.min(rate))
            }
        }
    }

    /// Buckets a request draws from, in order.
    fn gates(identity: &RateLimitIdentity, action: ActionClass) -> &'static [ActionClass] {
        match (identity, action) {
            (_, ActionClass::Global) => &[ActionClass::Global],
            (RateLimitIdentity::Ip(_), ActionClass::Webhook) => &[ActionClass::Webhook],
            (_, ActionClass::Payment) => &[ActionClass::Global, ActionClass::Payment],
            (_, ActionClass::Refund) => &[ActionClass::Global, ActionClass::Refund],
            (_, ActionClass::Status) => &[ActionClass::Global, ActionClass::Status],
            (_, ActionClass::Auth) => &[ActionClass::Global, ActionClass::Auth],
            (_, ActionClass::Config) => &[ActionClass::Global, ActionClass::Config],
            (_, ActionClass::Webhook) => &[ActionClass::Global, ActionClass::Webhook],
        }
    }

    /// Admits one request for `action`, drawing from every bucket that gates it.
    pub fn admit(&self, identity: &RateLimitIdentity, action: ActionClass) -> Result<()> {
        for gate in Self::gates(identity, action) {
            self.check(identity, *gate)?;
        }
        Ok(())
    }

    /// Consumes one token from the `(identity, action)` bucket.
    pub fn check(&self, identity: &RateLimitIdentity, action: ActionClass) -> Result<()> {
        let now = self.clock.now();
        let (capacity, refill_per_sec) = self.limits_for(identity, action);
        // The entry guard holds the shard lock, which makes the update atomic per key.
        let mut bucket = self
            .buckets
            .entry((identity.clone(), action))
            .or_insert_with(|| Bucket::full(capacity, refill_per_sec, now));
        bucket.try_take(now).map_err(|retry_after| {
            warn!(identity = %identity, action = %action, retry_after_ms = retry_after.as_millis() as u64, "rate limit exceeded");
            GatewayError::RateLimited {
                action,
                retry_after,
            }
        })
    }

    /// Current state of a bucket after refilling, if it exists.
    pub fn snapshot(
        &self,
        identity: &RateLimitIdentity,
        action: ActionClass,
    ) -> Option<BucketSnapshot> {
        let now = self.clock.now();
        let mut bucket = self.buckets.get_mut(&(identity.clone(), action))?;
        bucket.refill(now);
        Some(BucketSnapshot {
            capacity: bucket.capacity,
            tokens: bucket.tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(settings: RateLimitSettings) -> (TenantRateLimiter, ManualClock) {
        let clock = ManualClock::new();
        let limiter = TenantRateLimiter::with_clock(settings, Arc::new(clock.clone()));
        (limiter, clock)
    }

    fn tenant(id: &str) -> RateLimitIdentity {
        RateLimitIdentity::Tenant(TenantId::new(id))
    }

    #[test]
    fn test_fifty_payments_then_rate_limited() {
        let (limiter, _) = limiter(RateLimitSettings::default());
        for _ in 0..50 {
            limiter.check(&tenant("ABC"), ActionClass::Payment).unwrap();
        }
        let err = limiter
            .check(&tenant("ABC"), ActionClass::Payment)
            .unwrap_err();
        match err {
            GatewayError::RateLimited {
                action,
                retry_after,
            } => {
                assert_eq!(action, ActionClass::Payment);
                // 50 per minute refills one token every 1.2s.
                assert!(retry_after > Duration::from_millis(1100));
                assert!(retry_after <= Duration::from_millis(1201));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_tokens_refill_continuously() {
        let (limiter, clock) = limiter(RateLimitSettings::default());
        for _ in 0..50 {
            limiter.check(&tenant("ABC"), ActionClass::Payment).unwrap();
        }
        assert!(limiter.check(&tenant("ABC"), ActionClass::Payment).is_err());

        clock.advance(Duration::from_millis(1250));
        limiter.check(&tenant("ABC"), ActionClass::Payment).unwrap();
        assert!(limiter.check(&tenant("ABC"), ActionClass::Payment).is_err());
    }

    #[test]
    fn test_refill_never_exceeds_capacity() {
        let (limiter, clock) = limiter(RateLimitSettings::default());
        limiter.check(&tenant("ABC"), ActionClass::Refund).unwrap();
        clock.advance(Duration::from_secs(3600));
        let snapshot = limiter
            .snapshot(&tenant("ABC"), ActionClass::Refund)
            .unwrap();
        assert_eq!(snapshot.tokens, snapshot.capacity);
        assert_eq!(snapshot.capacity, 20.0);
    }

    #[test]
    fn test_tenants_and_actions_have_separate_buckets() {
        let (limiter, _) = limiter(RateLimitSettings::default());
        for _ in 0..50 {
            limiter.check(&tenant("ABC"), ActionClass::Payment).unwrap();
        }
        assert!(limiter.check(&tenant("ABC"), ActionClass::Payment).is_err());
        limiter.check(&tenant("XYZ"), ActionClass::Payment).unwrap();
        limiter.check(&tenant("ABC"), ActionClass::Status).unwrap();
    }

    #[test]
    fn test_premium_tenants_get_more_capacity() {
        let settings = RateLimitSettings {
            premium_tenants: vec!["VIP".to_string()],
            ..RateLimitSettings::default()
        };
        let (limiter, _) = limiter(settings);
        for _ in 0..100 {
            limiter.check(&tenant("VIP"), ActionClass::Payment).unwrap();
        }
        assert!(limiter.check(&tenant("VIP"), ActionClass::Payment).is_err());
    }

    #[test]
    fn test_anonymous_callers_use_ip_policy() {
        let (limiter, _) = limiter(RateLimitSettings::default());
        let ip = RateLimitIdentity::Ip("203.0.113.7".to_string());
        for _ in 0..20 {
            limiter.check(&ip, ActionClass::Status).unwrap();
        }
        assert!(limiter.check(&ip, ActionClass::Status).is_err());
    }

    #[test]
    fn test_exhausted_global_bucket_blocks_every_class() {
        let mut settings = RateLimitSettings::default();
        settings
            .policies
            .insert(ActionClass::Global, BucketPolicy::per_minute(3));
        let (limiter, _) = limiter(settings);

        limiter.admit(&tenant("ABC"), ActionClass::Payment).unwrap();
        limiter.admit(&tenant("ABC"), ActionClass::Config).unwrap();
        limiter.admit(&tenant("ABC"), ActionClass::Status).unwrap();
        let err = limiter
            .admit(&tenant("ABC"), ActionClass::Status)
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::RateLimited {
                action: ActionClass::Global,
                ..
            }
        ));
        let status = limiter
            .snapshot(&tenant("ABC"), ActionClass::Status)
            .unwrap();
        assert_eq!(status.tokens, 199.0);

        limiter.admit(&tenant("XYZ"), ActionClass::Status).unwrap();
    }

    #[test]
    fn test_anonymous_ceiling_never_raises_a_class_policy() {
        let mut settings = RateLimitSettings::default();
        settings
            .policies
            .insert(ActionClass::Auth, BucketPolicy::per_minute(5));
        let (limiter, _) = limiter(settings);
        let ip = RateLimitIdentity::Ip("203.0.113.7".to_string());

        for _ in 0..5 {
            limiter.admit(&ip, ActionClass::Auth).unwrap();
        }
        assert!(limiter.admit(&ip, ActionClass::Auth).is_err());
    }

    #[test]
    fn test_tenantless_webhooks_use_the_webhook_policy() {
        let (limiter, _) = limiter(RateLimitSettings::default());
        let processor = RateLimitIdentity::Ip("198.51.100.10".to_string());

        for _ in 0..500 {
            limiter.admit(&processor, ActionClass::Webhook).unwrap();
        }
        assert!(matches!(
            limiter.admit(&processor, ActionClass::Webhook),
            Err(GatewayError::RateLimited {
                action: ActionClass::Webhook,
                ..
            })
        ));
        // Browser traffic from the same address keeps its own ceiling.
        limiter.admit(&processor, ActionClass::Payment).unwrap();
    }

    #[test]
    fn test_concurrent_checks_never_overspend() {
        let (limiter, _) = limiter(RateLimitSettings::default());
        let limiter = Arc::new(limiter);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || {
                    (0..20)
                        .filter(|_| limiter.check(&tenant("ABC"), ActionClass::Refund).is_ok())
                        .count()
                })
            })
            .collect();
        let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(granted, 20);
    }
}
