//! Multi-scope rate limiting with burst lockout.
//!
//! Checks run in order and the first failure wins:
//! 1. lockout (set by an earlier burst violation)
//! 2. burst window
//! 3. the (key, group) minute window, against the group's override limit
//!    if it has one, else the global limit
//! 4. the (key, group) hour window, same rule
//!
//! Windows reset lazily when the access that finds them stale increments
//! them. Idle keys are reclaimed by [`RateLimiter::run_eviction`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::broadcast;

use crate::clock::SharedClock;
use crate::config::RateLimitConfig;
use crate::observability::metrics;
use crate::routing::{EndpointGroup, GroupRouter, KeyTier, RequestKey};
use crate::security::rate_store::{EndpointLimits, LocalStore, RateLimitStore, ResolvedLimits};
use crate::security::rate_window::Scope;

/// Fault inside a rate limit store. The admission pipeline fails open on it.
#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("lockout deadline overflows the clock")]
    ClockOverflow,
}

/// Quota state of the scope closest to being exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub scope: Scope,
    pub limit: u32,
    pub remaining: u32,
    pub reset_after: Duration,
}

/// Outcome of [`RateLimiter::try_acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    /// Absent when no limiter state was consulted (disabled, bypass, fault).
    pub quota: Option<Quota>,
    pub retry_after: Option<Duration>,
}

impl Decision {
    pub fn unmetered() -> Self {
        Self {
            allowed: true,
            quota: None,
            retry_after: None,
        }
    }

    pub fn allowed(quota: Quota) -> Self {
        Self {
            allowed: true,
            quota: Some(quota),
            retry_after: None,
        }
    }

    pub fn denied(quota: Quota, retry_after: Duration) -> Self {
        Self {
            allowed: false,
            quota: Some(quota),
            retry_after: Some(retry_after),
        }
    }
}

/// Rate limit policy compiled from configuration.
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    pub enabled: bool,
    pub requests_per_minute: u32,
    pub requests_per_hour: u32,
    pub per_user_requests_per_minute: u32,
    pub burst_limit: u32,
    pub burst_window: Duration,
    pub lockout: Duration,
    pub overrides: HashMap<Arc<str>, EndpointLimits>,
    pub idle_key_ttl: Duration,
}

impl RateLimitPolicy {
    /// Compile the policy, resolving override prefixes to group names.
    pub fn from_config(config: &RateLimitConfig, router: &GroupRouter) -> Self {
        let mut overrides = HashMap::new();
        for ov in &config.endpoint_overrides {
            match router.group_for_prefix(&ov.group_prefix) {
                Some(group) => {
                    overrides.insert(
                        group.clone(),
                        EndpointLimits {
                            per_minute: ov.requests_per_minute,
                            per_hour: ov.requests_per_hour,
                        },
                    );
                }
                None => tracing::warn!(prefix = %ov.group_prefix, "Override matches no upstream group"),
            }
        }

        Self {
            enabled: config.enabled,
            requests_per_minute: config.requests_per_minute,
            requests_per_hour: config.requests_per_hour,
            per_user_requests_per_minute: config.per_user_requests_per_minute,
            burst_limit: config.burst_limit,
            burst_window: Duration::from_secs(config.burst_window_secs),
            lockout: Duration::from_secs(config.lockout_duration_minutes.saturating_mul(60)),
            overrides,
            idle_key_ttl: Duration::from_secs(config.idle_key_ttl_secs),
        }
    }

    fn resolve(&self, key: &RequestKey, group: &str) -> ResolvedLimits {
        let per_minute = match key.tier() {
            KeyTier::Identified => self.per_user_requests_per_minute,
            KeyTier::Anonymous => self.requests_per_minute,
        };
        ResolvedLimits {
            per_minute,
            per_hour: self.requests_per_hour,
            endpoint: self.overrides.get(group).copied(),
            burst: self.burst_limit,
            burst_window: self.burst_window,
            lockout: self.lockout,
        }
    }
}

/// Rate limiter engine shared by all requests.
#[derive(Debug)]
pub struct RateLimiter {
    policy: RateLimitPolicy,
    store: Arc<dyn RateLimitStore>,
    clock: SharedClock,
}

impl RateLimiter {
    /// Rate limiter backed by an in-process [`LocalStore`].
    pub fn new(policy: RateLimitPolicy, clock: SharedClock) -> Self {
        Self::with_store(policy, Arc::new(LocalStore::new()), clock)
    }

    pub fn with_store(
        policy: RateLimitPolicy,
        store: Arc<dyn RateLimitStore>,
        clock: SharedClock,
    ) -> Self {
        Self {
            policy,
            store,
            clock,
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Decide whether `key` may call `group` now, consuming quota if so.
    ///
    /// Disabled limiting and the bypass group never touch the store.
    pub fn try_acquire(
        &self,
        key: &RequestKey,
        group: &EndpointGroup,
    ) -> Result<Decision, RateLimitError> {
        let group = match group {
            EndpointGroup::Named(name) if self.policy.enabled => name,
            _ => return Ok(Decision::unmetered()),
        };

        let limits = self.policy.resolve(key, group);
        let decision = self.store.acquire(key, group, &limits, self.clock.now())?;

        if let (false, Some(quota)) = (decision.allowed, decision.quota) {
            tracing::warn!(
                client = %key,
                group = %group,
                scope = quota.scope.as_str(),
                retry_after_secs = decision.retry_after.map(|d| d.as_secs()),
                "Rate limit exceeded"
            );
            metrics::record_rate_limited(quota.scope.as_str());
        }
        Ok(decision)
    }

    pub fn tracked_keys(&self) -> usize {
        self.store.tracked_keys()
    }

    pub fn is_tracked(&self, key: &RequestKey) -> bool {
        self.store.is_tracked(key)
    }

    /// Evict keys idle for longer than the configured TTL.
    pub fn evict_idle(&self) -> usize {
        let evicted = self
            .store
            .evict_idle(self.policy.idle_key_ttl, self.clock.now());
        metrics::record_tracked_keys(self.store.tracked_keys());
        evicted
    }

    /// Periodically evict idle keys until shutdown.
    pub async fn run_eviction(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        if !self.policy.enabled {
            return;
        }
        tracing::info!(interval_secs = interval.as_secs(), "Idle key eviction starting");

        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = self.evict_idle();
                    if evicted > 0 {
                        tracing::debug!(evicted, remaining = self.tracked_keys(), "Evicted idle rate limit keys");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Idle key eviction received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}
