//! Storage backends for rate limit state.
//!
//! The admission algorithm runs inside the store so a backend can make the
//! whole check atomic for one key. [`LocalStore`] keeps state in process; a
//! backend shared between gateway instances would implement the same trait.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::routing::RequestKey;
use crate::security::rate_limit::{Decision, Quota, RateLimitError};
use crate::security::rate_window::{RateWindow, Scope, HOUR, MINUTE};

/// Limits replacing the global sustained limits for one endpoint group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointLimits {
    pub per_minute: u32,
    pub per_hour: u32,
}

/// Limits that apply to one (key, group) evaluation.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedLimits {
    pub per_minute: u32,
    pub per_hour: u32,
    pub endpoint: Option<EndpointLimits>,
    pub burst: u32,
    pub burst_window: Duration,
    pub lockout: Duration,
}

/// Backend storage for rate limit windows.
pub trait RateLimitStore: Send + Sync + Debug {
    /// Count one request for `key` against `group` and decide admission.
    fn acquire(
        &self,
        key: &RequestKey,
        group: &Arc<str>,
        limits: &ResolvedLimits,
        now: Instant,
    ) -> Result<Decision, RateLimitError>;

    /// Number of keys with live state.
    fn tracked_keys(&self) -> usize;

    fn is_tracked(&self, key: &RequestKey) -> bool;

    /// Drop keys not seen for `idle`. Locked keys are kept. Returns the
    /// number of keys removed.
    fn evict_idle(&self, idle: Duration, now: Instant) -> usize;
}

/// Sustained windows for one (key, group) pair.
#[derive(Debug)]
struct GroupWindows {
    minute: RateWindow,
    hour: RateWindow,
}

impl GroupWindows {
    fn new(now: Instant) -> Self {
        Self {
            minute: RateWindow::new(MINUTE, now),
            hour: RateWindow::new(HOUR, now),
        }
    }
}

/// Every window held for one key.
#[derive(Debug)]
struct KeyState {
    burst: RateWindow,
    locked_until: Option<Instant>,
    groups: HashMap<Arc<str>, GroupWindows>,
    last_seen: Instant,
}

impl KeyState {
    fn new(limits: &ResolvedLimits, now: Instant) -> Self {
        Self {
            burst: RateWindow::new(limits.burst_window, now),
            locked_until: None,
            groups: HashMap::new(),
            last_seen: now,
        }
    }

    fn is_locked(&self, now: Instant) -> bool {
        self.locked_until.is_some_and(|until| now < until)
    }

    fn acquire(
        &mut self,
        group: &Arc<str>,
        limits: &ResolvedLimits,
        now: Instant,
    ) -> Result<Decision, RateLimitError> {
        self.last_seen = now;

        // Lockout
        if let Some(until) = self.locked_until {
            if now < until {
                let wait = until - now;
                return Ok(Decision::denied(
                    Quota {
                        scope: Scope::Burst,
                        limit: limits.burst,
                        remaining: 0,
                        reset_after: wait,
                    },
                    wait,
                ));
            }
            self.locked_until = None;
            self.burst = RateWindow::new(limits.burst_window, now);
        }

        // Burst
        let burst_count = self.burst.hit(now);
        if burst_count > limits.burst {
            let until = now
                .checked_add(limits.lockout)
                .ok_or(RateLimitError::ClockOverflow)?;
            self.locked_until = Some(until);
            return Ok(Decision::denied(
                Quota {
                    scope: Scope::Burst,
                    limit: limits.burst,
                    remaining: 0,
                    reset_after: limits.lockout,
                },
                limits.lockout,
            ));
        }

        let mut tightest = Quota {
            scope: Scope::Burst,
            limit: limits.burst,
            remaining: limits.burst - burst_count,
            reset_after: self.burst.reset_in(now),
        };

        // Sustained: an override's limits replace the global ones.
        let (minute_scope, minute_limit, hour_scope, hour_limit) = match limits.endpoint {
            Some(ep) => (Scope::EndpointMinute, ep.per_minute, Scope::EndpointHour, ep.per_hour),
            None => (Scope::GlobalMinute, limits.per_minute, Scope::GlobalHour, limits.per_hour),
        };
        let windows = self
            .groups
            .entry(group.clone())
            .or_insert_with(|| GroupWindows::new(now));

        let minute_count = windows.minute.hit(now);
        if minute_count > minute_limit {
            // Refused requests do not consume sustained quota.
            windows.minute.unhit();
            return Ok(sustained_denial(minute_scope, minute_limit, &windows.minute, now));
        }

        let hour_count = windows.hour.hit(now);
        if hour_count > hour_limit {
            windows.hour.unhit();
            windows.minute.unhit();
            return Ok(sustained_denial(hour_scope, hour_limit, &windows.hour, now));
        }

        for (scope, limit, count, window) in [
            (minute_scope, minute_limit, minute_count, &windows.minute),
            (hour_scope, hour_limit, hour_count, &windows.hour),
        ] {
            let remaining = limit - count;
            if remaining < tightest.remaining {
                tightest = Quota {
                    scope,
                    limit,
                    remaining,
                    reset_after: window.reset_in(now),
                };
            }
        }

        Ok(Decision::allowed(tightest))
    }
}

fn sustained_denial(scope: Scope, limit: u32, window: &RateWindow, now: Instant) -> Decision {
    let wait = window.reset_in(now);
    Decision::denied(
        Quota {
            scope,
            limit,
            remaining: 0,
            reset_after: wait,
        },
        wait,
    )
}

/// In-process store: one sharded map entry per key, every scope of a key
/// mutated under that entry's lock.
#[derive(Debug, Default)]
pub struct LocalStore {
    keys: DashMap<RequestKey, KeyState>,
}

impl LocalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RateLimitStore for LocalStore {
    fn acquire(
        &self,
        key: &RequestKey,
        group: &Arc<str>,
        limits: &ResolvedLimits,
        now: Instant,
    ) -> Result<Decision, RateLimitError> {
        let mut state = self
            .keys
            .entry(key.clone())
            .or_insert_with(|| KeyState::new(limits, now));
        state.acquire(group, limits, now)
    }

    fn tracked_keys(&self) -> usize {
        self.keys.len()
    }

    fn is_tracked(&self, key: &RequestKey) -> bool {
        self.keys.contains_key(key)
    }

    fn evict_idle(&self, idle: Duration, now: Instant) -> usize {
        let before = self.keys.len();
        self.keys.retain(|_, state| {
            state.is_locked(now) || now.saturating_duration_since(state.last_seen) < idle
        });
        before.saturating_sub(self.keys.len())
    }
}
