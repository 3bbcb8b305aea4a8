//! Fixed rate windows and the scopes they are kept for.

use std::time::{Duration, Instant};

pub const MINUTE: Duration = Duration::from_secs(60);
pub const HOUR: Duration = Duration::from_secs(3600);

/// Dimension a window counts requests in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Per key and group, against the global (or identified tier) limit.
    GlobalMinute,
    GlobalHour,
    /// Per key and group, against the group's override limit.
    EndpointMinute,
    EndpointHour,
    /// Short window that triggers lockout.
    Burst,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::GlobalMinute => "global_minute",
            Scope::GlobalHour => "global_hour",
            Scope::EndpointMinute => "endpoint_minute",
            Scope::EndpointHour => "endpoint_hour",
            Scope::Burst => "burst",
        }
    }
}

/// A fixed counting window, reset lazily by the access that finds it stale.
#[derive(Debug, Clone)]
pub struct RateWindow {
    count: u32,
    window_start: Instant,
    length: Duration,
}

impl RateWindow {
    pub fn new(length: Duration, now: Instant) -> Self {
        Self {
            count: 0,
            window_start: now,
            length,
        }
    }

    pub fn is_stale(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.window_start) >= self.length
    }

    /// Count one request and return the post-increment count. A stale window
    /// restarts at `now` as part of the same operation.
    pub fn hit(&mut self, now: Instant) -> u32 {
        if self.is_stale(now) {
            self.count = 0;
            self.window_start = now;
        }
        self.count = self.count.saturating_add(1);
        self.count
    }

    /// Undo the last [`hit`](Self::hit) for a request that was refused.
    pub fn unhit(&mut self) {
        self.count = self.count.saturating_sub(1);
    }

    pub fn count(&self, now: Instant) -> u32 {
        if self.is_stale(now) {
            0
        } else {
            self.count
        }
    }

    /// Time until this window rolls over.
    pub fn reset_in(&self, now: Instant) -> Duration {
        self.length
            .saturating_sub(now.saturating_duration_since(self.window_start))
    }
}
