//! Circuit breaker for upstream protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: upstream assumed down, requests fail fast
//! - Half-Open: one trial request is testing recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive_failures >= threshold
//! Open → Half-Open: first caller after cool-down (becomes the trial)
//! Half-Open → Closed: trial succeeds
//! Half-Open → Open: trial fails (full cool-down restarts)
//! ```
//!
//! # Design Decisions
//! - Per endpoint group breaker, records created on first outcome
//! - Every transition happens under the group's map entry lock, so at most
//!   one trial is admitted per half-open window
//! - A success while Closed resets the failure count to zero
//! - Late outcomes of non-trial calls while Open/Half-Open are ignored

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;

use crate::clock::SharedClock;
use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Breaker tuning, fixed at startup.
#[derive(Debug, Clone)]
pub struct CircuitPolicy {
    pub failure_threshold: u32,
    pub cool_down: Duration,
}

impl From<&CircuitBreakerConfig> for CircuitPolicy {
    fn from(config: &CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            cool_down: Duration::from_secs(config.cool_down_secs),
        }
    }
}

#[derive(Debug)]
struct CircuitRecord {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

impl CircuitRecord {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
        }
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
    }
}

/// How a call was let through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Trial,
}

/// Returned when a group's circuit refuses a call.
#[derive(Debug, Clone, Error)]
#[error("circuit open for group '{group}'")]
pub struct CircuitOpen {
    pub group: Arc<str>,
    pub retry_after: Duration,
}

/// Point-in-time view of one group's breaker.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub group: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub open_for_secs: Option<u64>,
}

/// Per endpoint group circuit breakers.
#[derive(Debug)]
pub struct CircuitBreaker {
    records: DashMap<Arc<str>, CircuitRecord>,
    policy: CircuitPolicy,
    clock: SharedClock,
}

impl CircuitBreaker {
    pub fn new(policy: CircuitPolicy, clock: SharedClock) -> Self {
        Self {
            records: DashMap::new(),
            policy,
            clock,
        }
    }

    /// Whether a call to `group` may proceed now.
    ///
    /// When the cool-down has elapsed this call itself becomes the half-open
    /// trial; the caller is expected to report its outcome.
    pub fn may_proceed(&self, group: &str) -> bool {
        self.admit(group).is_some()
    }

    /// Admit a call and hand back a permit that reports its outcome.
    ///
    /// Dropping the permit without calling [`CircuitPermit::record`] counts as
    /// a failure, which is how cancelled calls are accounted for.
    pub fn acquire(self: &Arc<Self>, group: &str) -> Result<CircuitPermit, CircuitOpen> {
        match self.admit(group) {
            Some(admission) => Ok(CircuitPermit {
                breaker: self.clone(),
                group: Arc::from(group),
                admission,
                settled: false,
            }),
            None => Err(CircuitOpen {
                group: Arc::from(group),
                retry_after: self.retry_after(group),
            }),
        }
    }

    /// Report the outcome of a call to `group`.
    pub fn record_outcome(&self, group: &str, success: bool) {
        self.record(group, success, Admission::Trial);
    }

    /// Current state of a group; unseen groups are Closed.
    pub fn state(&self, group: &str) -> CircuitState {
        self.records
            .get(group)
            .map(|r| r.state)
            .unwrap_or(CircuitState::Closed)
    }

    pub fn consecutive_failures(&self, group: &str) -> u32 {
        self.records
            .get(group)
            .map(|r| r.consecutive_failures)
            .unwrap_or(0)
    }

    /// How long a refused caller should wait before trying again.
    pub fn retry_after(&self, group: &str) -> Duration {
        let Some(record) = self.records.get(group) else {
            return Duration::ZERO;
        };
        match (record.state, record.opened_at) {
            (CircuitState::Open, Some(opened_at)) => self
                .policy
                .cool_down
                .saturating_sub(self.clock.now().saturating_duration_since(opened_at)),
            (CircuitState::HalfOpen, _) => Duration::from_secs(1),
            _ => Duration::ZERO,
        }
    }

    pub fn snapshot(&self) -> Vec<CircuitSnapshot> {
        let now = self.clock.now();
        let mut out: Vec<CircuitSnapshot> = self
            .records
            .iter()
            .map(|r| CircuitSnapshot {
                group: r.key().to_string(),
                state: r.state,
                consecutive_failures: r.consecutive_failures,
                open_for_secs: match r.state {
                    CircuitState::Closed => None,
                    _ => r
                        .opened_at
                        .map(|t| now.saturating_duration_since(t).as_secs()),
                },
            })
            .collect();
        out.sort_by(|a, b| a.group.cmp(&b.group));
        out
    }

    fn admit(&self, group: &str) -> Option<Admission> {
        let Some(mut record) = self.records.get_mut(group) else {
            return Some(Admission::Normal);
        };

        match record.state {
            CircuitState::Closed => Some(Admission::Normal),
            CircuitState::HalfOpen => None,
            CircuitState::Open => {
                let now = self.clock.now();
                let cooled = record
                    .opened_at
                    .map(|t| now.saturating_duration_since(t) >= self.policy.cool_down)
                    .unwrap_or(true);
                if !cooled {
                    return None;
                }
                record.state = CircuitState::HalfOpen;
                drop(record);
                self.on_transition(group, CircuitState::HalfOpen);
                Some(Admission::Trial)
            }
        }
    }

    fn record(&self, group: &str, success: bool, admission: Admission) {
        let now = self.clock.now();
        let transition = {
            let mut record = match self.records.get_mut(group) {
                Some(record) => record,
                None => self
                    .records
                    .entry(Arc::from(group))
                    .or_insert_with(CircuitRecord::closed),
            };

            match (record.state, success, admission) {
                (CircuitState::Closed, true, _) => {
                    record.consecutive_failures = 0;
                    None
                }
                (CircuitState::Closed, false, _) => {
                    record.consecutive_failures = record.consecutive_failures.saturating_add(1);
                    if record.consecutive_failures >= self.policy.failure_threshold {
                        record.open(now);
                        Some(CircuitState::Open)
                    } else {
                        None
                    }
                }
                (CircuitState::HalfOpen, true, Admission::Trial) => {
                    *record = CircuitRecord::closed();
                    Some(CircuitState::Closed)
                }
                (CircuitState::HalfOpen, false, Admission::Trial) => {
                    record.open(now);
                    Some(CircuitState::Open)
                }
                (CircuitState::HalfOpen, _, Admission::Normal) | (CircuitState::Open, _, _) => None,
            }
        };

        if let Some(state) = transition {
            self.on_transition(group, state);
        }
    }

    fn return_trial(&self, group: &str) {
        if let Some(mut record) = self.records.get_mut(group) {
            if record.state == CircuitState::HalfOpen {
                record.state = CircuitState::Open;
                tracing::debug!(group = %group, "Trial request released unused");
            }
        }
    }

    fn on_transition(&self, group: &str, state: CircuitState) {
        match state {
            CircuitState::Open => tracing::warn!(
                group = %group,
                cool_down_secs = self.policy.cool_down.as_secs(),
                "Circuit opened"
            ),
            CircuitState::HalfOpen => tracing::info!(group = %group, "Circuit half-open, admitting trial request"),
            CircuitState::Closed => tracing::info!(group = %group, "Circuit closed"),
        }
        metrics::record_circuit_transition(group, state.as_str());
    }
}

/// RAII handle for one admitted call.
#[derive(Debug)]
#[must_use = "dropping a permit records a failure"]
pub struct CircuitPermit {
    breaker: Arc<CircuitBreaker>,
    group: Arc<str>,
    admission: Admission,
    settled: bool,
}

impl CircuitPermit {
    /// Whether this call is the half-open trial.
    pub fn is_trial(&self) -> bool {
        self.admission == Admission::Trial
    }

    pub fn record(mut self, success: bool) {
        self.settled = true;
        self.breaker.record(&self.group, success, self.admission);
    }

    /// Give the permit back without an outcome, for calls refused before
    /// reaching the upstream. A released trial returns the circuit to Open
    /// with its cool-down already elapsed, so the next caller becomes the
    /// trial.
    pub fn release(mut self) {
        self.settled = true;
        if self.admission == Admission::Trial {
            self.breaker.return_trial(&self.group);
        }
    }
}

impl Drop for CircuitPermit {
    fn drop(&mut self) {
        if !self.settled {
            tracing::debug!(group = %self.group, "Call abandoned before completion, recording failure");
            self.breaker.record(&self.group, false, self.admission);
        }
    }
}
