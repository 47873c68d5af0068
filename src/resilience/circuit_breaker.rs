//! Circuit breaker for backend protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: backend assumed down, requests fail fast
//! - Half-Open: testing if backend recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive_failures >= threshold
//! Open → Half-Open: after cooldown
//! Half-Open → Closed: probe request succeeds
//! Half-Open → Open: probe request fails
//! ```
//!
//! # Design Decisions
//! - Per-service breaker (not global), created lazily on first request
//! - Fail fast in Open state: a pure in-memory decision, never a timeout wait
//! - Single probe in Half-Open (prevents hammering a recovering backend)
//! - One mutex-guarded holder per service, so a request started after a trip
//!   always observes Open

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::config::BreakerConfig;
use crate::observability::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

/// How [`BreakerRegistry::check`] admitted a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Breaker closed; ordinary request.
    Normal,
    /// This request holds the half-open probe slot. Its outcome must be
    /// recorded, or the slot returned via [`BreakerRegistry::release_probe`]
    /// if it never reaches the backend.
    Probe,
}

/// Mutable per-service bookkeeping. Shared by every concurrent request to
/// the service; all access goes through the owning mutex.
#[derive(Debug)]
struct CircuitState {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

impl CircuitState {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            probe_in_flight: false,
        }
    }
}

/// Owns the breaker state for every service. One instance per process.
pub struct BreakerRegistry {
    states: DashMap<String, Arc<Mutex<CircuitState>>>,
    threshold: u32,
    cooldown: Duration,
}

impl BreakerRegistry {
    pub fn new(config: &BreakerConfig) -> Self {
        Self {
            states: DashMap::new(),
            threshold: config.failure_threshold,
            cooldown: Duration::from_secs(config.cooldown_secs),
        }
    }

    fn state_for(&self, service: &str) -> Arc<Mutex<CircuitState>> {
        self.states
            .entry(service.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(CircuitState::new())))
            .clone()
    }

    /// Gate a request. `Ok` admits it (possibly as the half-open probe);
    /// `Err(retry_after_secs)` short-circuits with the remaining cooldown.
    pub fn check(&self, service: &str) -> Result<Admission, u64> {
        let holder = self.state_for(service);
        let mut state = holder.lock().expect("breaker mutex poisoned");

        match state.state {
            BreakerState::Closed => Ok(Admission::Normal),
            BreakerState::Open => {
                let opened_at = state.opened_at.unwrap_or_else(Instant::now);
                let elapsed = opened_at.elapsed();
                if elapsed >= self.cooldown {
                    state.state = BreakerState::HalfOpen;
                    state.probe_in_flight = true;
                    tracing::info!(service = %service, "Breaker half-open, admitting probe");
                    metrics::record_breaker_transition(service, BreakerState::HalfOpen);
                    Ok(Admission::Probe)
                } else {
                    let remaining = self.cooldown - elapsed;
                    Err(remaining.as_secs().max(1))
                }
            }
            BreakerState::HalfOpen => {
                if state.probe_in_flight {
                    // One probe at a time; competitors keep failing fast.
                    Err(1)
                } else {
                    state.probe_in_flight = true;
                    Ok(Admission::Probe)
                }
            }
        }
    }

    /// Return an unused probe slot. A probe that was admitted but rejected
    /// by a later stage (auth, rate limit, cache hit) never produces a
    /// backend outcome; without this the breaker would sit in HalfOpen
    /// rejecting everything. No-op once an outcome has been recorded.
    pub fn release_probe(&self, service: &str) {
        let holder = self.state_for(service);
        let mut state = holder.lock().expect("breaker mutex poisoned");
        if state.state == BreakerState::HalfOpen && state.probe_in_flight {
            state.probe_in_flight = false;
            tracing::debug!(service = %service, "Probe slot released without a backend outcome");
        }
    }

    /// Record a backend success (status < 500).
    pub fn record_success(&self, service: &str) {
        let holder = self.state_for(service);
        let mut state = holder.lock().expect("breaker mutex poisoned");
        match state.state {
            BreakerState::HalfOpen => {
                state.state = BreakerState::Closed;
                state.consecutive_failures = 0;
                state.opened_at = None;
                state.probe_in_flight = false;
                tracing::info!(service = %service, "Breaker closed after successful probe");
                metrics::record_breaker_transition(service, BreakerState::Closed);
            }
            _ => {
                state.consecutive_failures = 0;
            }
        }
    }

    /// Record a backend failure (transport error or status >= 500).
    pub fn record_failure(&self, service: &str) {
        let holder = self.state_for(service);
        let mut state = holder.lock().expect("breaker mutex poisoned");
        match state.state {
            BreakerState::HalfOpen => {
                state.state = BreakerState::Open;
                state.opened_at = Some(Instant::now());
                state.probe_in_flight = false;
                tracing::warn!(service = %service, "Probe failed, breaker re-opened");
                metrics::record_breaker_transition(service, BreakerState::Open);
            }
            BreakerState::Closed => {
                state.consecutive_failures += 1;
                if state.consecutive_failures >= self.threshold {
                    state.state = BreakerState::Open;
                    state.opened_at = Some(Instant::now());
                    tracing::warn!(
                        service = %service,
                        failures = state.consecutive_failures,
                        "Breaker tripped"
                    );
                    metrics::record_breaker_transition(service, BreakerState::Open);
                }
            }
            BreakerState::Open => {}
        }
    }

    /// Current state, for health/readiness reporting. Services never seen
    /// report Closed.
    pub fn current_state(&self, service: &str) -> BreakerState {
        self.states
            .get(service)
            .map(|holder| holder.lock().expect("breaker mutex poisoned").state)
            .unwrap_or(BreakerState::Closed)
    }

    /// Remaining cooldown for an Open breaker, rounded up, minimum 1s.
    pub fn retry_after_secs(&self, service: &str) -> u64 {
        self.states
            .get(service)
            .and_then(|holder| {
                let state = holder.lock().expect("breaker mutex poisoned");
                state.opened_at.map(|at| {
                    self.cooldown
                        .saturating_sub(at.elapsed())
                        .as_secs()
                        .max(1)
                })
            })
            .unwrap_or(1)
    }
}
