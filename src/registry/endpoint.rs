//! Endpoints and their circuit breakers.
//!
//! An endpoint is one `(node, action)` pair the registry can hand to the
//! call pipeline. Each endpoint owns a lock-free breaker: an atomic state
//! byte, a failure counter, and the open timestamp. Per-endpoint atomics are
//! the only synchronization; there is no registry-wide breaker lock.

use crate::clock::Clock;
use crate::service::ActionHandler;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

pub struct CircuitBreaker {
    state: AtomicU8,
    failure_count: AtomicU32,
    opened_at_millis: AtomicU64,
    max_failures: u32,
    half_open_time_ms: u64,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    pub fn new(max_failures: u32, half_open_time: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: AtomicU8::new(STATE_CLOSED),
            failure_count: AtomicU32::new(0),
            opened_at_millis: AtomicU64::new(0),
            max_failures,
            half_open_time_ms: half_open_time.as_millis() as u64,
            clock,
        }
    }

    /// Effective state. An open breaker past its half-open delay reads as
    /// `HalfOpen`; the actual transition happens in [`Self::try_probe`].
    pub fn state(&self) -> CircuitState {
        match self.state.load(Ordering::Acquire) {
            STATE_OPEN => {
                let opened_at = self.opened_at_millis.load(Ordering::Acquire);
                let elapsed = self.clock.now_millis().saturating_sub(opened_at);
                if elapsed >= self.half_open_time_ms {
                    CircuitState::HalfOpen
                } else {
                    CircuitState::Open
                }
            }
            STATE_HALF_OPEN => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::Acquire)
    }

    /// Commit the Open → HalfOpen transition for a recovery probe. Returns
    /// true when this or a racing caller moved the breaker to half-open.
    pub fn try_probe(&self) -> bool {
        loop {
            match self.state.load(Ordering::Acquire) {
                STATE_HALF_OPEN => return true,
                STATE_CLOSED => return false,
                STATE_OPEN => {
                    let opened_at = self.opened_at_millis.load(Ordering::Acquire);
                    let elapsed = self.clock.now_millis().saturating_sub(opened_at);
                    if elapsed < self.half_open_time_ms {
                        return false;
                    }
                    match self.state.compare_exchange(
                        STATE_OPEN,
                        STATE_HALF_OPEN,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => {
                            tracing::info!("circuit breaker → half-open");
                            return true;
                        }
                        Err(_) => continue,
                    }
                }
                _ => return false,
            }
        }
    }

    /// Record a successful call: close a half-open breaker, reset the
    /// failure counter.
    pub fn success(&self) {
        match self.state.load(Ordering::Acquire) {
            STATE_HALF_OPEN => {
                if self
                    .state
                    .compare_exchange(
                        STATE_HALF_OPEN,
                        STATE_CLOSED,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    self.failure_count.store(0, Ordering::Release);
                    self.opened_at_millis.store(0, Ordering::Release);
                    tracing::info!("circuit breaker → closed");
                }
            }
            STATE_CLOSED => {
                self.failure_count.store(0, Ordering::Release);
            }
            _ => {}
        }
    }

    /// Record a counted failure: open a half-open breaker immediately, open
    /// a closed one once the counter reaches the threshold.
    pub fn failure(&self) {
        let failures = self.failure_count.fetch_add(1, Ordering::AcqRel) + 1;
        match self.state.load(Ordering::Acquire) {
            STATE_HALF_OPEN => {
                if self
                    .state
                    .compare_exchange(
                        STATE_HALF_OPEN,
                        STATE_OPEN,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    self.opened_at_millis.store(self.clock.now_millis(), Ordering::Release);
                    tracing::warn!(failures, "circuit breaker: probe failed → open");
                }
            }
            STATE_CLOSED => {
                if failures >= self.max_failures
                    && self
                        .state
                        .compare_exchange(
                            STATE_CLOSED,
                            STATE_OPEN,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                {
                    self.opened_at_millis.store(self.clock.now_millis(), Ordering::Release);
                    tracing::error!(
                        failures,
                        threshold = self.max_failures,
                        "circuit breaker → open"
                    );
                }
            }
            _ => {}
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("state", &self.state())
            .field("failures", &self.failure_count())
            .finish()
    }
}

/// One `(node, action)` pair selectable by the registry.
pub struct Endpoint {
    pub node_id: String,
    pub action: String,
    pub local: bool,
    /// Cacheable flag carried from the action definition.
    pub cache: bool,
    /// Wrapped handler; present only on the hosting node.
    pub handler: Option<ActionHandler>,
    pub breaker: CircuitBreaker,
}

impl Endpoint {
    pub fn is_local(&self) -> bool {
        self.local
    }

    /// Selectable means the breaker does not read Open (half-open probes are
    /// admitted).
    pub fn is_selectable(&self) -> bool {
        self.breaker.state() != CircuitState::Open
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("node_id", &self.node_id)
            .field("action", &self.action)
            .field("local", &self.local)
            .field("state", &self.breaker.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn breaker(max_failures: u32, half_open_ms: u64) -> (CircuitBreaker, ManualClock) {
        let clock = ManualClock::new();
        let cb = CircuitBreaker::new(
            max_failures,
            Duration::from_millis(half_open_ms),
            Arc::new(clock.clone()),
        );
        (cb, clock)
    }

    #[test]
    fn opens_after_threshold_failures() {
        let (cb, _clock) = breaker(2, 1000);
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn success_in_closed_state_resets_counter() {
        let (cb, _clock) = breaker(3, 1000);
        cb.failure();
        cb.failure();
        cb.success();
        cb.failure();
        cb.failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn open_reads_half_open_after_delay() {
        let (cb, clock) = breaker(1, 500);
        cb.failure();
        assert_eq!(cb.state(), CircuitState::Open);
        clock.advance(499);
        assert_eq!(cb.state(), CircuitState::Open);
        clock.advance(1);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn probe_commits_half_open_then_success_closes() {
        let (cb, clock) = breaker(1, 500);
        cb.failure();
        assert!(!cb.try_probe());
        clock.advance(500);
        assert!(cb.try_probe());
        cb.success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn half_open_failure_reopens() {
        let (cb, clock) = breaker(1, 500);
        cb.failure();
        clock.advance(500);
        assert!(cb.try_probe());
        cb.failure();
        assert_eq!(cb.state(), CircuitState::Open);
        // the open window restarts from the failed probe
        clock.advance(499);
        assert_eq!(cb.state(), CircuitState::Open);
        clock.advance(1);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }
}
