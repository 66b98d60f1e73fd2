//! Circuit breaker guarding upstream model endpoints

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    /// One trial call is allowed through to test recovery
    HalfOpen,
}

#[derive(Debug, Clone)]
struct BreakerEntry {
    state: BreakerState,
    consecutive_failures: usize,
    opened_at: Option<Instant>,
}

impl BreakerEntry {
    fn closed() -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            opened_at: None,
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: usize,
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// Per-operation circuit breaker
pub struct CircuitBreaker {
    breakers: Mutex<HashMap<String, BreakerEntry>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: Mutex::new(HashMap::new()),
            config,
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, BreakerEntry>> {
        self.breakers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether calls for `operation` must be rejected right now.
    ///
    /// An open breaker whose reset timeout elapsed moves to half-open and
    /// admits exactly one caller; later callers see it as open until that
    /// trial reports back. A trial that never reports (its future was
    /// dropped) is replaced by a new one after another reset timeout.
    pub fn is_open(&self, operation: &str) -> bool {
        let mut breakers = self.entries();
        let entry = breakers
            .entry(operation.to_string())
            .or_insert_with(BreakerEntry::closed);

        if entry.state == BreakerState::Closed {
            return false;
        }

        let cooled = entry
            .opened_at
            .map_or(true, |since| since.elapsed() >= self.config.reset_timeout);
        if cooled {
            entry.state = BreakerState::HalfOpen;
            entry.opened_at = Some(Instant::now());
            false
        } else {
            true
        }
    }

    pub fn mark_success(&self, operation: &str) {
        let mut breakers = self.entries();
        breakers.insert(operation.to_string(), BreakerEntry::closed());
    }

    pub fn mark_failure(&self, operation: &str) {
        let mut breakers = self.entries();
        let entry = breakers
            .entry(operation.to_string())
            .or_insert_with(BreakerEntry::closed);

        let now = Instant::now();
        entry.consecutive_failures += 1;

        // A failed trial reopens immediately
        if entry.state == BreakerState::HalfOpen
            || entry.consecutive_failures >= self.config.failure_threshold
        {
            entry.state = BreakerState::Open;
            entry.opened_at = Some(now);
        }
    }

    pub fn state(&self, operation: &str) -> BreakerState {
        self.entries()
            .get(operation)
            .map(|e| e.state)
            .unwrap_or(BreakerState::Closed)
    }
}
