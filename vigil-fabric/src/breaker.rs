//! Circuit breaker guarding the publish path.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CircuitState {
    Closed,
    HalfOpen,
    Open,
}

struct Inner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
}

/// Trips open after `threshold` consecutive failures; after `timeout` a
/// half-open probe window admits requests until `recovery_threshold`
/// consecutive successes close it again.
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    threshold: u32,
    timeout: Duration,
    recovery_threshold: u32,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, timeout: Duration, recovery_threshold: u32) -> CircuitBreaker {
        CircuitBreaker {
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure: None,
            }),
            threshold,
            timeout,
            recovery_threshold,
        }
    }

    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => inner.success_count < self.recovery_threshold,
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed > self.timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.success_count = 0;
                    inner.failure_count = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count += 1;
        inner.last_failure = Some(Instant::now());
        if inner.failure_count >= self.threshold {
            inner.state = CircuitState::Open;
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.success_count += 1;
        inner.failure_count = 0;
        if inner.state == CircuitState::HalfOpen && inner.success_count >= self.recovery_threshold {
            inner.state = CircuitState::Closed;
        }
    }

    pub fn state_name(&self) -> &'static str {
        match self.inner.lock().state {
            CircuitState::Closed => "closed",
            CircuitState::HalfOpen => "half-open",
            CircuitState::Open => "open",
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> CircuitBreaker {
        CircuitBreaker::new(5, Duration::from_secs(30), 3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trips_after_threshold_failures() {
        let cb = CircuitBreaker::new(3, Duration::from_secs(30), 2);
        assert!(cb.allow_request());
        cb.record_failure();
        cb.record_failure();
        assert!(cb.allow_request());
        cb.record_failure();
        assert_eq!(cb.state_name(), "open");
        assert!(!cb.allow_request());
    }

    #[test]
    fn test_half_open_after_timeout_then_closes() {
        let cb = CircuitBreaker::new(1, Duration::from_millis(0), 2);
        cb.record_failure();
        assert_eq!(cb.state_name(), "open");
        // Zero timeout: next check transitions to half-open.
        std::thread::sleep(Duration::from_millis(5));
        assert!(cb.allow_request());
        assert_eq!(cb.state_name(), "half-open");
        cb.record_success();
        cb.record_success();
        assert_eq!(cb.state_name(), "closed");
    }

    #[test]
    fn test_success_resets_failure_streak() {
        let cb = CircuitBreaker::new(3, Duration::from_secs(30), 1);
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state_name(), "closed");
    }
}
