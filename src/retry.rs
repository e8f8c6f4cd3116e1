use std::time::Duration;

/// Decision returned by the retry budget after a faulted session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Budget remains: wait `delay`, then start the next session (1-based attempt number).
    Retry { attempt: u32, delay: Duration },
    /// The fault just recorded used up the budget.
    Exhausted { attempts: u32 },
}

/// Failure budget for faulted sessions.
///
/// Only faults are recorded here. Change-triggered restarts never touch
/// the budget, so they are free and unbounded.
#[derive(Debug, Clone)]
pub struct RetryBudget {
    attempts: u32,
    limit: u32,
    delay: Duration,
}

impl RetryBudget {
    /// Create a new budget allowing `limit` faulted restarts.
    pub fn new(limit: u32, delay: Duration) -> Self {
        Self {
            attempts: 0,
            limit,
            delay,
        }
    }

    /// Record one fault and decide what to do next.
    ///
    /// The budget is exhausted once `attempts` exceeds `limit`, so `limit`
    /// faults are retried and fault `limit + 1` stops the supervisor.
    pub fn record_fault(&mut self) -> RetryDecision {
        self.attempts = self.attempts.saturating_add(1);

        if self.is_exhausted() {
            RetryDecision::Exhausted {
                attempts: self.attempts,
            }
        } else {
            RetryDecision::Retry {
                attempt: self.attempts,
                delay: self.delay,
            }
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts > self.limit
    }

    #[allow(dead_code)]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    #[allow(dead_code)]
    pub fn limit(&self) -> u32 {
        self.limit
    }
}
