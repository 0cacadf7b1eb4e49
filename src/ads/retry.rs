//! Retry policy for ads API requests, kept free of any transport so it can
//! be tested on its own.

use reqwest::StatusCode;
use std::time::Duration;

/// What one attempt produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// The request never produced a response (connect, timeout, reset).
    Transport,
    Status(StatusCode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    Fail,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: vec![
                Duration::from_millis(500),
                Duration::from_secs(2),
                Duration::from_secs(5),
            ],
        }
    }
}

impl RetryPolicy {
    /// A policy with its own schedule. The last delay repeats when there are
    /// more attempts than delays.
    pub fn new(max_attempts: u32, backoff: Vec<Duration>) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decides what follows attempt number `attempt` (1-based).
    pub fn should_retry(&self, observation: Observation, attempt: u32) -> RetryDecision {
        if !is_retryable(observation) || attempt >= self.max_attempts {
            return RetryDecision::Fail;
        }

        let index = (attempt.saturating_sub(1) as usize).min(self.backoff.len().saturating_sub(1));
        let delay = self.backoff.get(index).copied().unwrap_or_default();
        RetryDecision::RetryAfter(delay)
    }
}

/// Transport failures, 5xx and 429 are transient. Everything else,
/// notably 401, is terminal.
pub fn is_retryable(observation: Observation) -> bool {
    match observation {
        Observation::Transport => true,
        Observation::Status(status) => {
            status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
        }
    }
}
