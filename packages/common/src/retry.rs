use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// A single failed attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryAttempt {
    /// 1-based attempt number.
    pub attempt: u8,
    /// Error message from the failed attempt.
    pub error: String,
    /// When this attempt occurred.
    pub timestamp: DateTime<Utc>,
}

impl RetryAttempt {
    pub fn new(attempt: u8, error: impl Into<String>) -> Self {
        Self {
            attempt,
            error: error.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Result of recording a failure in the [`RetryTracker`].
#[derive(Debug, Clone)]
pub enum RetryDecision {
    Retry {
        attempt: u8,
        history: Vec<RetryAttempt>,
    },
    Exhausted { history: Vec<RetryAttempt> },
}

#[derive(Debug, Clone)]
struct RetryState {
    attempt: u8,
    history: Vec<RetryAttempt>,
    last_updated: Instant,
}

impl RetryState {
    fn new() -> Self {
        Self {
            attempt: 0,
            history: Vec::new(),
            last_updated: Instant::now(),
        }
    }
}

/// Counts failures per key until a budget is exhausted.
#[derive(Debug)]
pub struct RetryTracker<K = String> {
    state: HashMap<K, RetryState>,
    max_retries: u8,
}

impl<K: Eq + Hash + Clone> RetryTracker<K> {
    /// Create a new tracker with the specified max retries.
    pub fn new(max_retries: u8) -> Self {
        Self {
            state: HashMap::new(),
            max_retries,
        }
    }

    /// Record a failure for `key`.
    ///
    /// Exhaustion forgets the key, so a later failure starts a fresh budget.
    pub fn record_failure(&mut self, key: &K, error: &str) -> RetryDecision {
        let retry_state = self
            .state
            .entry(key.clone())
            .or_insert_with(RetryState::new);

        retry_state.attempt = retry_state.attempt.saturating_add(1);
        retry_state.last_updated = Instant::now();
        retry_state
            .history
            .push(RetryAttempt::new(retry_state.attempt, error));

        if retry_state.attempt <= self.max_retries {
            RetryDecision::Retry {
                attempt: retry_state.attempt,
                history: retry_state.history.clone(),
            }
        } else {
            let history = retry_state.history.clone();
            self.state.remove(key);
            RetryDecision::Exhausted { history }
        }
    }

    pub fn clear(&mut self, key: &K) {
        self.state.remove(key);
    }

    /// Current failure count for `key`.
    pub fn get_attempt(&self, key: &K) -> u8 {
        self.state.get(key).map(|s| s.attempt).unwrap_or(0)
    }

    /// Remove entries that haven't been updated within `max_age`.
    pub fn cleanup_stale(&mut self, max_age: Duration) -> usize {
        let now = Instant::now();
        let before = self.state.len();
        self.state
            .retain(|_, state| now.duration_since(state.last_updated) < max_age);
        before - self.state.len()
    }

    pub fn len(&self) -> usize {
        self.state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }
}

/// Calculate exponential backoff delay with jitter.
///
/// Formula: `min(base_ms * 2^(attempt-1) + jitter, max_ms)` (0-25% jitter)
pub fn calculate_backoff(attempt: u8, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exp_factor = 2u64.saturating_pow((attempt - 1) as u32);
    let delay_ms = base_ms.saturating_mul(exp_factor);

    let jitter = if delay_ms > 0 {
        rand::rng().random_range(0..=delay_ms / 4)
    } else {
        0
    };

    let total_delay = delay_ms.saturating_add(jitter).min(max_ms);
    Duration::from_millis(total_delay)
}
