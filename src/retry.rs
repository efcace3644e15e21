//! Retry policy for single projections, with exponential backoff.
//!
//! The default policy does one attempt only: a failed write is logged and the consumer moves
//! on.  Ids which still fail after all attempts end up in [DeadLetters].
use crate::Result;
use backoff::backoff::Backoff;
use backoff::{Error as BackoffError, ExponentialBackoff};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::warn;

/// Default capacity of [DeadLetters].
pub const DEAD_LETTER_CAPACITY: usize = 1000;

/// How failed projections are retried.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::none()
    }
}

impl RetryPolicy {
    /// Single attempt, no retry.
    pub fn none() -> Self {
        RetryPolicy {
            max_attempts: 1,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }

    pub fn exponential(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            initial_delay,
            max_delay,
            multiplier: 2.0,
        }
    }

    fn to_backoff(&self) -> ExponentialBackoff {
        let mut backoff = ExponentialBackoff {
            current_interval: self.initial_delay,
            initial_interval: self.initial_delay,
            randomization_factor: 0.0,
            multiplier: self.multiplier,
            max_interval: self.max_delay,
            max_elapsed_time: None,
            ..Default::default()
        };
        backoff.reset();
        backoff
    }

    /// Run `op` until it succeeds or attempts are used up, returns the last error then.
    pub fn run<T, F>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let mut attempt = 0;
        let result = backoff::retry(self.to_backoff(), || {
            attempt += 1;
            op().map_err(|err| {
                if attempt >= self.max_attempts {
                    BackoffError::permanent(err)
                } else {
                    warn!(%what, attempt, ?err, "Attempt failed, will retry");
                    BackoffError::transient(err)
                }
            })
        });
        result.map_err(|err| match err {
            BackoffError::Permanent(e) => e,
            BackoffError::Transient { err, .. } => err,
        })
    }
}

/// Bounded list of ids whose projection failed for good, oldest ids are evicted first.
#[derive(Debug, Clone)]
pub struct DeadLetters {
    ids: VecDeque<String>,
    capacity: usize,
}

impl Default for DeadLetters {
    fn default() -> Self {
        DeadLetters::with_capacity(DEAD_LETTER_CAPACITY)
    }
}

impl DeadLetters {
    pub fn with_capacity(capacity: usize) -> Self {
        DeadLetters {
            ids: VecDeque::with_capacity(capacity.min(DEAD_LETTER_CAPACITY)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, id: String) {
        if self.ids.len() == self.capacity {
            self.ids.pop_front();
        }
        self.ids.push_back(id);
    }

    pub fn ids(&self) -> Vec<String> {
        self.ids.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Take all ids out, e.g. to feed a re-backfill.
    pub fn drain(&mut self) -> Vec<String> {
        self.ids.drain(..).collect()
    }
}

impl From<&crate::config::DetailSyncConf> for RetryPolicy {
    fn from(conf: &crate::config::DetailSyncConf) -> Self {
        RetryPolicy::exponential(
            conf.retry_attempts(),
            conf.retry_initial_delay(),
            conf.retry_max_delay(),
        )
    }
}
