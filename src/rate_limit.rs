//! Per-operation command rate limiting

use crate::clock::seconds_between;
use chrono::{DateTime, Utc};
use std::fmt;

/// Soft refusal returned by a [`RateLimiter`]
///
/// Not an error: callers turn it into a warning or a failed-but-expected
/// outcome and try again on a later cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimited {
    pub operation: &'static str,
    pub elapsed_secs: f64,
    pub remaining_secs: f64,
}

impl fmt::Display for RateLimited {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Rate limited: last {} {:.0}s ago (retry in {:.0}s)",
            self.operation, self.elapsed_secs, self.remaining_secs
        )
    }
}

/// Minimum spacing between attempts of one operation
#[derive(Debug, Clone)]
pub struct RateLimiter {
    operation: &'static str,
    interval_secs: f64,
    last_attempt: Option<DateTime<Utc>>,
}

impl RateLimiter {
    pub fn new(operation: &'static str, interval_secs: u64) -> Self {
        Self {
            operation,
            interval_secs: interval_secs as f64,
            last_attempt: None,
        }
    }

    /// Whether an attempt at `now` would be allowed, without recording it
    fn check(&self, now: DateTime<Utc>) -> Result<(), RateLimited> {
        let Some(last) = self.last_attempt else {
            return Ok(());
        };
        let elapsed = seconds_between(last, now);
        // A clock that went backwards does not block forever
        if elapsed < 0.0 || elapsed >= self.interval_secs {
            return Ok(());
        }
        Err(RateLimited {
            operation: self.operation,
            elapsed_secs: elapsed,
            remaining_secs: self.interval_secs - elapsed,
        })
    }

    /// Check and, when allowed, record the attempt
    pub fn try_acquire(&mut self, now: DateTime<Utc>) -> Result<(), RateLimited> {
        self.check(now)?;
        self.last_attempt = Some(now);
        Ok(())
    }
}
