use std::time::Duration;

/// Decision returned by the backoff policy after a transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffDecision {
    /// Resubmit once the given delay has elapsed.
    RetryAfter(Duration),
    /// The next delay would reach the ceiling; the transfer must fail.
    Exhausted(Duration),
}

/// Exponential backoff with multiplicative jitter and a hard ceiling.
///
/// The first delay is based on `initial`; every later one on the previous
/// delay times `scale_factor`. The base is then multiplied by `1 + jitter`
/// with `jitter` uniform on `[0, 1)`, so consecutive delays grow by a factor
/// in `[scale_factor, 2 * scale_factor)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Base of the first delay.
    pub initial: Duration,
    /// Growth factor between consecutive delays (must be > 1).
    pub scale_factor: f64,
    /// A computed delay at or above this fails the transfer instead of waiting.
    pub max_before_fail: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            scale_factor: 2.0,
            max_before_fail: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    /// Un-jittered delay following `prior` (`None` = no failure yet). A
    /// later delay is always at least 1ns longer than `prior`.
    pub fn base_delay(&self, prior: Option<Duration>) -> Duration {
        match prior {
            None => self.initial,
            Some(prior) => {
                let scaled = scale(prior, self.scale_factor);
                scaled.max(prior.saturating_add(Duration::from_nanos(1)))
            }
        }
    }

    /// Next delay for a transfer whose current backoff is `prior`: the base
    /// delay `b` plus `floor(b * jitter)`, always inside `[b, 2b)`.
    ///
    /// `jitter` is clamped into `[0, 1]`; a non-finite jitter counts as 0.
    pub fn next_backoff(&self, prior: Option<Duration>, jitter: f64) -> Duration {
        let jitter = if jitter.is_finite() {
            jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let base = duration_nanos(self.base_delay(prior));
        let extra = ((base as f64) * jitter).floor() as u64;
        Duration::from_nanos(base.saturating_add(extra.min(base.saturating_sub(1))))
    }

    /// Compute the next delay and check it against the ceiling.
    pub fn decide(&self, prior: Option<Duration>, jitter: f64) -> BackoffDecision {
        let next = self.next_backoff(prior, jitter);
        if next >= self.max_before_fail {
            BackoffDecision::Exhausted(next)
        } else {
            BackoffDecision::RetryAfter(next)
        }
    }

    /// Upper bound on retries one transfer can get before the ceiling is hit.
    ///
    /// Jitter only ever lengthens a delay, so the un-jittered sequence
    /// `initial * scale_factor^k` is the slowest possible growth.
    pub fn max_retries(&self) -> u32 {
        if self.scale_factor <= 1.0 || self.initial.is_zero() {
            return u32::MAX;
        }
        let mut delay = self.initial;
        let mut retries = 0u32;
        while delay < self.max_before_fail {
            retries += 1;
            delay = self.base_delay(Some(delay));
        }
        retries
    }
}

fn duration_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

/// `d * factor`, rounded down to whole nanoseconds and saturating.
fn scale(d: Duration, factor: f64) -> Duration {
    // Float-to-int `as` saturates and maps NaN to 0.
    Duration::from_nanos((duration_nanos(d) as f64 * factor).floor() as u64)
}
