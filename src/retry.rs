//! Exponential-backoff retry around remote calls.
//!
//! Each call site builds its own `ExponentialBackoff` from the shared
//! `BackoffPolicy`, so one slow part never stretches the delays of another.
use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::signal::Done;

/// Timing parameters for retries. Defaults: 1s initial delay, x1.5 growth,
/// ±50% jitter, 60s cap, give up after 15 minutes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    #[serde(with = "millis")]
    pub initial_interval: Duration,
    pub multiplier: f64,
    pub randomization_factor: f64,
    #[serde(with = "millis")]
    pub max_interval: Duration,
    /// Zero disables the deadline.
    #[serde(with = "millis")]
    pub max_elapsed_time: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(1000),
            multiplier: 1.5,
            randomization_factor: 0.5,
            max_interval: Duration::from_secs(60),
            max_elapsed_time: Duration::from_secs(15 * 60),
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// Per-call-site backoff timer.
#[derive(Debug)]
pub struct ExponentialBackoff {
    policy: BackoffPolicy,
    current: Duration,
    started: Instant,
}

impl ExponentialBackoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy, current: policy.initial_interval, started: Instant::now() }
    }

    /// Delay before the next attempt, or `None` once the elapsed-time budget is spent.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        let limit = self.policy.max_elapsed_time;
        if !limit.is_zero() && self.started.elapsed() > limit {
            return None;
        }
        let delay = jitter(self.current, self.policy.randomization_factor);
        let grown = self.current.as_secs_f64() * self.policy.multiplier;
        self.current = if grown >= self.policy.max_interval.as_secs_f64() {
            self.policy.max_interval
        } else {
            Duration::from_secs_f64(grown)
        };
        Some(delay)
    }
}

fn jitter(interval: Duration, factor: f64) -> Duration {
    if factor <= 0.0 || interval.is_zero() {
        return interval;
    }
    let base = interval.as_secs_f64();
    let delta = base * factor.min(1.0);
    let secs = rand::thread_rng().gen_range((base - delta)..=(base + delta));
    Duration::from_secs_f64(secs.max(0.0))
}

/// Why a retried operation did not succeed.
#[derive(Debug)]
pub enum RetryError<E> {
    /// The predicate classified the error as not worth retrying.
    Permanent(E),
    Exhausted { what: String, attempts: u32, last: E },
    /// The done signal fired while waiting for the next attempt.
    Cancelled { what: String },
}

impl<E: std::fmt::Display> std::fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryError::Permanent(e) => write!(f, "{}", e),
            RetryError::Exhausted { what, attempts, last } => {
                write!(f, "{} failed after {} attempts: {}", what, attempts, last)
            }
            RetryError::Cancelled { what } => write!(f, "{} cancelled", what),
        }
    }
}

impl<E: std::fmt::Debug + std::fmt::Display> std::error::Error for RetryError<E> {}

/// Run `op` until it succeeds, the predicate marks an error permanent, the
/// backoff runs out of time, or `done` fires.
pub fn retry_with<T, E, P, F>(
    policy: &BackoffPolicy,
    what: &str,
    done: &Done,
    is_permanent: P,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
    F: FnMut() -> Result<T, E>,
{
    let mut backoff = ExponentialBackoff::new(*policy);
    let mut attempts: u32 = 0;
    loop {
        if done.is_done() {
            return Err(RetryError::Cancelled { what: what.to_string() });
        }
        attempts += 1;
        let err = match op() {
            Ok(v) => return Ok(v),
            Err(e) => e,
        };
        if is_permanent(&err) {
            tracing::debug!("[s3cp][retry] {} permanent error: {}", what, err);
            return Err(RetryError::Permanent(err));
        }
        let Some(delay) = backoff.next_backoff() else {
            return Err(RetryError::Exhausted { what: what.to_string(), attempts, last: err });
        };
        tracing::warn!(
            "[s3cp][retry] {} attempt={} failed: {}; retrying in {:.3}s",
            what,
            attempts,
            err,
            delay.as_secs_f64()
        );
        if !done.sleep(delay) {
            return Err(RetryError::Cancelled { what: what.to_string() });
        }
    }
}

/// `retry_with` treating every error as transient.
pub fn retry_operation<T, E, F>(
    policy: &BackoffPolicy,
    what: &str,
    done: &Done,
    op: F,
) -> Result<T, RetryError<E>>
where
    E: std::fmt::Display,
    F: FnMut() -> Result<T, E>,
{
    retry_with(policy, what, done, |_| false, op)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::done_signal;

    fn fast() -> BackoffPolicy {
        BackoffPolicy {
            initial_interval: Duration::from_millis(1),
            multiplier: 2.0,
            randomization_factor: 0.0,
            max_interval: Duration::from_millis(4),
            max_elapsed_time: Duration::from_millis(200),
        }
    }

    #[test]
    fn backoff_grows_and_caps() {
        let mut b = ExponentialBackoff::new(fast());
        let delays: Vec<_> = (0..5).filter_map(|_| b.next_backoff()).collect();
        assert_eq!(
            delays,
            vec![1, 2, 4, 4, 4].into_iter().map(Duration::from_millis).collect::<Vec<_>>()
        );
    }

    #[test]
    fn jitter_stays_in_band() {
        for _ in 0..100 {
            let d = jitter(Duration::from_millis(1000), 0.5);
            assert!(d >= Duration::from_millis(500) && d <= Duration::from_millis(1500));
        }
    }

    #[test]
    fn succeeds_after_transient_failures() {
        let mut calls = 0;
        let res: Result<u32, RetryError<String>> =
            retry_operation(&fast(), "op", &Done::never(), || {
                calls += 1;
                if calls < 3 { Err(format!("boom {}", calls)) } else { Ok(calls) }
            });
        assert_eq!(res.expect("eventually ok"), 3);
    }

    #[test]
    fn permanent_error_stops_immediately() {
        let mut calls = 0;
        let res: Result<(), RetryError<&str>> =
            retry_with(&fast(), "op", &Done::never(), |e| *e == "fatal", || {
                calls += 1;
                Err("fatal")
            });
        assert!(matches!(res, Err(RetryError::Permanent("fatal"))));
        assert_eq!(calls, 1);
    }

    #[test]
    fn gives_up_after_max_elapsed() {
        let policy = BackoffPolicy { max_elapsed_time: Duration::from_millis(20), ..fast() };
        let res: Result<(), RetryError<&str>> =
            retry_operation(&policy, "op", &Done::never(), || Err("down"));
        match res {
            Err(RetryError::Exhausted { attempts, last, .. }) => {
                assert!(attempts > 1);
                assert_eq!(last, "down");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn cancellation_interrupts_the_wait() {
        let (canceller, done) = done_signal();
        let policy = BackoffPolicy {
            initial_interval: Duration::from_secs(30),
            max_interval: Duration::from_secs(30),
            ..fast()
        };
        let handle = std::thread::spawn(move || {
            retry_operation::<(), _, _>(&policy, "slow", &done, || Err("down"))
        });
        std::thread::sleep(Duration::from_millis(50));
        canceller.cancel();
        let res = handle.join().expect("join");
        assert!(matches!(res, Err(RetryError::Cancelled { .. })));
    }
}
