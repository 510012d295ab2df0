//! Backoff and retry shared by the command channel, provider polling and
//! session startup.

use std::{future::Future, time::Duration};

use log::debug;
use rand::Rng;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Fraction of the delay, in `[0, 1]`, randomly added or removed.
    pub jitter: f64,
}

impl RetryPolicy {
    /// Per-command retries: three attempts, one second apart.
    pub fn command() -> Self {
        Self {
            max_attempts: Some(3),
            base_delay: Duration::from_secs(1),
            multiplier: 1.0,
            max_delay: Duration::from_secs(1),
            jitter: 0.0,
        }
    }

    /// Reconnects never give up: 1s doubling to a 30s ceiling.
    pub fn reconnect() -> Self {
        Self {
            max_attempts: None,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: 0.0,
        }
    }

    /// Unbounded polling at a fixed interval.
    pub fn poll(delay: Duration) -> Self {
        Self {
            max_attempts: None,
            base_delay: delay,
            multiplier: 1.0,
            max_delay: delay,
            jitter: 0.0,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            policy: self.clone(),
            attempts: 0,
        }
    }
}

/// Mutable walk through a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    attempts: u32,
}

impl Backoff {
    /// Number of failures recorded so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn exhausted(&self) -> bool {
        self.policy
            .max_attempts
            .is_some_and(|max| self.attempts >= max)
    }

    /// Records a failure and returns how long to wait before the next try.
    pub fn next_delay(&mut self) -> Duration {
        let exponent = self.attempts.min(63) as i32;
        self.attempts = self.attempts.saturating_add(1);

        let base = self.policy.base_delay.as_secs_f64();
        let cap = self.policy.max_delay.as_secs_f64();
        let mut delay = (base * self.policy.multiplier.powi(exponent)).min(cap);

        if self.policy.jitter > 0.0 && delay > 0.0 {
            let spread = delay * self.policy.jitter;
            delay = (delay + rand::thread_rng().gen_range(-spread..=spread)).clamp(0.0, cap);
        }

        if delay.is_finite() {
            Duration::from_secs_f64(delay)
        } else {
            self.policy.max_delay
        }
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

/// Runs `op` until it succeeds or the policy's attempt budget runs out,
/// sleeping between attempts. Returns the last error on exhaustion.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, op: F) -> std::result::Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    retry_if(policy, op, |_| true).await
}

/// Like [`retry`], but gives up at once on an error `should_retry` rejects.
pub async fn retry_if<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    mut op: F,
    should_retry: P,
) -> std::result::Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut backoff = policy.backoff();
    loop {
        let attempt = backoff.attempts() + 1;
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if !should_retry(&e) => return Err(e),
            Err(e) => {
                let delay = backoff.next_delay();
                if backoff.exhausted() {
                    return Err(e);
                }
                debug!("attempt {attempt} failed: {e}; retrying in {delay:?}");
                tokio::time::sleep(delay).await;
            }
        }
    }
}
