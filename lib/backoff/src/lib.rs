use std::time::Duration;

/// How long a retry sequence is allowed to run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Limit {
    Forever,
    Attempts(u32),
}

#[derive(Clone, Copy, Debug)]
enum Shape {
    Fixed,
    Exponential {
        multiplier: u32,
        max_delay: Duration,
    },
}

/// A retry policy with a delay shape, an attempt limit and optional jitter.
///
/// The policy itself is an immutable value and holds no cursor. Callers keep
/// their own attempt counter and ask for the delay of a given attempt, which
/// makes one policy safely shareable between any number of tasks.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    initial: Duration,
    shape: Shape,
    limit: Limit,
    jitter: f64,
}

impl RetryPolicy {
    /// Constructs a policy that waits the same `delay` before every attempt.
    pub const fn fixed(delay: Duration) -> RetryPolicy {
        RetryPolicy {
            initial: delay,
            shape: Shape::Fixed,
            limit: Limit::Forever,
            jitter: 0.0,
        }
    }

    /// Constructs an exponential policy.
    ///
    /// Attempt `n` waits `initial * multiplier^(n - 1)`, clamped at
    /// `max_delay`. The arithmetic saturates instead of overflowing.
    pub const fn exponential(initial: Duration, multiplier: u32, max_delay: Duration) -> RetryPolicy {
        RetryPolicy {
            initial,
            shape: Shape::Exponential {
                multiplier,
                max_delay,
            },
            limit: Limit::Forever,
            jitter: 0.0,
        }
    }

    /// A policy that never allows a retry. The first failure is final.
    pub const fn never() -> RetryPolicy {
        RetryPolicy {
            initial: Duration::ZERO,
            shape: Shape::Fixed,
            limit: Limit::Attempts(0),
            jitter: 0.0,
        }
    }

    /// Bound the policy to `limit` attempts in total. Once that many attempts
    /// have failed, `delay` yields `None` and no further attempt is allowed.
    pub const fn max_attempts(mut self, limit: u32) -> RetryPolicy {
        self.limit = Limit::Attempts(limit);
        self
    }

    /// Add up to `fraction` of the computed delay as a random perturbation,
    /// so that many clients which failed together do not reconnect together.
    ///
    /// The jittered delay is never shorter than the computed one.
    pub const fn jitter(mut self, fraction: f64) -> RetryPolicy {
        self.jitter = fraction;
        self
    }

    /// The delay to wait after the 1-based `attempt` has failed, before the
    /// next one, or `None` when `attempt` was the last allowed.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if let Limit::Attempts(limit) = self.limit {
            if attempt >= limit {
                return None;
            }
        }

        let delay = self.base_delay(attempt);
        if self.jitter > 0.0 {
            let perturbation = delay.mul_f64(self.jitter * rand::random::<f64>());
            Some(delay.saturating_add(perturbation))
        } else {
            Some(delay)
        }
    }

    /// Sleep out the delay that follows a failed `attempt`. Returns false
    /// without sleeping if the attempt limit is exhausted.
    pub async fn wait(&self, attempt: u32) -> bool {
        match self.delay(attempt) {
            Some(delay) => {
                tokio::time::sleep(delay).await;
                true
            }
            None => false,
        }
    }

    fn base_delay(&self, attempt: u32) -> Duration {
        match self.shape {
            Shape::Fixed => self.initial,
            Shape::Exponential {
                multiplier,
                max_delay,
            } => {
                let initial = self.initial.as_millis() as u64;
                let millis = (multiplier as u64)
                    .checked_pow(attempt.saturating_sub(1))
                    .and_then(|factor| factor.checked_mul(initial));

                match millis {
                    Some(millis) => {
                        let delay = Duration::from_millis(millis);
                        if delay > max_delay { max_delay } else { delay }
                    }
                    // overflow, the ceiling applies long before this
                    None => max_delay,
                }
            }
        }
    }
}
