use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: bool,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter: bool) -> Self {
        Self { base, max, jitter }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let mut rng = rand::thread_rng();
        self.delay_with_rng(attempt, &mut rng)
    }

    pub fn delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base_ms = self.base.as_millis().min(u128::from(u64::MAX)) as u64;
        let max_ms = self.max.as_millis().min(u128::from(u64::MAX)) as u64;
        let shift = attempt.min(16);
        let exp = base_ms.saturating_mul(1u64 << shift).min(max_ms);
        let delay_ms = if self.jitter {
            rng.gen_range(0..=exp)
        } else {
            exp
        };
        Duration::from_millis(delay_ms)
    }
}

/// Bounded retry for requests that never reached the server.
///
/// Only connect and timeout failures are retried, and only for requests whose
/// body can be replayed. Streamed uploads are sent once.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff: Backoff) -> Self {
        Self { attempts, backoff }
    }

    pub fn none() -> Self {
        Self::new(0, Backoff::new(Duration::ZERO, Duration::ZERO, false))
    }

    pub fn is_retryable(err: &reqwest::Error) -> bool {
        err.is_connect() || err.is_timeout()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            2,
            Backoff::new(Duration::from_millis(250), Duration::from_secs(5), true),
        )
    }
}
