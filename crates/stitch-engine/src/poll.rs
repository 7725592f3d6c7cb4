// Bounded-poll utility: await-with-timeout-and-fallback.
//
// Readiness in this engine is observed, not signalled: media handles expose
// ready state and buffered depth, and several call sites (preload readiness,
// buffering recovery, probe warm-up) need to wait for a condition with a
// bound, then proceed with a fallback rather than hang. This is the one
// shared implementation of that pattern.

use crate::error::EngineError;
use rand::RngExt;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Bounds for a cooperative polling wait.
#[derive(Debug, Clone)]
pub struct PollPolicy {
    /// Maximum number of probe attempts before giving up.
    pub max_attempts: u32,
    /// Delay between attempts.
    pub interval: Duration,
    /// When true, adds random jitter of [0, interval/2) between attempts so
    /// several concurrent waiters do not probe in lockstep.
    pub jitter: bool,
}

impl PollPolicy {
    /// Policy that spends roughly `budget` in `interval`-sized attempts.
    pub fn from_budget(budget: Duration, interval: Duration) -> Self {
        let interval = interval.max(Duration::from_millis(1));
        let max_attempts = (budget.as_millis() / interval.as_millis()).max(1) as u32;
        Self {
            max_attempts,
            interval,
            jitter: false,
        }
    }

    fn delay(&self) -> Duration {
        if !self.jitter {
            return self.interval;
        }
        let half = (self.interval.as_millis() / 2) as u64;
        if half == 0 {
            return self.interval;
        }
        self.interval + Duration::from_millis(rand::rng().random_range(0..half))
    }
}

/// Outcome of a bounded poll: the condition was met, or the budget ran out
/// and the caller proceeds with its fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Ready(T),
    TimedOut,
}

impl<T> PollOutcome<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

/// Poll `probe` up to `policy.max_attempts` times, sleeping between
/// attempts, until it yields `Some`. Cancellation aborts the wait with
/// [`EngineError::Cancelled`]; exhausting the budget is not an error, it is
/// the signal to fall back.
pub async fn poll_until<F, Fut, T>(
    policy: &PollPolicy,
    token: &CancellationToken,
    mut probe: F,
) -> Result<PollOutcome<T>, EngineError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for attempt in 0..policy.max_attempts {
        if token.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        if let Some(value) = probe(attempt).await {
            return Ok(PollOutcome::Ready(value));
        }
        if attempt + 1 < policy.max_attempts {
            tokio::select! {
                _ = token.cancelled() => return Err(EngineError::Cancelled),
                _ = tokio::time::sleep(policy.delay()) => {}
            }
        }
    }
    Ok(PollOutcome::TimedOut)
}
