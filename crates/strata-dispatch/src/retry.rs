//! Bounded exponential backoff for engine calls that report a transient
//! status (busy, group version mismatch).

use std::future::Future;
use std::time::Duration;

use strata_core::Status;
use strata_core::config::RetryConfig;
use strata_engine::{EngineResult, HasStatus};
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    growth_factor: f64,
    max_delay: Duration,
}

impl RetryPolicy {
    /// Never retry.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            growth_factor: 1.0,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let scaled = self.initial_delay.as_millis() as f64 * self.growth_factor.powi(exp);
        let capped = scaled.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped.round() as u64)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `op` until its response status is not busy or attempts run out.
    /// The last response is returned either way.
    pub async fn retry_busy<F, Fut, R>(&self, what: &str, op: F) -> EngineResult<R>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = EngineResult<R>>,
        R: HasStatus,
    {
        self.retry_on(what, &[Status::Busy], op).await
    }

    /// Run `op` while its response status is one of `transient`.
    pub async fn retry_on<F, Fut, R>(
        &self,
        what: &str,
        transient: &[Status],
        mut op: F,
    ) -> EngineResult<R>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = EngineResult<R>>,
        R: HasStatus,
    {
        let mut attempt = 1;
        loop {
            let resp = op().await?;
            let status = resp.status();
            if !transient.contains(&status) || attempt >= self.max_attempts {
                return Ok(resp);
            }
            let delay = self.delay_after(attempt);
            warn!(what, attempt, %status, ?delay, "transient engine status, retrying");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            initial_delay: Duration::from_millis(cfg.initial_delay_ms),
            growth_factor: cfg.growth_factor.max(1.0),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
        }
    }
}
