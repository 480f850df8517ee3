//! Retry with exponential backoff.
//!
//! Each attempt re-issues the whole request with a freshly built message, so
//! every attempt gets its own job id. Only transient failures (`Timeout`,
//! `SendFailed`) are retried. `NotReady` and `Disconnected` surface at once:
//! retrying against a known-bad session is wasted work, and callers are
//! expected to reconnect first.
//!
//! # Usage
//!
//! ```rust,ignore
//! let policy = RetryPolicy::default();
//! let reply = session
//!     .call_with_retry(|| OutboundMessage::new(app, MATCH_DETAILS, body.clone()), timeout, &policy)
//!     .await?;
//! ```

use std::future::Future;
use std::time::Duration;

use coord_protocol::{InboundPacket, OutboundMessage};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::session::SessionManager;

/// Backoff configuration for one logical call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
	/// Delay before the first retry.
	pub base_delay_ms: u64,
	/// Factor applied to the delay after each retry.
	pub multiplier: f64,
	/// Cap on any single delay.
	pub max_delay_ms: u64,
	/// Total attempts, including the first.
	pub max_attempts: Option<u32>,
	/// Give up once this much time has passed since the first attempt.
	pub max_elapsed_ms: Option<u64>,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			base_delay_ms: 100,
			multiplier: 2.0,
			max_delay_ms: 5_000,
			max_attempts: Some(3),
			max_elapsed_ms: None,
		}
	}
}

impl RetryPolicy {
	/// Policy bounded by attempt count.
	pub fn new(base_delay: Duration, multiplier: f64, max_delay: Duration, max_attempts: u32) -> Self {
		Self {
			base_delay_ms: duration_ms(base_delay),
			multiplier: multiplier.max(1.0),
			max_delay_ms: duration_ms(max_delay),
			max_attempts: Some(max_attempts.max(1)),
			max_elapsed_ms: None,
		}
	}

	/// A single attempt, no retries.
	pub fn once() -> Self {
		Self {
			max_attempts: Some(1),
			..Self::default()
		}
	}

	/// Generous policy for calls that must land: 6 attempts, 500ms doubling to 30s, one minute overall.
	pub fn patient() -> Self {
		Self {
			base_delay_ms: 500,
			multiplier: 2.0,
			max_delay_ms: 30_000,
			max_attempts: Some(6),
			max_elapsed_ms: Some(60_000),
		}
	}

	/// Additionally bounds the total elapsed time.
	pub fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
		self.max_elapsed_ms = Some(duration_ms(max_elapsed));
		self
	}

	/// Rejects policies that could retry forever or never back off sensibly.
	pub fn validate(&self) -> Result<()> {
		if self.max_attempts.is_none() && self.max_elapsed_ms.is_none() {
			return Err(Error::Config("retry policy needs max_attempts or max_elapsed_ms".into()));
		}
		if self.max_attempts == Some(0) {
			return Err(Error::Config("retry max_attempts must be at least 1".into()));
		}
		if self.multiplier.is_nan() || self.multiplier < 1.0 {
			return Err(Error::Config("retry multiplier must be >= 1.0".into()));
		}
		Ok(())
	}

	/// Delay after the `retry`-th failure (0-indexed), capped at `max_delay_ms`.
	pub fn delay_for_attempt(&self, retry: u32) -> Duration {
		// Cap the exponent; 2^31 of anything is already beyond any cap.
		let exp = retry.min(31) as i32;
		let delay_ms = (self.base_delay_ms as f64) * self.multiplier.powi(exp);
		let delay_ms = delay_ms.min(self.max_delay_ms as f64).max(0.0);
		Duration::from_millis(delay_ms as u64)
	}

	fn max_elapsed(&self) -> Option<Duration> {
		self.max_elapsed_ms.map(Duration::from_millis)
	}

	fn exhausted(&self, attempts: u32, elapsed_after_delay: Duration) -> bool {
		self.max_attempts.is_some_and(|max| attempts >= max) || self.max_elapsed().is_some_and(|max| elapsed_after_delay > max)
	}
}

fn duration_ms(duration: Duration) -> u64 {
	u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Runs `operation` until it succeeds, fails non-transiently, or `policy` is exhausted.
///
/// `operation` receives the 1-based attempt number. Exhaustion yields
/// `RetriesExhausted` wrapping the last transient error. A policy that fails
/// [`RetryPolicy::validate`] is rejected before the first attempt.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, clock: &dyn Clock, mut operation: F) -> Result<T>
where
	F: FnMut(u32) -> Fut,
	Fut: Future<Output = Result<T>>,
{
	policy.validate()?;
	let start = clock.now();
	let mut attempt = 0u32;

	loop {
		attempt += 1;
		match operation(attempt).await {
			Ok(value) => {
				if attempt > 1 {
					debug!(target = "coord.retry", total_attempts = attempt, "operation succeeded after retries");
				}
				return Ok(value);
			}
			Err(e) if !e.is_transient() => return Err(e),
			Err(e) => {
				let delay = policy.delay_for_attempt(attempt - 1);
				let elapsed = clock.now().saturating_duration_since(start);
				if policy.exhausted(attempt, elapsed + delay) {
					warn!(target = "coord.retry", attempt, error = %e, "operation failed after all retry attempts");
					return Err(Error::RetriesExhausted {
						attempts: attempt,
						source: Box::new(e),
					});
				}
				debug!(
					target = "coord.retry",
					attempt,
					delay_ms = duration_ms(delay),
					error = %e,
					"retrying operation after failure"
				);
				clock.sleep(delay).await;
			}
		}
	}
}

impl SessionManager {
	/// Issues a correlated request, re-building and re-sending it on transient failure.
	///
	/// `build` is invoked once per attempt; each attempt is assigned a new job id.
	pub async fn call_with_retry<F>(&self, mut build: F, timeout: Duration, policy: &RetryPolicy) -> Result<InboundPacket>
	where
		F: FnMut() -> OutboundMessage,
	{
		let clock = self.clock();
		with_retry(policy, clock.as_ref(), |_| self.call_with_timeout(build(), timeout)).await
	}

	/// [`call_with_retry`](Self::call_with_retry) with the configured job timeout and policy.
	pub async fn call_retrying<F>(&self, build: F) -> Result<InboundPacket>
	where
		F: FnMut() -> OutboundMessage,
	{
		let config = self.config();
		self.call_with_retry(build, config.job_timeout(), &config.retry).await
	}
}
