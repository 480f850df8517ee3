//! Time source used by the retry wrapper and reconnect policy.
//!
//! Production code sleeps on the tokio timer. Tests inject [`ManualClock`],
//! which advances a virtual offset instead of waiting, so backoff bounds can
//! be asserted without wall-clock delays.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Provider of the current instant and of delays.
pub trait Clock: Send + Sync {
	/// Returns the current instant.
	fn now(&self) -> Instant;

	/// Completes after `duration` has elapsed on this clock.
	fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Clock backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
	fn now(&self) -> Instant {
		Instant::now()
	}

	fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
		Box::pin(tokio::time::sleep(duration))
	}
}

/// Virtual clock: every sleep returns immediately and advances `now` by its duration.
#[derive(Debug, Clone)]
pub struct ManualClock {
	base: Instant,
	state: Arc<Mutex<ManualState>>,
}

#[derive(Debug, Default)]
struct ManualState {
	offset: Duration,
	sleeps: Vec<Duration>,
}

impl ManualClock {
	pub fn new() -> Self {
		Self {
			base: Instant::now(),
			state: Arc::new(Mutex::new(ManualState::default())),
		}
	}

	/// Moves the clock forward without recording a sleep.
	pub fn advance(&self, by: Duration) {
		self.state.lock().offset += by;
	}

	/// Returns every sleep requested so far, in order.
	pub fn sleeps(&self) -> Vec<Duration> {
		self.state.lock().sleeps.clone()
	}

	/// Total virtual time elapsed since creation.
	pub fn elapsed(&self) -> Duration {
		self.state.lock().offset
	}
}

impl Default for ManualClock {
	fn default() -> Self {
		Self::new()
	}
}

impl Clock for ManualClock {
	fn now(&self) -> Instant {
		self.base + self.state.lock().offset
	}

	fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
		{
			let mut state = self.state.lock();
			state.offset += duration;
			state.sleeps.push(duration);
		}
		Box::pin(std::future::ready(()))
	}
}
