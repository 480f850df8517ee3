//! Session readiness state machine.
//!
//! ```text
//! Disconnected -> Connected -> LoggedOn -> AwaitingCoordinator -> Ready
//!       ^______________________________________________________|
//!                         (link lost, from any state)
//! ```
//!
//! The hello probe task exists only while awaiting the coordinator. Starting
//! it, stopping it and entering `Ready` all happen under the same lock as the
//! state change, so a welcome can never race a probe restart.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::error::{Error, Result};

/// Readiness of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
	Disconnected,
	/// Transport link established.
	Connected,
	/// Remote identity accepted.
	LoggedOn,
	/// Probing the coordinator with hellos.
	AwaitingCoordinator,
	/// Coordinator welcomed us; requests may be sent.
	Ready,
}

impl SessionState {
	pub fn is_ready(self) -> bool {
		self == SessionState::Ready
	}
}

struct Inner {
	state: SessionState,
	probe: Option<Probe>,
	next_generation: u64,
}

struct Probe {
	generation: u64,
	task: JoinHandle<()>,
}

impl Inner {
	fn stop_probe(&mut self) {
		if let Some(probe) = self.probe.take() {
			trace!(target = "coord.handshake", generation = probe.generation, "stopping hello probe");
			probe.task.abort();
		}
	}
}

/// Owner of the session state and the hello probe lifecycle.
pub(crate) struct Handshake {
	inner: Mutex<Inner>,
	state_tx: watch::Sender<SessionState>,
	probes_sent: AtomicU64,
}

impl Handshake {
	pub(crate) fn new() -> Self {
		let (state_tx, _) = watch::channel(SessionState::Disconnected);
		Self {
			inner: Mutex::new(Inner {
				state: SessionState::Disconnected,
				probe: None,
				next_generation: 0,
			}),
			state_tx,
			probes_sent: AtomicU64::new(0),
		}
	}

	pub(crate) fn state(&self) -> SessionState {
		self.inner.lock().state
	}

	pub(crate) fn subscribe(&self) -> watch::Receiver<SessionState> {
		self.state_tx.subscribe()
	}

	fn set(&self, inner: &mut Inner, next: SessionState) {
		debug!(target = "coord.handshake", from = ?inner.state, to = ?next, "session state transition");
		inner.state = next;
		self.state_tx.send_replace(next);
	}

	fn advance(&self, from: SessionState, to: SessionState) -> bool {
		let mut inner = self.inner.lock();
		if inner.state != from {
			debug!(target = "coord.handshake", state = ?inner.state, wanted = ?from, next = ?to, "ignoring out-of-order transition");
			return false;
		}
		self.set(&mut inner, to);
		true
	}

	/// Disconnected -> Connected.
	pub(crate) fn on_connected(&self) -> bool {
		self.advance(SessionState::Disconnected, SessionState::Connected)
	}

	/// Connected -> LoggedOn.
	pub(crate) fn on_logged_on(&self) -> bool {
		self.advance(SessionState::Connected, SessionState::LoggedOn)
	}

	/// LoggedOn -> AwaitingCoordinator, starting the probe built by `spawn_probe`.
	///
	/// `spawn_probe` receives the probe generation and runs under the state lock,
	/// so it must only spawn. Returns `false` when not logged on.
	pub(crate) fn begin_awaiting(&self, spawn_probe: impl FnOnce(u64) -> JoinHandle<()>) -> bool {
		let mut inner = self.inner.lock();
		if inner.state != SessionState::LoggedOn {
			return false;
		}
		inner.stop_probe();
		inner.next_generation += 1;
		let generation = inner.next_generation;
		let task = spawn_probe(generation);
		inner.probe = Some(Probe { generation, task });
		self.set(&mut inner, SessionState::AwaitingCoordinator);
		true
	}

	/// AwaitingCoordinator -> Ready, stopping the probe.
	///
	/// Returns `true` only for the welcome that entered readiness; duplicates are no-ops.
	pub(crate) fn on_welcome(&self) -> bool {
		let mut inner = self.inner.lock();
		if inner.state != SessionState::AwaitingCoordinator {
			return false;
		}
		inner.stop_probe();
		self.set(&mut inner, SessionState::Ready);
		true
	}

	/// Any -> Disconnected, stopping the probe. Returns the state left behind.
	pub(crate) fn on_disconnected(&self) -> SessionState {
		let mut inner = self.inner.lock();
		let previous = inner.state;
		inner.stop_probe();
		if previous != SessionState::Disconnected {
			self.set(&mut inner, SessionState::Disconnected);
		}
		previous
	}

	/// Whether the probe of `generation` should keep sending hellos.
	pub(crate) fn probe_is_current(&self, generation: u64) -> bool {
		let inner = self.inner.lock();
		inner.state == SessionState::AwaitingCoordinator && inner.probe.as_ref().is_some_and(|p| p.generation == generation)
	}

	pub(crate) fn probe_active(&self) -> bool {
		self.inner.lock().probe.is_some()
	}

	pub(crate) fn record_probe(&self) -> u64 {
		self.probes_sent.fetch_add(1, Ordering::Relaxed) + 1
	}

	pub(crate) fn probes_sent(&self) -> u64 {
		self.probes_sent.load(Ordering::Relaxed)
	}

	/// Waits until the state is `Ready`, failing with `ReadyTimeout` after `timeout`.
	pub(crate) async fn wait_ready(&self, timeout: Duration) -> Result<()> {
		let mut rx = self.subscribe();
		match tokio::time::timeout(timeout, rx.wait_for(|state| state.is_ready())).await {
			Ok(Ok(_)) => Ok(()),
			Ok(Err(_)) => Err(Error::Disconnected),
			Err(_) => Err(Error::ReadyTimeout(timeout)),
		}
	}
}

impl Drop for Handshake {
	fn drop(&mut self) {
		self.inner.get_mut().stop_probe();
	}
}
