//! Session manager: the object callers interact with.
//!
//! It owns the job table, the job allocator, the handshake state and the
//! reconnect policy, and turns the transport's event stream into ordinary
//! awaitable request/reply calls.
//!
//! # Message Flow
//!
//! 1. Caller invokes [`SessionManager::call`] with an outbound message
//! 2. The manager checks readiness, allocates a job id and stamps it on the message
//! 3. A reply slot is registered and the message is written through the transport
//! 4. The caller awaits the slot, bounded by the job timeout
//! 5. The dispatch loop ([`SessionManager::run`]) receives the reply packet
//! 6. The packet is correlated by its target job and handed to the slot
//! 7. The caller receives the packet
//!
//! # Thread Safety
//!
//! `SessionManager` is a cheap handle around shared state and can be cloned
//! into any number of tasks. The job table and the session state each sit
//! behind their own lock and are never locked together. Every transport
//! operation is serialized behind one async mutex.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use coord_protocol::{Credentials, InboundPacket, JobId, MsgType, OutboundMessage};
use parking_lot::Mutex as SyncMutex;
use serde::Serialize;
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, TokioClock};
use crate::config::SessionConfig;
use crate::dispatch::{Dispatcher, PacketHandler, Routed};
use crate::error::{Error, Result};
use crate::handshake::{Handshake, SessionState};
use crate::jobs::{JobAllocator, JobGuard, JobTable};
use crate::transport::{Transport, TransportEvent, TransportParts};

/// Capacity of the lifecycle event broadcast; slow subscribers observe `Lagged`.
const EVENT_CAPACITY: usize = 64;

/// Lifecycle notification published to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
	Connected,
	LoggedOn,
	/// The handshake completed. Published once per entry into `Ready`.
	CoordinatorReady,
	/// The link was lost.
	Disconnected,
	/// The session was closed by [`SessionManager::disconnect`].
	Closed,
	LogOnFailed { reason: String },
	/// Re-establishing the link after a loss failed for good.
	ReconnectFailed,
	Fatal(String),
}

/// Point-in-time diagnostic snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
	pub state: SessionState,
	pub outstanding_jobs: usize,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub last_job_id: Option<JobId>,
	pub probe_active: bool,
	pub probes_sent: u64,
	/// Replies dropped because their job had already completed, timed out or never existed.
	pub late_replies: u64,
	pub reconnects: u64,
}

struct Shared {
	config: SessionConfig,
	clock: Arc<dyn Clock>,
	jobs: JobTable,
	allocator: JobAllocator,
	handshake: Handshake,
	dispatcher: Dispatcher,
	transport: Mutex<Box<dyn Transport>>,
	transport_events: SyncMutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
	credentials: SyncMutex<Option<Credentials>>,
	events: broadcast::Sender<SessionEvent>,
	closed_by_user: AtomicBool,
	reconnecting: AtomicBool,
	reconnects: AtomicU64,
	late_replies: AtomicU64,
}

impl Shared {
	fn emit(&self, event: SessionEvent) {
		// No subscribers is fine.
		let _ = self.events.send(event);
	}
}

/// Handle to one coordinator session.
#[derive(Clone)]
pub struct SessionManager {
	shared: Arc<Shared>,
}

impl SessionManager {
	/// Creates a manager over `parts` using the tokio clock.
	///
	/// Fails with `Config` when `config` does not pass [`SessionConfig::validate`].
	pub fn new(parts: TransportParts, config: SessionConfig) -> Result<Self> {
		Self::with_clock(parts, config, Arc::new(TokioClock))
	}

	/// Creates a manager whose backoff and reconnect delays come from `clock`.
	pub fn with_clock(parts: TransportParts, config: SessionConfig, clock: Arc<dyn Clock>) -> Result<Self> {
		config.validate()?;
		let (events, _) = broadcast::channel(EVENT_CAPACITY);
		let dispatcher = Dispatcher::new(config.app_id);
		Ok(Self {
			shared: Arc::new(Shared {
				config,
				clock,
				jobs: JobTable::new(),
				allocator: JobAllocator::new(),
				handshake: Handshake::new(),
				dispatcher,
				transport: Mutex::new(parts.transport),
				transport_events: SyncMutex::new(Some(parts.events)),
				credentials: SyncMutex::new(None),
				events,
				closed_by_user: AtomicBool::new(false),
				reconnecting: AtomicBool::new(false),
				reconnects: AtomicU64::new(0),
				late_replies: AtomicU64::new(0),
			}),
		})
	}

	pub fn config(&self) -> &SessionConfig {
		&self.shared.config
	}

	pub(crate) fn clock(&self) -> Arc<dyn Clock> {
		Arc::clone(&self.shared.clock)
	}

	/// Spawns [`run`](Self::run) on the current runtime.
	pub fn spawn(&self) -> JoinHandle<()> {
		let session = self.clone();
		tokio::spawn(async move { session.run().await })
	}

	/// Runs the dispatch loop until the transport event stream ends.
	///
	/// This is the single consumer of inbound events. Only the first call
	/// does anything; later calls return immediately.
	pub async fn run(&self) {
		let Some(mut events) = self.shared.transport_events.lock().take() else {
			error!(target = "coord.session", "dispatch loop already running");
			return;
		};

		while let Some(event) = events.recv().await {
			self.handle_event(event).await;
		}

		debug!(target = "coord.session", "transport event stream ended");
		self.tear_down(SessionEvent::Disconnected);
	}

	async fn handle_event(&self, event: TransportEvent) {
		match event {
			TransportEvent::Connected => {
				if self.shared.handshake.on_connected() {
					info!(target = "coord.session", "connected to transport");
					self.shared.emit(SessionEvent::Connected);
					self.log_on().await;
				}
			}
			TransportEvent::LoggedOn => {
				if self.shared.handshake.on_logged_on() {
					info!(target = "coord.session", "logged on");
					self.shared.emit(SessionEvent::LoggedOn);
					if self.shared.config.auto_handshake {
						if let Err(e) = self.start_handshake().await {
							warn!(target = "coord.session", error = %e, "failed to start coordinator handshake");
						}
					}
				}
			}
			TransportEvent::LogOnFailed { reason } => {
				warn!(target = "coord.session", %reason, "log on failed");
				self.shared.emit(SessionEvent::LogOnFailed { reason });
			}
			TransportEvent::LoggedOff { reason } => {
				info!(target = "coord.session", %reason, "logged off");
			}
			TransportEvent::Disconnected => self.on_link_lost(),
			TransportEvent::FatalError(message) => {
				error!(target = "coord.session", %message, "transport fatal error");
				self.shared.emit(SessionEvent::Fatal(message));
			}
			TransportEvent::Packet(packet) => self.route(packet),
		}
	}

	fn route(&self, packet: InboundPacket) {
		match self.shared.dispatcher.route(packet, &self.shared.jobs) {
			Routed::Welcome => {
				if self.shared.handshake.on_welcome() {
					info!(target = "coord.session", app_id = %self.shared.config.app_id, "coordinator ready");
					self.shared.emit(SessionEvent::CoordinatorReady);
				} else {
					debug!(target = "coord.session", state = ?self.state(), "ignoring welcome outside handshake");
				}
			}
			Routed::LateReply { job_id, msg_type } => {
				let late_replies = self.shared.late_replies.fetch_add(1, Ordering::Relaxed) + 1;
				debug!(target = "coord.session", %job_id, %msg_type, late_replies, "dropping reply for unknown or expired job");
			}
			Routed::ForeignApp | Routed::Reply | Routed::Handled | Routed::Unhandled => {}
		}
	}

	async fn log_on(&self) {
		let credentials = self.shared.credentials.lock().clone();
		let Some(credentials) = credentials else {
			warn!(target = "coord.session", "connected without credentials; not logging on");
			return;
		};
		info!(target = "coord.session", username = %credentials.username, "logging on");
		if let Err(e) = self.shared.transport.lock().await.log_on(credentials).await {
			warn!(target = "coord.session", error = %e, "log on request failed");
		}
	}

	/// Fails outstanding jobs and resets to `Disconnected`. Returns the state left behind.
	fn tear_down(&self, event: SessionEvent) -> SessionState {
		let previous = self.shared.handshake.on_disconnected();
		let failed = self.shared.jobs.fail_all(|| Error::Disconnected);
		let changed = previous != SessionState::Disconnected || failed > 0;
		if changed {
			info!(target = "coord.session", from = ?previous, failed_jobs = failed, "session disconnected");
		}
		if changed || event == SessionEvent::Closed {
			self.shared.emit(event);
		}
		previous
	}

	fn on_link_lost(&self) {
		let previous = self.tear_down(SessionEvent::Disconnected);
		if self.shared.closed_by_user.load(Ordering::SeqCst) {
			return;
		}
		if previous == SessionState::Disconnected {
			// Nothing was up, so nothing to re-establish.
			return;
		}
		if !self.shared.config.reconnect.enabled {
			info!(target = "coord.session", "reconnect disabled");
			return;
		}
		if self.shared.reconnecting.swap(true, Ordering::SeqCst) {
			return;
		}
		let session = self.clone();
		tokio::spawn(async move { session.reconnect().await });
	}

	async fn reconnect(&self) {
		let policy = self.shared.config.reconnect.clone();
		for attempt in 1..=policy.max_attempts {
			if attempt > 1 {
				self.shared.clock.sleep(policy.delay()).await;
			}
			if self.shared.closed_by_user.load(Ordering::SeqCst) {
				debug!(target = "coord.session", "reconnect abandoned after close");
				self.shared.reconnecting.store(false, Ordering::SeqCst);
				return;
			}
			info!(target = "coord.session", attempt, max_attempts = policy.max_attempts, "reconnecting");
			let result = self.shared.transport.lock().await.connect().await;
			match result {
				Ok(()) => {
					self.shared.reconnects.fetch_add(1, Ordering::Relaxed);
					self.shared.reconnecting.store(false, Ordering::SeqCst);
					return;
				}
				Err(e) => warn!(target = "coord.session", attempt, error = %e, "reconnect attempt failed"),
			}
		}
		self.shared.reconnecting.store(false, Ordering::SeqCst);
		error!(target = "coord.session", attempts = policy.max_attempts, "giving up on reconnect");
		self.shared.emit(SessionEvent::ReconnectFailed);
	}

	/// Connects, logs on and waits for the coordinator to become ready.
	///
	/// With `auto_handshake` disabled this returns once logged on, leaving
	/// [`start_handshake`](Self::start_handshake) and
	/// [`wait_ready`](Self::wait_ready) to the caller.
	///
	/// Fails with `ReadyTimeout` when readiness is not reached within the
	/// configured bound, `LogOnFailed` when the transport refuses the
	/// credentials, and `Disconnected` when the session is closed meanwhile.
	pub async fn connect(&self, credentials: Credentials) -> Result<()> {
		if let Some(field) = credentials.missing_field() {
			return Err(Error::InvalidCredentials(field));
		}
		info!(target = "coord.session", username = %credentials.username, "connecting");
		*self.shared.credentials.lock() = Some(credentials);
		self.shared.closed_by_user.store(false, Ordering::SeqCst);

		// Subscribe before connecting so no outcome can be missed.
		let mut events = self.subscribe();
		let mut state = self.shared.handshake.subscribe();

		if self.state() == SessionState::Disconnected {
			let result = self.shared.transport.lock().await.connect().await;
			result.map_err(|e| Error::Transport(format!("error connecting: {e}")))?;
		}

		let auto_handshake = self.shared.config.auto_handshake;
		let reached = move |s: &SessionState| {
			if auto_handshake {
				s.is_ready()
			} else {
				matches!(s, SessionState::LoggedOn | SessionState::AwaitingCoordinator | SessionState::Ready)
			}
		};
		let timeout = self.shared.config.ready_timeout();
		let outcome = tokio::time::timeout(timeout, async {
			loop {
				tokio::select! {
					ready = async { state.wait_for(reached).await.map(|_| ()) } => {
						return ready.map_err(|_| Error::Disconnected);
					}
					event = events.recv() => match event {
						Ok(SessionEvent::LogOnFailed { reason }) => return Err(Error::LogOnFailed(reason)),
						Ok(SessionEvent::Closed | SessionEvent::ReconnectFailed) => return Err(Error::Disconnected),
						Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
						Err(broadcast::error::RecvError::Closed) => return Err(Error::Disconnected),
					},
				}
			}
		})
		.await;

		match outcome {
			Ok(result) => result,
			Err(_) => {
				warn!(target = "coord.session", timeout_ms = timeout.as_millis() as u64, "timeout waiting for coordinator");
				Err(Error::ReadyTimeout(timeout))
			}
		}
	}

	/// Builds credentials from login fields and connects.
	///
	/// `sentry` is the base64 machine hash from a previous session; an empty
	/// string means none, and an undecodable one is logged and ignored.
	pub async fn connect_with_login(&self, username: &str, password: &str, sentry: &str, auth_code: &str) -> Result<()> {
		let mut credentials = Credentials::new(username, password);
		if !auth_code.is_empty() {
			credentials = credentials.with_auth_code(auth_code);
		}
		if !sentry.is_empty() {
			match credentials.clone().with_sentry_base64(sentry) {
				Ok(with_sentry) => credentials = with_sentry,
				Err(e) => warn!(target = "coord.session", error = %e, "error decoding sentry; continuing without it"),
			}
		}
		self.connect(credentials).await
	}

	/// Closes the session: outstanding jobs fail immediately and no reconnect follows.
	pub async fn disconnect(&self) -> Result<()> {
		info!(target = "coord.session", "disconnecting");
		self.shared.closed_by_user.store(true, Ordering::SeqCst);
		self.tear_down(SessionEvent::Closed);
		self.shared.transport.lock().await.disconnect().await
	}

	/// Declares intent to use the coordinator and starts the hello probe.
	///
	/// Idempotent once the handshake is under way. Fails with `NotReady`
	/// before log-on.
	pub async fn start_handshake(&self) -> Result<()> {
		match self.state() {
			SessionState::AwaitingCoordinator | SessionState::Ready => return Ok(()),
			SessionState::LoggedOn => {}
			SessionState::Disconnected | SessionState::Connected => return Err(Error::NotReady),
		}

		let app_id = self.shared.config.app_id;
		info!(target = "coord.handshake", %app_id, "setting games played");
		self.shared.transport.lock().await.set_games_played(Some(app_id)).await?;

		let shared = Arc::clone(&self.shared);
		let started = self
			.shared
			.handshake
			.begin_awaiting(move |generation| tokio::spawn(run_probe(shared, generation)));
		if !started {
			debug!(target = "coord.handshake", state = ?self.state(), "handshake not started; state moved on");
		}
		Ok(())
	}

	/// Issues a correlated request bounded by the configured job timeout.
	pub async fn call(&self, message: OutboundMessage) -> Result<InboundPacket> {
		self.call_with_timeout(message, self.shared.config.job_timeout()).await
	}

	/// Issues a correlated request and waits up to `timeout` for its reply.
	///
	/// Exactly one outcome is produced per call, and the job table entry is
	/// gone when this returns, on every path including the future being dropped.
	pub async fn call_with_timeout(&self, message: OutboundMessage, timeout: Duration) -> Result<InboundPacket> {
		if !self.is_ready() {
			return Err(Error::NotReady);
		}

		let jobs = &self.shared.jobs;
		let job_id = self.shared.allocator.next_id();
		let message = message.with_source_job(job_id);
		let msg_type = message.msg_type;
		let mut slot = jobs.register(job_id)?;
		let guard = JobGuard::new(jobs, job_id);

		// Disconnect flips the state before draining the table, so seeing Ready
		// here means any later drain will include this job.
		if !self.is_ready() {
			guard.cancel();
			return Err(Error::NotReady);
		}

		debug!(target = "coord.jobs", %job_id, %msg_type, "sending job");
		let sent = self.shared.transport.lock().await.send(message).await;
		if let Err(e) = sent {
			guard.cancel();
			warn!(target = "coord.jobs", %job_id, error = %e, "job send failed");
			return Err(match e {
				Error::SendFailed(reason) => Error::SendFailed(reason),
				other => Error::SendFailed(other.to_string()),
			});
		}

		match tokio::time::timeout(timeout, &mut slot).await {
			Ok(delivery) => {
				guard.disarm();
				delivery
			}
			Err(_) => guard.expire(&mut slot, timeout),
		}
	}

	/// Current session state.
	pub fn state(&self) -> SessionState {
		self.shared.handshake.state()
	}

	pub fn is_ready(&self) -> bool {
		self.state().is_ready()
	}

	/// Watches session state changes.
	pub fn watch_state(&self) -> watch::Receiver<SessionState> {
		self.shared.handshake.subscribe()
	}

	/// Waits until the coordinator is ready, failing with `ReadyTimeout` after `timeout`.
	pub async fn wait_ready(&self, timeout: Duration) -> Result<()> {
		self.shared.handshake.wait_ready(timeout).await
	}

	/// Subscribes to lifecycle events.
	pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
		self.shared.events.subscribe()
	}

	/// Installs a handler for unsolicited packets of `msg_type`.
	pub fn register_handler<F>(&self, msg_type: MsgType, handler: F) -> Result<()>
	where
		F: Fn(&InboundPacket) + Send + Sync + 'static,
	{
		let handler: PacketHandler = Arc::new(handler);
		self.shared.dispatcher.register(msg_type, handler)
	}

	/// Whether `job_id` is still awaiting its reply.
	pub fn is_outstanding(&self, job_id: JobId) -> bool {
		self.shared.jobs.contains(job_id)
	}

	pub fn outstanding_jobs(&self) -> usize {
		self.shared.jobs.len()
	}

	pub fn status(&self) -> SessionStatus {
		SessionStatus {
			state: self.state(),
			outstanding_jobs: self.shared.jobs.len(),
			last_job_id: self.shared.allocator.last_id(),
			probe_active: self.shared.handshake.probe_active(),
			probes_sent: self.shared.handshake.probes_sent(),
			late_replies: self.shared.late_replies.load(Ordering::Relaxed),
			reconnects: self.shared.reconnects.load(Ordering::Relaxed),
		}
	}
}

/// Sends a hello immediately and then every probe interval until the probe is stopped.
async fn run_probe(shared: Arc<Shared>, generation: u64) {
	let mut ticker = tokio::time::interval(shared.config.probe_interval());
	ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
	loop {
		ticker.tick().await;
		if !shared.handshake.probe_is_current(generation) {
			break;
		}
		let mut transport = shared.transport.lock().await;
		// A welcome may have been handled while waiting for the transport.
		if !shared.handshake.probe_is_current(generation) {
			break;
		}
		let hello = OutboundMessage::new(shared.config.app_id, MsgType::CLIENT_HELLO, shared.config.hello_body.clone());
		let sent = transport.send(hello).await;
		drop(transport);
		match sent {
			Ok(()) => {
				let count = shared.handshake.record_probe();
				info!(target = "coord.handshake", generation, probes_sent = count, "sent client hello");
			}
			Err(e) => warn!(target = "coord.handshake", generation, error = %e, "failed to send client hello"),
		}
	}
}
